//! Mapping content hashes to storage locations

use crate::integrity::ContentHash;

/// Derives the backend-relative location of a blob from its hash
pub trait FileLocator: Send + Sync {
    fn locate(&self, hash: &ContentHash) -> String;
}

/// Fans blobs out into nested directories named after hash prefixes
///
/// With the defaults (two levels, two hex chars each) a hash `abcdef...`
/// lives at `ab/cd/abcdef...`, giving 256 directories per level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashFileLocator {
    levels: usize,
    width: usize,
}

impl HashFileLocator {
    pub fn new(levels: usize, width: usize) -> Self {
        let width = width.clamp(1, ContentHash::HEX_LEN);
        let levels = levels.min(ContentHash::HEX_LEN / width);
        Self { levels, width }
    }

    /// Number of directories per level
    pub fn fan_out(&self) -> usize {
        16usize.pow(self.width as u32)
    }
}

impl Default for HashFileLocator {
    fn default() -> Self {
        Self::new(2, 2)
    }
}

impl FileLocator for HashFileLocator {
    fn locate(&self, hash: &ContentHash) -> String {
        let hex = hash.to_hex();
        let mut path = String::with_capacity(hex.len() + self.levels * (self.width + 1));
        for level in 0..self.levels {
            path.push_str(&hex[level * self.width..(level + 1) * self.width]);
            path.push('/');
        }
        path.push_str(&hex);
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::IntegrityVerifier;
    use std::collections::HashSet;

    #[test]
    fn test_default_layout() {
        let hash = IntegrityVerifier::calculate_digests(b"abc").sha256;
        let location = HashFileLocator::default().locate(&hash);
        assert_eq!(
            location,
            "ba/78/ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_deterministic_and_collision_free() {
        let locator = HashFileLocator::default();
        let mut seen = HashSet::new();
        let mut first_level = HashSet::new();

        for i in 0..2000u32 {
            let hash = IntegrityVerifier::calculate_digests(&i.to_le_bytes()).sha256;
            let location = locator.locate(&hash);
            assert_eq!(location, locator.locate(&hash));
            assert!(location.ends_with(&hash.to_hex()));
            first_level.insert(location[..2].to_string());
            assert!(seen.insert(location));
        }

        // 2000 random hashes should land in most of the 256 buckets
        assert!(first_level.len() > 200, "only {} buckets", first_level.len());
        assert!(first_level.len() <= locator.fan_out());
    }

    #[test]
    fn test_custom_depth() {
        let hash = IntegrityVerifier::calculate_digests(b"abc").sha256;
        assert_eq!(HashFileLocator::new(1, 3).locate(&hash), format!("ba7/{}", hash));
        assert_eq!(HashFileLocator::new(0, 2).locate(&hash), hash.to_hex());
    }
}
