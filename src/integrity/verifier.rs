use crate::integrity::error::{IntegrityError, IntegrityResult};
use crate::integrity::types::{ContentDigests, ContentHash};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Length of the truncated BLAKE3 hash used as a block's strong checksum
pub const STRONG_HASH_LEN: usize = 16;

/// Incremental SHA-256 + MD5 + length over a byte stream
#[derive(Clone)]
pub struct ContentDigester {
    sha256: Sha256,
    md5: Md5,
    size: u64,
}

impl ContentDigester {
    pub fn new() -> Self {
        Self {
            sha256: Sha256::new(),
            md5: Md5::new(),
            size: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.sha256.update(data);
        self.md5.update(data);
        self.size += data.len() as u64;
    }

    pub fn finalize(self) -> ContentDigests {
        let mut sha256 = [0u8; 32];
        sha256.copy_from_slice(&self.sha256.finalize());
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&self.md5.finalize());

        ContentDigests {
            sha256: ContentHash::from_bytes(sha256),
            md5,
            size: self.size,
        }
    }
}

impl Default for ContentDigester {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for ContentDigester {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reader adapter that digests everything read through it
pub struct HashingReader<R> {
    inner: R,
    digester: ContentDigester,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            digester: ContentDigester::new(),
        }
    }

    pub fn finalize(self) -> ContentDigests {
        self.digester.finalize()
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.digester.update(&buf[..n]);
        Ok(n)
    }
}

pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// Calculate all content digests for a byte slice
    pub fn calculate_digests(data: &[u8]) -> ContentDigests {
        let mut digester = ContentDigester::new();
        digester.update(data);
        digester.finalize()
    }

    /// Calculate content digests for a file (streaming)
    pub async fn calculate_file_digests(path: &Path) -> IntegrityResult<ContentDigests> {
        let mut file = tokio::fs::File::open(path).await.map_err(|e| {
            IntegrityError::FileNotFound(format!("{}: {}", path.display(), e))
        })?;

        let mut digester = ContentDigester::new();
        let mut buffer = vec![0u8; 64 * 1024];

        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            digester.update(&buffer[..n]);
        }

        Ok(digester.finalize())
    }

    /// Strong block checksum: BLAKE3 truncated to 128 bits
    pub fn strong_block_hash(data: &[u8]) -> [u8; STRONG_HASH_LEN] {
        let full = blake3::hash(data);
        let mut strong = [0u8; STRONG_HASH_LEN];
        strong.copy_from_slice(&full.as_bytes()[..STRONG_HASH_LEN]);
        strong
    }

    /// Check computed digests against the SHA-256 a requester declared
    pub fn verify_sha256(expected: &ContentHash, actual: &ContentDigests) -> IntegrityResult<()> {
        if *expected != actual.sha256 {
            return Err(IntegrityError::ChecksumMismatch {
                expected: expected.to_hex(),
                actual: actual.sha256.to_hex(),
            });
        }
        Ok(())
    }
}
