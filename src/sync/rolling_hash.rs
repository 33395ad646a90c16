//! Rolling weak checksum for block matching
//!
//! Adler-32 style checksum over a fixed-size window. Sliding the window by
//! one byte costs O(1), which is what lets the diff engine test every
//! offset of the target against the base's block signatures.

const MOD_ADLER: u32 = 65521;

/// Adler-32 style rolling checksum
///
/// Two sums are kept modulo 65521 (largest prime < 2^16):
/// - `a`: 1 + sum of the bytes in the window
/// - `b`: sum of every intermediate `a`
///
/// The digest packs them as `(b << 16) | a`.
#[derive(Debug, Clone)]
pub struct Adler32Rolling {
    a: u32,
    b: u32,
    block_size: usize,
}

impl Adler32Rolling {
    /// Create with a specific window size
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            a: 1,
            b: 0,
            block_size,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Reset and load a full window of data
    pub fn update_block(&mut self, data: &[u8]) {
        self.a = 1;
        self.b = 0;
        for &byte in data {
            self.a = (self.a + byte as u32) % MOD_ADLER;
            self.b = (self.b + self.a) % MOD_ADLER;
        }
    }

    /// Slide the window forward by one byte
    ///
    /// For window `[x1, ..., xn]` sliding to `[x2, ..., xn, new]`:
    /// - `a' = a - x1 + new`
    /// - `b' = b - n*x1 + a' - 1`
    pub fn roll_byte(&mut self, old_byte: u8, new_byte: u8) {
        let old = old_byte as u32;
        let new = new_byte as u32;
        // Reduce n first so n*old stays well inside u32 for large blocks.
        let n = (self.block_size as u64 % MOD_ADLER as u64) as u32;

        self.a = (self.a + MOD_ADLER - old + new) % MOD_ADLER;

        let subtract = (n * old + 1) % MOD_ADLER;
        self.b = (self.b + MOD_ADLER + self.a - subtract) % MOD_ADLER;
    }

    pub fn digest(&self) -> u32 {
        (self.b << 16) | self.a
    }

    /// Compute the checksum of a slice without keeping state
    pub fn checksum(data: &[u8]) -> u32 {
        let mut rolling = Self::with_block_size(data.len());
        rolling.update_block(data);
        rolling.digest()
    }
}

impl Default for Adler32Rolling {
    fn default() -> Self {
        Self::with_block_size(crate::sync::signature::DEFAULT_BLOCK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adler32_basic() {
        // Reference value for the standard Adler-32 of "Wikipedia"
        assert_eq!(Adler32Rolling::checksum(b"Wikipedia"), 0x11E6_0398);

        let data = b"Hello, World!";
        let mut rolling = Adler32Rolling::with_block_size(data.len());
        rolling.update_block(data);
        assert_eq!(rolling.digest(), Adler32Rolling::checksum(data));
    }

    #[test]
    fn test_adler32_rolling() {
        let data = b"ABCDEFGHIJ";
        let block_size = 4;

        let expected: Vec<u32> = data
            .windows(block_size)
            .map(Adler32Rolling::checksum)
            .collect();

        let mut rolling = Adler32Rolling::with_block_size(block_size);
        rolling.update_block(&data[0..block_size]);
        assert_eq!(rolling.digest(), expected[0], "Initial block mismatch");

        for i in 1..expected.len() {
            rolling.roll_byte(data[i - 1], data[i + block_size - 1]);
            assert_eq!(rolling.digest(), expected[i], "Mismatch at position {}", i);
        }
    }

    #[test]
    fn test_adler32_different_block_sizes() {
        let data = b"The quick brown fox jumps over the lazy dog";

        for block_size in [1, 4, 8, 16] {
            let mut rolling = Adler32Rolling::with_block_size(block_size);

            for i in 0..=data.len() - block_size {
                if i == 0 {
                    rolling.update_block(&data[0..block_size]);
                } else {
                    rolling.roll_byte(data[i - 1], data[i + block_size - 1]);
                }

                let expected = Adler32Rolling::checksum(&data[i..i + block_size]);
                assert_eq!(
                    rolling.digest(),
                    expected,
                    "Block size {}, position {}",
                    block_size,
                    i
                );
            }
        }
    }

    #[test]
    fn test_rolling_large_window_high_bytes() {
        // Window larger than the modulus with saturated bytes
        let block_size = 70_000;
        let data: Vec<u8> = (0..block_size + 64).map(|i| 255 - (i % 7) as u8).collect();

        let mut rolling = Adler32Rolling::with_block_size(block_size);
        rolling.update_block(&data[..block_size]);
        for i in 1..=64 {
            rolling.roll_byte(data[i - 1], data[i + block_size - 1]);
        }
        assert_eq!(
            rolling.digest(),
            Adler32Rolling::checksum(&data[64..64 + block_size])
        );
    }
}
