//! Rebuilding a target from a base and an op sequence

use crate::integrity::{ContentDigester, ContentDigests, ContentHash, IntegrityVerifier};
use crate::sync::delta::DiffOp;
use crate::sync::wire::WireError;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use tracing::debug;

/// Copy buffer size; copies never materialise a whole block run
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Errors that can occur while applying a delta
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("Copy of block {block_index} ({length} bytes) is outside the base ({base_size} bytes)")]
    BaseOutOfRange {
        block_index: u32,
        length: u32,
        base_size: u64,
    },

    #[error("Integrity check failed: expected sha256 {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Malformed delta: {0}")]
    Wire(#[from] WireError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Applies ops to a random-access base, digesting the output as it goes
#[derive(Debug, Clone, Copy)]
pub struct PatchApplier {
    block_size: usize,
}

impl PatchApplier {
    pub fn new(block_size: usize) -> Self {
        Self { block_size }
    }

    /// Apply `ops` to `base`, writing the result to `out`
    pub fn apply<B, W, I, E>(&self, base: &mut B, ops: I, out: &mut W) -> Result<ContentDigests, PatchError>
    where
        B: Read + Seek,
        W: Write,
        I: IntoIterator<Item = Result<DiffOp, E>>,
        E: Into<PatchError>,
    {
        let base_size = base.seek(SeekFrom::End(0))?;
        let mut position = base_size;
        let mut digester = ContentDigester::new();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut op_count = 0usize;

        for op in ops {
            let op = op.map_err(Into::into)?;
            op_count += 1;

            match op {
                DiffOp::Copy {
                    block_index,
                    length,
                } => {
                    let offset = block_index as u64 * self.block_size as u64;
                    let end = offset + length as u64;
                    if length as usize > self.block_size || end > base_size {
                        return Err(PatchError::BaseOutOfRange {
                            block_index,
                            length,
                            base_size,
                        });
                    }

                    if position != offset {
                        base.seek(SeekFrom::Start(offset))?;
                    }

                    let mut remaining = length as usize;
                    while remaining > 0 {
                        let step = remaining.min(buffer.len());
                        base.read_exact(&mut buffer[..step])?;
                        out.write_all(&buffer[..step])?;
                        digester.update(&buffer[..step]);
                        remaining -= step;
                    }
                    position = end;
                }
                DiffOp::Data(data) => {
                    out.write_all(&data)?;
                    digester.update(&data);
                }
            }
        }

        out.flush()?;
        let digests = digester.finalize();
        debug!(
            "Applied {} ops against {} byte base, produced {} bytes",
            op_count, base_size, digests.size
        );
        Ok(digests)
    }

    /// Apply and check the output against the declared hash and size
    ///
    /// On error the caller must discard whatever was written to `out`.
    pub fn apply_verified<B, W, I, E>(
        &self,
        base: &mut B,
        ops: I,
        out: &mut W,
        expected_sha256: &ContentHash,
        expected_size: Option<u64>,
    ) -> Result<ContentDigests, PatchError>
    where
        B: Read + Seek,
        W: Write,
        I: IntoIterator<Item = Result<DiffOp, E>>,
        E: Into<PatchError>,
    {
        let digests = self.apply(base, ops, out)?;

        if IntegrityVerifier::verify_sha256(expected_sha256, &digests).is_err() {
            return Err(PatchError::IntegrityMismatch {
                expected: expected_sha256.to_hex(),
                actual: digests.sha256.to_hex(),
            });
        }

        if let Some(expected) = expected_size {
            if expected != digests.size {
                return Err(PatchError::SizeMismatch {
                    expected,
                    actual: digests.size,
                });
            }
        }

        Ok(digests)
    }

    /// Apply in-memory ops to an in-memory base
    pub fn apply_to_vec(&self, base: &[u8], ops: &[DiffOp]) -> Result<Vec<u8>, PatchError> {
        let mut output = Vec::new();
        self.apply(
            &mut Cursor::new(base),
            ops.iter().cloned().map(Ok::<_, PatchError>),
            &mut output,
        )?;
        Ok(output)
    }
}
