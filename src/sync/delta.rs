//! Delta computation against a base's block signatures
//!
//! The engine slides a block-sized window over the target, rolling the weak
//! checksum one byte at a time. A weak hit is confirmed with the strong
//! checksum before it becomes a copy; everything else accumulates into
//! literal data. The target is streamed through a bounded buffer, so files
//! larger than memory can be diffed.

use crate::integrity::{ContentDigests, HashingReader, IntegrityVerifier};
use crate::sync::rolling_hash::Adler32Rolling;
use crate::sync::signature::{SignatureIndexer, SignatureSet};
use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use tracing::debug;

/// Minimum read size when refilling the window buffer
const READ_CHUNK: usize = 64 * 1024;

/// One instruction for rebuilding the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffOp {
    /// Copy base block `block_index`, `length` bytes
    Copy { block_index: u32, length: u32 },
    /// Insert literal bytes
    Data(Vec<u8>),
}

impl DiffOp {
    /// Number of target bytes this op produces
    pub fn output_size(&self) -> u64 {
        match self {
            DiffOp::Copy { length, .. } => *length as u64,
            DiffOp::Data(data) => data.len() as u64,
        }
    }
}

/// Counters gathered while diffing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffSummary {
    pub copied_bytes: u64,
    pub literal_bytes: u64,
    pub copy_ops: usize,
    pub data_ops: usize,
    /// Digests of the whole target, computed in the same pass
    pub target: ContentDigests,
}

impl DiffSummary {
    pub fn total_bytes(&self) -> u64 {
        self.copied_bytes + self.literal_bytes
    }

    /// Fraction of target bytes covered by copies; 1.0 for an empty target
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            return 1.0;
        }
        self.copied_bytes as f64 / total as f64
    }
}

impl std::fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Delta: {} copied ({:.1}%), {} literal, {} total ops",
            self.copied_bytes,
            self.hit_rate() * 100.0,
            self.literal_bytes,
            self.copy_ops + self.data_ops,
        )
    }
}

/// A fully materialised delta
#[derive(Debug, Clone)]
pub struct DiffResult {
    pub ops: Vec<DiffOp>,
    pub hit_rate: f64,
    pub total_bytes: u64,
    pub target: ContentDigests,
}

/// Computes op sequences from a signature set and a target stream
#[derive(Debug, Clone, Copy)]
pub struct DiffEngine {
    block_size: usize,
    max_literal_run: usize,
}

impl DiffEngine {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            max_literal_run: usize::MAX,
        }
    }

    /// Flush literal data once it reaches `limit` bytes
    pub fn max_literal_run(mut self, limit: usize) -> Self {
        self.max_literal_run = limit.max(1);
        self
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Diff a target stream, collecting every op in memory
    pub fn diff<R: Read>(&self, target: R, signature: &SignatureSet) -> io::Result<DiffResult> {
        let mut ops = Vec::new();
        let summary = self.diff_with(target, signature, |op| {
            ops.push(op);
            Ok(())
        })?;

        Ok(DiffResult {
            ops,
            hit_rate: summary.hit_rate(),
            total_bytes: summary.total_bytes(),
            target: summary.target,
        })
    }

    /// Sign `base` and diff `target` against it
    pub fn diff_bytes(&self, base: &[u8], target: &[u8]) -> io::Result<DiffResult> {
        let signature = SignatureIndexer::new(self.block_size).index_bytes(base)?;
        self.diff(target, &signature)
    }

    /// Diff a target stream, handing each op to `sink` as soon as it is final
    pub fn diff_with<R, F>(
        &self,
        target: R,
        signature: &SignatureSet,
        mut sink: F,
    ) -> io::Result<DiffSummary>
    where
        R: Read,
        F: FnMut(DiffOp) -> io::Result<()>,
    {
        let block_size = self.block_size;
        if block_size == 0 || block_size != signature.block_size() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "block size {} does not match signature block size {}",
                    block_size,
                    signature.block_size()
                ),
            ));
        }

        let mut reader = HashingReader::new(target);
        let mut window = WindowBuffer::new(READ_CHUNK.max(block_size));
        let mut emitter = OpEmitter::new(&mut sink, self.max_literal_run);
        let mut rolling = Adler32Rolling::with_block_size(block_size);
        let mut rolling_valid = false;

        loop {
            window.fill(&mut reader, block_size + 1)?;
            let available = window.available();

            if available < block_size {
                // Fewer than B bytes left and the stream is exhausted.
                let rest = window.slice(available);
                match signature.partial_tail() {
                    Some(tail)
                        if tail.length as usize <= rest.len()
                            && tail.matches(&rest[rest.len() - tail.length as usize..]) =>
                    {
                        let split = rest.len() - tail.length as usize;
                        emitter.literal(&rest[..split])?;
                        emitter.copy(tail.index, tail.length)?;
                    }
                    _ => emitter.literal(rest)?,
                }
                window.consume(available);
                break;
            }

            let current = window.slice(block_size);
            if !rolling_valid {
                rolling.update_block(current);
                rolling_valid = true;
            }

            if let Some(index) = find_match(signature, rolling.digest(), current) {
                emitter.copy(index, block_size as u32)?;
                window.consume(block_size);
                rolling_valid = false;
                continue;
            }

            let outgoing = current[0];
            emitter.literal_byte(outgoing)?;
            if available > block_size {
                rolling.roll_byte(outgoing, window.byte_at(block_size));
            } else {
                rolling_valid = false;
            }
            window.consume(1);
        }

        emitter.flush()?;
        let summary = DiffSummary {
            copied_bytes: emitter.copied_bytes,
            literal_bytes: emitter.literal_bytes,
            copy_ops: emitter.copy_ops,
            data_ops: emitter.data_ops,
            target: reader.finalize(),
        };
        debug!("{}", summary);
        Ok(summary)
    }
}

/// First block whose weak and strong checksums both match `window`
fn find_match(signature: &SignatureSet, weak: u32, window: &[u8]) -> Option<u32> {
    let candidates = signature.candidates(weak);
    if candidates.is_empty() {
        return None;
    }

    let strong = IntegrityVerifier::strong_block_hash(window);
    candidates.iter().copied().find(|&index| {
        signature.get(index).map_or(false, |block| {
            block.length as usize == window.len() && block.strong_hash == strong
        })
    })
}

/// Buffers literal bytes and tracks counters for the ops it emits
struct OpEmitter<'a, F> {
    sink: &'a mut F,
    pending: Vec<u8>,
    max_literal_run: usize,
    copied_bytes: u64,
    literal_bytes: u64,
    copy_ops: usize,
    data_ops: usize,
}

impl<'a, F> OpEmitter<'a, F>
where
    F: FnMut(DiffOp) -> io::Result<()>,
{
    fn new(sink: &'a mut F, max_literal_run: usize) -> Self {
        Self {
            sink,
            pending: Vec::new(),
            max_literal_run,
            copied_bytes: 0,
            literal_bytes: 0,
            copy_ops: 0,
            data_ops: 0,
        }
    }

    fn literal_byte(&mut self, byte: u8) -> io::Result<()> {
        self.pending.push(byte);
        if self.pending.len() >= self.max_literal_run {
            self.flush()?;
        }
        Ok(())
    }

    fn literal(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut rest = bytes;
        while !rest.is_empty() {
            let room = self.max_literal_run - self.pending.len();
            let take = room.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() >= self.max_literal_run {
                self.flush()?;
            }
        }
        Ok(())
    }

    fn copy(&mut self, block_index: u32, length: u32) -> io::Result<()> {
        self.flush()?;
        self.copied_bytes += length as u64;
        self.copy_ops += 1;
        (self.sink)(DiffOp::Copy {
            block_index,
            length,
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.literal_bytes += self.pending.len() as u64;
        self.data_ops += 1;
        (self.sink)(DiffOp::Data(std::mem::take(&mut self.pending)))
    }
}

/// Compacting read buffer holding the unconsumed part of the target
struct WindowBuffer {
    buf: Vec<u8>,
    start: usize,
    chunk: usize,
    eof: bool,
}

impl WindowBuffer {
    fn new(chunk: usize) -> Self {
        Self {
            buf: Vec::with_capacity(chunk * 2),
            start: 0,
            chunk,
            eof: false,
        }
    }

    /// Read until at least `need` bytes are buffered or the stream ends
    fn fill<R: Read>(&mut self, reader: &mut R, need: usize) -> io::Result<()> {
        while self.available() < need && !self.eof {
            if self.start > 0 && self.start >= self.buf.len() / 2 {
                self.buf.drain(..self.start);
                self.start = 0;
            }

            let old_len = self.buf.len();
            self.buf.resize(old_len + self.chunk, 0);
            let read = loop {
                match reader.read(&mut self.buf[old_len..]) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        self.buf.truncate(old_len);
                        return Err(e);
                    }
                }
            };
            self.buf.truncate(old_len + read);
            if read == 0 {
                self.eof = true;
            }
        }
        Ok(())
    }

    fn available(&self) -> usize {
        self.buf.len() - self.start
    }

    fn slice(&self, len: usize) -> &[u8] {
        &self.buf[self.start..self.start + len]
    }

    fn byte_at(&self, offset: usize) -> u8 {
        self.buf[self.start + offset]
    }

    fn consume(&mut self, len: usize) {
        self.start += len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::patch::PatchApplier;
    use crate::sync::signature::BlockSignature;

    fn roundtrip(base: &[u8], target: &[u8], block_size: usize) -> DiffResult {
        let result = DiffEngine::new(block_size).diff_bytes(base, target).unwrap();
        let rebuilt = PatchApplier::new(block_size)
            .apply_to_vec(base, &result.ops)
            .unwrap();
        assert_eq!(rebuilt, target);
        result
    }

    #[test]
    fn test_one_block_changed() {
        let result = roundtrip(b"AAAABBBBCCCC", b"AAAABBBBDDDD", 4);

        assert_eq!(
            result.ops,
            vec![
                DiffOp::Copy {
                    block_index: 0,
                    length: 4
                },
                DiffOp::Copy {
                    block_index: 1,
                    length: 4
                },
                DiffOp::Data(b"DDDD".to_vec()),
            ]
        );
        assert!((result.hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(result.total_bytes, 12);
    }

    #[test]
    fn test_identical_files() {
        let data = b"Hello, World! This is test data.";
        let result = roundtrip(data, data, 8);

        assert_eq!(result.hit_rate, 1.0);
        assert!(result
            .ops
            .iter()
            .all(|op| matches!(op, DiffOp::Copy { length: 8, .. })));
        assert_eq!(result.ops.len(), 4);
    }

    #[test]
    fn test_completely_different_files() {
        let result = roundtrip(b"AAAAAAAAAAAAAAAA", b"BBBBBBBBBBBBBBBB", 4);

        assert_eq!(result.hit_rate, 0.0);
        assert_eq!(result.ops, vec![DiffOp::Data(b"BBBBBBBBBBBBBBBB".to_vec())]);
    }

    #[test]
    fn test_partial_modification() {
        let result = roundtrip(b"AAAABBBBCCCCDDDD", b"AAAAXXXXCCCCDDDD", 4);
        let copied: u64 = result
            .ops
            .iter()
            .filter(|op| matches!(op, DiffOp::Copy { .. }))
            .map(DiffOp::output_size)
            .sum();
        assert_eq!(copied, 12);
    }

    #[test]
    fn test_appended_and_prepended_data() {
        let base = b"AAAABBBBCCCCDDDD";

        let mut appended = base.to_vec();
        appended.extend_from_slice(b"EEEE");
        let result = roundtrip(base, &appended, 4);
        assert!((result.hit_rate - 0.8).abs() < 1e-9);

        let mut prepended = b"XX".to_vec();
        prepended.extend_from_slice(base);
        let result = roundtrip(base, &prepended, 4);
        assert_eq!(result.ops[0], DiffOp::Data(b"XX".to_vec()));
        assert!((result.hit_rate - 16.0 / 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_tail_block_matched() {
        // Base ends in a 2-byte block "EE"
        let base = b"AAAABBBBEE";
        let target = b"BBBBxEE";
        let result = roundtrip(base, target, 4);

        assert_eq!(
            result.ops,
            vec![
                DiffOp::Copy {
                    block_index: 1,
                    length: 4
                },
                DiffOp::Data(b"x".to_vec()),
                DiffOp::Copy {
                    block_index: 2,
                    length: 2
                },
            ]
        );
    }

    #[test]
    fn test_empty_inputs() {
        let result = roundtrip(b"base data", b"", 4);
        assert!(result.ops.is_empty());
        assert_eq!(result.hit_rate, 1.0);

        let result = roundtrip(b"", b"new content", 4);
        assert_eq!(result.ops, vec![DiffOp::Data(b"new content".to_vec())]);
        assert_eq!(result.hit_rate, 0.0);
    }

    #[test]
    fn test_target_digests_computed() {
        let target = b"some target content".repeat(40);
        let result = DiffEngine::new(16).diff_bytes(b"base", &target).unwrap();
        assert_eq!(result.target, IntegrityVerifier::calculate_digests(&target));
    }

    #[test]
    fn test_max_literal_run_splits_data() {
        let target = vec![7u8; 25];
        let result = DiffEngine::new(4)
            .max_literal_run(10)
            .diff_bytes(b"", &target)
            .unwrap();

        let sizes: Vec<u64> = result.ops.iter().map(DiffOp::output_size).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[test]
    fn test_block_size_mismatch_rejected() {
        let signature = SignatureIndexer::new(8).index_bytes(b"base data").unwrap();
        let err = DiffEngine::new(4).diff(&b"target"[..], &signature).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_large_shifted_target_streams() {
        // Spans several refills of the window buffer
        let base: Vec<u8> = (0..300_000u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        let mut target = b"inserted header".to_vec();
        target.extend_from_slice(&base[1000..250_000]);
        target.extend_from_slice(b"trailer");

        let result = roundtrip(&base, &target, 2048);
        assert!(result.hit_rate > 0.95, "hit rate {}", result.hit_rate);
    }

    #[test]
    fn test_sink_error_aborts() {
        let signature = SignatureIndexer::new(4).index_bytes(b"AAAA").unwrap();
        let err = DiffEngine::new(4)
            .diff_with(&b"AAAABBBB"[..], &signature, |_| {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
            })
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_weak_collision_is_not_a_match() {
        // Same weak checksum as the target window, different content
        let block = BlockSignature {
            index: 0,
            offset: 0,
            length: 4,
            weak_hash: Adler32Rolling::checksum(b"WXYZ"),
            strong_hash: IntegrityVerifier::strong_block_hash(b"ABCD"),
        };
        let signature = SignatureSet::new(4, 4, vec![block]);
        assert_eq!(signature.candidates(Adler32Rolling::checksum(b"WXYZ")), &[0]);

        let result = DiffEngine::new(4).diff(&b"WXYZWXYZ"[..], &signature).unwrap();
        assert_eq!(result.ops, vec![DiffOp::Data(b"WXYZWXYZ".to_vec())]);
        assert_eq!(result.hit_rate, 0.0);
    }
}
