//! Block signatures of a base file
//!
//! The base is cut into fixed-size blocks; each block gets a weak rolling
//! checksum and a truncated BLAKE3 strong checksum. The resulting
//! [`SignatureSet`] is what a peer sends back to a client that wants to
//! upload a new version as a delta.

use crate::integrity::{IntegrityVerifier, STRONG_HASH_LEN};
use crate::sync::rolling_hash::Adler32Rolling;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Read};

/// Default block size for signatures (2KB)
pub const DEFAULT_BLOCK_SIZE: usize = 2048;

/// Signature for a single block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    /// Block index in the file
    pub index: u32,
    /// Byte offset in the file
    pub offset: u64,
    /// Block length (less than the block size only for the last block)
    pub length: u32,
    /// Weak rolling checksum (Adler-32)
    pub weak_hash: u32,
    /// BLAKE3, truncated to 128 bits
    pub strong_hash: [u8; STRONG_HASH_LEN],
}

impl BlockSignature {
    pub fn new(index: u32, offset: u64, data: &[u8]) -> Self {
        Self {
            index,
            offset,
            length: data.len() as u32,
            weak_hash: Adler32Rolling::checksum(data),
            strong_hash: IntegrityVerifier::strong_block_hash(data),
        }
    }

    /// Verify if data matches this signature
    pub fn matches(&self, data: &[u8]) -> bool {
        if data.len() != self.length as usize {
            return false;
        }

        if Adler32Rolling::checksum(data) != self.weak_hash {
            return false;
        }

        IntegrityVerifier::strong_block_hash(data) == self.strong_hash
    }

    /// Whether this is a short trailing block
    pub fn is_partial(&self, block_size: usize) -> bool {
        (self.length as usize) < block_size
    }
}

/// Offset and length of block `index` in a file of `file_size` bytes
pub fn block_extent(block_size: usize, file_size: u64, index: u32) -> Option<(u64, u32)> {
    let offset = index as u64 * block_size as u64;
    if offset >= file_size {
        return None;
    }
    let length = (file_size - offset).min(block_size as u64) as u32;
    Some((offset, length))
}

/// Number of blocks a file of `file_size` bytes is cut into
pub fn block_count(block_size: usize, file_size: u64) -> u64 {
    if block_size == 0 {
        return 0;
    }
    file_size.div_ceil(block_size as u64)
}

/// All block signatures of one base file, indexed for lookup by weak checksum
///
/// Blocks are stored in an arena ordered by block index; the weak index maps
/// each weak checksum to the indices of the blocks that share it.
#[derive(Debug, Clone)]
pub struct SignatureSet {
    block_size: usize,
    file_size: u64,
    blocks: Vec<BlockSignature>,
    weak_index: HashMap<u32, Vec<u32>>,
}

impl SignatureSet {
    /// Build a set from blocks ordered by index
    pub fn new(block_size: usize, file_size: u64, blocks: Vec<BlockSignature>) -> Self {
        let mut weak_index: HashMap<u32, Vec<u32>> = HashMap::with_capacity(blocks.len());
        for block in &blocks {
            weak_index.entry(block.weak_hash).or_default().push(block.index);
        }

        Self {
            block_size,
            file_size,
            blocks,
            weak_index,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn blocks(&self) -> &[BlockSignature] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&BlockSignature> {
        self.blocks.get(index as usize)
    }

    /// Indices of blocks whose weak checksum equals `weak`
    pub fn candidates(&self, weak: u32) -> &[u32] {
        self.weak_index
            .get(&weak)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The short trailing block, if the base does not end on a block boundary
    pub fn partial_tail(&self) -> Option<&BlockSignature> {
        self.blocks
            .last()
            .filter(|block| block.is_partial(self.block_size))
    }
}

/// Cuts a base stream into blocks and signs each one
#[derive(Debug, Clone, Copy)]
pub struct SignatureIndexer {
    block_size: usize,
}

impl SignatureIndexer {
    pub fn new(block_size: usize) -> Self {
        Self { block_size }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Sign an in-memory base
    pub fn index_bytes(&self, data: &[u8]) -> io::Result<SignatureSet> {
        self.index_reader(data)
    }

    /// Sign a base read sequentially from `reader`
    ///
    /// Short reads are coalesced, so block boundaries do not depend on how
    /// the reader chunks its output. A read error aborts the whole set.
    pub fn index_reader<R: Read>(&self, mut reader: R) -> io::Result<SignatureSet> {
        if self.block_size == 0 || self.block_size > u32::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid block size {}", self.block_size),
            ));
        }

        let mut buffer = vec![0u8; self.block_size];
        let mut blocks = Vec::new();
        let mut offset = 0u64;

        loop {
            let filled = read_full(&mut reader, &mut buffer)?;
            if filled == 0 {
                break;
            }

            let index = u32::try_from(blocks.len()).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "base has too many blocks")
            })?;
            blocks.push(BlockSignature::new(index, offset, &buffer[..filled]));
            offset += filled as u64;

            if filled < self.block_size {
                break;
            }
        }

        Ok(SignatureSet::new(self.block_size, offset, blocks))
    }
}

impl Default for SignatureIndexer {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

/// Read until `buf` is full or the reader is exhausted
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
