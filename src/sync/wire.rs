//! Binary encoding of signature sets and op streams
//!
//! Signature body:
//! ```text
//! "DVSG" | block_size u32 | file_size u64 | count u32
//! count x { index u32 | weak u32 | strong [u8; 16] }
//! ```
//!
//! Op stream:
//! ```text
//! 0x01 COPY { block_index u32, length u32 }
//! 0x02 DATA { length u32, bytes }
//! 0x00 END
//! ```
//!
//! All integers are big-endian.

use crate::integrity::STRONG_HASH_LEN;
use crate::sync::delta::DiffOp;
use crate::sync::signature::{block_count, block_extent, read_full, BlockSignature, SignatureSet};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};

pub const SIGNATURE_MAGIC: &[u8; 4] = b"DVSG";
pub const SIGNATURE_HEADER_LEN: usize = 20;
pub const SIGNATURE_RECORD_LEN: usize = 8 + STRONG_HASH_LEN;

pub const OP_END: u8 = 0x00;
pub const OP_COPY: u8 = 0x01;
pub const OP_DATA: u8 = 0x02;

/// Largest DATA payload accepted from the wire
pub const MAX_DATA_LEN: u32 = 64 * 1024 * 1024;

/// Records encoded per write when streaming a signature out
const RECORDS_PER_BATCH: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Bad signature magic: {0:?}")]
    BadMagic([u8; 4]),

    #[error("Unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    #[error("DATA op of {0} bytes exceeds limit")]
    OversizedData(u32),

    #[error("Inconsistent signature: {0}")]
    InconsistentSignature(String),

    #[error("Stream ended before END marker")]
    Truncated,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Write a signature set in wire format
pub fn encode_signature<W: Write>(signature: &SignatureSet, out: &mut W) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(
        SIGNATURE_HEADER_LEN + SIGNATURE_RECORD_LEN * signature.len().min(RECORDS_PER_BATCH),
    );
    buf.put_slice(SIGNATURE_MAGIC);
    buf.put_u32(signature.block_size() as u32);
    buf.put_u64(signature.file_size());
    buf.put_u32(signature.len() as u32);

    for batch in signature.blocks().chunks(RECORDS_PER_BATCH) {
        for block in batch {
            buf.put_u32(block.index);
            buf.put_u32(block.weak_hash);
            buf.put_slice(&block.strong_hash);
        }
        out.write_all(&buf)?;
        buf.clear();
    }
    if !buf.is_empty() {
        out.write_all(&buf)?;
    }
    out.flush()
}

/// Encode a signature set into one buffer
pub fn signature_to_bytes(signature: &SignatureSet) -> Bytes {
    let mut out = Vec::with_capacity(SIGNATURE_HEADER_LEN + SIGNATURE_RECORD_LEN * signature.len());
    // Writing into a Vec cannot fail.
    let _ = encode_signature(signature, &mut out);
    Bytes::from(out)
}

/// Read a signature set and rebuild its weak index
///
/// Offsets and lengths are derived from the header, so records must arrive
/// in block order and their count must match the file size.
pub fn decode_signature<R: Read>(input: &mut R) -> Result<SignatureSet, WireError> {
    let mut header = [0u8; SIGNATURE_HEADER_LEN];
    read_exact_or_truncated(input, &mut header)?;

    let mut buf = &header[..];
    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if &magic != SIGNATURE_MAGIC {
        return Err(WireError::BadMagic(magic));
    }

    let block_size = buf.get_u32() as usize;
    let file_size = buf.get_u64();
    let count = buf.get_u32();

    if block_size == 0 {
        return Err(WireError::InconsistentSignature("block size is zero".into()));
    }
    let expected = block_count(block_size, file_size);
    if count as u64 != expected {
        return Err(WireError::InconsistentSignature(format!(
            "{} records for {} bytes at block size {} (expected {})",
            count, file_size, block_size, expected
        )));
    }

    let mut blocks = Vec::with_capacity((count as usize).min(RECORDS_PER_BATCH * 64));
    let mut record = [0u8; SIGNATURE_RECORD_LEN];
    for expected_index in 0..count {
        read_exact_or_truncated(input, &mut record)?;
        let mut buf = &record[..];
        let index = buf.get_u32();
        let weak_hash = buf.get_u32();
        let mut strong_hash = [0u8; STRONG_HASH_LEN];
        buf.copy_to_slice(&mut strong_hash);

        if index != expected_index {
            return Err(WireError::InconsistentSignature(format!(
                "record {} carries index {}",
                expected_index, index
            )));
        }
        let (offset, length) = block_extent(block_size, file_size, index).ok_or_else(|| {
            WireError::InconsistentSignature(format!("block {} past end of file", index))
        })?;

        blocks.push(BlockSignature {
            index,
            offset,
            length,
            weak_hash,
            strong_hash,
        });
    }

    Ok(SignatureSet::new(block_size, file_size, blocks))
}

fn read_exact_or_truncated<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<(), WireError> {
    if read_full(input, buf)? < buf.len() {
        return Err(WireError::Truncated);
    }
    Ok(())
}

/// Streams ops out in wire format
pub struct DeltaWriter<W: Write> {
    inner: W,
    header: BytesMut,
    ops_written: u64,
    bytes_written: u64,
}

impl<W: Write> DeltaWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            header: BytesMut::with_capacity(9),
            ops_written: 0,
            bytes_written: 0,
        }
    }

    pub fn write_op(&mut self, op: &DiffOp) -> io::Result<()> {
        self.header.clear();
        match op {
            DiffOp::Copy {
                block_index,
                length,
            } => {
                self.header.put_u8(OP_COPY);
                self.header.put_u32(*block_index);
                self.header.put_u32(*length);
                self.inner.write_all(&self.header)?;
                self.bytes_written += self.header.len() as u64;
            }
            DiffOp::Data(data) => {
                let len = u32::try_from(data.len()).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "DATA op too large")
                })?;
                self.header.put_u8(OP_DATA);
                self.header.put_u32(len);
                self.inner.write_all(&self.header)?;
                self.inner.write_all(data)?;
                self.bytes_written += (self.header.len() + data.len()) as u64;
            }
        }
        self.ops_written += 1;
        Ok(())
    }

    pub fn ops_written(&self) -> u64 {
        self.ops_written
    }

    /// Encoded size so far, END marker excluded
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Write the END marker and hand back the underlying writer
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.write_all(&[OP_END])?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Iterates the ops of a wire-format stream until END
pub struct DeltaReader<R: Read> {
    inner: R,
    done: bool,
}

impl<R: Read> DeltaReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    fn next_op(&mut self) -> Result<Option<DiffOp>, WireError> {
        let mut opcode = [0u8; 1];
        read_exact_or_truncated(&mut self.inner, &mut opcode)?;

        match opcode[0] {
            OP_END => Ok(None),
            OP_COPY => {
                let mut body = [0u8; 8];
                read_exact_or_truncated(&mut self.inner, &mut body)?;
                let mut buf = &body[..];
                Ok(Some(DiffOp::Copy {
                    block_index: buf.get_u32(),
                    length: buf.get_u32(),
                }))
            }
            OP_DATA => {
                let mut len = [0u8; 4];
                read_exact_or_truncated(&mut self.inner, &mut len)?;
                let len = u32::from_be_bytes(len);
                if len > MAX_DATA_LEN {
                    return Err(WireError::OversizedData(len));
                }
                let mut data = vec![0u8; len as usize];
                read_exact_or_truncated(&mut self.inner, &mut data)?;
                Ok(Some(DiffOp::Data(data)))
            }
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

impl<R: Read> Iterator for DeltaReader<R> {
    type Item = Result<DiffOp, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_op() {
            Ok(Some(op)) => Some(Ok(op)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
