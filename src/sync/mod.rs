//! Delta synchronization module
//!
//! rsync-style block matching: a peer signs its copy of a file, the client
//! diffs the new version against that signature, and the peer rebuilds the
//! new version from its base plus the resulting op stream.

pub mod delta;
pub mod patch;
pub mod rolling_hash;
pub mod signature;
pub mod wire;

pub use delta::{DiffEngine, DiffOp, DiffResult, DiffSummary};
pub use patch::{PatchApplier, PatchError};
pub use rolling_hash::Adler32Rolling;
pub use signature::{BlockSignature, SignatureIndexer, SignatureSet, DEFAULT_BLOCK_SIZE};
pub use wire::{decode_signature, encode_signature, signature_to_bytes, DeltaReader, DeltaWriter, WireError};
