pub mod error;
pub mod types;
pub mod verifier;

pub use error::{IntegrityError, IntegrityResult};
pub use types::{ContentDigests, ContentHash};
pub use verifier::{ContentDigester, HashingReader, IntegrityVerifier, STRONG_HASH_LEN};
