//! Client side of a delta upload
//!
//! [`TransferOrchestrator`] walks an upload through an
//! [`UploadStateMachine`] against any [`DeltaPeer`].

pub mod error;
pub mod orchestrator;
pub mod peer;
pub mod state_machine;
pub mod types;

pub use error::{TransferError, TransferResult};
pub use orchestrator::TransferOrchestrator;
pub use peer::DeltaPeer;
pub use state_machine::UploadStateMachine;
pub use types::{
    DeltaConfig, FallbackReason, UploadEvent, UploadOutcome, UploadRequest, UploadRoute,
    UploadState,
};
