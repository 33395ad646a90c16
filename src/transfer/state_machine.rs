use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::types::{UploadEvent, UploadState};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

/// Tracks one upload through `START -> SIGN -> DIFF -> THRESHOLD_CHECK ->
/// PATCH | FALLBACK -> DONE`
///
/// Clones share state, so another task can watch an upload in progress.
#[derive(Clone)]
pub struct UploadStateMachine {
    history: Arc<RwLock<Vec<UploadState>>>,
    state_tx: Arc<watch::Sender<UploadState>>,
}

impl Default for UploadStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadStateMachine {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(UploadState::Start);

        Self {
            history: Arc::new(RwLock::new(vec![UploadState::Start])),
            state_tx: Arc::new(state_tx),
        }
    }

    /// Get current state
    pub fn current_state(&self) -> UploadState {
        self.state_tx.borrow().clone()
    }

    /// Every state entered so far, oldest first
    pub fn history(&self) -> Vec<UploadState> {
        self.history.read().clone()
    }

    /// Receive every subsequent state change
    pub fn subscribe(&self) -> watch::Receiver<UploadState> {
        self.state_tx.subscribe()
    }

    /// Transition state based on event
    pub fn transition(&self, event: UploadEvent) -> TransferResult<UploadState> {
        let mut history = self.history.write();
        let current = self.state_tx.borrow().clone();

        let new_state = match (&current, &event) {
            (UploadState::Start, UploadEvent::Begin) => UploadState::Sign,

            (UploadState::Sign, UploadEvent::SignatureReceived { .. }) => UploadState::Diff,

            (UploadState::Diff, UploadEvent::DiffComputed { .. }) => UploadState::ThresholdCheck,

            (UploadState::ThresholdCheck, UploadEvent::ThresholdMet) => UploadState::Patch,

            (UploadState::Patch, UploadEvent::PatchAccepted) => UploadState::Done,

            // Fallback is entered at most once; there is no edge out of FALLBACK back into it
            (
                UploadState::Sign
                | UploadState::Diff
                | UploadState::ThresholdCheck
                | UploadState::Patch,
                UploadEvent::FallBack { .. },
            ) => UploadState::Fallback,

            (UploadState::Fallback, UploadEvent::FullUploadAccepted) => UploadState::Done,

            (state, UploadEvent::Fail { error }) if !state.is_terminal() => UploadState::Failed {
                error: error.clone(),
            },

            _ => {
                return Err(TransferError::InvalidStateTransition(format!(
                    "Cannot handle {:?} in state {}",
                    event, current
                )));
            }
        };

        tracing::debug!("Upload state {} -> {}", current, new_state);
        history.push(new_state.clone());
        self.state_tx.send_replace(new_state.clone());
        Ok(new_state)
    }
}
