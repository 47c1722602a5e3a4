//! The `DenwaRenji` — a one-shot mailbox for context rollback requests.
//!
//! A tool may send a "D-Mail": a request that the conversation be rewound to
//! an earlier checkpoint with a synthetic user message injected. The Soul
//! polls the mailbox at each step boundary and honors at most one pending
//! mail; a later send before the fetch overwrites the earlier one.

use std::sync::Mutex;

use thiserror::Error;

/// A pending rollback request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DMail {
    /// Checkpoint to rewind to.
    pub checkpoint_id: usize,
    /// Message content delivered to the past self.
    pub message: String,
}

/// Errors from sending a D-Mail.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DenwaError {
    /// The checkpoint does not exist.
    #[error("checkpoint {checkpoint_id} is out of range (have {n_checkpoints})")]
    CheckpointOutOfRange {
        /// The requested checkpoint.
        checkpoint_id: usize,
        /// How many checkpoints exist.
        n_checkpoints: usize,
    },
}

#[derive(Debug, Default)]
struct DenwaState {
    pending: Option<DMail>,
    n_checkpoints: usize,
}

/// The D-Mail mailbox. One per agent; subagents get their own.
#[derive(Debug, Default)]
pub struct DenwaRenji {
    state: Mutex<DenwaState>,
}

impl DenwaRenji {
    /// Create an empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tell the mailbox how many checkpoints currently exist.
    ///
    /// Called by the Soul after every checkpoint so that sends can be
    /// validated against live state.
    pub fn set_n_checkpoints(&self, n: usize) {
        self.state.lock().expect("denwa state poisoned").n_checkpoints = n;
    }

    /// Number of checkpoints the mailbox knows about.
    #[must_use]
    pub fn n_checkpoints(&self) -> usize {
        self.state.lock().expect("denwa state poisoned").n_checkpoints
    }

    /// Send a D-Mail. Overwrites any mail already pending.
    ///
    /// # Errors
    ///
    /// Returns [`DenwaError::CheckpointOutOfRange`] when `checkpoint_id`
    /// does not name an existing checkpoint.
    pub fn send(&self, checkpoint_id: usize, message: impl Into<String>) -> Result<(), DenwaError> {
        let mut state = self.state.lock().expect("denwa state poisoned");
        if checkpoint_id >= state.n_checkpoints {
            return Err(DenwaError::CheckpointOutOfRange {
                checkpoint_id,
                n_checkpoints: state.n_checkpoints,
            });
        }
        state.pending = Some(DMail {
            checkpoint_id,
            message: message.into(),
        });
        Ok(())
    }

    /// Take the pending D-Mail, if any.
    #[must_use]
    pub fn fetch_pending_dmail(&self) -> Option<DMail> {
        self.state.lock().expect("denwa state poisoned").pending.take()
    }
}
