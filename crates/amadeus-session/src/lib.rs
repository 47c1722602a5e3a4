#![deny(unsafe_code)]
#![warn(unreachable_pub)]
//! Persistent session state for Amadeus.
//!
//! A session is a working directory plus a stable id. On disk it owns
//! `context.jsonl` (the conversation log) and `wire.jsonl` (the event
//! trace) under `<share>/sessions/<md5(work_dir)>/<session_id>/`.

mod context;
mod layout;
mod metadata;

pub use context::{Checkpoint, Context};
pub use layout::{Session, ShareDir, work_dir_hash};
pub use metadata::Metadata;

use thiserror::Error;

/// Session persistence errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Filesystem failure.
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A log line could not be parsed.
    #[error("corrupt context line {line}: {source}")]
    CorruptLine {
        /// 1-based line number.
        line: usize,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A message could not be serialized.
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The requested checkpoint does not exist.
    #[error("checkpoint {0} does not exist")]
    NoSuchCheckpoint(usize),

    /// No session recorded for this working directory.
    #[error("no previous session for this working directory")]
    NoPreviousSession,
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
