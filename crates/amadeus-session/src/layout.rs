//! Session directory layout.
//!
//! ```text
//! <share>/                              (ShareDir, default ~/.amadeus)
//! ├── config.json
//! ├── metadata.json
//! └── sessions/
//!     └── <md5(work_dir)>/
//!         └── <session_id>/
//!             ├── context.jsonl
//!             ├── wire.jsonl
//!             └── uploads/
//! ```

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tracing::info;
use uuid::Uuid;

use crate::context::Context;
use crate::metadata::Metadata;
use crate::{SessionError, SessionResult};

/// Hex MD5 of the canonical working directory path.
#[must_use]
pub fn work_dir_hash(work_dir: &Path) -> String {
    hex::encode(Md5::digest(work_dir.display().to_string().as_bytes()))
}

/// The Amadeus share directory (`~/.amadeus` or `$AMADEUS_SHARE_DIR`).
#[derive(Debug, Clone)]
pub struct ShareDir {
    root: PathBuf,
}

impl ShareDir {
    /// Resolve the share directory.
    ///
    /// Checks `$AMADEUS_SHARE_DIR` first, then falls back to
    /// `$HOME/.amadeus`.
    ///
    /// # Errors
    ///
    /// Returns an error if neither variable is set.
    pub fn resolve() -> std::io::Result<Self> {
        if let Ok(custom) = std::env::var("AMADEUS_SHARE_DIR") {
            if !custom.is_empty() {
                return Ok(Self {
                    root: PathBuf::from(custom),
                });
            }
        }
        let home = std::env::var("HOME").map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "neither AMADEUS_SHARE_DIR nor HOME environment variable is set",
            )
        })?;
        Ok(Self {
            root: PathBuf::from(home).join(".amadeus"),
        })
    }

    /// Create from an explicit path (useful for testing).
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sessions directory (`<share>/sessions/`).
    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    /// Path to the configuration file.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Path to the metadata file.
    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.root.join("metadata.json")
    }

    /// Directory holding all sessions of one working directory.
    #[must_use]
    pub fn work_dir_sessions(&self, work_dir: &Path) -> PathBuf {
        self.sessions_dir().join(work_dir_hash(work_dir))
    }
}

/// A live session: a working directory, a stable id, and its on-disk home.
#[derive(Debug)]
pub struct Session {
    /// Stable session id.
    pub id: String,
    /// The working directory the agent operates in.
    pub work_dir: PathBuf,
    /// The session's directory under the share.
    pub root: PathBuf,
    /// The conversation log.
    pub context: Context,
}

impl Session {
    /// Create a fresh session for `work_dir` and record it as the last
    /// session of that directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the session directory cannot be created.
    pub async fn create(share: &ShareDir, work_dir: &Path) -> SessionResult<Self> {
        let id = Uuid::new_v4().to_string();
        Self::open(share, work_dir, &id).await
    }

    /// Resume the most recent session of `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoPreviousSession`] when none is recorded.
    pub async fn resume_last(share: &ShareDir, work_dir: &Path) -> SessionResult<Self> {
        let metadata = Metadata::load(&share.metadata_path())?;
        let id = metadata
            .last_session_id(&work_dir_hash(work_dir))
            .ok_or(SessionError::NoPreviousSession)?
            .to_string();
        Self::open(share, work_dir, &id).await
    }

    /// Open (or create) the session with a specific id.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory scaffolding or context load
    /// fails.
    pub async fn open(share: &ShareDir, work_dir: &Path, id: &str) -> SessionResult<Self> {
        let root = share.work_dir_sessions(work_dir).join(id);
        tokio::fs::create_dir_all(&root).await?;

        let context = Context::open(root.join("context.jsonl")).await?;

        let mut metadata = Metadata::load(&share.metadata_path()).unwrap_or_default();
        metadata.set_last_session_id(work_dir_hash(work_dir), id.to_string());
        metadata.store(&share.metadata_path())?;

        info!(session_id = %id, work_dir = %work_dir.display(), "Opened session");
        Ok(Self {
            id: id.to_string(),
            work_dir: work_dir.to_path_buf(),
            root,
            context,
        })
    }

    /// Path to this session's wire trace.
    #[must_use]
    pub fn wire_file_path(&self) -> PathBuf {
        self.root.join("wire.jsonl")
    }

    /// Path to this session's uploads directory (created lazily).
    #[must_use]
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }
}
