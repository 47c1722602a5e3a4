//! Share-wide metadata (`<share>/metadata.json`).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::SessionResult;

/// Cross-session bookkeeping: the last session per working directory and
/// the default thinking toggle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Last session id, keyed by work-dir hash.
    #[serde(default)]
    last_sessions: BTreeMap<String, String>,
    /// Default thinking toggle for new sessions.
    #[serde(default)]
    pub thinking: Option<bool>,
}

impl Metadata {
    /// Load metadata; a missing file is an empty default.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing file cannot be read or parsed.
    pub fn load(path: &Path) -> SessionResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write metadata back to disk.
    ///
    /// # Errors
    ///
    /// Returns an error when the parent directory cannot be created or the
    /// file cannot be written.
    pub fn store(&self, path: &Path) -> SessionResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Last session id recorded for a work-dir hash.
    #[must_use]
    pub fn last_session_id(&self, work_dir_hash: &str) -> Option<&str> {
        self.last_sessions.get(work_dir_hash).map(String::as_str)
    }

    /// Record the last session id for a work-dir hash.
    pub fn set_last_session_id(&mut self, work_dir_hash: String, session_id: String) {
        self.last_sessions.insert(work_dir_hash, session_id);
    }
}
