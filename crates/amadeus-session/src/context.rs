//! The append-only conversation log.
//!
//! The file is the source of truth: one message per line, written with a
//! flush before the in-memory vector grows. Checkpoints record both the
//! message index and the byte offset so a rollback truncates memory and
//! disk to exactly the same prefix.

use std::path::{Path, PathBuf};

use amadeus_core::{Message, Role};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::{SessionError, SessionResult};

/// A rollback-safe position in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Number of messages in the checkpointed prefix.
    pub index: usize,
    /// Byte length of the checkpointed prefix on disk.
    pub offset: u64,
}

/// The conversation log backed by `context.jsonl`.
pub struct Context {
    path: PathBuf,
    file: File,
    file_len: u64,
    messages: Vec<Message>,
    /// Byte offset at which each message's line starts.
    line_offsets: Vec<u64>,
    checkpoints: Vec<Checkpoint>,
    token_count: u64,
}

impl Context {
    /// Create an empty log at `path`, or load the existing one.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened or an existing line
    /// cannot be parsed.
    pub async fn open(path: impl Into<PathBuf>) -> SessionResult<Self> {
        let path = path.into();
        let mut messages = Vec::new();
        let mut line_offsets = Vec::new();
        let mut offset: u64 = 0;

        if tokio::fs::try_exists(&path).await? {
            let reader = BufReader::new(File::open(&path).await?);
            let mut lines = reader.lines();
            let mut line_no: usize = 0;
            while let Some(line) = lines.next_line().await? {
                line_no = line_no.saturating_add(1);
                let line_len = (line.len() as u64).saturating_add(1);
                if line.trim().is_empty() {
                    offset = offset.saturating_add(line_len);
                    continue;
                }
                let message: Message = serde_json::from_str(&line)
                    .map_err(|source| SessionError::CorruptLine {
                        line: line_no,
                        source,
                    })?;
                line_offsets.push(offset);
                messages.push(message);
                offset = offset.saturating_add(line_len);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!(path = %path.display(), messages = messages.len(), "Opened context");
        Ok(Self {
            path,
            file,
            file_len: offset,
            messages,
            line_offsets,
            checkpoints: Vec::new(),
            token_count: 0,
        })
    }

    /// The message history.
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.messages
    }

    /// Best-known prompt token tally for the current prefix.
    #[must_use]
    pub fn token_count(&self) -> u64 {
        self.token_count
    }

    /// Replace the token tally with a usage-reported value.
    pub fn update_token_count(&mut self, count: u64) {
        self.token_count = count;
    }

    /// Number of checkpoints taken.
    #[must_use]
    pub fn n_checkpoints(&self) -> usize {
        self.checkpoints.len()
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one message: one serialized line, flushed, then the vector.
    ///
    /// # Errors
    ///
    /// A failed write is fatal for the turn.
    pub async fn append_message(&mut self, message: Message) -> SessionResult<()> {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');
        let line_len = line.len() as u64;

        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;

        self.line_offsets.push(self.file_len);
        self.file_len = self.file_len.saturating_add(line_len);
        self.messages.push(message);
        Ok(())
    }

    /// Append several messages in order.
    ///
    /// # Errors
    ///
    /// A failed write is fatal for the turn.
    pub async fn append_messages(
        &mut self,
        messages: impl IntoIterator<Item = Message>,
    ) -> SessionResult<()> {
        for message in messages {
            self.append_message(message).await?;
        }
        Ok(())
    }

    /// Take a checkpoint and return its id.
    ///
    /// With `with_user_message = false` and a user message at the tail, the
    /// checkpoint lands just *before* that message, so a rollback replays
    /// the user's prompt. Taking the same position twice returns the
    /// existing id.
    pub fn checkpoint(&mut self, with_user_message: bool) -> usize {
        let mut target = Checkpoint {
            index: self.messages.len(),
            offset: self.file_len,
        };
        if !with_user_message {
            if let Some(last) = self.messages.last() {
                if last.role == Role::User {
                    let index = self.messages.len().saturating_sub(1);
                    target = Checkpoint {
                        index,
                        offset: self.line_offsets[index],
                    };
                }
            }
        }

        if let Some((id, last)) = self.checkpoints.iter().enumerate().next_back() {
            if *last == target {
                return id;
            }
        }
        self.checkpoints.push(target);
        debug!(
            id = self.checkpoints.len().saturating_sub(1),
            index = target.index,
            offset = target.offset,
            "Took checkpoint"
        );
        self.checkpoints.len().saturating_sub(1)
    }

    /// Roll back to checkpoint `id`, truncating memory and file alike.
    /// Checkpoints after `id` are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoSuchCheckpoint`] for an unknown id, or an
    /// I/O error if the file cannot be truncated.
    pub async fn revert_to(&mut self, id: usize) -> SessionResult<()> {
        let Some(checkpoint) = self.checkpoints.get(id).copied() else {
            return Err(SessionError::NoSuchCheckpoint(id));
        };

        self.file.flush().await?;
        self.file.set_len(checkpoint.offset).await?;
        self.file_len = checkpoint.offset;
        self.messages.truncate(checkpoint.index);
        self.line_offsets.truncate(checkpoint.index);
        self.checkpoints.truncate(id.saturating_add(1));

        info!(id, index = checkpoint.index, "Reverted context");
        Ok(())
    }

    /// Clear the log: rotate the file to a timestamped backup and start
    /// fresh. Token tally and checkpoints reset.
    ///
    /// # Errors
    ///
    /// Returns an error when the rotation or reopen fails.
    pub async fn clear(&mut self) -> SessionResult<()> {
        self.file.flush().await?;

        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
        let backup = self.path.with_file_name(format!(
            "{}.{stamp}.bak",
            self.path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "context.jsonl".to_string()),
        ));
        tokio::fs::rename(&self.path, &backup).await?;

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        self.file_len = 0;
        self.messages.clear();
        self.line_offsets.clear();
        self.checkpoints.clear();
        self.token_count = 0;

        info!(backup = %backup.display(), "Cleared context");
        Ok(())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("path", &self.path)
            .field("messages", &self.messages.len())
            .field("checkpoints", &self.checkpoints.len())
            .field("token_count", &self.token_count)
            .finish()
    }
}
