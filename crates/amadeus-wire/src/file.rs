//! The `wire.jsonl` tee and replay.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{Envelope, WireMessage};

/// One recorded line: a timestamp plus the message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireRecord {
    /// Seconds since the Unix epoch.
    timestamp: f64,
    /// The message envelope.
    message: Envelope,
}

/// Append-only recorder for every message crossing the wire.
///
/// Recording is synchronous and line-atomic; a replayer tailing the file
/// never observes a partial line.
pub struct WireFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl WireFile {
    /// Open (or create) `wire.jsonl` at `path` for appending.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// The file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one message. Failures are logged and swallowed — a broken
    /// tee must not take the session down.
    pub fn record(&self, message: &WireMessage) {
        let record = WireRecord {
            timestamp: now_epoch_seconds(),
            message: message.to_envelope(),
        };
        let Ok(mut line) = serde_json::to_string(&record) else {
            warn!("Failed to serialize wire record");
            return;
        };
        line.push('\n');

        let mut file = self.file.lock().expect("wire file poisoned");
        if let Err(error) = file.write_all(line.as_bytes()).and_then(|()| file.flush()) {
            warn!(%error, path = %self.path.display(), "Failed to record wire message");
        }
    }

    /// Replay events from a recorded file, in order.
    ///
    /// Replay is purely additive: requests are skipped (their
    /// request/response coupling is not reconstructed), unknown lines are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read.
    pub fn replay(path: &Path) -> std::io::Result<Vec<WireMessage>> {
        let reader = BufReader::new(File::open(path)?);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: WireRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(error) => {
                    warn!(%error, "Skipping malformed wire record");
                    continue;
                },
            };
            match WireMessage::from_envelope(&record.message) {
                Ok(message @ WireMessage::Event(_)) => events.push(message),
                Ok(WireMessage::Request(_)) => {},
                Err(error) => {
                    warn!(%error, "Skipping unreadable wire record");
                },
            }
        }
        Ok(events)
    }
}

impl std::fmt::Debug for WireFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireFile").field("path", &self.path).finish()
    }
}

#[allow(clippy::cast_precision_loss)]
fn now_epoch_seconds() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApprovalRequest, WireEvent, WireRequest};
    use amadeus_core::ContentPart;

    #[test]
    fn test_record_and_replay_events_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wire.jsonl");
        let file = WireFile::open(&path).unwrap();

        file.record(&WireMessage::Event(WireEvent::StepBegin { n: 1 }));
        file.record(&WireMessage::Request(WireRequest::Approval(
            ApprovalRequest::from_gate(amadeus_approval::ApprovalRequest {
                id: "r-1".to_string(),
                tool_call_id: "tc-1".to_string(),
                sender: "Shell".to_string(),
                action: "run command".to_string(),
                description: "Run `echo ok`.".to_string(),
                display: Vec::new(),
            }),
        )));
        file.record(&WireMessage::Event(WireEvent::ContentPart(
            ContentPart::text("done"),
        )));

        let events = WireFile::replay(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], WireMessage::Event(WireEvent::StepBegin { n: 1 }));
        assert!(matches!(
            &events[1],
            WireMessage::Event(WireEvent::ContentPart(ContentPart::Text { text })) if text == "done"
        ));
    }

    #[test]
    fn test_replay_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wire.jsonl");
        std::fs::write(
            &path,
            "not json\n{\"timestamp\": 1.0, \"message\": {\"type\": \"StepBegin\", \"payload\": {\"n\": 3}}}\n",
        )
        .unwrap();

        let events = WireFile::replay(&path).unwrap();
        assert_eq!(events, vec![WireMessage::Event(WireEvent::StepBegin { n: 3 })]);
    }

    #[test]
    fn test_timestamps_are_monotonic_enough() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wire.jsonl");
        let file = WireFile::open(&path).unwrap();
        file.record(&WireMessage::Event(WireEvent::StepBegin { n: 1 }));
        file.record(&WireMessage::Event(WireEvent::StepBegin { n: 2 }));

        let text = std::fs::read_to_string(&path).unwrap();
        let stamps: Vec<f64> = text
            .lines()
            .map(|line| {
                serde_json::from_str::<serde_json::Value>(line).unwrap()["timestamp"]
                    .as_f64()
                    .unwrap()
            })
            .collect();
        assert!(stamps[0] <= stamps[1]);
    }
}
