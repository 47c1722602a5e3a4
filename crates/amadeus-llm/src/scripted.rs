//! Deterministic scripted provider for tests.
//!
//! Replays canned assistant turns from a script file, one entry per
//! `generate` call, with stable message ids (`scripted-1`, `scripted-2`,
//! ...). The E2E suite drives the whole runtime through this provider so
//! wire traces are reproducible byte for byte.
//!
//! Script format: a JSON array. Each entry is either a plain string
//! (one text part) or an object:
//!
//! ```json
//! {
//!   "text": "optional shorthand for a single text part",
//!   "parts": [{"type": "text", "text": "..."}],
//!   "tool_calls": [{"id": "tc-1", "function": {"name": "Shell", "arguments": "{...}"}}],
//!   "usage": {"input_other": 5, "output": 2}
//! }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use amadeus_core::{ContentPart, Message, TokenUsage, ToolCall};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ChatError, ChatResult};
use crate::provider::{ChatProvider, EventStream, StreamEvent, ThinkingEffort, ToolSchema};

/// One scripted assistant turn.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptTurn {
    /// Shorthand for a single text part.
    #[serde(default)]
    pub text: Option<String>,
    /// Content parts to stream.
    #[serde(default)]
    pub parts: Vec<ContentPart>,
    /// Tool calls to stream after the parts.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Usage to report. Estimated from text lengths when absent.
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptEntry {
    Text(String),
    Turn(ScriptTurn),
}

struct ScriptedState {
    turns: Vec<ScriptTurn>,
    cursor: AtomicUsize,
}

/// The scripted provider.
pub struct Scripted {
    state: Arc<ScriptedState>,
    thinking: Option<ThinkingEffort>,
}

impl Scripted {
    /// Create a provider from pre-built turns.
    #[must_use]
    pub fn new(turns: Vec<ScriptTurn>) -> Self {
        Self {
            state: Arc::new(ScriptedState {
                turns,
                cursor: AtomicUsize::new(0),
            }),
            thinking: None,
        }
    }

    /// Load a script file (JSON array of strings or turn objects).
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Protocol`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> ChatResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Protocol(format!("cannot read script file: {e}")))?;
        let entries: Vec<ScriptEntry> = serde_json::from_str(&text)
            .map_err(|e| ChatError::Protocol(format!("invalid script file: {e}")))?;
        let turns = entries
            .into_iter()
            .map(|entry| match entry {
                ScriptEntry::Text(text) => ScriptTurn {
                    text: Some(text),
                    ..ScriptTurn::default()
                },
                ScriptEntry::Turn(turn) => turn,
            })
            .collect();
        Ok(Self::new(turns))
    }
}

/// Rough 4-chars-per-token estimate for turns without explicit usage.
fn estimate_usage(history: &[Message], turn: &ScriptTurn) -> TokenUsage {
    let input_chars: usize = history
        .iter()
        .map(|message| message.extract_text(" ").len())
        .sum();
    let output_chars: usize = turn
        .text
        .as_deref()
        .map(str::len)
        .unwrap_or_default()
        .saturating_add(
            turn.parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => text.len(),
                    _ => 0,
                })
                .sum(),
        );
    TokenUsage {
        input_other: (input_chars.saturating_div(4)) as u64,
        input_cache_read: 0,
        input_cache_creation: 0,
        output: (output_chars.saturating_div(4)) as u64,
    }
}

#[async_trait]
impl ChatProvider for Scripted {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn thinking_effort(&self) -> Option<ThinkingEffort> {
        self.thinking
    }

    fn with_thinking(&self, effort: ThinkingEffort) -> Arc<dyn ChatProvider> {
        Arc::new(Self {
            state: Arc::clone(&self.state),
            thinking: Some(effort),
        })
    }

    async fn generate(
        &self,
        _system_prompt: &str,
        _tools: &[ToolSchema],
        history: &[Message],
    ) -> ChatResult<EventStream> {
        let index = self.state.cursor.fetch_add(1, Ordering::SeqCst);
        let turn = self.state.turns.get(index).cloned().unwrap_or_else(|| {
            // Running off the end of the script must not look like a
            // retryable provider failure; answer with an inert text turn.
            ScriptTurn {
                text: Some("(scripted provider: no reply remaining)".to_string()),
                usage: Some(TokenUsage::default()),
                ..ScriptTurn::default()
            }
        });
        let message_id = format!("scripted-{}", index.saturating_add(1));
        debug!(%message_id, "Replaying scripted turn");

        let usage = turn
            .usage
            .unwrap_or_else(|| estimate_usage(history, &turn));

        let mut events: Vec<ChatResult<StreamEvent>> = Vec::new();
        if let Some(text) = turn.text {
            events.push(Ok(StreamEvent::Part(ContentPart::Text { text })));
        }
        for part in turn.parts {
            events.push(Ok(StreamEvent::Part(part)));
        }
        for call in turn.tool_calls {
            events.push(Ok(StreamEvent::ToolCallBegin(call)));
        }
        events.push(Ok(StreamEvent::Usage { usage, message_id }));

        Ok(Box::pin(futures::stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(provider: &Scripted) -> Vec<StreamEvent> {
        let stream = provider.generate("", &[], &[]).await.unwrap();
        stream.map(Result::unwrap).collect().await
    }

    #[tokio::test]
    async fn test_replays_in_order_with_stable_ids() {
        let provider = Scripted::new(vec![
            ScriptTurn {
                text: Some("first".to_string()),
                usage: Some(TokenUsage {
                    input_other: 5,
                    output: 2,
                    ..TokenUsage::default()
                }),
                ..ScriptTurn::default()
            },
            ScriptTurn {
                text: Some("second".to_string()),
                ..ScriptTurn::default()
            },
        ]);

        let events = collect(&provider).await;
        assert!(matches!(
            &events[0],
            StreamEvent::Part(ContentPart::Text { text }) if text == "first"
        ));
        let StreamEvent::Usage { message_id, usage } = events.last().unwrap() else {
            panic!("expected terminal usage");
        };
        assert_eq!(message_id, "scripted-1");
        assert_eq!(usage.input_other, 5);

        let events = collect(&provider).await;
        let StreamEvent::Usage { message_id, .. } = events.last().unwrap() else {
            panic!("expected terminal usage");
        };
        assert_eq!(message_id, "scripted-2");
    }

    #[tokio::test]
    async fn test_exhausted_script_stays_inert() {
        let provider = Scripted::new(Vec::new());
        let events = collect(&provider).await;
        assert!(matches!(
            &events[0],
            StreamEvent::Part(ContentPart::Text { text }) if text.contains("no reply remaining")
        ));
    }

    #[tokio::test]
    async fn test_from_file_mixed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scripts.json");
        std::fs::write(
            &path,
            serde_json::json!([
                "plain text turn",
                {
                    "text": "calling a tool",
                    "tool_calls": [{
                        "id": "tc-1",
                        "function": {"name": "Shell", "arguments": "{\"command\": \"echo ok\"}"}
                    }]
                }
            ])
            .to_string(),
        )
        .unwrap();

        let provider = Scripted::from_file(&path).unwrap();
        let first = collect(&provider).await;
        assert!(matches!(&first[0], StreamEvent::Part(ContentPart::Text { text }) if text == "plain text turn"));

        let second = collect(&provider).await;
        assert!(second.iter().any(|event| matches!(
            event,
            StreamEvent::ToolCallBegin(call) if call.function.name == "Shell"
        )));
    }
}
