//! Context compaction policies.

use amadeus_core::{ContentPart, Message};
use amadeus_llm::{ChatError, Llm, StreamEvent};
use async_trait::async_trait;
use futures::StreamExt;

const SUMMARY_SYSTEM_PROMPT: &str = "\
You compress coding-assistant conversations. Summarize the conversation \
you are given into a handover note for the assistant that will continue \
it: goals, decisions made, files touched, commands run, open problems, \
and anything the user asked for that is not finished. Be specific about \
paths and names. Output only the note.";

/// Produces a replacement history prefix from the current history.
#[async_trait]
pub trait Compaction: Send + Sync {
    /// Summarize `history` into a new prefix.
    ///
    /// # Errors
    ///
    /// Returns a provider error; the caller applies the step retry policy.
    async fn compact(&self, history: &[Message], llm: &Llm) -> Result<Vec<Message>, ChatError>;
}

/// The default policy: one summarization request, one user-role note.
#[derive(Debug, Default)]
pub struct SimpleCompaction;

#[async_trait]
impl Compaction for SimpleCompaction {
    async fn compact(&self, history: &[Message], llm: &Llm) -> Result<Vec<Message>, ChatError> {
        let mut stream = llm
            .provider
            .generate(SUMMARY_SYSTEM_PROMPT, &[], history)
            .await?;

        let mut summary = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Part(ContentPart::Text { text }) => summary.push_str(&text),
                StreamEvent::Part(_)
                | StreamEvent::ToolCallBegin(_)
                | StreamEvent::ToolCallDelta { .. }
                | StreamEvent::Usage { .. } => {},
            }
        }

        Ok(vec![Message::user(format!(
            "The conversation so far was compacted. Summary of everything before this \
             point:\n\n{}",
            summary.trim(),
        ))])
    }
}
