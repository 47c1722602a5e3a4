//! The `ChatProvider` trait and streaming event types.

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use amadeus_core::{ContentPart, Message, TokenUsage, ToolCall};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChatResult;

/// A tool definition as exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Parameter JSON schema.
    pub parameters: Value,
}

/// One element of a generation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A streamed content part (text/think delta, media).
    Part(ContentPart),
    /// A tool call opened. Arguments may be empty and grow via deltas.
    ToolCallBegin(ToolCall),
    /// An argument fragment for the most recently opened tool call.
    ToolCallDelta {
        /// The fragment, in stream order.
        arguments_delta: String,
    },
    /// Terminal event: usage for the whole generation plus the message id.
    Usage {
        /// Token usage.
        usage: TokenUsage,
        /// Provider-assigned message id.
        message_id: String,
    },
}

/// A boxed generation stream.
pub type EventStream = Pin<Box<dyn Stream<Item = ChatResult<StreamEvent>> + Send>>;

/// Thinking effort levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingEffort {
    /// Thinking disabled.
    Off,
    /// Minimal thinking.
    Low,
    /// Moderate thinking.
    Medium,
    /// Extensive thinking.
    High,
}

impl ThinkingEffort {
    /// Whether this effort level produces thinking output.
    #[must_use]
    pub fn is_on(self) -> bool {
        self != Self::Off
    }
}

impl fmt::Display for ThinkingEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Off => "off",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(name)
    }
}

impl FromStr for ThinkingEffort {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(()),
        }
    }
}

/// A chat model behind a uniform streaming surface.
///
/// Implementations must map transport and protocol failures into the closed
/// [`crate::ChatError`] taxonomy so retry classification stays provider
/// independent.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// The provider-side model identifier.
    fn model_name(&self) -> &str;

    /// Configured thinking effort, if any.
    fn thinking_effort(&self) -> Option<ThinkingEffort>;

    /// A copy of this provider with adjusted thinking configuration.
    fn with_thinking(&self, effort: ThinkingEffort) -> Arc<dyn ChatProvider>;

    /// Stream one assistant message.
    ///
    /// The stream yields parts, tool calls, and argument deltas, and ends
    /// with a single [`StreamEvent::Usage`].
    ///
    /// # Errors
    ///
    /// Returns a [`crate::ChatError`] if the request cannot be started;
    /// mid-stream failures surface as error items on the stream.
    async fn generate(
        &self,
        system_prompt: &str,
        tools: &[ToolSchema],
        history: &[Message],
    ) -> ChatResult<EventStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thinking_effort_parse() {
        assert_eq!("high".parse(), Ok(ThinkingEffort::High));
        assert_eq!("off".parse(), Ok(ThinkingEffort::Off));
        assert!("extreme".parse::<ThinkingEffort>().is_err());
        assert!(ThinkingEffort::Low.is_on());
        assert!(!ThinkingEffort::Off.is_on());
    }
}
