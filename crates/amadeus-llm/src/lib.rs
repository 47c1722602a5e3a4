#![deny(unsafe_code)]
#![warn(unreachable_pub)]
//! Chat provider abstraction for the Amadeus agent runtime.
//!
//! The Soul treats a provider as a pure stream source: `generate` yields
//! content parts, tool calls, tool-call argument deltas, and a terminal
//! usage report. Model-specific headers, auth, and prompt-cache keys are
//! each adapter's concern.

mod error;
mod llm;
mod openai_compat;
mod provider;
mod scripted;

pub use error::{ChatError, ChatResult};
pub use llm::{Llm, create_llm, derive_capabilities};
pub use openai_compat::OpenAiCompat;
pub use provider::{ChatProvider, EventStream, StreamEvent, ThinkingEffort, ToolSchema};
pub use scripted::{ScriptTurn, Scripted};
