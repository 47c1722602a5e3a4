#![deny(unsafe_code)]
#![warn(unreachable_pub)]
//! The Soul: the scheduler that drives one conversation to completion.
//!
//! For each user prompt (a *turn*) the Soul runs a bounded sequence of
//! *steps*. A step streams an assistant message from the LLM, dispatches
//! requested tool calls concurrently, grows the context atomically, and
//! loops until the model stops asking for tools or a stop condition hits.

mod agent;
mod compaction;
mod flow;
mod skill;
mod slash;
mod soul;
mod subagent;

pub use agent::{Agent, BuiltinPromptArgs, Environment, LaborMarket, Runtime, load_agent};
pub use compaction::{Compaction, SimpleCompaction};
pub use flow::{Flow, FlowEdge, FlowNode, FlowNodeKind, FlowRunner, parse_choice, parse_flow};
pub use skill::{Skill, SkillKind, discover_skills};
pub use slash::{SlashCommand, SlashCommandKind, parse_slash_command_call};
pub use soul::{Soul, StepOutcome, StopReason, TurnOutcome};

use amadeus_core::ModelCapability;
use thiserror::Error;

/// Errors that end a turn.
#[derive(Debug, Error)]
pub enum SoulError {
    /// No chat provider is configured.
    #[error("LLM is not set")]
    LlmNotSet,

    /// The input or a tool output needs a capability the model lacks.
    #[error("LLM does not support: {}", format_caps(.0))]
    LlmNotSupported(Vec<ModelCapability>),

    /// The chat provider failed beyond retry.
    #[error(transparent)]
    ChatProvider(#[from] amadeus_llm::ChatError),

    /// The per-turn step budget ran out.
    #[error("reached the maximum of {0} steps in one turn")]
    MaxStepsReached(usize),

    /// The turn was cancelled from outside.
    #[error("the turn was cancelled")]
    Cancelled,

    /// Session persistence failed.
    #[error(transparent)]
    Session(#[from] amadeus_session::SessionError),

    /// The agent specification could not be loaded.
    #[error("invalid agent specification: {0}")]
    AgentSpec(String),

    /// A runtime task failed unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

fn format_caps(caps: &[ModelCapability]) -> String {
    caps.iter()
        .map(|capability| capability.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for soul operations.
pub type SoulResult<T> = Result<T, SoulError>;
