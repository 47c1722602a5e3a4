#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(unreachable_pub)]
//! Core data model for the Amadeus agent runtime.
//!
//! Everything that crosses a crate boundary lives here: conversation
//! messages and their content parts, tool calls and tool return values,
//! display blocks, token usage accounting, model capabilities, and the
//! `DenwaRenji` rollback mailbox.

pub mod capability;
pub mod denwa;
pub mod message;
pub mod tooling;
pub mod usage;

pub use capability::ModelCapability;
pub use denwa::{DMail, DenwaError, DenwaRenji};
pub use message::{
    check_message, ContentPart, MediaUrl, Message, MessageContent, Role, ToolCall, ToolFunction,
};
pub use tooling::{DisplayBlock, TodoItem, ToolErrorKind, ToolOutput, ToolResult, ToolReturnValue};
pub use usage::TokenUsage;
