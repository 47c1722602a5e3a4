#![deny(unsafe_code)]
#![warn(unreachable_pub)]
//! The Wire: typed in-process pub/sub between the Soul and attached UIs.
//!
//! Events flow soul→UI, fire and forget. Requests (approvals, UI-hosted
//! external tools) also flow soul→UI but carry a one-shot resolver the UI
//! completes. Every message can be teed to an append-only `wire.jsonl` for
//! later replay.

mod file;
mod types;
mod wire;

pub use file::WireFile;
pub use types::{
    ApprovalRequest, Envelope, EnvelopeError, StatusUpdate, ToolCallRequest, WireEvent,
    WireMessage, WireRequest,
};
pub use wire::{Wire, WireSubscriber};
