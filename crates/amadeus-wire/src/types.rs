//! Wire message types and their `{type, payload}` envelope form.

use std::sync::{Arc, Mutex};

use amadeus_approval::ApprovalKind;
use amadeus_core::{ContentPart, MessageContent, TokenUsage, ToolCall, ToolResult, ToolReturnValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// Fire-and-forget wire events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireEvent {
    /// A new turn began. Always the first event of a turn.
    TurnBegin {
        /// The user input that started the turn.
        user_input: MessageContent,
    },
    /// A new step began. Precedes every event of that step.
    StepBegin {
        /// 1-based step number.
        n: usize,
    },
    /// The current step was interrupted by an error or a cancel.
    StepInterrupted,
    /// Context compaction started.
    CompactionBegin,
    /// Context compaction finished. Directly follows `CompactionBegin`.
    CompactionEnd,
    /// Soul status snapshot. `None` fields mean "unchanged".
    StatusUpdate(StatusUpdate),
    /// A streamed assistant content part.
    ContentPart(ContentPart),
    /// A tool call opened.
    ToolCall(ToolCall),
    /// An argument fragment for the open tool call.
    ToolCallPart {
        /// The fragment, in stream order.
        arguments_delta: String,
    },
    /// A tool call settled.
    ToolResult(ToolResult),
    /// An approval request was answered.
    ApprovalResponse {
        /// The request that was answered.
        request_id: String,
        /// The answer.
        response: ApprovalKind,
    },
    /// An event from a subagent, wrapped for the parent wire.
    SubagentEvent {
        /// The Task tool call that owns the subagent.
        task_tool_call_id: String,
        /// The subagent's event.
        event: Box<WireEvent>,
    },
}

/// Soul status fields for [`WireEvent::StatusUpdate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Fraction of the context window in use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_usage: Option<f64>,
    /// Token usage of the step that just finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    /// Provider message id of the step that just finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// One-shot resolver shared between the requester and the UI.
///
/// Cloneable so the request can travel to several subscribers; the first
/// resolution wins and later ones are dropped.
#[derive(Debug, Clone)]
pub(crate) struct Resolver<T> {
    tx: Arc<Mutex<Option<oneshot::Sender<T>>>>,
    rx: Arc<Mutex<Option<oneshot::Receiver<T>>>>,
}

impl<T> Default for Resolver<T> {
    fn default() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
            rx: Arc::new(Mutex::new(Some(rx))),
        }
    }
}

impl<T> Resolver<T> {
    /// Resolve; duplicate resolutions are dropped.
    fn resolve(&self, value: T) {
        let sender = self.tx.lock().expect("resolver poisoned").take();
        if let Some(sender) = sender {
            let _ = sender.send(value);
        } else {
            debug!("Dropping duplicate request resolution");
        }
    }

    fn is_resolved(&self) -> bool {
        self.tx.lock().expect("resolver poisoned").is_none()
    }

    /// Wait for resolution. `None` when every resolver handle was dropped,
    /// or when called twice.
    async fn wait(&self) -> Option<T> {
        let receiver = self.rx.lock().expect("resolver poisoned").take()?;
        receiver.await.ok()
    }
}

/// A request for user approval, routed over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique request id.
    pub id: String,
    /// The tool call that triggered the request.
    pub tool_call_id: String,
    /// The requesting tool's name.
    pub sender: String,
    /// The action key.
    pub action: String,
    /// What will happen if approved.
    pub description: String,
    /// Blocks rendered to the user.
    #[serde(default)]
    pub display: Vec<amadeus_core::DisplayBlock>,
    #[serde(skip)]
    resolver: Resolver<ApprovalKind>,
}

impl ApprovalRequest {
    /// Wrap an approval-gate request for the wire.
    #[must_use]
    pub fn from_gate(request: amadeus_approval::ApprovalRequest) -> Self {
        Self {
            id: request.id,
            tool_call_id: request.tool_call_id,
            sender: request.sender,
            action: request.action,
            description: request.description,
            display: request.display,
            resolver: Resolver::default(),
        }
    }

    /// Resolve with the user's answer. Idempotent.
    pub fn resolve(&self, response: ApprovalKind) {
        self.resolver.resolve(response);
    }

    /// Whether the request has been resolved.
    #[must_use]
    pub fn resolved(&self) -> bool {
        self.resolver.is_resolved()
    }

    /// Wait for the answer. A dropped wire counts as rejection.
    pub async fn wait(&self) -> ApprovalKind {
        self.resolver.wait().await.unwrap_or(ApprovalKind::Reject)
    }
}

impl PartialEq for ApprovalRequest {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// A tool call delegated to the UI for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// The tool call id.
    pub id: String,
    /// The tool name.
    pub name: String,
    /// Arguments as a JSON string.
    pub arguments: Option<String>,
    #[serde(skip)]
    resolver: Resolver<ToolReturnValue>,
}

impl ToolCallRequest {
    /// Build from a streamed tool call.
    #[must_use]
    pub fn from_tool_call(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
            resolver: Resolver::default(),
        }
    }

    /// Resolve with the tool's return value. Idempotent.
    pub fn resolve(&self, value: ToolReturnValue) {
        self.resolver.resolve(value);
    }

    /// Whether the request has been resolved.
    #[must_use]
    pub fn resolved(&self) -> bool {
        self.resolver.is_resolved()
    }

    /// Wait for the return value. A dropped wire yields a tool error.
    pub async fn wait(&self) -> ToolReturnValue {
        self.resolver.wait().await.unwrap_or_else(|| {
            ToolReturnValue::error(
                amadeus_core::ToolErrorKind::Runtime,
                "Wire connection closed before the tool result was received.",
                "Wire closed",
            )
        })
    }
}

impl PartialEq for ToolCallRequest {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Wire messages that expect a response.
#[derive(Debug, Clone, PartialEq)]
pub enum WireRequest {
    /// Approval of a dangerous action.
    Approval(ApprovalRequest),
    /// Execution of a UI-hosted external tool.
    ToolCall(ToolCallRequest),
}

impl WireRequest {
    /// Whether the request has been resolved.
    #[must_use]
    pub fn resolved(&self) -> bool {
        match self {
            Self::Approval(request) => request.resolved(),
            Self::ToolCall(request) => request.resolved(),
        }
    }

    /// Resolve with the canned wire-closure outcome.
    pub fn resolve_closed(&self) {
        match self {
            Self::Approval(request) => request.resolve(ApprovalKind::Reject),
            Self::ToolCall(request) => request.resolve(ToolReturnValue::error(
                amadeus_core::ToolErrorKind::Runtime,
                "Wire connection closed before the tool result was received.",
                "Wire closed",
            )),
        }
    }
}

/// Any message sent over the Wire.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// A fire-and-forget event.
    Event(WireEvent),
    /// A request expecting a response.
    Request(WireRequest),
}

impl From<WireEvent> for WireMessage {
    fn from(event: WireEvent) -> Self {
        Self::Event(event)
    }
}

impl From<WireRequest> for WireMessage {
    fn from(request: WireRequest) -> Self {
        Self::Request(request)
    }
}

/// The serialized `{type, payload}` form of a wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Message payload.
    pub payload: Value,
}

/// Errors turning an envelope back into a message.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The type name is not part of the wire vocabulary.
    #[error("unknown wire message type `{0}`")]
    UnknownType(String),
    /// The payload did not match the type's schema.
    #[error("invalid payload for `{kind}`: {source}")]
    InvalidPayload {
        /// Message type name.
        kind: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

fn to_payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl WireMessage {
    /// Serialize into the `{type, payload}` envelope.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        let (kind, payload) = match self {
            Self::Event(event) => match event {
                WireEvent::TurnBegin { user_input } => {
                    ("TurnBegin", to_payload(&serde_json::json!({"user_input": user_input})))
                },
                WireEvent::StepBegin { n } => ("StepBegin", to_payload(&serde_json::json!({"n": n}))),
                WireEvent::StepInterrupted => ("StepInterrupted", Value::Object(serde_json::Map::new())),
                WireEvent::CompactionBegin => ("CompactionBegin", Value::Object(serde_json::Map::new())),
                WireEvent::CompactionEnd => ("CompactionEnd", Value::Object(serde_json::Map::new())),
                WireEvent::StatusUpdate(update) => ("StatusUpdate", to_payload(update)),
                WireEvent::ContentPart(part) => ("ContentPart", to_payload(part)),
                WireEvent::ToolCall(call) => ("ToolCall", to_payload(call)),
                WireEvent::ToolCallPart { arguments_delta } => (
                    "ToolCallPart",
                    to_payload(&serde_json::json!({"arguments_delta": arguments_delta})),
                ),
                WireEvent::ToolResult(result) => ("ToolResult", to_payload(result)),
                WireEvent::ApprovalResponse {
                    request_id,
                    response,
                } => (
                    "ApprovalResponse",
                    to_payload(&serde_json::json!({
                        "request_id": request_id,
                        "response": response,
                    })),
                ),
                WireEvent::SubagentEvent {
                    task_tool_call_id,
                    event,
                } => (
                    "SubagentEvent",
                    to_payload(&serde_json::json!({
                        "task_tool_call_id": task_tool_call_id,
                        "event": WireMessage::Event((**event).clone()).to_envelope(),
                    })),
                ),
            },
            Self::Request(request) => match request {
                WireRequest::Approval(request) => ("ApprovalRequest", to_payload(request)),
                WireRequest::ToolCall(request) => ("ToolCallRequest", to_payload(request)),
            },
        };
        Envelope {
            kind: kind.to_string(),
            payload,
        }
    }

    /// Parse an envelope back into a message.
    ///
    /// The legacy type name `ApprovalRequestResolved` is accepted as an
    /// alias for `ApprovalResponse`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown type names or malformed payloads.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, EnvelopeError> {
        fn parse<T: serde::de::DeserializeOwned>(
            kind: &str,
            payload: &Value,
        ) -> Result<T, EnvelopeError> {
            serde_json::from_value(payload.clone()).map_err(|source| EnvelopeError::InvalidPayload {
                kind: kind.to_string(),
                source,
            })
        }

        #[derive(Deserialize)]
        struct TurnBeginPayload {
            user_input: MessageContent,
        }
        #[derive(Deserialize)]
        struct StepBeginPayload {
            n: usize,
        }
        #[derive(Deserialize)]
        struct ToolCallPartPayload {
            arguments_delta: String,
        }
        #[derive(Deserialize)]
        struct ApprovalResponsePayload {
            request_id: String,
            response: ApprovalKind,
        }
        #[derive(Deserialize)]
        struct SubagentEventPayload {
            task_tool_call_id: String,
            event: Envelope,
        }

        let kind = envelope.kind.as_str();
        let payload = &envelope.payload;
        let message = match kind {
            "TurnBegin" => {
                let parsed: TurnBeginPayload = parse(kind, payload)?;
                Self::Event(WireEvent::TurnBegin {
                    user_input: parsed.user_input,
                })
            },
            "StepBegin" => {
                let parsed: StepBeginPayload = parse(kind, payload)?;
                Self::Event(WireEvent::StepBegin { n: parsed.n })
            },
            "StepInterrupted" => Self::Event(WireEvent::StepInterrupted),
            "CompactionBegin" => Self::Event(WireEvent::CompactionBegin),
            "CompactionEnd" => Self::Event(WireEvent::CompactionEnd),
            "StatusUpdate" => Self::Event(WireEvent::StatusUpdate(parse(kind, payload)?)),
            "ContentPart" => Self::Event(WireEvent::ContentPart(parse(kind, payload)?)),
            "ToolCall" => Self::Event(WireEvent::ToolCall(parse(kind, payload)?)),
            "ToolCallPart" => {
                let parsed: ToolCallPartPayload = parse(kind, payload)?;
                Self::Event(WireEvent::ToolCallPart {
                    arguments_delta: parsed.arguments_delta,
                })
            },
            "ToolResult" => Self::Event(WireEvent::ToolResult(parse(kind, payload)?)),
            "ApprovalResponse" | "ApprovalRequestResolved" => {
                let parsed: ApprovalResponsePayload = parse(kind, payload)?;
                Self::Event(WireEvent::ApprovalResponse {
                    request_id: parsed.request_id,
                    response: parsed.response,
                })
            },
            "SubagentEvent" => {
                let parsed: SubagentEventPayload = parse(kind, payload)?;
                let inner = Self::from_envelope(&parsed.event)?;
                let Self::Event(event) = inner else {
                    return Err(EnvelopeError::InvalidPayload {
                        kind: kind.to_string(),
                        source: serde::de::Error::custom("subagent event must wrap an event"),
                    });
                };
                Self::Event(WireEvent::SubagentEvent {
                    task_tool_call_id: parsed.task_tool_call_id,
                    event: Box::new(event),
                })
            },
            "ApprovalRequest" => Self::Request(WireRequest::Approval(parse(kind, payload)?)),
            "ToolCallRequest" => Self::Request(WireRequest::ToolCall(parse(kind, payload)?)),
            other => return Err(EnvelopeError::UnknownType(other.to_string())),
        };
        Ok(message)
    }
}
