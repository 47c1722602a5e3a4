#![deny(unsafe_code)]
#![warn(unreachable_pub)]
//! The Wire JSON-RPC server.
//!
//! Newline-delimited JSON-RPC 2.0 over any `AsyncRead`/`AsyncWrite` pair —
//! stdio in production, in-memory pipes in tests. Inbound methods:
//! `initialize`, `prompt`, `cancel`. Outbound: `event` notifications for
//! every wire event, and `request` calls (approvals, external tools) whose
//! responses resolve the pending wire request.

mod jsonrpc;

pub use jsonrpc::{ErrorObject, WIRE_PROTOCOL_VERSION, codes};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use amadeus_approval::ApprovalKind;
use amadeus_core::ToolReturnValue;
use amadeus_soul::{Soul, SoulError};
use amadeus_wire::{WireMessage, WireRequest};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use jsonrpc::{
    ApprovalResponsePayload, ExternalToolResponsePayload, Incoming, InitializeParams, PromptParams,
};

struct ServerState {
    /// Requests awaiting a client response, keyed by message id.
    pending_requests: Mutex<HashMap<String, WireRequest>>,
    /// Cancel token of the turn in progress, if any.
    running: Mutex<Option<CancellationToken>>,
    outgoing: mpsc::UnboundedSender<Value>,
}

impl ServerState {
    fn send(&self, payload: Value) {
        if self.outgoing.send(payload).is_err() {
            debug!("Write queue closed; dropping outbound message");
        }
    }

    fn send_response(&self, id: &Value, result: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": id, "result": result}));
    }

    fn send_error(&self, id: &Value, code: i64, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message},
        }));
    }
}

/// The wire server, bound to one Soul.
pub struct WireServer {
    soul: Arc<Soul>,
}

impl WireServer {
    /// Create a server for `soul`.
    #[must_use]
    pub fn new(soul: Arc<Soul>) -> Self {
        Self { soul }
    }

    /// Serve until the reader reaches EOF.
    ///
    /// # Errors
    ///
    /// Returns an error when reading or writing the transport fails.
    pub async fn serve<R, W>(self, reader: R, writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!("Starting Wire server");
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<Value>();
        let state = Arc::new(ServerState {
            pending_requests: Mutex::new(HashMap::new()),
            running: Mutex::new(None),
            outgoing: outgoing_tx,
        });

        let write_task = tokio::spawn(write_loop(outgoing_rx, writer));
        let forward_task = tokio::spawn(forward_wire(Arc::clone(&self.soul), Arc::clone(&state)));

        let result = self.read_loop(reader, &state).await;

        // Shutdown: cancel any running turn and resolve outstanding
        // requests with the canned closed-wire outcome.
        if let Some(token) = state.running.lock().expect("server state poisoned").take() {
            token.cancel();
        }
        let pending = std::mem::take(
            &mut *state.pending_requests.lock().expect("server state poisoned"),
        );
        for request in pending.into_values() {
            if !request.resolved() {
                request.resolve_closed();
            }
        }
        forward_task.abort();
        drop(state);
        let _ = write_task.await;

        info!("Wire server stopped");
        result
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        &self,
        reader: R,
        state: &Arc<ServerState>,
    ) -> std::io::Result<()> {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }

            let Ok(message) = serde_json::from_str::<Incoming>(&line) else {
                error!("Invalid JSON line");
                state.send(json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": {"code": codes::PARSE_ERROR, "message": "Invalid JSON format"},
                }));
                continue;
            };
            if message.jsonrpc.as_deref() != Some("2.0") {
                state.send(json!({
                    "jsonrpc": "2.0",
                    "id": message.id,
                    "error": {"code": codes::INVALID_REQUEST, "message": "Invalid request"},
                }));
                continue;
            }

            if message.is_response() {
                self.handle_client_response(state, &message);
                continue;
            }

            let id = message.id.clone();
            let method = message.method.clone();
            match method.as_deref() {
                Some("initialize") => self.handle_initialize(state, &message),
                Some("prompt") => self.handle_prompt(state, message),
                Some("cancel") => self.handle_cancel(state, &message),
                Some(other) => {
                    warn!(method = other, "Unknown JSON-RPC method");
                    if let Some(id) = id {
                        state.send_error(
                            &id,
                            codes::METHOD_NOT_FOUND,
                            &format!("Unknown method: {other}"),
                        );
                    }
                },
                None => {
                    if let Some(id) = id {
                        state.send_error(&id, codes::INVALID_REQUEST, "Invalid request");
                    }
                },
            }
        }
        info!("stdin closed, Wire server exiting");
        Ok(())
    }

    fn handle_initialize(&self, state: &Arc<ServerState>, message: &Incoming) {
        let Some(id) = message.id.clone() else {
            return;
        };
        let params: InitializeParams =
            match serde_json::from_value(message.params.clone().unwrap_or(json!({}))) {
                Ok(params) => params,
                Err(_) => {
                    state.send_error(
                        &id,
                        codes::INVALID_PARAMS,
                        "Invalid parameters for method `initialize`",
                    );
                    return;
                },
            };

        if let Some(client) = &params.client {
            debug!(client = %client.name, "Wire client identified");
        }

        let mut accepted: Vec<String> = Vec::new();
        let mut rejected: Vec<Value> = Vec::new();
        let toolset = &self.soul.agent().toolset;
        for tool in &params.external_tools {
            match toolset.register_external_tool(&tool.name, &tool.description, tool.parameters.clone())
            {
                Ok(()) => accepted.push(tool.name.clone()),
                Err(reason) => rejected.push(json!({
                    "name": tool.name,
                    "reason": reason.to_string(),
                })),
            }
        }

        let slash_commands: Vec<Value> = self
            .soul
            .available_slash_commands()
            .iter()
            .map(|command| {
                json!({
                    "name": command.name,
                    "description": command.description,
                    "aliases": command.aliases,
                })
            })
            .collect();

        let mut result = json!({
            "protocol_version": WIRE_PROTOCOL_VERSION,
            "server": {"name": "amadeus", "version": env!("CARGO_PKG_VERSION")},
            "slash_commands": slash_commands,
        });
        if !accepted.is_empty() || !rejected.is_empty() {
            result["external_tools"] = json!({"accepted": accepted, "rejected": rejected});
        }
        state.send_response(&id, result);
    }

    fn handle_prompt(&self, state: &Arc<ServerState>, message: Incoming) {
        let Some(id) = message.id else {
            warn!("Prompt without id ignored");
            return;
        };
        let params: PromptParams =
            match serde_json::from_value(message.params.unwrap_or(json!({}))) {
                Ok(params) => params,
                Err(_) => {
                    state.send_error(
                        &id,
                        codes::INVALID_PARAMS,
                        "Invalid parameters for method `prompt`",
                    );
                    return;
                },
            };

        let token = {
            let mut running = state.running.lock().expect("server state poisoned");
            if running.is_some() {
                state.send_error(&id, codes::INVALID_STATE, "An agent turn is already in progress");
                return;
            }
            let token = CancellationToken::new();
            *running = Some(token.clone());
            token
        };

        let soul = Arc::clone(&self.soul);
        let state = Arc::clone(state);
        tokio::spawn(async move {
            let outcome = soul.run(params.user_input, token).await;
            state.running.lock().expect("server state poisoned").take();
            match outcome {
                Ok(()) => state.send_response(&id, json!({"status": "finished"})),
                Err(SoulError::MaxStepsReached(steps)) => {
                    state.send_response(&id, json!({"status": "max_steps_reached", "steps": steps}));
                },
                Err(SoulError::Cancelled) => {
                    state.send_response(&id, json!({"status": "cancelled"}));
                },
                Err(SoulError::LlmNotSet) => {
                    state.send_error(&id, codes::LLM_NOT_SET, "LLM is not set");
                },
                Err(error @ SoulError::LlmNotSupported(_)) => {
                    state.send_error(&id, codes::LLM_NOT_SUPPORTED, &error.to_string());
                },
                Err(SoulError::ChatProvider(error)) => {
                    state.send_error(&id, codes::CHAT_PROVIDER_ERROR, &error.to_string());
                },
                Err(error) => {
                    error!(%error, "Turn failed");
                    state.send_error(&id, codes::INTERNAL_ERROR, &format!("Run failed: {error}"));
                },
            }
        });
    }

    fn handle_cancel(&self, state: &Arc<ServerState>, message: &Incoming) {
        let Some(id) = message.id.clone() else {
            return;
        };
        let token = state
            .running
            .lock()
            .expect("server state poisoned")
            .clone();
        match token {
            Some(token) => {
                token.cancel();
                state.send_response(&id, json!({}));
            },
            None => {
                state.send_error(&id, codes::INVALID_STATE, "No agent turn is in progress");
            },
        }
    }

    fn handle_client_response(&self, state: &Arc<ServerState>, message: &Incoming) {
        let Some(id) = message.id.as_ref().and_then(Value::as_str) else {
            warn!("Response without a string id");
            return;
        };
        let Some(request) = state
            .pending_requests
            .lock()
            .expect("server state poisoned")
            .remove(id)
        else {
            warn!(%id, "No pending request for response");
            return;
        };

        match request {
            WireRequest::Approval(request) => {
                if message.error.is_some() {
                    request.resolve(ApprovalKind::Reject);
                    return;
                }
                let parsed: Result<ApprovalResponsePayload, _> =
                    serde_json::from_value(message.result.clone().unwrap_or(Value::Null));
                match parsed {
                    Ok(payload) => {
                        if payload.request_id != request.id {
                            warn!(
                                request = %request.id,
                                response = %payload.request_id,
                                "Approval response id mismatch"
                            );
                        }
                        request.resolve(payload.response);
                    },
                    Err(error) => {
                        error!(%error, "Invalid approval response payload");
                        request.resolve(ApprovalKind::Reject);
                    },
                }
            },
            WireRequest::ToolCall(request) => {
                if let Some(error) = &message.error {
                    request.resolve(ToolReturnValue::error(
                        amadeus_core::ToolErrorKind::Runtime,
                        error.message.clone(),
                        "External tool error",
                    ));
                    return;
                }
                let parsed: Result<ExternalToolResponsePayload, _> =
                    serde_json::from_value(message.result.clone().unwrap_or(Value::Null));
                match parsed {
                    Ok(payload) => {
                        if payload.tool_call_id != request.id {
                            warn!(
                                request = %request.id,
                                response = %payload.tool_call_id,
                                "Tool result id mismatch"
                            );
                        }
                        request.resolve(payload.return_value);
                    },
                    Err(error) => {
                        error!(%error, "Invalid external tool result payload");
                        request.resolve(ToolReturnValue::error(
                            amadeus_core::ToolErrorKind::Runtime,
                            "Invalid tool result payload from client.",
                            "Invalid tool result",
                        ));
                    },
                }
            },
        }
    }
}

/// Forward wire messages to the client: events as notifications, requests
/// as JSON-RPC requests keyed by their own id.
async fn forward_wire(soul: Arc<Soul>, state: Arc<ServerState>) {
    let mut subscriber = soul.wire().ui_side(false);
    while let Some(message) = subscriber.receive().await {
        match message {
            WireMessage::Event(_) => {
                let envelope = message.to_envelope();
                state.send(json!({
                    "jsonrpc": "2.0",
                    "method": "event",
                    "params": {"type": envelope.kind, "payload": envelope.payload},
                }));
            },
            WireMessage::Request(request) => {
                let (request_id, envelope) = match &request {
                    WireRequest::Approval(approval) => (
                        approval.id.clone(),
                        WireMessage::Request(request.clone()).to_envelope(),
                    ),
                    WireRequest::ToolCall(call) => (
                        call.id.clone(),
                        WireMessage::Request(request.clone()).to_envelope(),
                    ),
                };
                state
                    .pending_requests
                    .lock()
                    .expect("server state poisoned")
                    .insert(request_id.clone(), request);
                state.send(json!({
                    "jsonrpc": "2.0",
                    "id": request_id,
                    "method": "request",
                    "params": {"type": envelope.kind, "payload": envelope.payload},
                }));
            },
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut rx: mpsc::UnboundedReceiver<Value>,
    mut writer: W,
) {
    while let Some(payload) = rx.recv().await {
        let mut line = payload.to_string();
        line.push('\n');
        if let Err(error) = writer.write_all(line.as_bytes()).await {
            error!(%error, "Wire server write failed");
            break;
        }
        if let Err(error) = writer.flush().await {
            error!(%error, "Wire server flush failed");
            break;
        }
    }
}
