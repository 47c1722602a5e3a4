#![deny(unsafe_code)]
#![warn(unreachable_pub)]
//! The toolset: every tool the model can call, behind one dispatcher.
//!
//! [`Toolset::handle`] is the single entry point for tool calls. It never
//! blocks and never fails outward: bad arguments, unknown tools, tool
//! panics, rejections, and timeouts all materialize as error-valued
//! [`ToolResult`]s the model gets to read.

pub mod builtin;
mod mcp;
mod spawner;

pub use mcp::{McpServerStatus, McpTool};
pub use spawner::{SubagentHandle, SubagentSpawner, SpawnerSlot};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use amadeus_core::{ToolCall, ToolResult, ToolReturnValue};
use amadeus_llm::ToolSchema;
use amadeus_wire::{ToolCallRequest, Wire, WireMessage, WireRequest};
use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Context handed to a tool for one call.
#[derive(Debug, Clone)]
pub struct ToolCallContext {
    /// The tool call being executed.
    pub tool_call: ToolCall,
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's definition as shown to the model.
    fn schema(&self) -> &ToolSchema;

    /// Execute the tool. Arguments have already passed schema validation.
    async fn call(&self, arguments: Value, cx: ToolCallContext) -> ToolReturnValue;
}

/// The outcome of [`Toolset::handle`]: either immediate, or a spawned task.
pub enum HandleResult {
    /// The result was produced without running anything.
    Ready(ToolResult),
    /// The call runs in a spawned task.
    Pending {
        /// The tool call id, so a crashed task still yields a result.
        tool_call_id: String,
        /// The running call.
        handle: JoinHandle<ToolResult>,
    },
}

impl HandleResult {
    /// Await the result. A panicked tool task becomes a runtime error.
    pub async fn result(self) -> ToolResult {
        match self {
            Self::Ready(result) => result,
            Self::Pending {
                tool_call_id,
                handle,
            } => match handle.await {
                Ok(result) => result,
                Err(error) => {
                    warn!(%error, "Tool task failed");
                    ToolResult {
                        tool_call_id,
                        return_value: ToolReturnValue::runtime_error(error),
                    }
                },
            },
        }
    }

    /// Abort a pending call (used on turn cancellation).
    pub fn abort(&self) {
        if let Self::Pending { handle, .. } = self {
            handle.abort();
        }
    }
}

enum Registered {
    Local {
        tool: Arc<dyn Tool>,
        schema: ToolSchema,
        validator: Arc<jsonschema::Validator>,
    },
    /// Registered by a UI over the wire; executed by that UI.
    External {
        schema: ToolSchema,
        validator: Arc<jsonschema::Validator>,
    },
}

impl Registered {
    fn schema(&self) -> &ToolSchema {
        match self {
            Self::Local { schema, .. } | Self::External { schema, .. } => schema,
        }
    }

    fn validator(&self) -> &Arc<jsonschema::Validator> {
        match self {
            Self::Local { validator, .. } | Self::External { validator, .. } => validator,
        }
    }
}

/// Errors registering tools.
#[derive(Debug, thiserror::Error)]
pub enum ToolsetError {
    /// The parameter schema is not a valid JSON schema.
    #[error("invalid parameter schema for `{name}`: {reason}")]
    InvalidSchema {
        /// Tool name.
        name: String,
        /// Why compilation failed.
        reason: String,
    },

    /// The name is taken by a non-external tool.
    #[error("tool name `{0}` conflicts with an existing tool")]
    NameConflict(String),
}

/// The registry and dispatcher.
pub struct Toolset {
    wire: Wire,
    tools: Mutex<HashMap<String, Arc<Registered>>>,
    mcp: mcp::McpManager,
}

impl Toolset {
    /// Create an empty toolset. External tool requests travel over `wire`.
    #[must_use]
    pub fn new(wire: Wire) -> Self {
        Self {
            wire,
            tools: Mutex::new(HashMap::new()),
            mcp: mcp::McpManager::new(),
        }
    }

    /// Register a local tool.
    ///
    /// # Errors
    ///
    /// Returns an error when the tool's parameter schema does not compile.
    pub fn add(&self, tool: Arc<dyn Tool>) -> Result<(), ToolsetError> {
        let schema = tool.schema().clone();
        let validator = compile_validator(&schema)?;
        self.tools.lock().expect("toolset poisoned").insert(
            schema.name.clone(),
            Arc::new(Registered::Local {
                tool,
                schema,
                validator,
            }),
        );
        Ok(())
    }

    /// Register (or replace) a UI-hosted external tool.
    ///
    /// # Errors
    ///
    /// Rejects names held by non-external tools and invalid schemas.
    pub fn register_external_tool(
        &self,
        name: &str,
        description: &str,
        parameters: Value,
    ) -> Result<(), ToolsetError> {
        let mut tools = self.tools.lock().expect("toolset poisoned");
        if let Some(existing) = tools.get(name) {
            if matches!(existing.as_ref(), Registered::Local { .. }) {
                return Err(ToolsetError::NameConflict(name.to_string()));
            }
        }
        let schema = ToolSchema {
            name: name.to_string(),
            description: if description.is_empty() {
                "No description provided.".to_string()
            } else {
                description.to_string()
            },
            parameters,
        };
        let validator = compile_validator(&schema)?;
        tools.insert(
            name.to_string(),
            Arc::new(Registered::External { schema, validator }),
        );
        debug!(tool = name, "Registered external tool");
        Ok(())
    }

    /// Whether `name` is registered at all.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.lock().expect("toolset poisoned").contains_key(name)
    }

    /// Whether `name` is an external registration.
    #[must_use]
    pub fn is_external(&self, name: &str) -> bool {
        self.tools
            .lock()
            .expect("toolset poisoned")
            .get(name)
            .is_some_and(|registered| matches!(registered.as_ref(), Registered::External { .. }))
    }

    /// Every tool definition, for the model.
    #[must_use]
    pub fn tools(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .lock()
            .expect("toolset poisoned")
            .values()
            .map(|registered| registered.schema().clone())
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Route one tool call. Never blocks; every failure is a result.
    #[must_use]
    pub fn handle(&self, tool_call: &ToolCall) -> HandleResult {
        let tool_call_id = tool_call.id.clone();
        let ready = |return_value: ToolReturnValue| {
            HandleResult::Ready(ToolResult {
                tool_call_id: tool_call_id.clone(),
                return_value,
            })
        };

        let registered = {
            let tools = self.tools.lock().expect("toolset poisoned");
            tools.get(&tool_call.function.name).cloned()
        };
        let Some(registered) = registered else {
            return ready(ToolReturnValue::not_found(&tool_call.function.name));
        };

        let raw = tool_call.function.arguments.as_deref().unwrap_or("{}");
        let raw = if raw.trim().is_empty() { "{}" } else { raw };
        let arguments: Value = match serde_json::from_str(raw) {
            Ok(arguments) => arguments,
            Err(error) => return ready(ToolReturnValue::parse_error(error)),
        };

        if let Err(error) = registered.validator().validate(&arguments) {
            return ready(ToolReturnValue::validate_error(error));
        }

        match registered.as_ref() {
            Registered::Local { tool, .. } => {
                let tool = Arc::clone(tool);
                let cx = ToolCallContext {
                    tool_call: tool_call.clone(),
                };
                let id = tool_call.id.clone();
                HandleResult::Pending {
                    tool_call_id: tool_call.id.clone(),
                    handle: tokio::spawn(async move {
                        let return_value = tool.call(arguments, cx).await;
                        ToolResult {
                            tool_call_id: id,
                            return_value,
                        }
                    }),
                }
            },
            Registered::External { .. } => {
                let request = ToolCallRequest::from_tool_call(tool_call);
                self.wire
                    .send(WireMessage::Request(WireRequest::ToolCall(request.clone())));
                let id = tool_call.id.clone();
                HandleResult::Pending {
                    tool_call_id: tool_call.id.clone(),
                    handle: tokio::spawn(async move {
                        ToolResult {
                            tool_call_id: id,
                            return_value: request.wait().await,
                        }
                    }),
                }
            },
        }
    }

    /// Start connecting the configured MCP servers in the background.
    pub fn load_mcp(
        self: &Arc<Self>,
        config: amadeus_config::McpConfig,
        approval: amadeus_approval::Approval,
    ) {
        self.mcp.load(Arc::clone(self), config, approval);
    }

    /// Join any in-flight MCP loading.
    pub async fn wait_for_mcp_tools(&self) {
        self.mcp.wait().await;
    }

    /// MCP server statuses by name.
    #[must_use]
    pub fn mcp_statuses(&self) -> HashMap<String, McpServerStatus> {
        self.mcp.statuses()
    }
}

impl std::fmt::Debug for Toolset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .tools
            .lock()
            .expect("toolset poisoned")
            .keys()
            .cloned()
            .collect();
        f.debug_struct("Toolset").field("tools", &names).finish()
    }
}

fn compile_validator(schema: &ToolSchema) -> Result<Arc<jsonschema::Validator>, ToolsetError> {
    jsonschema::validator_for(&schema.parameters)
        .map(Arc::new)
        .map_err(|error| ToolsetError::InvalidSchema {
            name: schema.name.clone(),
            reason: error.to_string(),
        })
}
