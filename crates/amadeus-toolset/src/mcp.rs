//! MCP server lifecycle and tool bridging.
//!
//! Servers are declared in config and connected in the background so the
//! first LLM step does not wait on slow handshakes; the Soul joins the
//! loading task right before it needs the tool list.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use amadeus_approval::Approval;
use amadeus_core::ToolReturnValue;
use amadeus_llm::ToolSchema;
use async_trait::async_trait;
use rmcp::ServiceExt;
use rmcp::model::CallToolRequestParams;
use rmcp::service::{Peer, RoleClient, RunningService};
use rmcp::transport::TokioChildProcess;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use amadeus_config::{McpConfig, McpServerConfig};

use crate::{Tool, ToolCallContext, Toolset};

/// Connection state of one MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpServerStatus {
    /// Declared but not yet touched.
    Pending,
    /// Handshake in progress.
    Connecting,
    /// Connected; tools registered.
    Connected,
    /// Connection or handshake failed.
    Failed,
    /// The server requires authorization we do not hold.
    Unauthorized,
}

/// Minimal rmcp client handler; every capability uses the trait defaults.
#[derive(Clone)]
struct AmadeusClientHandler;

impl rmcp::ClientHandler for AmadeusClientHandler {}

struct McpState {
    statuses: HashMap<String, McpServerStatus>,
    /// Running services, kept alive for the session's lifetime.
    services: Vec<RunningService<RoleClient, AmadeusClientHandler>>,
}

pub(crate) struct McpManager {
    state: Arc<Mutex<McpState>>,
    loading: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl McpManager {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(McpState {
                statuses: HashMap::new(),
                services: Vec::new(),
            })),
            loading: tokio::sync::Mutex::new(None),
        }
    }

    pub(crate) fn statuses(&self) -> HashMap<String, McpServerStatus> {
        self.state.lock().expect("mcp state poisoned").statuses.clone()
    }

    /// Start connecting every declared server in a background task.
    pub(crate) fn load(&self, toolset: Arc<Toolset>, config: McpConfig, approval: Approval) {
        if config.servers.is_empty() {
            return;
        }
        {
            let mut state = self.state.lock().expect("mcp state poisoned");
            for name in config.servers.keys() {
                state.statuses.insert(name.clone(), McpServerStatus::Pending);
            }
        }

        let state = Arc::clone(&self.state);
        let timeout = Duration::from_millis(config.client.tool_call_timeout_ms);
        let handle = tokio::spawn(async move {
            for (name, server_config) in config.servers {
                {
                    let mut state = state.lock().expect("mcp state poisoned");
                    state
                        .statuses
                        .insert(name.clone(), McpServerStatus::Connecting);
                }
                match connect_server(&name, &server_config).await {
                    Ok((service, tools)) => {
                        let peer = service.peer().clone();
                        let count = tools.len();
                        for schema in tools {
                            let tool = McpTool {
                                server: name.clone(),
                                schema,
                                peer: peer.clone(),
                                approval: approval.share(),
                                timeout,
                            };
                            if let Err(error) = toolset.add(Arc::new(tool)) {
                                warn!(server = %name, %error, "Skipping MCP tool");
                            }
                        }
                        let mut state = state.lock().expect("mcp state poisoned");
                        state.services.push(service);
                        state
                            .statuses
                            .insert(name.clone(), McpServerStatus::Connected);
                        info!(server = %name, tools = count, "Connected MCP server");
                    },
                    Err(reason) => {
                        error!(server = %name, %reason, "Failed to connect MCP server");
                        let mut state = state.lock().expect("mcp state poisoned");
                        state.statuses.insert(name.clone(), McpServerStatus::Failed);
                    },
                }
            }
        });

        if let Ok(mut loading) = self.loading.try_lock() {
            *loading = Some(handle);
        }
    }

    /// Join the loading task, if one is running.
    pub(crate) async fn wait(&self) {
        let handle = self.loading.lock().await.take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                warn!(%error, "MCP loading task failed");
            }
        }
    }
}

async fn connect_server(
    name: &str,
    config: &McpServerConfig,
) -> Result<(RunningService<RoleClient, AmadeusClientHandler>, Vec<ToolSchema>), String> {
    let mut command = tokio::process::Command::new(&config.command);
    command.args(&config.args);
    for (key, value) in &config.env {
        command.env(key, value);
    }

    let transport =
        TokioChildProcess::new(command).map_err(|e| format!("failed to spawn server: {e}"))?;
    let service = AmadeusClientHandler
        .serve(transport)
        .await
        .map_err(|e| format!("MCP handshake failed: {e}"))?;

    let rmcp_tools = service
        .list_all_tools()
        .await
        .map_err(|e| format!("list_tools failed: {e}"))?;
    let tools = rmcp_tools
        .iter()
        .map(|tool| ToolSchema {
            name: tool.name.to_string(),
            description: format!(
                "This is an MCP (Model Context Protocol) tool from MCP server `{name}`.\n\n{}",
                tool.description.as_deref().unwrap_or("No description provided."),
            ),
            parameters: serde_json::to_value(&*tool.input_schema)
                .unwrap_or_else(|_| serde_json::json!({"type": "object"})),
        })
        .collect();

    Ok((service, tools))
}

/// A tool served by a connected MCP server.
pub struct McpTool {
    server: String,
    schema: ToolSchema,
    peer: Peer<RoleClient>,
    approval: Approval,
    timeout: Duration,
}

#[async_trait]
impl Tool for McpTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, arguments: Value, cx: ToolCallContext) -> ToolReturnValue {
        let action = format!("mcp:{}", self.schema.name);
        let description = format!("Call MCP tool `{}`.", self.schema.name);
        if !self
            .approval
            .request(
                &self.schema.name,
                action,
                description,
                Vec::new(),
                &cx.tool_call.id,
            )
            .await
        {
            return ToolReturnValue::rejected();
        }

        let params = CallToolRequestParams {
            meta: None,
            name: Cow::Owned(self.schema.name.clone()),
            arguments: match arguments {
                Value::Object(map) => Some(map),
                Value::Null => None,
                other => {
                    let mut map = serde_json::Map::new();
                    map.insert("value".to_string(), other);
                    Some(map)
                },
            },
            task: None,
        };

        let result = match tokio::time::timeout(self.timeout, self.peer.call_tool(params)).await {
            Err(_) => {
                return ToolReturnValue::timeout(format!(
                    "Timeout while calling MCP tool `{}` on server `{}`. \
                     The timeout may be configured too low.",
                    self.schema.name, self.server,
                ));
            },
            Ok(Err(error)) => {
                return ToolReturnValue::runtime_error(format!(
                    "MCP tool `{}` failed: {error}",
                    self.schema.name,
                ));
            },
            Ok(Ok(result)) => result,
        };

        let text: String = result
            .content
            .iter()
            .filter_map(|content| content.as_text().map(|t| t.text.clone()))
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error.unwrap_or(false) {
            ToolReturnValue {
                is_error: true,
                output: text.into(),
                message: "Tool returned an error. The output may be an error message or \
                          incomplete output."
                    .to_string(),
                display: Vec::new(),
                error_kind: Some(amadeus_core::ToolErrorKind::Runtime),
            }
        } else {
            ToolReturnValue::ok(text)
        }
    }
}
