//! Subagent spawning through the labor market.
//!
//! The Task tool reaches this through the `SubagentSpawner` seam. A
//! subagent gets its own Soul, context, and wire; its wire events are
//! forwarded to the parent wrapped in `SubagentEvent`, and its requests
//! (approvals, external tools) are re-sent on the parent wire unchanged so
//! the root UI resolves them.

use std::sync::Arc;

use amadeus_core::{MessageContent, ToolReturnValue};
use amadeus_session::Context;
use amadeus_toolset::{SubagentHandle, SubagentSpawner};
use amadeus_wire::{Wire, WireEvent, WireMessage};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::agent::{Agent, load_agent};
use crate::soul::{Soul, StopReason};

pub(crate) struct LaborMarketSpawner {
    parent: Arc<Agent>,
    parent_wire: Wire,
}

impl LaborMarketSpawner {
    pub(crate) fn new(parent: Arc<Agent>, parent_wire: Wire) -> Self {
        Self {
            parent,
            parent_wire,
        }
    }

    /// Find the named subagent, instantiating a dynamic one on a miss.
    async fn resolve(&self, name: &str) -> Option<Arc<Agent>> {
        let market = &self.parent.runtime.labor_market;
        if let Some(agent) = market.get(name) {
            return Some(agent);
        }
        // Dynamic subagents share the parent's labor market.
        let runtime = self.parent.runtime.copy_for_dynamic_subagent();
        match load_agent(None, runtime, Wire::new()).await {
            Ok(agent) => {
                info!(subagent = %name, "Instantiated dynamic subagent");
                market.add_dynamic_subagent(name, Arc::clone(&agent));
                Some(agent)
            },
            Err(error) => {
                warn!(%error, subagent = %name, "Failed to instantiate dynamic subagent");
                None
            },
        }
    }
}

#[async_trait]
impl SubagentSpawner for LaborMarketSpawner {
    fn available(&self) -> Vec<SubagentHandle> {
        self.parent
            .runtime
            .labor_market
            .descriptions()
            .into_iter()
            .map(|(name, description)| SubagentHandle { name, description })
            .collect()
    }

    async fn spawn(&self, name: &str, prompt: &str, task_tool_call_id: &str) -> ToolReturnValue {
        let Some(subagent) = self.resolve(name).await else {
            return ToolReturnValue::runtime_error(format!("no subagent named `{name}`"));
        };

        // Own conversation, own wire; approval stays shared via the runtime.
        let sub_root = self
            .parent
            .runtime
            .session_root
            .join("subagents")
            .join(uuid::Uuid::new_v4().to_string());
        if let Err(error) = tokio::fs::create_dir_all(&sub_root).await {
            return ToolReturnValue::runtime_error(error);
        }
        let context = match Context::open(sub_root.join("context.jsonl")).await {
            Ok(context) => context,
            Err(error) => return ToolReturnValue::runtime_error(error),
        };

        let sub_wire = Wire::new();
        let mut subscriber = sub_wire.ui_side(false);
        let parent_wire = self.parent_wire.clone();
        let task_id = task_tool_call_id.to_string();
        let forward = tokio::spawn(async move {
            while let Some(message) = subscriber.receive().await {
                match message {
                    WireMessage::Event(event) => {
                        parent_wire.send(WireEvent::SubagentEvent {
                            task_tool_call_id: task_id.clone(),
                            event: Box::new(event),
                        });
                    },
                    // Requests keep their resolver; the root UI answers them.
                    WireMessage::Request(request) => {
                        parent_wire.send(WireMessage::Request(request));
                    },
                }
            }
        });

        let soul = Soul::new(
            subagent,
            Arc::new(tokio::sync::Mutex::new(context)),
            sub_wire.clone(),
        );
        soul.wire().send(WireEvent::TurnBegin {
            user_input: MessageContent::Text(prompt.to_string()),
        });
        let outcome = soul
            .turn(amadeus_core::Message::user(prompt))
            .await;
        forward.abort();

        match outcome {
            Ok(outcome) => match outcome.stop_reason {
                StopReason::ToolRejected => ToolReturnValue::rejected(),
                StopReason::NoToolCalls => {
                    let text = outcome
                        .final_message
                        .map(|message| message.extract_text(" "))
                        .unwrap_or_default();
                    if text.is_empty() {
                        ToolReturnValue::ok("(subagent finished without a final message)")
                    } else {
                        ToolReturnValue::ok(text)
                    }
                },
            },
            Err(error) => ToolReturnValue::runtime_error(format!("subagent failed: {error}")),
        }
    }
}
