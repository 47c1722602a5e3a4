//! The `Task` tool: delegate a prompt to a subagent.

use amadeus_core::ToolReturnValue;
use amadeus_llm::ToolSchema;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::spawner::SpawnerSlot;
use crate::{Tool, ToolCallContext};

#[derive(Debug, Deserialize)]
struct TaskArgs {
    subagent: String,
    prompt: String,
}

/// Delegate a prompt to a named subagent and return its final answer.
pub struct Task {
    schema: ToolSchema,
    slot: SpawnerSlot,
}

impl Task {
    /// Create the tool. `descriptions` lists the hireable subagents for the
    /// model.
    #[must_use]
    pub fn new(slot: SpawnerSlot, descriptions: &[(String, String)]) -> Self {
        let catalog = if descriptions.is_empty() {
            "No subagents are currently declared.".to_string()
        } else {
            descriptions
                .iter()
                .map(|(name, description)| format!("- `{name}`: {description}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        Self {
            schema: ToolSchema {
                name: "Task".to_string(),
                description: format!(
                    "Delegate a self-contained task to a subagent. The subagent works in its \
                     own conversation and returns its final answer.\n\nAvailable subagents:\n\
                     {catalog}"
                ),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "subagent": {
                            "type": "string",
                            "description": "Name of the subagent to hire."
                        },
                        "prompt": {
                            "type": "string",
                            "description": "The full task description."
                        }
                    },
                    "required": ["subagent", "prompt"],
                    "additionalProperties": false
                }),
            },
            slot,
        }
    }
}

#[async_trait]
impl Tool for Task {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, arguments: Value, cx: ToolCallContext) -> ToolReturnValue {
        let args: TaskArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(error) => return ToolReturnValue::validate_error(error),
        };
        let Some(spawner) = self.slot.get() else {
            return ToolReturnValue::runtime_error(
                "subagent spawning is not available in this context",
            );
        };
        spawner
            .spawn(&args.subagent, &args.prompt, &cx.tool_call.id)
            .await
    }
}
