//! The `SetTodoList` tool: replace the visible todo list.

use amadeus_core::{DisplayBlock, TodoItem, ToolReturnValue};
use amadeus_llm::ToolSchema;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{Tool, ToolCallContext};

#[derive(Debug, Deserialize)]
struct SetTodoListArgs {
    items: Vec<TodoItem>,
}

/// Replace the todo list shown to the user.
pub struct SetTodoList {
    schema: ToolSchema,
}

impl SetTodoList {
    /// Create the tool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema: ToolSchema {
                name: "SetTodoList".to_string(),
                description: "Replace the todo list shown to the user. Pass the full list \
                              every time; items carry a status of `pending`, `in_progress`, \
                              or `done`."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "items": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "title": {"type": "string"},
                                    "status": {
                                        "type": "string",
                                        "enum": ["pending", "in_progress", "done"]
                                    }
                                },
                                "required": ["title", "status"],
                                "additionalProperties": false
                            }
                        }
                    },
                    "required": ["items"],
                    "additionalProperties": false
                }),
            },
        }
    }
}

impl Default for SetTodoList {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SetTodoList {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, arguments: Value, _cx: ToolCallContext) -> ToolReturnValue {
        let args: SetTodoListArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(error) => return ToolReturnValue::validate_error(error),
        };
        let count = args.items.len();
        ToolReturnValue::ok(format!("Todo list updated ({count} items)."))
            .with_display(vec![DisplayBlock::Todo { items: args.items }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amadeus_core::ToolCall;

    #[tokio::test]
    async fn test_updates_list() {
        let tool = SetTodoList::new();
        let value = tool
            .call(
                json!({"items": [
                    {"title": "write tests", "status": "in_progress"},
                    {"title": "ship", "status": "pending"}
                ]}),
                ToolCallContext {
                    tool_call: ToolCall::new("tc-1", "SetTodoList", None),
                },
            )
            .await;
        assert!(!value.is_error);
        assert!(matches!(
            &value.display[0],
            DisplayBlock::Todo { items } if items.len() == 2
        ));
    }
}
