//! The `SendDMail` tool: ask the Soul to rewind the conversation.

use std::sync::Arc;

use amadeus_core::{DenwaRenji, ToolReturnValue};
use amadeus_llm::ToolSchema;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{Tool, ToolCallContext};

/// The registered tool name, checked by the Soul to decide checkpoint
/// placement.
pub const SEND_DMAIL_NAME: &str = "SendDMail";

#[derive(Debug, Deserialize)]
struct SendDMailArgs {
    checkpoint_id: usize,
    message: String,
}

/// Send a D-Mail: rewind the context to a checkpoint and deliver a message
/// to the past self.
pub struct SendDMail {
    schema: ToolSchema,
    denwa: Arc<DenwaRenji>,
}

impl SendDMail {
    /// Create the tool.
    #[must_use]
    pub fn new(denwa: Arc<DenwaRenji>) -> Self {
        Self {
            schema: ToolSchema {
                name: SEND_DMAIL_NAME.to_string(),
                description: "Send a message back to a past checkpoint of this conversation. \
                              The conversation rewinds to that checkpoint and your past self \
                              receives the message. Work done in the working directory stays."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "checkpoint_id": {
                            "type": "integer",
                            "minimum": 0,
                            "description": "The checkpoint to rewind to."
                        },
                        "message": {
                            "type": "string",
                            "description": "The message delivered to your past self."
                        }
                    },
                    "required": ["checkpoint_id", "message"],
                    "additionalProperties": false
                }),
            },
            denwa,
        }
    }
}

#[async_trait]
impl Tool for SendDMail {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, arguments: Value, _cx: ToolCallContext) -> ToolReturnValue {
        let args: SendDMailArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(error) => return ToolReturnValue::validate_error(error),
        };
        match self.denwa.send(args.checkpoint_id, args.message) {
            Ok(()) => ToolReturnValue::ok_brief(
                "D-Mail queued. The conversation will rewind at the end of this step.",
                format!("d-mail to checkpoint {}", args.checkpoint_id),
            ),
            Err(error) => ToolReturnValue::runtime_error(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amadeus_core::ToolCall;

    fn context() -> ToolCallContext {
        ToolCallContext {
            tool_call: ToolCall::new("tc-1", SEND_DMAIL_NAME, None),
        }
    }

    #[tokio::test]
    async fn test_queues_mail() {
        let denwa = Arc::new(DenwaRenji::new());
        denwa.set_n_checkpoints(2);
        let tool = SendDMail::new(Arc::clone(&denwa));

        let value = tool
            .call(json!({"checkpoint_id": 1, "message": "buy the lotto ticket"}), context())
            .await;
        assert!(!value.is_error);

        let mail = denwa.fetch_pending_dmail().unwrap();
        assert_eq!(mail.checkpoint_id, 1);
    }

    #[tokio::test]
    async fn test_out_of_range_checkpoint() {
        let denwa = Arc::new(DenwaRenji::new());
        denwa.set_n_checkpoints(1);
        let tool = SendDMail::new(Arc::clone(&denwa));

        let value = tool
            .call(json!({"checkpoint_id": 5, "message": "too far"}), context())
            .await;
        assert!(value.is_error);
        assert!(denwa.fetch_pending_dmail().is_none());
    }
}
