//! Tool return values and user-facing display blocks.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};

use crate::message::ContentPart;

/// The output half of a tool return value: what the model sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    /// Plain text output.
    Text(String),
    /// Structured output (text, images, ...).
    Parts(Vec<ContentPart>),
}

impl ToolOutput {
    /// Whether the output is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }
}

impl Default for ToolOutput {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Classification of a failed tool call.
///
/// The step loop keys on this (a rejection stops the turn); it also keeps
/// `wire.jsonl` self-describing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Tool arguments were not valid JSON.
    Parse,
    /// Tool arguments did not satisfy the parameter schema.
    Validate,
    /// No tool with the requested name is registered.
    NotFound,
    /// The tool implementation failed.
    Runtime,
    /// The user rejected the action.
    Rejected,
    /// The call did not finish within its timeout.
    Timeout,
}

/// What a tool call produced.
///
/// Successful and failed calls share one shape; `is_error` plus the optional
/// [`ToolErrorKind`] distinguish them. `output` and `message` address the
/// model; `display` addresses the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReturnValue {
    /// Whether the call failed.
    pub is_error: bool,
    /// Output content given back to the model.
    pub output: ToolOutput,
    /// An explanatory note for the model, appended after the output.
    #[serde(default)]
    pub message: String,
    /// Blocks rendered to the user.
    #[serde(default)]
    pub display: Vec<DisplayBlock>,
    /// Error classification, absent on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
}

impl ToolReturnValue {
    /// A successful return value.
    pub fn ok(output: impl Into<ToolOutput>) -> Self {
        Self {
            is_error: false,
            output: output.into(),
            message: String::new(),
            display: Vec::new(),
            error_kind: None,
        }
    }

    /// A successful return value with a brief display line.
    pub fn ok_brief(output: impl Into<ToolOutput>, brief: impl Into<String>) -> Self {
        Self {
            display: vec![DisplayBlock::Brief {
                text: brief.into(),
            }],
            ..Self::ok(output)
        }
    }

    /// Attach display blocks.
    #[must_use]
    pub fn with_display(mut self, display: Vec<DisplayBlock>) -> Self {
        self.display = display;
        self
    }

    /// A generic failed return value.
    pub fn error(
        kind: ToolErrorKind,
        message: impl Into<String>,
        brief: impl Into<String>,
    ) -> Self {
        let brief = brief.into();
        Self {
            is_error: true,
            output: ToolOutput::default(),
            message: message.into(),
            display: if brief.is_empty() {
                Vec::new()
            } else {
                vec![DisplayBlock::Brief { text: brief }]
            },
            error_kind: Some(kind),
        }
    }

    /// Arguments were not valid JSON.
    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::error(
            ToolErrorKind::Parse,
            format!("Failed to parse tool arguments as JSON: {detail}"),
            "Invalid arguments",
        )
    }

    /// Arguments did not satisfy the parameter schema.
    pub fn validate_error(detail: impl std::fmt::Display) -> Self {
        Self::error(
            ToolErrorKind::Validate,
            format!("Tool arguments failed schema validation: {detail}"),
            "Invalid arguments",
        )
    }

    /// The requested tool does not exist.
    pub fn not_found(name: &str) -> Self {
        Self::error(
            ToolErrorKind::NotFound,
            format!("No tool named `{name}` is available."),
            "Unknown tool",
        )
    }

    /// The tool implementation failed.
    pub fn runtime_error(detail: impl std::fmt::Display) -> Self {
        Self::error(
            ToolErrorKind::Runtime,
            format!("Tool execution failed: {detail}"),
            "Tool failed",
        )
    }

    /// The user rejected the action.
    #[must_use]
    pub fn rejected() -> Self {
        Self::error(
            ToolErrorKind::Rejected,
            "The action was rejected by the user. Do not retry it; ask the user how to proceed.",
            "Rejected",
        )
    }

    /// The call timed out.
    pub fn timeout(detail: impl std::fmt::Display) -> Self {
        Self::error(ToolErrorKind::Timeout, detail.to_string(), "Timeout")
    }

    /// Whether the user rejected this call.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.error_kind == Some(ToolErrorKind::Rejected)
    }

    /// First brief display line, if any.
    #[must_use]
    pub fn brief(&self) -> &str {
        for block in &self.display {
            if let DisplayBlock::Brief { text } = block {
                return text;
            }
        }
        ""
    }
}

/// The result of one tool call: the return value plus the call it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the tool call this result answers.
    pub tool_call_id: String,
    /// The return value.
    pub return_value: ToolReturnValue,
}

/// A single todo list entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    /// What to do.
    pub title: String,
    /// `pending`, `in_progress`, or `done`.
    pub status: String,
}

/// A block of content rendered to the user.
///
/// Like [`ContentPart`] this is tagged by a `type` field and unknown types
/// round-trip losslessly, so a wire log written by a newer version replays
/// without data loss.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayBlock {
    /// One-line summary.
    Brief {
        /// The summary text.
        text: String,
    },
    /// A shell invocation and its output.
    Shell {
        /// The command line.
        command: String,
        /// Captured stdout/stderr.
        output: String,
        /// Process exit code, if it exited.
        exit_code: Option<i32>,
    },
    /// A unified diff against one file.
    Diff {
        /// The file the diff applies to.
        path: String,
        /// Unified diff text.
        diff: String,
    },
    /// The current todo list.
    Todo {
        /// List entries in order.
        items: Vec<TodoItem>,
    },
    /// A block of a type this version does not know.
    Unknown(Value),
}

impl Serialize for DisplayBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = match self {
            Self::Brief { text } => json!({"type": "brief", "text": text}),
            Self::Shell {
                command,
                output,
                exit_code,
            } => json!({
                "type": "shell",
                "command": command,
                "output": output,
                "exit_code": exit_code,
            }),
            Self::Diff { path, diff } => json!({"type": "diff", "path": path, "diff": diff}),
            Self::Todo { items } => json!({"type": "todo", "items": items}),
            Self::Unknown(value) => value.clone(),
        };
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DisplayBlock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Err(D::Error::custom("display block missing `type` field"));
        };
        let parsed = match kind {
            "brief" | "shell" | "diff" | "todo" => {
                serde_json::from_value::<KnownDisplayBlock>(value.clone()).map_err(D::Error::custom)?
            },
            _ => return Ok(Self::Unknown(value)),
        };
        Ok(match parsed {
            KnownDisplayBlock::Brief { text } => Self::Brief { text },
            KnownDisplayBlock::Shell {
                command,
                output,
                exit_code,
            } => Self::Shell {
                command,
                output,
                exit_code,
            },
            KnownDisplayBlock::Diff { path, diff } => Self::Diff { path, diff },
            KnownDisplayBlock::Todo { items } => Self::Todo { items },
        })
    }
}

/// Mirror of the known [`DisplayBlock`] variants for derived decoding.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownDisplayBlock {
    Brief {
        text: String,
    },
    Shell {
        command: String,
        #[serde(default)]
        output: String,
        #[serde(default)]
        exit_code: Option<i32>,
    },
    Diff {
        path: String,
        diff: String,
    },
    Todo {
        items: Vec<TodoItem>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_and_error_shapes() {
        let ok = ToolReturnValue::ok("all good");
        assert!(!ok.is_error);
        assert!(ok.error_kind.is_none());

        let rejected = ToolReturnValue::rejected();
        assert!(rejected.is_error);
        assert!(rejected.is_rejected());
        assert_eq!(rejected.brief(), "Rejected");
    }

    #[test]
    fn test_return_value_roundtrip() {
        let value = ToolReturnValue::ok_brief("ok\n", "echo ok").with_display(vec![
            DisplayBlock::Shell {
                command: "echo ok".to_string(),
                output: "ok\n".to_string(),
                exit_code: Some(0),
            },
        ]);
        let json = serde_json::to_string(&value).unwrap();
        let back: ToolReturnValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_unknown_display_block_preserved() {
        let raw = json!({"type": "sparkline", "points": [1, 4, 9]});
        let block: DisplayBlock = serde_json::from_value(raw.clone()).unwrap();
        assert!(matches!(block, DisplayBlock::Unknown(_)));
        assert_eq!(serde_json::to_value(&block).unwrap(), raw);
    }

    #[test]
    fn test_timeout_brief() {
        let value = ToolReturnValue::timeout("Timeout while calling MCP tool `slow`.");
        assert_eq!(value.brief(), "Timeout");
        assert_eq!(value.error_kind, Some(ToolErrorKind::Timeout));
    }
}
