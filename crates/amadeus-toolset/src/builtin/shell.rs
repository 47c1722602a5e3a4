//! The `Shell` tool: run a command line in the working directory.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use amadeus_approval::Approval;
use amadeus_core::{DisplayBlock, ToolReturnValue};
use amadeus_llm::ToolSchema;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::{Tool, ToolCallContext};

/// Default command timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Output cap before truncation.
const MAX_OUTPUT_CHARS: usize = 30_000;

/// The approval action key shared by all shell invocations.
pub(crate) const ACTION_RUN_COMMAND: &str = "run command";

#[derive(Debug, Deserialize)]
struct ShellArgs {
    command: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// Run a shell command, approval-gated.
pub struct Shell {
    schema: ToolSchema,
    approval: Approval,
    work_dir: PathBuf,
}

impl Shell {
    /// Create the tool.
    #[must_use]
    pub fn new(approval: Approval, work_dir: PathBuf) -> Self {
        Self {
            schema: ToolSchema {
                name: "Shell".to_string(),
                description: "Run a shell command in the working directory and return its \
                              combined stdout and stderr."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "command": {
                            "type": "string",
                            "description": "The command line to run with `sh -c`."
                        },
                        "timeout_secs": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Optional timeout in seconds (default 120)."
                        }
                    },
                    "required": ["command"],
                    "additionalProperties": false
                }),
            },
            approval,
            work_dir,
        }
    }
}

#[async_trait]
impl Tool for Shell {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, arguments: Value, cx: ToolCallContext) -> ToolReturnValue {
        let args: ShellArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(error) => return ToolReturnValue::validate_error(error),
        };

        let approved = self
            .approval
            .request(
                "Shell",
                ACTION_RUN_COMMAND,
                format!("Run `{}`.", args.command),
                vec![DisplayBlock::Shell {
                    command: args.command.clone(),
                    output: String::new(),
                    exit_code: None,
                }],
                &cx.tool_call.id,
            )
            .await;
        if !approved {
            return ToolReturnValue::rejected();
        }

        let timeout = Duration::from_secs(args.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        debug!(command = %args.command, ?timeout, "Running shell command");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&args.command)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(error) => return ToolReturnValue::runtime_error(error),
        };

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Err(_) => {
                return ToolReturnValue::timeout(format!(
                    "Command did not finish within {} seconds.",
                    timeout.as_secs(),
                ));
            },
            Ok(Err(error)) => return ToolReturnValue::runtime_error(error),
            Ok(Ok(output)) => output,
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let truncated = truncate(combined);
        let exit_code = output.status.code();

        let message = match exit_code {
            Some(0) => String::new(),
            Some(code) => format!("Command exited with code {code}."),
            None => "Command was terminated by a signal.".to_string(),
        };

        ToolReturnValue {
            is_error: false,
            output: truncated.clone().into(),
            message,
            display: vec![DisplayBlock::Shell {
                command: args.command,
                output: truncated,
                exit_code,
            }],
            error_kind: None,
        }
    }
}

fn truncate(output: String) -> String {
    if output.len() <= MAX_OUTPUT_CHARS {
        return output;
    }
    let mut cut = MAX_OUTPUT_CHARS;
    while !output.is_char_boundary(cut) {
        cut = cut.saturating_sub(1);
    }
    let mut truncated = output[..cut].to_string();
    truncated.push_str("\n... (output truncated)");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use amadeus_core::ToolCall;

    fn context() -> ToolCallContext {
        ToolCallContext {
            tool_call: ToolCall::new("tc-1", "Shell", None),
        }
    }

    fn tool(dir: &tempfile::TempDir) -> Shell {
        Shell::new(Approval::new(true), dir.path().to_path_buf())
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let value = tool(&dir)
            .call(json!({"command": "echo ok"}), context())
            .await;
        assert!(!value.is_error);
        assert_eq!(value.output, "ok\n".into());
    }

    #[tokio::test]
    async fn test_nonzero_exit_noted_in_message() {
        let dir = tempfile::tempdir().unwrap();
        let value = tool(&dir)
            .call(json!({"command": "exit 3"}), context())
            .await;
        assert!(!value.is_error);
        assert!(value.message.contains("code 3"));
    }

    #[tokio::test]
    async fn test_runs_in_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let value = tool(&dir)
            .call(json!({"command": "cat marker.txt"}), context())
            .await;
        assert_eq!(value.output, "here".into());
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let value = tool(&dir)
            .call(json!({"command": "sleep 5", "timeout_secs": 1}), context())
            .await;
        assert!(value.is_error);
        assert_eq!(value.brief(), "Timeout");
    }

    #[tokio::test]
    async fn test_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let approval = Approval::new(false);
        let shell = Shell::new(approval.share(), dir.path().to_path_buf());

        let pending = tokio::spawn(async move {
            shell.call(json!({"command": "echo hi"}), context()).await
        });
        let request = approval.fetch_request().await.unwrap();
        assert_eq!(request.action, ACTION_RUN_COMMAND);
        approval.resolve_request(&request.id, amadeus_approval::ApprovalKind::Reject);

        let value = pending.await.unwrap();
        assert!(value.is_rejected());
    }
}
