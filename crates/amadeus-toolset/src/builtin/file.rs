//! File tools: `ReadFile`, `WriteFile`, `StrReplace`.
//!
//! Writers are approval-gated and show the user a diff of what will land
//! on disk. Paths resolve against the working directory.

use std::path::{Path, PathBuf};

use amadeus_approval::Approval;
use amadeus_core::{DisplayBlock, ToolReturnValue};
use amadeus_llm::ToolSchema;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{Tool, ToolCallContext};

pub(crate) const ACTION_WRITE_FILE: &str = "write file";
pub(crate) const ACTION_EDIT_FILE: &str = "edit file";

fn resolve(work_dir: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        work_dir.join(candidate)
    }
}

/// A minimal line diff: common prefix and suffix trimmed, the middle shown
/// as removals then additions.
fn line_diff(path: &str, old: &str, new: &str) -> String {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let mut prefix = 0;
    while prefix < old_lines.len()
        && prefix < new_lines.len()
        && old_lines[prefix] == new_lines[prefix]
    {
        prefix = prefix.saturating_add(1);
    }
    let mut suffix = 0;
    while suffix < old_lines.len().saturating_sub(prefix)
        && suffix < new_lines.len().saturating_sub(prefix)
        && old_lines[old_lines.len().saturating_sub(suffix).saturating_sub(1)]
            == new_lines[new_lines.len().saturating_sub(suffix).saturating_sub(1)]
    {
        suffix = suffix.saturating_add(1);
    }

    let mut diff = format!("--- {path}\n+++ {path}\n");
    for line in &old_lines[prefix..old_lines.len().saturating_sub(suffix)] {
        diff.push('-');
        diff.push_str(line);
        diff.push('\n');
    }
    for line in &new_lines[prefix..new_lines.len().saturating_sub(suffix)] {
        diff.push('+');
        diff.push_str(line);
        diff.push('\n');
    }
    diff
}

// ---------------------------------------------------------------------------
// ReadFile
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

/// Read a text file, optionally a line window of it.
pub struct ReadFile {
    schema: ToolSchema,
    work_dir: PathBuf,
}

impl ReadFile {
    /// Create the tool.
    #[must_use]
    pub fn new(work_dir: PathBuf) -> Self {
        Self {
            schema: ToolSchema {
                name: "ReadFile".to_string(),
                description: "Read a text file. Optionally pass a 1-based line offset and a \
                              line limit to read a window."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "offset": {"type": "integer", "minimum": 1},
                        "limit": {"type": "integer", "minimum": 1}
                    },
                    "required": ["path"],
                    "additionalProperties": false
                }),
            },
            work_dir,
        }
    }
}

#[async_trait]
impl Tool for ReadFile {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, arguments: Value, _cx: ToolCallContext) -> ToolReturnValue {
        let args: ReadFileArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(error) => return ToolReturnValue::validate_error(error),
        };
        let path = resolve(&self.work_dir, &args.path);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(error) => {
                return ToolReturnValue::runtime_error(format!(
                    "cannot read {}: {error}",
                    path.display()
                ));
            },
        };

        let total_lines = content.lines().count();
        let start = args.offset.unwrap_or(1).saturating_sub(1);
        let window: String = match args.limit {
            None if start == 0 => content,
            None => content
                .lines()
                .skip(start)
                .collect::<Vec<_>>()
                .join("\n"),
            Some(limit) => content
                .lines()
                .skip(start)
                .take(limit)
                .collect::<Vec<_>>()
                .join("\n"),
        };

        ToolReturnValue {
            is_error: false,
            output: window.into(),
            message: format!("{} has {total_lines} lines.", path.display()),
            display: Vec::new(),
            error_kind: None,
        }
    }
}

// ---------------------------------------------------------------------------
// WriteFile
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

/// Write (create or overwrite) a file, approval-gated.
pub struct WriteFile {
    schema: ToolSchema,
    approval: Approval,
    work_dir: PathBuf,
}

impl WriteFile {
    /// Create the tool.
    #[must_use]
    pub fn new(approval: Approval, work_dir: PathBuf) -> Self {
        Self {
            schema: ToolSchema {
                name: "WriteFile".to_string(),
                description: "Create or overwrite a file with the given content.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "content": {"type": "string"}
                    },
                    "required": ["path", "content"],
                    "additionalProperties": false
                }),
            },
            approval,
            work_dir,
        }
    }
}

#[async_trait]
impl Tool for WriteFile {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, arguments: Value, cx: ToolCallContext) -> ToolReturnValue {
        let args: WriteFileArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(error) => return ToolReturnValue::validate_error(error),
        };
        let path = resolve(&self.work_dir, &args.path);
        let old = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        let diff = line_diff(&args.path, &old, &args.content);

        let approved = self
            .approval
            .request(
                "WriteFile",
                ACTION_WRITE_FILE,
                format!("Write {} bytes to {}.", args.content.len(), path.display()),
                vec![DisplayBlock::Diff {
                    path: args.path.clone(),
                    diff: diff.clone(),
                }],
                &cx.tool_call.id,
            )
            .await;
        if !approved {
            return ToolReturnValue::rejected();
        }

        if let Some(parent) = path.parent() {
            if let Err(error) = tokio::fs::create_dir_all(parent).await {
                return ToolReturnValue::runtime_error(error);
            }
        }
        if let Err(error) = tokio::fs::write(&path, &args.content).await {
            return ToolReturnValue::runtime_error(error);
        }

        ToolReturnValue::ok_brief(
            format!("Wrote {}.", path.display()),
            format!("wrote {}", args.path),
        )
        .with_display(vec![DisplayBlock::Diff {
            path: args.path,
            diff,
        }])
    }
}

// ---------------------------------------------------------------------------
// StrReplace
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StrReplaceArgs {
    path: String,
    old: String,
    new: String,
}

/// Replace one exact occurrence of a string in a file, approval-gated.
pub struct StrReplace {
    schema: ToolSchema,
    approval: Approval,
    work_dir: PathBuf,
}

impl StrReplace {
    /// Create the tool.
    #[must_use]
    pub fn new(approval: Approval, work_dir: PathBuf) -> Self {
        Self {
            schema: ToolSchema {
                name: "StrReplace".to_string(),
                description: "Replace an exact string in a file. The old string must occur \
                              exactly once."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "old": {"type": "string"},
                        "new": {"type": "string"}
                    },
                    "required": ["path", "old", "new"],
                    "additionalProperties": false
                }),
            },
            approval,
            work_dir,
        }
    }
}

#[async_trait]
impl Tool for StrReplace {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, arguments: Value, cx: ToolCallContext) -> ToolReturnValue {
        let args: StrReplaceArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(error) => return ToolReturnValue::validate_error(error),
        };
        let path = resolve(&self.work_dir, &args.path);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(error) => {
                return ToolReturnValue::runtime_error(format!(
                    "cannot read {}: {error}",
                    path.display()
                ));
            },
        };

        let occurrences = content.matches(&args.old).count();
        if occurrences == 0 {
            return ToolReturnValue::runtime_error("old string not found in file");
        }
        if occurrences > 1 {
            return ToolReturnValue::runtime_error(format!(
                "old string occurs {occurrences} times; it must be unique"
            ));
        }

        let updated = content.replacen(&args.old, &args.new, 1);
        let diff = line_diff(&args.path, &content, &updated);

        let approved = self
            .approval
            .request(
                "StrReplace",
                ACTION_EDIT_FILE,
                format!("Edit {}.", path.display()),
                vec![DisplayBlock::Diff {
                    path: args.path.clone(),
                    diff: diff.clone(),
                }],
                &cx.tool_call.id,
            )
            .await;
        if !approved {
            return ToolReturnValue::rejected();
        }

        if let Err(error) = tokio::fs::write(&path, &updated).await {
            return ToolReturnValue::runtime_error(error);
        }

        ToolReturnValue::ok_brief(
            format!("Edited {}.", path.display()),
            format!("edited {}", args.path),
        )
        .with_display(vec![DisplayBlock::Diff {
            path: args.path,
            diff,
        }])
    }
}
