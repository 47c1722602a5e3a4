//! Configuration data types.

use std::collections::BTreeMap;

use amadeus_core::ModelCapability;
use serde::{Deserialize, Serialize};

/// Top-level configuration (`config.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Name of the model used when none is selected explicitly.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Declared models by name.
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,
    /// Declared providers by name.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Step/turn loop knobs.
    #[serde(default)]
    pub loop_control: LoopControl,
    /// MCP server declarations.
    #[serde(default)]
    pub mcp: McpConfig,
}

impl Config {
    /// Resolve the default model and its provider, if configured.
    #[must_use]
    pub fn default_model(&self) -> Option<(&ModelConfig, &ProviderConfig)> {
        let name = self.default_model.as_ref()?;
        let model = self.models.get(name)?;
        let provider = self.providers.get(&model.provider)?;
        Some((model, provider))
    }
}

/// A declared model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Name of the provider serving this model.
    pub provider: String,
    /// Provider-side model identifier.
    pub model: String,
    /// Context window size in tokens.
    pub max_context_size: u64,
    /// Advertised capabilities. Heuristics may add more (see `amadeus-llm`).
    #[serde(default)]
    pub capabilities: Vec<ModelCapability>,
}

/// A declared chat provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider kind.
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// API base URL. Unused by `_scripted`.
    #[serde(default)]
    pub base_url: String,
    /// API key. Unused by `_scripted`.
    #[serde(default)]
    pub api_key: String,
    /// Environment applied when this provider is selected
    /// (e.g. the script path for `_scripted`).
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Supported provider kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    /// An OpenAI-compatible chat-completions endpoint.
    #[serde(rename = "openai_compat")]
    OpenAiCompat,
    /// Deterministic scripted replay, for tests.
    #[serde(rename = "_scripted")]
    Scripted,
}

/// Step/turn loop knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoopControl {
    /// Upper bound on steps within one turn.
    #[serde(default = "default_max_steps_per_turn")]
    pub max_steps_per_turn: usize,
    /// Upper bound on LLM request attempts within one step.
    #[serde(default = "default_max_retries_per_step")]
    pub max_retries_per_step: usize,
    /// Context headroom that triggers compaction before a step.
    #[serde(default = "default_reserved_context_size")]
    pub reserved_context_size: u64,
    /// Ralph-loop iteration budget. `0` disables; negative is unbounded.
    #[serde(default)]
    pub max_ralph_iterations: i64,
}

fn default_max_steps_per_turn() -> usize {
    100
}

fn default_max_retries_per_step() -> usize {
    5
}

fn default_reserved_context_size() -> u64 {
    50_000
}

impl Default for LoopControl {
    fn default() -> Self {
        Self {
            max_steps_per_turn: default_max_steps_per_turn(),
            max_retries_per_step: default_max_retries_per_step(),
            reserved_context_size: default_reserved_context_size(),
            max_ralph_iterations: 0,
        }
    }
}

/// MCP configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    /// Declared servers by name.
    #[serde(default)]
    pub servers: BTreeMap<String, McpServerConfig>,
    /// Client-side knobs.
    #[serde(default)]
    pub client: McpClientConfig,
}

/// One declared MCP server (child-process transport).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Executable to spawn.
    pub command: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the child process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// MCP client knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct McpClientConfig {
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_tool_call_timeout_ms")]
    pub tool_call_timeout_ms: u64,
}

fn default_tool_call_timeout_ms() -> u64 {
    60_000
}

impl Default for McpClientConfig {
    fn default() -> Self {
        Self {
            tool_call_timeout_ms: default_tool_call_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_control_defaults() {
        let control: LoopControl = serde_json::from_str("{}").unwrap();
        assert_eq!(control.max_steps_per_turn, 100);
        assert_eq!(control.max_retries_per_step, 5);
        assert_eq!(control.reserved_context_size, 50_000);
        assert_eq!(control.max_ralph_iterations, 0);
    }

    #[test]
    fn test_provider_kind_tags() {
        let scripted: ProviderKind = serde_json::from_str("\"_scripted\"").unwrap();
        assert_eq!(scripted, ProviderKind::Scripted);
        let compat: ProviderKind = serde_json::from_str("\"openai_compat\"").unwrap();
        assert_eq!(compat, ProviderKind::OpenAiCompat);
    }

    #[test]
    fn test_default_model_resolution() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "default_model": "main",
            "models": {
                "main": {"provider": "p", "model": "m", "max_context_size": 100_000}
            },
            "providers": {
                "p": {"type": "openai_compat", "base_url": "https://api.example.com/v1"}
            }
        }))
        .unwrap();
        let (model, provider) = config.default_model().unwrap();
        assert_eq!(model.model, "m");
        assert_eq!(provider.kind, ProviderKind::OpenAiCompat);
    }
}
