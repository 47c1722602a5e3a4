#![deny(unsafe_code)]
#![warn(unreachable_pub)]
//! Configuration for the Amadeus CLI.
//!
//! Configuration lives in `config.json` under the share directory. The
//! loader validates cross-references (every model must name a declared
//! provider) and applies environment overrides for LLM settings.
//!
//! Environment variables may reconfigure the LLM (base URL, key, model,
//! context size, capabilities, sampling) but never the step/turn semantics.

mod env;
mod loader;
mod types;

pub use env::apply_env_overrides;
pub use loader::{load_config, load_config_from};
pub use types::{
    Config, LoopControl, McpClientConfig, McpConfig, McpServerConfig, ModelConfig, ProviderConfig,
    ProviderKind,
};

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON.
    #[error("invalid config file {path}: {source}")]
    Parse {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A model references an undeclared provider.
    #[error("model `{model}` references unknown provider `{provider}`")]
    UnknownProvider {
        /// The model name.
        model: String,
        /// The missing provider name.
        provider: String,
    },

    /// The default model is not declared.
    #[error("default model `{0}` is not declared in `models`")]
    UnknownDefaultModel(String),
}
