//! Token usage accounting.

use serde::{Deserialize, Serialize};

/// Token usage reported by a chat provider for one generation.
///
/// Prompt tokens are split by cache disposition so the UI can show cache
/// efficiency; [`TokenUsage::input`] collapses them back into the prompt
/// total the context tally needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens that were neither read from nor written to the cache.
    #[serde(default)]
    pub input_other: u64,
    /// Prompt tokens served from the provider-side prompt cache.
    #[serde(default)]
    pub input_cache_read: u64,
    /// Prompt tokens written to the provider-side prompt cache.
    #[serde(default)]
    pub input_cache_creation: u64,
    /// Completion tokens.
    #[serde(default)]
    pub output: u64,
}

impl TokenUsage {
    /// Total prompt tokens.
    #[must_use]
    pub fn input(&self) -> u64 {
        self.input_other
            .saturating_add(self.input_cache_read)
            .saturating_add(self.input_cache_creation)
    }

    /// Total tokens, prompt plus completion.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input().saturating_add(self.output)
    }
}
