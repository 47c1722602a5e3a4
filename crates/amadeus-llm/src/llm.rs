//! The configured LLM: a provider plus its model limits and capabilities.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use amadeus_config::{ModelConfig, ProviderConfig, ProviderKind};
use amadeus_core::ModelCapability;
use tracing::info;

use crate::error::{ChatError, ChatResult};
use crate::openai_compat::{OpenAiCompat, Sampling};
use crate::provider::{ChatProvider, ThinkingEffort};
use crate::scripted::Scripted;

/// A chat provider together with its context window and capability set.
#[derive(Clone)]
pub struct Llm {
    /// The provider.
    pub provider: Arc<dyn ChatProvider>,
    /// Context window size in tokens.
    pub max_context_size: u64,
    /// Advertised capabilities.
    pub capabilities: BTreeSet<ModelCapability>,
}

impl Llm {
    /// The provider-side model name.
    #[must_use]
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Whether thinking output is currently enabled.
    #[must_use]
    pub fn thinking(&self) -> Option<bool> {
        self.provider
            .thinking_effort()
            .map(ThinkingEffort::is_on)
    }
}

impl std::fmt::Debug for Llm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Llm")
            .field("model", &self.provider.model_name())
            .field("max_context_size", &self.max_context_size)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Derive the capability set for a model.
///
/// Config declarations win; model-name heuristics add the thinking flags
/// for models whose names mark them as reasoners.
#[must_use]
pub fn derive_capabilities(model: &ModelConfig) -> BTreeSet<ModelCapability> {
    let mut capabilities: BTreeSet<ModelCapability> = model.capabilities.iter().copied().collect();
    let name = model.model.to_lowercase();
    if name.contains("thinking") || name.contains("reason") {
        capabilities.insert(ModelCapability::Thinking);
        capabilities.insert(ModelCapability::AlwaysThinking);
    }
    capabilities
}

fn parse_sampling(provider: &ProviderConfig) -> Sampling {
    Sampling {
        temperature: provider
            .env
            .get("AMADEUS_MODEL_TEMPERATURE")
            .and_then(|value| value.parse().ok()),
        top_p: provider
            .env
            .get("AMADEUS_MODEL_TOP_P")
            .and_then(|value| value.parse().ok()),
        max_tokens: provider
            .env
            .get("AMADEUS_MODEL_MAX_TOKENS")
            .and_then(|value| value.parse().ok()),
    }
}

/// Build an [`Llm`] from configuration.
///
/// Returns `Ok(None)` when the provider is not configured well enough to be
/// usable (no base URL or model for a network provider) — the runtime then
/// starts without an LLM and the first prompt reports it.
///
/// # Errors
///
/// Returns an error when the scripted provider's script file is missing or
/// malformed.
pub fn create_llm(
    provider_config: &ProviderConfig,
    model_config: &ModelConfig,
    thinking: Option<bool>,
) -> ChatResult<Option<Llm>> {
    let provider: Arc<dyn ChatProvider> = match provider_config.kind {
        ProviderKind::OpenAiCompat => {
            if provider_config.base_url.is_empty() || model_config.model.is_empty() {
                return Ok(None);
            }
            Arc::new(
                OpenAiCompat::new(
                    &provider_config.base_url,
                    &provider_config.api_key,
                    &model_config.model,
                )
                .with_sampling(parse_sampling(provider_config)),
            )
        },
        ProviderKind::Scripted => {
            let path = provider_config
                .env
                .get("AMADEUS_SCRIPTED_SCRIPTS")
                .map(PathBuf::from)
                .or_else(|| std::env::var("AMADEUS_SCRIPTED_SCRIPTS").ok().map(PathBuf::from))
                .ok_or_else(|| {
                    ChatError::Protocol(
                        "AMADEUS_SCRIPTED_SCRIPTS is required for the _scripted provider"
                            .to_string(),
                    )
                })?;
            Arc::new(Scripted::from_file(&path)?)
        },
    };

    let capabilities = derive_capabilities(model_config);

    // Apply thinking when requested, or force it for always-thinking models.
    let provider = if capabilities.contains(&ModelCapability::AlwaysThinking)
        || (thinking == Some(true) && capabilities.contains(&ModelCapability::Thinking))
    {
        provider.with_thinking(ThinkingEffort::High)
    } else if thinking == Some(false) {
        provider.with_thinking(ThinkingEffort::Off)
    } else {
        provider
    };

    info!(
        model = %provider.model_name(),
        max_context_size = model_config.max_context_size,
        "Configured LLM"
    );

    Ok(Some(Llm {
        provider,
        max_context_size: model_config.max_context_size,
        capabilities,
    }))
}
