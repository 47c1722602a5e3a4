//! Environment overrides for LLM settings.
//!
//! Only provider/model settings can be overridden from the environment.
//! Nothing here touches loop control — step/turn semantics are config-file
//! and code territory only.

use std::collections::BTreeMap;
use std::str::FromStr;

use amadeus_core::ModelCapability;
use tracing::debug;

use crate::types::{ModelConfig, ProviderConfig};

/// Apply `AMADEUS_*` environment overrides to a provider/model pair.
///
/// Returns the names of the variables that were applied (secrets redacted),
/// for diagnostics.
pub fn apply_env_overrides(
    provider: &mut ProviderConfig,
    model: &mut ModelConfig,
) -> BTreeMap<String, String> {
    let mut applied = BTreeMap::new();

    if let Ok(base_url) = std::env::var("AMADEUS_BASE_URL") {
        provider.base_url = base_url.clone();
        applied.insert("AMADEUS_BASE_URL".to_string(), base_url);
    }
    if let Ok(api_key) = std::env::var("AMADEUS_API_KEY") {
        provider.api_key = api_key;
        applied.insert("AMADEUS_API_KEY".to_string(), "******".to_string());
    }
    if let Ok(model_name) = std::env::var("AMADEUS_MODEL_NAME") {
        model.model = model_name.clone();
        applied.insert("AMADEUS_MODEL_NAME".to_string(), model_name);
    }
    if let Ok(value) = std::env::var("AMADEUS_MODEL_MAX_CONTEXT_SIZE") {
        if let Ok(size) = value.parse::<u64>() {
            model.max_context_size = size;
            applied.insert("AMADEUS_MODEL_MAX_CONTEXT_SIZE".to_string(), value);
        }
    }
    if let Ok(value) = std::env::var("AMADEUS_MODEL_CAPABILITIES") {
        model.capabilities = value
            .split(',')
            .filter_map(|name| ModelCapability::from_str(name.trim()).ok())
            .collect();
        applied.insert("AMADEUS_MODEL_CAPABILITIES".to_string(), value);
    }
    for sampling in [
        "AMADEUS_MODEL_TEMPERATURE",
        "AMADEUS_MODEL_TOP_P",
        "AMADEUS_MODEL_MAX_TOKENS",
    ] {
        if let Ok(value) = std::env::var(sampling) {
            provider.env.insert(sampling.to_string(), value.clone());
            applied.insert(sampling.to_string(), value);
        }
    }

    if !applied.is_empty() {
        debug!(overrides = ?applied.keys().collect::<Vec<_>>(), "Applied env overrides");
    }
    applied
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::types::ProviderKind;
    use std::sync::Mutex;

    /// Serializes tests that mutate process environment.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn fixtures() -> (ProviderConfig, ModelConfig) {
        let provider = ProviderConfig {
            kind: ProviderKind::OpenAiCompat,
            base_url: "https://original.example.com".to_string(),
            api_key: String::new(),
            env: BTreeMap::new(),
        };
        let model = ModelConfig {
            provider: "p".to_string(),
            model: "m".to_string(),
            max_context_size: 1000,
            capabilities: Vec::new(),
        };
        (provider, model)
    }

    #[test]
    fn test_no_env_no_change() {
        let _guard = ENV_MUTEX.lock().unwrap();
        for key in [
            "AMADEUS_BASE_URL",
            "AMADEUS_API_KEY",
            "AMADEUS_MODEL_NAME",
            "AMADEUS_MODEL_MAX_CONTEXT_SIZE",
            "AMADEUS_MODEL_CAPABILITIES",
            "AMADEUS_MODEL_TEMPERATURE",
            "AMADEUS_MODEL_TOP_P",
            "AMADEUS_MODEL_MAX_TOKENS",
        ] {
            // SAFETY: serialized by ENV_MUTEX
            unsafe { std::env::remove_var(key) };
        }
        let (mut provider, mut model) = fixtures();
        let applied = apply_env_overrides(&mut provider, &mut model);
        assert!(applied.is_empty());
        assert_eq!(provider.base_url, "https://original.example.com");
    }

    #[test]
    fn test_overrides_applied_and_redacted() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var("AMADEUS_BASE_URL", "https://override.example.com");
            std::env::set_var("AMADEUS_API_KEY", "sk-secret");
            std::env::set_var("AMADEUS_MODEL_CAPABILITIES", "image_in, thinking");
        }
        let (mut provider, mut model) = fixtures();
        let applied = apply_env_overrides(&mut provider, &mut model);

        assert_eq!(provider.base_url, "https://override.example.com");
        assert_eq!(provider.api_key, "sk-secret");
        assert_eq!(applied.get("AMADEUS_API_KEY").unwrap(), "******");
        assert_eq!(model.capabilities.len(), 2);

        unsafe {
            std::env::remove_var("AMADEUS_BASE_URL");
            std::env::remove_var("AMADEUS_API_KEY");
            std::env::remove_var("AMADEUS_MODEL_CAPABILITIES");
        }
    }
}
