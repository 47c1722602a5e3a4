//! Config file loading and validation.

use std::path::Path;

use tracing::{debug, info};

use crate::{Config, ConfigError};

/// Load `config.json` from the share directory.
///
/// A missing file yields the default (empty) configuration — a fresh
/// install has nothing configured yet.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed, or
/// validated.
pub fn load_config(share_dir: &Path) -> Result<Config, ConfigError> {
    load_config_from(&share_dir.join("config.json"))
}

/// Load configuration from an explicit path.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed, or
/// validated.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "No config file, using defaults");
        return Ok(Config::default());
    }

    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let config: Config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    validate(&config)?;

    info!(
        path = %path.display(),
        models = config.models.len(),
        providers = config.providers.len(),
        "Loaded configuration"
    );
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    for (name, model) in &config.models {
        if !config.providers.contains_key(&model.provider) {
            return Err(ConfigError::UnknownProvider {
                model: name.clone(),
                provider: model.provider.clone(),
            });
        }
    }
    if let Some(default) = &config.default_model {
        if !config.models.contains_key(default) {
            return Err(ConfigError::UnknownDefaultModel(default.clone()));
        }
    }
    Ok(())
}
