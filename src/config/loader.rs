// Configuration loader
// Loads ~/.ipms/config.toml (or an explicit path) and applies environment overrides

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::constants::{CONFIG_DIR_NAME, CONFIG_FILE_NAME};
use super::settings::AiConfig;

/// Load configuration from an explicit file, or the default location.
///
/// A missing default config file is not an error: every field has a default.
/// A missing *explicit* file is.
pub fn load_config(path: Option<&Path>) -> Result<AiConfig> {
    let mut config = match path {
        Some(path) => load_from_file(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => load_from_file(&path)?,
            _ => AiConfig::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    tracing::debug!(
        "Configuration loaded: model={}, quantization={}",
        config.model.model_name,
        config.model.quantization
    );

    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn load_from_file(path: &Path) -> Result<AiConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Environment variables win over the file.
fn apply_env_overrides(config: &mut AiConfig, get: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| get(key).filter(|v| !v.is_empty());

    if let Some(model) = non_empty("IPMS_MODEL_NAME") {
        config.model.model_name = model;
    }
    if let Some(quantization) = non_empty("IPMS_QUANTIZATION") {
        config.model.quantization = quantization;
    }
    if let Some(device) = non_empty("IPMS_DEVICE") {
        config.model.device = device;
    }
    if let Some(key) = non_empty("OPENAI_API_KEY") {
        config.provider.openai_api_key = key;
    }
    if let Some(host) = non_empty("OLLAMA_HOST") {
        config.provider.ollama_host = host;
    }
}
