// Provider factory - build the configured provider

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;

use super::{LlmProvider, OllamaProvider, OpenAIProvider};
use crate::config::ProviderSettings;

/// Create the provider named by `settings.provider`
pub fn create_provider(settings: &ProviderSettings) -> Result<Arc<dyn LlmProvider>> {
    let timeout = Duration::from_secs(settings.timeout_secs);

    match settings.provider.to_lowercase().as_str() {
        "openai" => {
            if settings.openai_api_key.is_empty() {
                tracing::warn!("OpenAI provider selected without an API key");
            }
            Ok(Arc::new(OpenAIProvider::new(
                settings.openai_api_key.clone(),
                settings.openai_base_url.clone(),
                settings.model_name.clone(),
                timeout,
            )?))
        }
        "ollama" => Ok(Arc::new(OllamaProvider::new(
            settings.ollama_host.clone(),
            settings.model_name.clone(),
            timeout,
        )?)),
        other => bail!("Unknown provider type: {} (expected openai or ollama)", other),
    }
}
