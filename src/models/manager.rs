// Model Manager - loads base models and fine-tuned derivatives into a session
//
// Keeps the registry in step with what gets loaded and saved. The manager
// never owns the model itself; it fills the caller's ModelSession.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::backend::{LoadedModel, ModelBackend, ModelSession};
use super::common::Quantization;
use super::loaders::CandleBackend;
use super::lora_impl::LoraAdapter;
use super::registry::{ModelRegistry, RegistryEntry};
use crate::config::{AiConfig, ModelSettings};
use crate::errors::AiError;

/// Loads, overlays and saves models; owns the registry
pub struct ModelManager {
    registry: ModelRegistry,
    backend: Arc<dyn ModelBackend>,
    settings: ModelSettings,
}

impl ModelManager {
    pub fn new(registry: ModelRegistry, backend: Arc<dyn ModelBackend>, settings: ModelSettings) -> Self {
        Self {
            registry,
            backend,
            settings,
        }
    }

    /// Manager over the candle backend, with the registry under `models_dir`
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let registry = ModelRegistry::open(config.registry_path())?;
        let backend = CandleBackend::new(config.cache_dir.clone(), config.model.device.clone()).with_progress(true);
        Ok(Self::new(registry, Arc::new(backend), config.model.clone()))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// Configured default quantization
    pub fn default_quantization(&self) -> Result<Quantization> {
        Ok(self.settings.quantization.parse::<Quantization>()?)
    }

    /// Load a base model and its tokenizer into `session`, replacing
    /// whatever it held. Registers the id if it is new.
    pub fn load_model(
        &mut self,
        session: &mut ModelSession,
        model_id: Option<&str>,
        quantization: Option<Quantization>,
    ) -> Result<()> {
        let model_id = model_id.unwrap_or(&self.settings.model_name).to_string();
        let quantization = match quantization {
            Some(q) => q,
            None => self.default_quantization()?,
        };

        let loaded = self.build_base(&model_id, quantization)?;
        session.install(loaded);

        tracing::info!("Model {} loaded ({})", model_id, quantization);
        Ok(())
    }

    /// Load a base model with the adapter saved at `path` overlaid.
    ///
    /// The base is resolved from the registry when `base_id` is omitted.
    /// The session is only touched once base and adapter are both ready.
    pub fn load_fine_tuned(
        &mut self,
        session: &mut ModelSession,
        path: &Path,
        base_id: Option<&str>,
    ) -> Result<()> {
        let base_id = match base_id {
            Some(id) => id.to_string(),
            None => self.registry.resolve_base(&artifact_key(path))?,
        };

        let quantization = match self.registry.get(&base_id) {
            Some(entry) => entry.quantization,
            None => self.default_quantization()?,
        };

        let mut loaded = self.build_base(&base_id, quantization)?;

        let adapter = LoraAdapter::load(path, loaded.model.device().clone())
            .with_context(|| format!("Failed to load adapter from {}", path.display()))?;
        if !adapter.fits(loaded.model.hidden_size(), loaded.model.vocab_size()) {
            bail!(
                "Adapter at {} does not match base model {} (hidden {}, vocab {})",
                path.display(),
                base_id,
                loaded.model.hidden_size(),
                loaded.model.vocab_size()
            );
        }
        loaded.adapter = Some(adapter);

        session.install(loaded);

        tracing::info!("Fine-tuned model loaded from {} (base {})", path.display(), base_id);
        Ok(())
    }

    /// Write the held adapter and tokenizer to `dir` and record the
    /// derivative under `base_id` (default: the held model's base).
    ///
    /// The two writes are not atomic together; a crash in between leaves an
    /// unregistered artifact on disk.
    pub fn save_fine_tuned(
        &mut self,
        session: &ModelSession,
        dir: &Path,
        base_id: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<PathBuf> {
        let loaded = session.current().ok_or(AiError::NoModelLoaded)?;
        let adapter = loaded.adapter.as_ref().ok_or(AiError::NoAdapter)?;

        adapter.save(dir)?;
        loaded.model.save_tokenizer(dir)?;

        let base_id = base_id.unwrap_or(&loaded.base_id);
        let key = artifact_key(dir);
        self.registry.record_derivative(
            base_id,
            &key,
            metadata.unwrap_or_else(|| serde_json::json!({})),
        )?;

        tracing::info!("Fine-tuned model saved to {} (base {})", key, base_id);
        Ok(PathBuf::from(key))
    }

    /// One registry entry for `model_id`, or the whole registry when no id
    /// is given. `None` means the id was never registered.
    pub fn model_info(&self, model_id: Option<&str>) -> Option<ModelInfo<'_>> {
        match model_id {
            Some(id) => self.registry.get(id).map(ModelInfo::Model),
            None => Some(ModelInfo::All(
                self.registry.entries().map(|(id, entry)| (id.as_str(), entry)).collect(),
            )),
        }
    }

    fn build_base(&mut self, model_id: &str, quantization: Quantization) -> Result<LoadedModel> {
        tracing::info!("Loading model {} with {} quantization", model_id, quantization);

        let model = self
            .backend
            .load(model_id, quantization)
            .with_context(|| format!("Failed to load model {}", model_id))?;

        if self.registry.register(model_id, quantization)? {
            tracing::debug!("Registered new base model {}", model_id);
        }

        Ok(LoadedModel::new(model_id.to_string(), quantization, model))
    }
}

/// Result of [`ModelManager::model_info`]
#[derive(Debug, Clone, PartialEq)]
pub enum ModelInfo<'a> {
    Model(&'a RegistryEntry),
    /// Every registered base, ordered by id
    All(Vec<(&'a str, &'a RegistryEntry)>),
}

impl<'a> ModelInfo<'a> {
    /// The single entry, when one id was asked for
    pub fn entry(&self) -> Option<&'a RegistryEntry> {
        match self {
            ModelInfo::Model(entry) => Some(entry),
            ModelInfo::All(_) => None,
        }
    }

    pub fn entries(&self) -> Vec<(&'a str, &'a RegistryEntry)> {
        match self {
            ModelInfo::Model(entry) => vec![(entry.base_model.as_str(), *entry)],
            ModelInfo::All(entries) => entries.clone(),
        }
    }
}

/// Registry key for an artifact directory (canonical when it exists)
pub fn artifact_key(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}
