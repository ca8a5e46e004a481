// Configuration structs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::constants::*;

/// Local model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Default base model (HuggingFace repo id or local directory)
    pub model_name: String,
    /// Execution device: "auto", "cpu", "cuda" or "metal"
    pub device: String,
    /// Maximum total tokens (prompt + generated) for text generation
    pub max_length: usize,
    pub temperature: f64,
    pub top_p: f64,
    /// "4bit", "8bit" or "none"
    pub quantization: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_BASE_MODEL.to_string(),
            device: "auto".to_string(),
            max_length: 2048,
            temperature: 0.7,
            top_p: 0.95,
            quantization: "4bit".to_string(),
        }
    }
}

/// Vector index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreSettings {
    pub collection_name: String,
    /// "all-MiniLM-L6-v2" (neural, ONNX) or "hash" (offline fallback)
    pub embedding_model: String,
    /// Directory holding the SQLite index; relative paths resolve under the data root
    pub persist_directory: PathBuf,
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            collection_name: "ipms_data".to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            persist_directory: PathBuf::from("vectorstore"),
        }
    }
}

/// Fine-tuning defaults (overridable per run)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub batch_size: usize,
    pub learning_rate: f64,
    pub num_epochs: usize,
    pub warmup_steps: usize,
    pub lora_r: usize,
    pub lora_alpha: f64,
    pub lora_dropout: f32,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            batch_size: 4,
            learning_rate: 2e-5,
            num_epochs: 3,
            warmup_steps: 100,
            lora_r: 8,
            lora_alpha: 16.0,
            lora_dropout: 0.05,
        }
    }
}

/// External LLM provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// "openai" or "ollama"
    pub provider: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub ollama_host: String,
    /// Model name for the selected provider
    pub model_name: String,
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            openai_api_key: String::new(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            model_name: "gpt-3.5-turbo".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Top-level configuration shared by every AI component
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub model: ModelSettings,
    pub vectorstore: VectorStoreSettings,
    pub training: TrainingSettings,
    pub provider: ProviderSettings,

    /// Root for model weights and the model registry
    pub models_dir: PathBuf,
    /// HuggingFace download cache
    pub cache_dir: PathBuf,
    /// Vector index and exported training data
    pub data_dir: PathBuf,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self::with_root(default_root())
    }
}

fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

impl AiConfig {
    /// Defaults with every directory placed under `root`
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            model: ModelSettings::default(),
            vectorstore: VectorStoreSettings::default(),
            training: TrainingSettings::default(),
            provider: ProviderSettings::default(),
            models_dir: root.join("models"),
            cache_dir: root.join("cache"),
            data_dir: root.join("data"),
        }
    }

    /// Path of the model registry document
    pub fn registry_path(&self) -> PathBuf {
        self.models_dir.join(REGISTRY_FILE_NAME)
    }

    /// Directory of the vector index database
    pub fn vectorstore_dir(&self) -> PathBuf {
        if self.vectorstore.persist_directory.is_absolute() {
            self.vectorstore.persist_directory.clone()
        } else {
            self.data_dir.join(&self.vectorstore.persist_directory)
        }
    }

    /// Create every directory the components write into
    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        use anyhow::Context;

        let vectorstore_dir = self.vectorstore_dir();
        for dir in [
            &self.models_dir,
            &self.cache_dir,
            &self.data_dir,
            &vectorstore_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}
