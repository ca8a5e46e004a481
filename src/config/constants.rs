// Project-wide constants
//
// Centralised here so file names and default endpoints have one
// source of truth. Import via `use crate::config::constants::*;`.

/// Directory under $HOME holding config, models and data.
pub const CONFIG_DIR_NAME: &str = ".ipms";

/// Config file name inside `CONFIG_DIR_NAME`.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Model registry document, stored under the models root.
pub const REGISTRY_FILE_NAME: &str = "model_registry.json";

/// Default base model for fine-tuning and generation.
///
/// Qwen2 is the architecture the candle backend implements.
pub const DEFAULT_BASE_MODEL: &str = "Qwen/Qwen2.5-0.5B-Instruct";

/// Default sentence embedding model for the vector index.
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";

/// Fixed sentiment classification model (ONNX export).
pub const SENTIMENT_MODEL_REPO: &str = "Xenova/distilbert-base-uncased-finetuned-sst-2-english";

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Seed for train/eval partitioning and epoch shuffles.
pub const TRAINING_SEED: u64 = 42;
