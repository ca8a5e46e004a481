// Typed failures surfaced by the AI core
//
// Everything else travels as anyhow::Error with context attached; these are
// the conditions callers are expected to match on (via downcast_ref).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Assistant not initialized. Call initialize() first")]
    AssistantNotInitialized,

    #[error("No model loaded")]
    NoModelLoaded,

    #[error("Model not prepared for training. Call prepare_model_for_training() first")]
    ModelNotPrepared,

    #[error("Loaded model has no adapter attached; nothing fine-tuned to save")]
    NoAdapter,

    #[error("Could not determine base model for fine-tuned model at {path}")]
    UnresolvedBaseModel { path: String },

    #[error("Base model '{0}' is not registered")]
    UnknownBaseModel(String),

    #[error("Fine-tuned model {path} already belongs to base model '{existing_base}'")]
    DerivativeConflict { path: String, existing_base: String },

    #[error("Train/eval split must be in [0, 1), got {0}")]
    InvalidSplit(f64),

    #[error("Unsupported quantization '{0}' (expected 4bit, 8bit or none)")]
    UnsupportedQuantization(String),

    #[error("Unsupported model architecture '{model_type}' in {dir}")]
    UnsupportedArchitecture { model_type: String, dir: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = AiError::UnresolvedBaseModel {
            path: "runs/a".to_string(),
        }
        .into();
        let err = err.context("loading fine-tuned model");

        assert!(matches!(
            err.downcast_ref::<AiError>(),
            Some(AiError::UnresolvedBaseModel { .. })
        ));
    }

    #[test]
    fn test_messages_name_the_subject() {
        assert!(AiError::UnknownBaseModel("qwen".into())
            .to_string()
            .contains("qwen"));
        assert!(AiError::InvalidSplit(1.5).to_string().contains("1.5"));
    }
}
