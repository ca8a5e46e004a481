// Candle Model Loader - Native Rust inference implementation
//
// Builds a frozen Qwen2 backbone from safetensors and exposes it through the
// LanguageModel trait. The LM head is kept separate so adapters can overlay it.

use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder};
use candle_transformers::models::qwen2;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use crate::errors::AiError;
use crate::models::backend::{LanguageModel, ModelBackend};
use crate::models::common::{select_device, PrecisionPolicy, Quantization};
use crate::models::download::{ModelDownloader, ModelFiles};

/// Candle model backend
pub struct CandleBackend {
    cache_dir: PathBuf,
    device_name: String,
    show_progress: bool,
}

impl CandleBackend {
    pub fn new(cache_dir: PathBuf, device_name: impl Into<String>) -> Self {
        Self {
            cache_dir,
            device_name: device_name.into(),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }
}

impl ModelBackend for CandleBackend {
    fn load(&self, model_id: &str, quantization: Quantization) -> Result<Box<dyn LanguageModel>> {
        let files = ModelDownloader::new(self.cache_dir.clone())
            .with_progress(self.show_progress)
            .resolve(model_id)?;
        let device = select_device(&self.device_name)?;

        let model_type = read_model_type(&files.config)?;
        match model_type.as_str() {
            "qwen2" => Ok(Box::new(QwenModel::load(model_id, &files, quantization, device)?)),
            other => Err(AiError::UnsupportedArchitecture {
                model_type: other.to_string(),
                dir: files.dir.clone(),
            }
            .into()),
        }
    }
}

fn read_model_type(config_path: &Path) -> Result<String> {
    let config_str = std::fs::read_to_string(config_path).context("Failed to read config.json")?;
    let config: serde_json::Value =
        serde_json::from_str(&config_str).context("Failed to parse config.json")?;
    Ok(config["model_type"].as_str().unwrap_or("unknown").to_string())
}

/// Qwen2 backbone with a detached LM head
pub struct QwenModel {
    name: String,
    model: qwen2::Model,
    lm_head: Linear,
    tokenizer: Tokenizer,
    device: Device,
    precision: PrecisionPolicy,
    hidden_size: usize,
    vocab_size: usize,
}

impl QwenModel {
    fn load(model_id: &str, files: &ModelFiles, quantization: Quantization, device: Device) -> Result<Self> {
        tracing::info!("Loading Qwen model {} ({}) with Candle", model_id, quantization);

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let config_str = std::fs::read_to_string(&files.config).context("Failed to read config.json")?;
        let config: qwen2::Config =
            serde_json::from_str(&config_str).context("Failed to parse config.json")?;

        let precision = quantization.precision();
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&files.weights, precision.weight_dtype, &device)
                .context("Failed to load model weights")?
        };

        let model = qwen2::Model::new(&config, vb.clone()).context("Failed to build Qwen model")?;

        // Tied embeddings reuse the input embedding matrix as the head
        let head_weight = if vb.contains_tensor("lm_head.weight") {
            vb.get((config.vocab_size, config.hidden_size), "lm_head.weight")?
        } else {
            vb.get((config.vocab_size, config.hidden_size), "model.embed_tokens.weight")?
        };

        Ok(Self {
            name: format!("{} (Candle)", model_id),
            model,
            lm_head: Linear::new(head_weight, None),
            tokenizer,
            device,
            precision,
            hidden_size: config.hidden_size,
            vocab_size: config.vocab_size,
        })
    }
}

impl LanguageModel for QwenModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn precision(&self) -> PrecisionPolicy {
        self.precision
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| anyhow!("Detokenization failed: {}", e))
    }

    fn eos_token_id(&self) -> Option<u32> {
        // Qwen EOS tokens: <|endoftext|>, <|im_end|>
        self.tokenizer
            .token_to_id("<|endoftext|>")
            .or_else(|| self.tokenizer.token_to_id("<|im_end|>"))
    }

    fn save_tokenizer(&self, dir: &Path) -> Result<()> {
        self.tokenizer
            .save(dir.join("tokenizer.json"), false)
            .map_err(|e| anyhow!("Failed to save tokenizer: {}", e))
    }

    fn hidden_states(&mut self, input_ids: &Tensor, seqlen_offset: usize) -> Result<Tensor> {
        self.model
            .forward(input_ids, seqlen_offset, None)
            .context("Qwen forward pass failed")
    }

    fn project(&self, hidden: &Tensor) -> Result<Tensor> {
        let logits = self.lm_head.forward(hidden)?;
        Ok(logits.to_dtype(DType::F32)?)
    }

    fn reset(&mut self) {
        self.model.clear_kv_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_type_reported() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        std::fs::write(dir.path().join("config.json"), r#"{"model_type": "llama"}"#)?;
        std::fs::write(dir.path().join("tokenizer.json"), "{}")?;
        std::fs::write(dir.path().join("model.safetensors"), "")?;

        let backend = CandleBackend::new(dir.path().join("cache"), "cpu");
        let err = backend
            .load(dir.path().to_str().unwrap(), Quantization::None)
            .err()
            .expect("llama is not implemented");
        assert!(matches!(
            err.downcast_ref::<AiError>(),
            Some(AiError::UnsupportedArchitecture { model_type, .. }) if model_type == "llama"
        ));
        Ok(())
    }

    #[test]
    #[ignore]
    fn test_load_qwen_from_hub() {
        let cache = tempfile::TempDir::new().unwrap();
        let backend = CandleBackend::new(cache.path().to_path_buf(), "cpu");
        let mut model = backend
            .load("Qwen/Qwen2.5-0.5B-Instruct", Quantization::None)
            .unwrap();

        let ids = model.encode("Hello").unwrap();
        let input = Tensor::new(ids.as_slice(), &Device::Cpu).unwrap().unsqueeze(0).unwrap();
        let hidden = model.hidden_states(&input, 0).unwrap();
        let logits = model.project(&hidden).unwrap();
        assert_eq!(logits.dims3().unwrap().2, model.vocab_size());
    }
}
