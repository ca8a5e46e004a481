// Model backend abstraction and the caller-owned model session
//
// A backend turns a model identifier into a frozen language model. The
// session is the single "current" model slot: whoever holds `&mut
// ModelSession` has exclusive use of the model, so training and inference
// against the same weights are serialized by the borrow checker.

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use std::path::Path;

use super::common::{PrecisionPolicy, Quantization};
use super::lora_impl::LoraAdapter;

/// Frozen causal language model plus its tokenizer
pub trait LanguageModel: Send {
    /// Model name/description
    fn name(&self) -> &str;

    fn device(&self) -> &Device;

    fn precision(&self) -> PrecisionPolicy;

    fn hidden_size(&self) -> usize;

    fn vocab_size(&self) -> usize;

    /// Encode text into token ids (no special tokens)
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token ids back into text
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// End-of-sequence token, if the tokenizer defines one
    fn eos_token_id(&self) -> Option<u32>;

    /// Write the tokenizer next to saved adapter weights
    fn save_tokenizer(&self, dir: &Path) -> Result<()>;

    /// Final-layer hidden states `[batch, seq, hidden]` in the compute dtype.
    ///
    /// `seqlen_offset` is the number of tokens already in the KV cache.
    fn hidden_states(&mut self, input_ids: &Tensor, seqlen_offset: usize) -> Result<Tensor>;

    /// Base LM head projection of hidden states to F32 logits `[.., vocab]`
    fn project(&self, hidden: &Tensor) -> Result<Tensor>;

    /// Clear any cached attention state before an unrelated forward pass
    fn reset(&mut self);
}

/// Loads base models by identifier
pub trait ModelBackend: Send + Sync {
    fn load(&self, model_id: &str, quantization: Quantization) -> Result<Box<dyn LanguageModel>>;
}

/// A base model plus an optional adapter overlay
pub struct LoadedModel {
    pub base_id: String,
    pub quantization: Quantization,
    pub model: Box<dyn LanguageModel>,
    pub adapter: Option<LoraAdapter>,
    /// Set by the trainer once the model is ready for fine-tuning
    pub prepared_for_training: bool,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("base_id", &self.base_id)
            .field("quantization", &self.quantization)
            .field("model", &self.model.name())
            .field("adapter", &self.adapter.is_some())
            .field("prepared_for_training", &self.prepared_for_training)
            .finish()
    }
}

impl LoadedModel {
    pub fn new(base_id: String, quantization: Quantization, model: Box<dyn LanguageModel>) -> Self {
        Self {
            base_id,
            quantization,
            model,
            adapter: None,
            prepared_for_training: false,
        }
    }

    /// Next-token logits for every position: base head plus adapter update.
    ///
    /// `train` enables adapter dropout.
    pub fn logits(&mut self, input_ids: &Tensor, seqlen_offset: usize, train: bool) -> Result<Tensor> {
        let hidden = self.model.hidden_states(input_ids, seqlen_offset)?;
        let logits = self.model.project(&hidden)?;

        match &self.adapter {
            Some(adapter) if adapter.is_enabled() => {
                // Adapter path always runs in full precision
                let hidden = if hidden.dtype() == DType::F32 {
                    hidden
                } else {
                    hidden.to_dtype(DType::F32)?
                };
                adapter.apply(&hidden, &logits, train)
            }
            _ => Ok(logits),
        }
    }
}

/// Caller-owned slot holding at most one current model
#[derive(Debug, Default)]
pub struct ModelSession {
    current: Option<LoadedModel>,
}

impl ModelSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a model, dropping whatever was held before
    pub fn install(&mut self, model: LoadedModel) {
        if let Some(previous) = self.current.replace(model) {
            tracing::debug!("Replaced held model {}", previous.base_id);
        }
    }

    pub fn current(&self) -> Option<&LoadedModel> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut LoadedModel> {
        self.current.as_mut()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.is_some()
    }

    /// Release the held model
    pub fn clear(&mut self) -> Option<LoadedModel> {
        self.current.take()
    }
}
