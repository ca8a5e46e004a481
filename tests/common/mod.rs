// Shared fakes for integration tests
//
// ByteModel is a tiny deterministic causal LM (embedding + tanh + head over
// raw bytes) small enough to train on CPU in milliseconds.

#![allow(dead_code)]

use anyhow::{bail, Result};
use candle_core::{Device, Module, Tensor};
use candle_nn::{Embedding, Linear};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ipms::assistant::{Classification, PipelineFactory, SentimentClassifier};
use ipms::config::{ModelSettings, TrainingSettings};
use ipms::documents::{DocumentProcessor, HashingEmbedding, VectorStore};
use ipms::models::{
    LanguageModel, ModelBackend, ModelManager, ModelRegistry, ModelSession, PrecisionPolicy, Quantization,
    RegistryEntry, TextGenerator,
};

pub const VOCAB: usize = 257;
pub const EOS: u32 = 256;
pub const HIDDEN: usize = 16;
pub const MODEL_ID: &str = "test/byte-model";

pub struct ByteModel {
    name: String,
    precision: PrecisionPolicy,
    embedding: Embedding,
    head: Linear,
    device: Device,
}

impl ByteModel {
    pub fn new(name: &str, quantization: Quantization) -> Result<Self> {
        let device = Device::Cpu;
        let emb: Vec<f32> = (0..VOCAB * HIDDEN).map(|i| ((i as f32) * 0.37).sin() * 0.5).collect();
        let head: Vec<f32> = (0..VOCAB * HIDDEN).map(|i| ((i as f32) * 0.11).cos() * 0.5).collect();

        Ok(Self {
            name: name.to_string(),
            precision: quantization.precision(),
            embedding: Embedding::new(Tensor::from_vec(emb, (VOCAB, HIDDEN), &device)?, HIDDEN),
            head: Linear::new(Tensor::from_vec(head, (VOCAB, HIDDEN), &device)?, None),
            device,
        })
    }
}

impl LanguageModel for ByteModel {
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
        HIDDEN
    }

    fn vocab_size(&self) -> usize {
        VOCAB
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let bytes: Vec<u8> = ids.iter().filter(|&&id| id < 256).map(|&id| id as u8).collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn eos_token_id(&self) -> Option<u32> {
        Some(EOS)
    }

    fn save_tokenizer(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join("tokenizer.json"), r#"{"model": "bytes"}"#)?;
        Ok(())
    }

    fn hidden_states(&mut self, input_ids: &Tensor, _seqlen_offset: usize) -> Result<Tensor> {
        Ok(self.embedding.forward(input_ids)?.tanh()?)
    }

    fn project(&self, hidden: &Tensor) -> Result<Tensor> {
        Ok(self.head.forward(hidden)?)
    }

    fn reset(&mut self) {}
}

/// Backend producing ByteModels; ids starting with "missing" fail
#[derive(Default)]
pub struct ByteBackend {
    pub loads: AtomicUsize,
}

impl ModelBackend for ByteBackend {
    fn load(&self, model_id: &str, quantization: Quantization) -> Result<Box<dyn LanguageModel>> {
        if model_id.starts_with("missing") {
            bail!("Model {} not found", model_id);
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ByteModel::new(model_id, quantization)?))
    }
}

pub fn model_settings() -> ModelSettings {
    ModelSettings {
        model_name: MODEL_ID.to_string(),
        quantization: "none".to_string(),
        max_length: 64,
        temperature: 0.0,
        ..Default::default()
    }
}

pub fn training_settings() -> TrainingSettings {
    TrainingSettings {
        batch_size: 1,
        learning_rate: 1e-2,
        num_epochs: 1,
        warmup_steps: 0,
        lora_r: 2,
        lora_alpha: 4.0,
        lora_dropout: 0.0,
    }
}

/// Manager over ByteBackend with the registry in `dir`
pub fn manager(dir: &Path) -> Result<(ModelManager, Arc<ByteBackend>)> {
    let backend = Arc::new(ByteBackend::default());
    let registry = ModelRegistry::open(dir.join("model_registry.json"))?;
    let manager = ModelManager::new(registry, backend.clone(), model_settings());
    Ok((manager, backend))
}

/// Registry entry of the configured test model
pub fn configured_entry(manager: &ModelManager) -> Option<RegistryEntry> {
    manager
        .model_info(Some(MODEL_ID))
        .and_then(|info| info.entry())
        .cloned()
}

pub fn processor() -> Result<DocumentProcessor> {
    let store = VectorStore::in_memory("test", Arc::new(HashingEmbedding::new()))?;
    Ok(DocumentProcessor::new(store))
}

/// Replays canned continuations and records every prompt it saw
#[derive(Clone, Default)]
pub struct ScriptedGenerator {
    pub replies: Arc<Mutex<VecDeque<String>>>,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedGenerator {
    pub fn with_replies(replies: &[&str]) -> Self {
        let generator = Self::default();
        generator
            .replies
            .lock()
            .unwrap()
            .extend(replies.iter().map(|r| r.to_string()));
        generator
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&mut self, session: &mut ModelSession, prompt: &str, _max_length: usize) -> Result<String> {
        assert!(session.is_loaded(), "generation without a held model");
        self.prompts.lock().unwrap().push(prompt.to_string());
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or_default();
        Ok(format!("{}{}", prompt, reply))
    }
}

/// Labels by keyword: "sad" anywhere in the window is negative
pub struct KeywordSentiment;

impl SentimentClassifier for KeywordSentiment {
    fn classify(&self, text: &str) -> Result<Classification> {
        Ok(if text.contains("sad") {
            Classification {
                label: "NEGATIVE".to_string(),
                score: 0.8,
            }
        } else {
            Classification {
                label: "POSITIVE".to_string(),
                score: 0.9,
            }
        })
    }
}

pub struct FakePipelines {
    pub generator: ScriptedGenerator,
}

impl PipelineFactory for FakePipelines {
    fn generator(&self, _settings: &ModelSettings) -> Result<Box<dyn TextGenerator>> {
        Ok(Box::new(self.generator.clone()))
    }

    fn sentiment(&self) -> Result<Box<dyn SentimentClassifier>> {
        Ok(Box::new(KeywordSentiment))
    }
}
