// Inference pipelines built when the assistant is initialized

use anyhow::Result;
use std::path::PathBuf;

use super::sentiment::{OnnxSentimentClassifier, SentimentClassifier};
use crate::config::ModelSettings;
use crate::models::{LocalGenerator, SamplingConfig, TextGenerator};

/// Builds the generation and sentiment pipelines
pub trait PipelineFactory: Send + Sync {
    fn generator(&self, settings: &ModelSettings) -> Result<Box<dyn TextGenerator>>;

    fn sentiment(&self) -> Result<Box<dyn SentimentClassifier>>;
}

/// Local candle generation plus the fixed ONNX sentiment model
pub struct LocalPipelines {
    cache_dir: PathBuf,
}

impl LocalPipelines {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }
}

impl PipelineFactory for LocalPipelines {
    fn generator(&self, settings: &ModelSettings) -> Result<Box<dyn TextGenerator>> {
        Ok(Box::new(LocalGenerator::new(SamplingConfig {
            temperature: settings.temperature,
            top_p: settings.top_p,
        })))
    }

    fn sentiment(&self) -> Result<Box<dyn SentimentClassifier>> {
        Ok(Box::new(OnnxSentimentClassifier::load_default(self.cache_dir.clone())?))
    }
}
