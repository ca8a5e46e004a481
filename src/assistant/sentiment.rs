// Sentiment classification and window aggregation

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::constants::SENTIMENT_MODEL_REPO;
use crate::models::{ModelDownloader, OnnxEncoder};

/// Characters per classified window
pub const SENTIMENT_WINDOW_CHARS: usize = 512;

const MAX_SEQ_LEN: usize = 512;

/// Label and probability for one piece of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub score: f64,
}

/// Sentiment classification pipeline
pub trait SentimentClassifier: Send {
    fn classify(&self, text: &str) -> Result<Classification>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    pub positive: f64,
    pub negative: f64,
    pub overall: Sentiment,
    pub confidence: f64,
}

/// Fixed-size, non-overlapping character windows
pub fn sentiment_windows(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(SENTIMENT_WINDOW_CHARS)
        .map(|w| w.iter().collect())
        .collect()
}

/// Average positive and negative scores separately over the windows that
/// carried each label. A label that never occurs averages to 0.0; overall
/// is positive only when its average is strictly higher.
pub fn aggregate_sentiment(classifications: &[Classification]) -> SentimentResult {
    let mean_of = |label: &str| {
        let scores: Vec<f64> = classifications
            .iter()
            .filter(|c| c.label.eq_ignore_ascii_case(label))
            .map(|c| c.score)
            .collect();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    };

    let positive = mean_of("POSITIVE");
    let negative = mean_of("NEGATIVE");

    SentimentResult {
        positive,
        negative,
        overall: if positive > negative {
            Sentiment::Positive
        } else {
            Sentiment::Negative
        },
        confidence: positive.max(negative),
    }
}

/// DistilBERT SST-2 (or any sequence classifier export) via ONNX Runtime
pub struct OnnxSentimentClassifier {
    encoder: OnnxEncoder,
    id2label: HashMap<usize, String>,
}

impl OnnxSentimentClassifier {
    /// The fixed sentiment model, downloaded into `cache_dir` if needed
    pub fn load_default(cache_dir: PathBuf) -> Result<Self> {
        Self::load(SENTIMENT_MODEL_REPO, cache_dir)
    }

    pub fn load(repo_id: &str, cache_dir: PathBuf) -> Result<Self> {
        tracing::info!("Loading sentiment model {}", repo_id);

        let files = ModelDownloader::new(cache_dir).resolve_onnx(repo_id)?;
        let encoder = OnnxEncoder::load(&files, MAX_SEQ_LEN)?;

        let id2label = match &files.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {:?}", path))?;
                parse_id2label(&raw)?
            }
            None => default_labels(),
        };

        Ok(Self { encoder, id2label })
    }
}

impl SentimentClassifier for OnnxSentimentClassifier {
    fn classify(&self, text: &str) -> Result<Classification> {
        let output = self
            .encoder
            .run(text, "logits")?
            .ok_or_else(|| anyhow!("Text produced no tokens"))?;

        let probs = softmax(&output.data);
        let (index, score) = probs
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| anyhow!("Sentiment model returned empty logits"))?;

        let label = self
            .id2label
            .get(&index)
            .cloned()
            .unwrap_or_else(|| format!("LABEL_{}", index));

        Ok(Classification {
            label,
            score: score as f64,
        })
    }
}

fn default_labels() -> HashMap<usize, String> {
    HashMap::from([(0, "NEGATIVE".to_string()), (1, "POSITIVE".to_string())])
}

/// `id2label` from a HuggingFace config.json; the SST-2 labels when absent
fn parse_id2label(config_json: &str) -> Result<HashMap<usize, String>> {
    let config: serde_json::Value = serde_json::from_str(config_json).context("Failed to parse model config")?;

    let Some(map) = config.get("id2label").and_then(|v| v.as_object()) else {
        return Ok(default_labels());
    };

    let mut labels = HashMap::new();
    for (id, label) in map {
        let id: usize = id.parse().with_context(|| format!("Bad id2label key '{}'", id))?;
        let Some(label) = label.as_str() else {
            bail!("id2label value for {} is not a string", id);
        };
        labels.insert(id, label.to_string());
    }
    Ok(labels)
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
