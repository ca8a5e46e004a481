// Neural ONNX Embedding Engine
//
// Sentence transformer (all-MiniLM-L6-v2) via ONNX Runtime producing
// 384-dimensional embeddings: mean pooling over last_hidden_state, weighted
// by the attention mask, then L2 normalization.

use anyhow::{bail, Result};
use std::path::PathBuf;
use tracing::info;

use super::embeddings::EmbeddingEngine;
use crate::models::{ModelDownloader, OnnxEncoder};

/// all-MiniLM-L6-v2 supports 512 tokens; truncate at 256 for speed
const MAX_SEQ_LEN: usize = 256;

const EMBEDDING_DIM: usize = 384;

/// ONNX sentence transformer embedding engine
pub struct NeuralEmbeddingEngine {
    encoder: OnnxEncoder,
    name: String,
}

impl NeuralEmbeddingEngine {
    /// Load `model` (a short name like "all-MiniLM-L6-v2", a HuggingFace repo
    /// id, or a local directory), downloading into `cache_dir` if needed.
    /// Blocking.
    pub fn load(model: &str, cache_dir: PathBuf) -> Result<Self> {
        let repo_id = onnx_repo_for(model);
        info!("Loading neural embedding model {}", repo_id);

        let files = ModelDownloader::new(cache_dir).resolve_onnx(&repo_id)?;
        let encoder = OnnxEncoder::load(&files, MAX_SEQ_LEN)?;

        Ok(Self {
            encoder,
            name: model.to_string(),
        })
    }
}

/// Short sentence-transformers names map to their Xenova ONNX exports
fn onnx_repo_for(model: &str) -> String {
    if model.contains('/') || std::path::Path::new(model).is_dir() {
        model.to_string()
    } else {
        format!("Xenova/{}", model)
    }
}

impl EmbeddingEngine for NeuralEmbeddingEngine {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let output = match self.encoder.run(text, "last_hidden_state")? {
            Some(output) => output,
            None => return Ok(vec![0.0; EMBEDDING_DIM]),
        };

        // [1, seq_len, hidden]
        if output.shape.len() != 3 {
            bail!("Expected 3D last_hidden_state tensor, got shape {:?}", output.shape);
        }
        let actual_seq = output.shape[1];
        let hidden_dim = output.shape[2];

        let mut pooled = vec![0.0f32; hidden_dim];
        let mut count = 0.0f32;
        for (i, &mask) in output
            .attention_mask
            .iter()
            .enumerate()
            .take(actual_seq)
        {
            if mask == 1 {
                count += 1.0;
                let offset = i * hidden_dim;
                for (j, v) in pooled.iter_mut().enumerate() {
                    *v += output.data[offset + j];
                }
            }
        }
        if count > 0.0 {
            for v in &mut pooled {
                *v /= count;
            }
        }

        let norm: f32 = pooled.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut pooled {
                *v /= norm;
            }
        }

        Ok(pooled)
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn name(&self) -> &str {
        &self.name
    }
}
