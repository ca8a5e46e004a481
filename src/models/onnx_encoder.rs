// ONNX encoder session shared by the embedding and sentiment models
//
// Tokenize a single sentence, bind input_ids / attention_mask (and
// token_type_ids when the export wants them), run, and hand back one named
// output as a flat f32 buffer with its shape.

use anyhow::{anyhow, Context, Result};
use ndarray::Array2;
use ort::{
    memory::MemoryInfo,
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;

use super::download::OnnxModelFiles;

/// Output tensor copied out of the session
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
    /// Attention mask of the (truncated) input
    pub attention_mask: Vec<i64>,
}

pub struct OnnxEncoder {
    /// `run_binding` needs `&mut Session`
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    has_token_type_ids: bool,
    max_seq_len: usize,
}

impl OnnxEncoder {
    pub fn load(files: &OnnxModelFiles, max_seq_len: usize) -> Result<Self> {
        tracing::info!("Loading ONNX encoder from: {:?}", files.model);

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let session = build_session(&files.model)?;

        let has_token_type_ids = session
            .inputs()
            .iter()
            .any(|i| i.name() == "token_type_ids");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            has_token_type_ids,
            max_seq_len,
        })
    }

    /// Run `text` through the model and return `output_name`.
    ///
    /// Returns `None` when the text tokenizes to nothing.
    pub fn run(&self, text: &str, output_name: &str) -> Result<Option<EncoderOutput>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;

        let input_ids: Vec<i64> = encoding
            .get_ids()
            .iter()
            .take(self.max_seq_len)
            .map(|&id| id as i64)
            .collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .take(self.max_seq_len)
            .map(|&m| m as i64)
            .collect();

        let seq_len = input_ids.len();
        if seq_len == 0 {
            return Ok(None);
        }

        let ids_val = Value::from_array(
            Array2::from_shape_vec((1, seq_len), input_ids).context("Failed to create input_ids ndarray")?,
        )
        .context("Failed to create input_ids Value")?
        .into_dyn();
        let mask_val = Value::from_array(
            Array2::from_shape_vec((1, seq_len), attention_mask.clone())
                .context("Failed to create attention_mask ndarray")?,
        )
        .context("Failed to create attention_mask Value")?
        .into_dyn();

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("ONNX session mutex poisoned"))?;

        let mut binding = session.create_binding().context("Failed to create IoBinding")?;
        binding
            .bind_input("input_ids", &ids_val)
            .context("Failed to bind input_ids")?;
        binding
            .bind_input("attention_mask", &mask_val)
            .context("Failed to bind attention_mask")?;

        // Single-sentence inputs: all zeros
        let tti_holder;
        if self.has_token_type_ids {
            tti_holder = Value::from_array(
                Array2::from_shape_vec((1, seq_len), vec![0i64; seq_len])
                    .context("Failed to create token_type_ids ndarray")?,
            )
            .context("Failed to create token_type_ids Value")?
            .into_dyn();
            binding
                .bind_input("token_type_ids", &tti_holder)
                .context("Failed to bind token_type_ids")?;
        }

        let mem_info = MemoryInfo::default();
        binding
            .bind_output_to_device(output_name, &mem_info)
            .with_context(|| format!("Failed to bind {} output", output_name))?;
        for out in session.outputs().iter() {
            if out.name() != output_name {
                let _ = binding.bind_output_to_device(out.name(), &mem_info);
            }
        }

        let outputs = session.run_binding(&binding).context("ONNX inference failed")?;
        let value = outputs
            .get(output_name)
            .ok_or_else(|| anyhow!("Missing {} in model outputs", output_name))?;

        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .with_context(|| format!("Failed to extract {} tensor", output_name))?;

        Ok(Some(EncoderOutput {
            shape: shape.iter().map(|&d| d as usize).collect(),
            data: data.to_vec(),
            attention_mask,
        }))
    }
}

fn build_session(model_path: &Path) -> Result<Session> {
    std::env::set_var("ORT_LOGGING_LEVEL", "3");
    Session::builder()
        .context("Failed to create ONNX session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(2)
        .context("Failed to set thread count")?
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load ONNX model from {:?}", model_path))
}
