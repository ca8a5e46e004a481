// Text generation over the session's held model
//
// The pipeline echoes the prompt: callers get prompt + continuation back and
// strip the prefix themselves.

use anyhow::{Context, Result};
use candle_core::{IndexOp, Tensor};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use super::backend::ModelSession;
use super::sampling::{Sampler, SamplingConfig};
use crate::errors::AiError;

/// Text generation pipeline
pub trait TextGenerator: Send {
    /// Generate from `prompt`, stopping at EOS or `max_length` total tokens
    /// (prompt included). Returns prompt followed by the continuation.
    fn generate(&mut self, session: &mut ModelSession, prompt: &str, max_length: usize) -> Result<String>;
}

/// Autoregressive generation with the held model (+ adapter, if attached)
pub struct LocalGenerator {
    sampler: Sampler<SmallRng>,
}

impl LocalGenerator {
    pub fn new(config: SamplingConfig) -> Self {
        Self {
            sampler: Sampler::new(config, SmallRng::from_entropy()),
        }
    }

    /// Reproducible sampling, mostly for tests
    pub fn with_seed(config: SamplingConfig, seed: u64) -> Self {
        Self {
            sampler: Sampler::new(config, SmallRng::seed_from_u64(seed)),
        }
    }
}

impl TextGenerator for LocalGenerator {
    fn generate(&mut self, session: &mut ModelSession, prompt: &str, max_length: usize) -> Result<String> {
        let loaded = session.current_mut().ok_or(AiError::NoModelLoaded)?;

        let prompt_ids = loaded.model.encode(prompt)?;
        if prompt_ids.is_empty() || prompt_ids.len() >= max_length {
            return Ok(prompt.to_string());
        }

        let eos = loaded.model.eos_token_id();
        let device = loaded.model.device().clone();

        loaded.model.reset();

        let mut generated: Vec<u32> = Vec::new();
        let mut offset = 0;
        let mut next_input = prompt_ids.clone();

        while prompt_ids.len() + generated.len() < max_length {
            let input = Tensor::new(next_input.as_slice(), &device)?.unsqueeze(0)?;
            let logits = loaded
                .logits(&input, offset, false)
                .context("Generation forward pass failed")?;
            offset += next_input.len();

            let last = logits.i((0, next_input.len() - 1))?.to_vec1::<f32>()?;
            let token = self.sampler.sample(&last)?;

            if Some(token) == eos {
                break;
            }
            generated.push(token);
            next_input = vec![token];
        }

        loaded.model.reset();

        tracing::debug!(
            "Generated {} tokens from a {}-token prompt",
            generated.len(),
            prompt_ids.len()
        );

        let continuation = loaded.model.decode(&generated)?;
        Ok(format!("{}{}", prompt, continuation))
    }
}
