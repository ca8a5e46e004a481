// Token sampling for local generation
// Temperature + nucleus (top-p) sampling over a single logits row

use anyhow::{bail, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Sampling configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// 0.0 means greedy decoding
    pub temperature: f64,

    /// Cumulative probability mass kept for nucleus sampling (0.0 - 1.0]
    pub top_p: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
        }
    }
}

/// Picks the next token from logits
pub struct Sampler<R: Rng> {
    config: SamplingConfig,
    rng: R,
}

impl<R: Rng> Sampler<R> {
    pub fn new(config: SamplingConfig, rng: R) -> Self {
        Self { config, rng }
    }

    pub fn sample(&mut self, logits: &[f32]) -> Result<u32> {
        if logits.is_empty() {
            bail!("Cannot sample from empty logits");
        }

        if self.config.temperature <= 0.0 {
            return Ok(argmax(logits));
        }

        let probs = softmax(logits, self.config.temperature);

        // Nucleus: smallest set of tokens whose mass reaches top_p
        let mut order: Vec<usize> = (0..probs.len()).collect();
        order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

        let top_p = self.config.top_p.clamp(f64::MIN_POSITIVE, 1.0);
        let mut kept = Vec::new();
        let mut mass = 0.0;
        for idx in order {
            kept.push(idx);
            mass += probs[idx];
            if mass >= top_p {
                break;
            }
        }

        let target = self.rng.gen::<f64>() * mass;
        let mut cumulative = 0.0;
        for &idx in &kept {
            cumulative += probs[idx];
            if cumulative >= target {
                return Ok(idx as u32);
            }
        }

        Ok(kept[kept.len() - 1] as u32)
    }
}

fn argmax(logits: &[f32]) -> u32 {
    logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i as u32)
        .unwrap_or(0)
}

fn softmax(logits: &[f32], temperature: f64) -> Vec<f64> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    let exps: Vec<f64> = logits
        .iter()
        .map(|&l| ((l as f64 - max) / temperature).exp())
        .collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn sampler(temperature: f64, top_p: f64) -> Sampler<SmallRng> {
        Sampler::new(SamplingConfig { temperature, top_p }, SmallRng::seed_from_u64(7))
    }

    #[test]
    fn test_greedy_when_temperature_zero() {
        let mut s = sampler(0.0, 1.0);
        assert_eq!(s.sample(&[0.1, 3.0, 2.0]).unwrap(), 1);
    }

    #[test]
    fn test_tiny_top_p_keeps_only_best_token() {
        let mut s = sampler(1.0, 1e-6);
        for _ in 0..20 {
            assert_eq!(s.sample(&[0.0, 5.0, 1.0]).unwrap(), 1);
        }
    }

    #[test]
    fn test_samples_stay_in_vocab() {
        let mut s = sampler(1.0, 0.95);
        for _ in 0..50 {
            assert!(s.sample(&[1.0, 1.0, 1.0, 1.0]).unwrap() < 4);
        }
    }

    #[test]
    fn test_empty_logits_rejected() {
        assert!(sampler(1.0, 1.0).sample(&[]).is_err());
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0], 0.7);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}
