// Training hyperparameters
//
// Defaults come from the training config section; callers override any
// subset through TrainingOverrides. The resolved set is stored with the
// fine-tuned artifact's registry record.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::constants::TRAINING_SEED;
use crate::config::TrainingSettings;

/// Resolved training arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingArgs {
    pub output_dir: PathBuf,
    pub num_train_epochs: usize,
    pub per_device_train_batch_size: usize,
    pub gradient_accumulation_steps: usize,
    pub learning_rate: f64,
    pub warmup_steps: usize,
    pub weight_decay: f64,
    pub logging_steps: usize,
    pub save_steps: usize,
    /// None when there is no eval set
    pub eval_steps: Option<usize>,
    pub save_total_limit: usize,
    pub load_best_model_at_end: bool,
    pub max_seq_length: usize,
    pub seed: u64,
}

/// Caller-supplied overrides, one optional field per argument
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingOverrides {
    pub num_train_epochs: Option<usize>,
    pub per_device_train_batch_size: Option<usize>,
    pub gradient_accumulation_steps: Option<usize>,
    pub learning_rate: Option<f64>,
    pub warmup_steps: Option<usize>,
    pub weight_decay: Option<f64>,
    pub logging_steps: Option<usize>,
    pub save_steps: Option<usize>,
    pub eval_steps: Option<usize>,
    pub save_total_limit: Option<usize>,
    pub load_best_model_at_end: Option<bool>,
    pub max_seq_length: Option<usize>,
    pub seed: Option<u64>,
}

impl TrainingArgs {
    /// Defaults from `settings`, then `overrides` on top.
    ///
    /// Evaluation cadence and best-checkpoint restore only apply when an
    /// eval set is present.
    pub fn resolve(
        settings: &TrainingSettings,
        output_dir: PathBuf,
        has_eval_set: bool,
        overrides: &TrainingOverrides,
    ) -> Result<Self> {
        let args = Self {
            output_dir,
            num_train_epochs: overrides.num_train_epochs.unwrap_or(settings.num_epochs),
            per_device_train_batch_size: overrides
                .per_device_train_batch_size
                .unwrap_or(settings.batch_size),
            gradient_accumulation_steps: overrides.gradient_accumulation_steps.unwrap_or(4),
            learning_rate: overrides.learning_rate.unwrap_or(settings.learning_rate),
            warmup_steps: overrides.warmup_steps.unwrap_or(settings.warmup_steps),
            weight_decay: overrides.weight_decay.unwrap_or(0.0),
            logging_steps: overrides.logging_steps.unwrap_or(10),
            save_steps: overrides.save_steps.unwrap_or(100),
            eval_steps: has_eval_set.then(|| overrides.eval_steps.unwrap_or(100)),
            save_total_limit: overrides.save_total_limit.unwrap_or(3),
            load_best_model_at_end: has_eval_set && overrides.load_best_model_at_end.unwrap_or(true),
            max_seq_length: overrides.max_seq_length.unwrap_or(512),
            seed: overrides.seed.unwrap_or(TRAINING_SEED),
        };
        args.validate()?;
        Ok(args)
    }

    fn validate(&self) -> Result<()> {
        if self.per_device_train_batch_size == 0 {
            bail!("per_device_train_batch_size must be at least 1");
        }
        if self.gradient_accumulation_steps == 0 {
            bail!("gradient_accumulation_steps must be at least 1");
        }
        if self.max_seq_length < 2 {
            bail!("max_seq_length must be at least 2 to form a next-token target");
        }
        if self.learning_rate <= 0.0 {
            bail!("learning_rate must be positive");
        }
        Ok(())
    }

    /// Examples consumed per optimizer step
    pub fn effective_batch_size(&self) -> usize {
        self.per_device_train_batch_size * self.gradient_accumulation_steps
    }

    /// Optimizer steps in one pass over `n` examples
    pub fn steps_per_epoch(&self, n: usize) -> usize {
        n.div_ceil(self.effective_batch_size())
    }

    /// Linear warmup to the base rate, then linear decay to zero
    pub fn learning_rate_at(&self, step: usize, total_steps: usize) -> f64 {
        if self.warmup_steps > 0 && step < self.warmup_steps {
            return self.learning_rate * (step + 1) as f64 / self.warmup_steps as f64;
        }
        let decay_span = total_steps.saturating_sub(self.warmup_steps).max(1);
        let into_decay = step.saturating_sub(self.warmup_steps);
        self.learning_rate * (1.0 - into_decay as f64 / decay_span as f64).max(0.0)
    }
}
