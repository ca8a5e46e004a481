// Trainer - supervised LoRA fine-tuning of the session's model
//
// Causal next-token cross-entropy over each training text. Only the adapter
// variables are optimized (AdamW); the backbone is frozen and its forward
// pass is never tracked. Gradients are accumulated example by example so a
// step never holds more than one sequence's logits graph.

use anyhow::{bail, Context, Result};
use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::args::{TrainingArgs, TrainingOverrides};
use crate::config::constants::TRAINING_SEED;
use crate::config::TrainingSettings;
use crate::errors::AiError;
use crate::logging::{TrainingEvent, TrainingLogger};
use crate::models::{LoadedModel, LoraAdapter, LoraSettings, ModelManager, ModelSession};

const CHECKPOINT_PREFIX: &str = "checkpoint-";
const TRAINER_STATE_FILE: &str = "trainer_state.json";

/// Outcome of a training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub output_dir: PathBuf,
    pub global_step: usize,
    /// Mean loss over all optimizer steps
    pub train_loss: f64,
    pub best_eval_loss: Option<f64>,
    pub best_checkpoint: Option<PathBuf>,
    pub dataset_size: usize,
    pub args: TrainingArgs,
}

#[derive(Debug, Clone, Serialize)]
struct CheckpointState {
    global_step: usize,
    eval_loss: Option<f64>,
}

#[derive(Debug, Clone)]
struct Checkpoint {
    step: usize,
    dir: PathBuf,
    eval_loss: Option<f64>,
}

/// Fine-tunes the held model with a LoRA adapter
pub struct Trainer {
    settings: TrainingSettings,
    show_progress: bool,
}

impl Trainer {
    pub fn new(settings: TrainingSettings) -> Self {
        Self {
            settings,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Deterministic shuffle, then `ceil(split * n)` eval / rest train
    pub fn prepare_training_data(&self, texts: &[String], split: f64) -> Result<(Vec<String>, Vec<String>)> {
        if !(0.0..1.0).contains(&split) {
            return Err(AiError::InvalidSplit(split).into());
        }

        let mut shuffled = texts.to_vec();
        shuffled.shuffle(&mut StdRng::seed_from_u64(TRAINING_SEED));

        // Tolerate float noise like 0.2 * 100 = 20.000000000000004
        let eval_len = ((split * shuffled.len() as f64) - 1e-9).ceil().max(0.0) as usize;
        let train = shuffled.split_off(eval_len);

        tracing::info!("Prepared {} training / {} eval examples", train.len(), shuffled.len());
        Ok((train, shuffled))
    }

    /// Make sure a model is held and attach a trainable LoRA adapter.
    ///
    /// Without explicit `lora` settings an adapter already attached (for
    /// example from a loaded fine-tuned model) is kept and trained further.
    pub fn prepare_model_for_training(
        &self,
        manager: &mut ModelManager,
        session: &mut ModelSession,
        base_id: Option<&str>,
        lora: Option<LoraSettings>,
    ) -> Result<()> {
        if !session.is_loaded() {
            manager.load_model(session, base_id, None)?;
        }
        let loaded = session.current_mut().ok_or(AiError::NoModelLoaded)?;

        if loaded.quantization.is_reduced() {
            // Reduced-precision weights stay frozen; the adapter trains in
            // F32 on upcast hidden states.
            tracing::info!(
                "Preparing {} base ({:?} weights) for adapter training",
                loaded.quantization,
                loaded.model.precision().weight_dtype
            );
        }

        match (lora, loaded.adapter.is_some()) {
            (None, true) => {
                if let Some(existing) = loaded.adapter.as_mut() {
                    existing.enable();
                }
                tracing::info!("Continuing training of the attached adapter");
            }
            (lora, _) => {
                let settings = lora.unwrap_or_else(|| self.default_lora_settings());
                let adapter = LoraAdapter::new(
                    settings,
                    loaded.model.hidden_size(),
                    loaded.model.vocab_size(),
                    loaded.model.device().clone(),
                )?;
                loaded.adapter = Some(adapter);
            }
        }

        loaded.prepared_for_training = true;
        if let Some(adapter) = &loaded.adapter {
            tracing::info!(
                "LoRA adapter attached: {} trainable parameters (rank {}, alpha {})",
                adapter.trainable_parameter_count(),
                adapter.settings().rank,
                adapter.settings().alpha
            );
        }
        Ok(())
    }

    fn default_lora_settings(&self) -> LoraSettings {
        LoraSettings {
            rank: self.settings.lora_r,
            alpha: self.settings.lora_alpha,
            dropout: self.settings.lora_dropout,
            ..LoraSettings::default()
        }
    }

    /// Run fine-tuning to completion, write the final adapter to
    /// `output_dir` and register it as a derivative of the held base.
    pub fn train(
        &self,
        manager: &mut ModelManager,
        session: &mut ModelSession,
        train_set: &[String],
        eval_set: Option<&[String]>,
        output_dir: Option<&Path>,
        overrides: Option<&TrainingOverrides>,
    ) -> Result<TrainingReport> {
        let prepared = session
            .current()
            .is_some_and(|m| m.prepared_for_training && m.adapter.is_some());
        if !prepared {
            return Err(AiError::ModelNotPrepared.into());
        }

        let output_dir = match output_dir {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from(format!(
                "fine_tuned_model_{}",
                chrono::Local::now().format("%Y%m%d_%H%M%S")
            )),
        };
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

        let eval_set = eval_set.filter(|e| !e.is_empty());
        let default_overrides = TrainingOverrides::default();
        let args = TrainingArgs::resolve(
            &self.settings,
            output_dir.clone(),
            eval_set.is_some(),
            overrides.unwrap_or(&default_overrides),
        )?;

        let (global_step, train_loss, best) = {
            let loaded = session.current_mut().ok_or(AiError::NoModelLoaded)?;
            self.run(loaded, train_set, eval_set, &args)?
        };

        let metadata = serde_json::json!({
            "training_args": args,
            "dataset_size": train_set.len(),
        });
        manager.save_fine_tuned(session, &output_dir, None, Some(metadata))?;

        Ok(TrainingReport {
            output_dir,
            global_step,
            train_loss,
            best_eval_loss: best.as_ref().and_then(|c| c.eval_loss),
            best_checkpoint: best.map(|c| c.dir),
            dataset_size: train_set.len(),
            args,
        })
    }

    fn run(
        &self,
        loaded: &mut LoadedModel,
        train_set: &[String],
        eval_set: Option<&[String]>,
        args: &TrainingArgs,
    ) -> Result<(usize, f64, Option<Checkpoint>)> {
        let train = encode_all(loaded, train_set, args.max_seq_length)?;
        if train.is_empty() {
            bail!("No training example has at least two tokens");
        }
        let eval = match eval_set {
            Some(texts) => Some(encode_all(loaded, texts, args.max_seq_length)?),
            None => None,
        };

        let vars = match &loaded.adapter {
            Some(adapter) => adapter.trainable_vars(),
            None => return Err(AiError::ModelNotPrepared.into()),
        };
        let mut optimizer = AdamW::new(
            vars.clone(),
            ParamsAdamW {
                lr: args.learning_rate,
                weight_decay: args.weight_decay,
                ..Default::default()
            },
        )?;

        let steps_per_epoch = args.steps_per_epoch(train.len());
        let total_steps = steps_per_epoch * args.num_train_epochs;

        tracing::info!(
            "Starting training: {} examples, {} epochs, {} steps (effective batch {})",
            train.len(),
            args.num_train_epochs,
            total_steps,
            args.effective_batch_size()
        );

        let mut logger = TrainingLogger::new(&args.output_dir)?;
        let pb = self.progress_bar(total_steps as u64)?;

        let mut rng = StdRng::seed_from_u64(args.seed);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut checkpoints: Vec<Checkpoint> = Vec::new();
        let mut latest_eval: Option<f64> = None;
        let mut best_eval: Option<f64> = None;
        let mut global_step = 0;
        let mut loss_sum = 0.0;
        let mut window_sum = 0.0;
        let mut window_steps = 0;

        for epoch in 0..args.num_train_epochs {
            order.shuffle(&mut rng);

            for step_indices in order.chunks(args.effective_batch_size()) {
                let lr = args.learning_rate_at(global_step, total_steps);
                optimizer.set_learning_rate(lr);

                let step_loss = self.accumulate_step(loaded, &train, step_indices, &vars, &mut optimizer)?;
                global_step += 1;
                loss_sum += step_loss;
                window_sum += step_loss;
                window_steps += 1;
                pb.inc(1);

                let epoch_progress = global_step as f64 / steps_per_epoch as f64;

                if global_step % args.logging_steps.max(1) == 0 {
                    let loss = window_sum / window_steps as f64;
                    tracing::info!("Step {}/{} - loss {:.4} - lr {:.2e}", global_step, total_steps, loss, lr);
                    pb.set_message(format!("loss {:.4}", loss));
                    logger.log(TrainingEvent::Train {
                        step: global_step,
                        epoch: epoch_progress,
                        loss,
                        learning_rate: lr,
                    })?;
                    window_sum = 0.0;
                    window_steps = 0;
                }

                let mut improved = false;
                if let (Some(eval), Some(every)) = (&eval, args.eval_steps) {
                    if global_step % every.max(1) == 0 {
                        let eval_loss = evaluate(loaded, eval)?;
                        tracing::info!("Step {} - eval loss {:.4}", global_step, eval_loss);
                        logger.log(TrainingEvent::Eval {
                            step: global_step,
                            epoch: epoch_progress,
                            eval_loss,
                        })?;
                        improved = best_eval.map_or(true, |b| eval_loss < b);
                        if improved {
                            best_eval = Some(eval_loss);
                        }
                        latest_eval = Some(eval_loss);
                    }
                }

                let due = args.save_steps > 0 && global_step % args.save_steps == 0;
                if due || (improved && args.load_best_model_at_end) {
                    let checkpoint = save_checkpoint(loaded, &args.output_dir, global_step, latest_eval)?;
                    logger.log(TrainingEvent::Checkpoint {
                        step: global_step,
                        path: checkpoint.dir.clone(),
                    })?;
                    checkpoints.push(checkpoint);
                    prune_checkpoints(&mut checkpoints, args.save_total_limit)?;
                }
            }

            tracing::debug!("Epoch {}/{} complete", epoch + 1, args.num_train_epochs);
        }

        pb.finish_with_message("Training complete");

        let best = best_checkpoint(&checkpoints).cloned();
        if args.load_best_model_at_end {
            if let (Some(best), Some(adapter)) = (&best, loaded.adapter.as_mut()) {
                tracing::info!("Restoring best checkpoint {}", best.dir.display());
                adapter.load_weights(&best.dir)?;
            }
        }

        let train_loss = if global_step > 0 {
            loss_sum / global_step as f64
        } else {
            0.0
        };
        logger.log(TrainingEvent::Complete {
            global_step,
            train_loss,
            best_eval_loss: best_eval,
        })?;
        logger.flush()?;

        tracing::info!("Training complete. {} steps, mean loss {:.4}", global_step, train_loss);
        Ok((global_step, train_loss, best))
    }

    /// One optimizer step over `indices`; returns the mean example loss
    fn accumulate_step(
        &self,
        loaded: &mut LoadedModel,
        examples: &[Vec<u32>],
        indices: &[usize],
        vars: &[Var],
        optimizer: &mut AdamW,
    ) -> Result<f64> {
        let scale = 1.0 / indices.len() as f64;
        let mut accumulated: Option<GradStore> = None;
        let mut loss_total = 0.0;

        for &i in indices {
            let loss = sequence_loss(loaded, &examples[i], true)?;
            loss_total += loss.to_scalar::<f32>()? as f64;

            let grads = (loss * scale)?.backward()?;
            accumulated = Some(match accumulated {
                None => grads,
                Some(mut acc) => {
                    for var in vars {
                        if let Some(grad) = grads.get(var.as_tensor()) {
                            let summed = match acc.get(var.as_tensor()) {
                                Some(existing) => (existing + grad)?,
                                None => grad.clone(),
                            };
                            acc.insert(var.as_tensor(), summed);
                        }
                    }
                    acc
                }
            });
        }

        if let Some(grads) = accumulated {
            optimizer.step(&grads)?;
        }
        Ok(loss_total * scale)
    }

    fn progress_bar(&self, len: u64) -> Result<ProgressBar> {
        let pb = if self.show_progress {
            ProgressBar::new(len)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} steps {msg}")
                .map_err(|e| anyhow::anyhow!("Invalid progress template: {}", e))?
                .progress_chars("=>-"),
        );
        Ok(pb)
    }
}

/// Token ids per text, truncated; texts with fewer than two tokens dropped
fn encode_all(loaded: &LoadedModel, texts: &[String], max_len: usize) -> Result<Vec<Vec<u32>>> {
    let mut encoded = Vec::with_capacity(texts.len());
    let mut skipped = 0;
    for text in texts {
        let mut ids = loaded.model.encode(text)?;
        ids.truncate(max_len);
        if ids.len() < 2 {
            skipped += 1;
            continue;
        }
        encoded.push(ids);
    }
    if skipped > 0 {
        tracing::warn!("Skipped {} texts too short to train on", skipped);
    }
    Ok(encoded)
}

/// Mean next-token cross-entropy of one sequence
fn sequence_loss(loaded: &mut LoadedModel, ids: &[u32], train: bool) -> Result<Tensor> {
    let device = loaded.model.device().clone();
    let input = Tensor::new(ids, &device)?.unsqueeze(0)?;

    loaded.model.reset();
    let logits = loaded.logits(&input, 0, train)?;
    loaded.model.reset();

    let seq_len = ids.len();
    let logits = logits.squeeze(0)?.narrow(0, 0, seq_len - 1)?;
    let targets = Tensor::new(&ids[1..], &device)?;
    Ok(candle_nn::loss::cross_entropy(&logits, &targets)?)
}

fn evaluate(loaded: &mut LoadedModel, examples: &[Vec<u32>]) -> Result<f64> {
    if examples.is_empty() {
        return Ok(0.0);
    }
    let mut total = 0.0;
    for ids in examples {
        total += sequence_loss(loaded, ids, false)?.to_scalar::<f32>()? as f64;
    }
    Ok(total / examples.len() as f64)
}

fn save_checkpoint(loaded: &LoadedModel, output_dir: &Path, step: usize, eval_loss: Option<f64>) -> Result<Checkpoint> {
    let dir = output_dir.join(format!("{}{}", CHECKPOINT_PREFIX, step));
    let adapter = loaded.adapter.as_ref().ok_or(AiError::ModelNotPrepared)?;
    adapter.save(&dir)?;

    let state = CheckpointState {
        global_step: step,
        eval_loss,
    };
    std::fs::write(dir.join(TRAINER_STATE_FILE), serde_json::to_string_pretty(&state)?)
        .with_context(|| format!("Failed to write trainer state to {}", dir.display()))?;

    tracing::debug!("Saved checkpoint {}", dir.display());
    Ok(Checkpoint { step, dir, eval_loss })
}

fn best_checkpoint(checkpoints: &[Checkpoint]) -> Option<&Checkpoint> {
    checkpoints
        .iter()
        .filter(|c| c.eval_loss.is_some())
        .min_by(|a, b| a.eval_loss.unwrap_or(f64::MAX).total_cmp(&b.eval_loss.unwrap_or(f64::MAX)))
}

/// Delete the oldest checkpoints beyond `limit` (0 keeps all); the best one stays
fn prune_checkpoints(checkpoints: &mut Vec<Checkpoint>, limit: usize) -> Result<()> {
    if limit == 0 {
        return Ok(());
    }
    while checkpoints.len() > limit {
        let best_step = best_checkpoint(checkpoints).map(|c| c.step);
        let Some(victim) = checkpoints.iter().position(|c| Some(c.step) != best_step) else {
            break;
        };
        let removed = checkpoints.remove(victim);
        std::fs::remove_dir_all(&removed.dir)
            .with_context(|| format!("Failed to remove checkpoint {}", removed.dir.display()))?;
        tracing::debug!("Pruned checkpoint {}", removed.dir.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trainer() -> Trainer {
        Trainer::new(TrainingSettings::default())
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("sample {}", i)).collect()
    }

    #[test]
    fn test_split_sizes() -> Result<()> {
        let (train, eval) = trainer().prepare_training_data(&texts(100), 0.2)?;
        assert_eq!(train.len(), 80);
        assert_eq!(eval.len(), 20);
        Ok(())
    }

    #[test]
    fn test_split_is_deterministic_and_disjoint() -> Result<()> {
        let input = texts(50);
        let (train_a, eval_a) = trainer().prepare_training_data(&input, 0.3)?;
        let (train_b, eval_b) = trainer().prepare_training_data(&input, 0.3)?;
        assert_eq!(train_a, train_b);
        assert_eq!(eval_a, eval_b);
        assert!(eval_a.iter().all(|e| !train_a.contains(e)));
        assert_eq!(train_a.len() + eval_a.len(), 50);
        Ok(())
    }

    #[test]
    fn test_split_rounds_eval_up() -> Result<()> {
        let (train, eval) = trainer().prepare_training_data(&texts(7), 0.2)?;
        assert_eq!((train.len(), eval.len()), (5, 2));
        Ok(())
    }

    #[test]
    fn test_zero_split_keeps_everything_for_training() -> Result<()> {
        let (train, eval) = trainer().prepare_training_data(&texts(10), 0.0)?;
        assert_eq!(train.len(), 10);
        assert!(eval.is_empty());
        Ok(())
    }

    #[test]
    fn test_invalid_split() {
        for split in [1.0, -0.1, f64::NAN] {
            let err = trainer().prepare_training_data(&texts(10), split).unwrap_err();
            assert!(matches!(err.downcast_ref::<AiError>(), Some(AiError::InvalidSplit(_))));
        }
    }

    #[test]
    fn test_train_without_prepared_model_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = crate::models::ModelRegistry::open(dir.path().join("r.json")).unwrap();
        let backend = crate::models::CandleBackend::new(dir.path().to_path_buf(), "cpu");
        let mut manager = ModelManager::new(
            registry,
            std::sync::Arc::new(backend),
            crate::config::ModelSettings::default(),
        );
        let mut session = ModelSession::new();

        let err = trainer()
            .train(&mut manager, &mut session, &texts(3), None, Some(dir.path()), None)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<AiError>(), Some(AiError::ModelNotPrepared)));
    }

    #[test]
    fn test_prune_keeps_best() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let mut checkpoints = Vec::new();
        for (step, loss) in [(1, 0.5), (2, 0.9), (3, 0.8), (4, 0.7)] {
            let path = dir.path().join(format!("checkpoint-{}", step));
            std::fs::create_dir_all(&path)?;
            checkpoints.push(Checkpoint {
                step,
                dir: path,
                eval_loss: Some(loss),
            });
            prune_checkpoints(&mut checkpoints, 2)?;
        }

        let steps: Vec<usize> = checkpoints.iter().map(|c| c.step).collect();
        assert_eq!(steps, vec![1, 4]);
        assert!(dir.path().join("checkpoint-1").exists());
        assert!(!dir.path().join("checkpoint-2").exists());
        Ok(())
    }
}
