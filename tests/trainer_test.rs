// Integration tests for adapter fine-tuning on a tiny byte-level model

mod common;

use anyhow::Result;
use candle_core::Device;
use tempfile::TempDir;

use common::{configured_entry, manager, training_settings};
use ipms::logging::{TrainingEvent, TrainingLogger, TRAINING_LOG_FILE};
use ipms::models::{LoraSettings, ModelSession};
use ipms::training::{Trainer, TrainingOverrides};
use ipms::AiError;

fn corpus(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("Journal entry {}: went for a walk and felt good.", i))
        .collect()
}

#[test]
fn test_train_requires_prepared_model() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut manager, _) = manager(dir.path())?;
    let mut session = ModelSession::new();
    let trainer = Trainer::new(training_settings());

    let err = trainer
        .train(&mut manager, &mut session, &corpus(2), None, Some(dir.path()), None)
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<AiError>(), Some(AiError::ModelNotPrepared)));

    // Loaded but not prepared is still refused
    manager.load_model(&mut session, None, None)?;
    let err = trainer
        .train(&mut manager, &mut session, &corpus(2), None, Some(dir.path()), None)
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<AiError>(), Some(AiError::ModelNotPrepared)));
    Ok(())
}

#[test]
fn test_prepare_keeps_existing_adapter() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut manager, _) = manager(dir.path())?;
    let mut session = ModelSession::new();
    let trainer = Trainer::new(training_settings());

    let custom = LoraSettings {
        rank: 3,
        alpha: 6.0,
        dropout: 0.0,
        ..Default::default()
    };
    trainer.prepare_model_for_training(&mut manager, &mut session, None, Some(custom))?;
    trainer.prepare_model_for_training(&mut manager, &mut session, None, None)?;

    let loaded = session.current().unwrap();
    assert!(loaded.prepared_for_training);
    assert_eq!(loaded.adapter.as_ref().unwrap().settings().rank, 3);
    Ok(())
}

#[test]
fn test_end_to_end_training_registers_artifact() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut manager, _) = manager(dir.path())?;
    let mut session = ModelSession::new();
    let trainer = Trainer::new(training_settings());

    trainer.prepare_model_for_training(&mut manager, &mut session, None, None)?;
    let (train, eval) = trainer.prepare_training_data(&corpus(10), 0.2)?;
    assert_eq!((train.len(), eval.len()), (8, 2));

    let overrides = TrainingOverrides {
        gradient_accumulation_steps: Some(2),
        logging_steps: Some(1),
        eval_steps: Some(1),
        save_steps: Some(2),
        save_total_limit: Some(2),
        max_seq_length: Some(32),
        ..Default::default()
    };
    let out = dir.path().join("run");
    let report = trainer.train(
        &mut manager,
        &mut session,
        &train,
        Some(eval.as_slice()),
        Some(&out),
        Some(&overrides),
    )?;

    // 8 examples, batch 1 x accumulation 2
    assert_eq!(report.global_step, 4);
    assert_eq!(report.dataset_size, 8);
    assert!(report.train_loss.is_finite() && report.train_loss > 0.0);
    assert!(report.args.load_best_model_at_end);

    let best = report.best_checkpoint.clone().expect("best checkpoint kept");
    assert!(best.join("adapter_model.safetensors").exists());
    assert!(best.join("trainer_state.json").exists());

    let checkpoints = std::fs::read_dir(&out)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("checkpoint-"))
        .count();
    assert!(checkpoints >= 1 && checkpoints <= 2, "found {} checkpoints", checkpoints);

    // Final weights and the registry record
    assert!(out.join("adapter_model.safetensors").exists());

    // B starts at zero; the optimizer must have moved it
    let tensors = candle_core::safetensors::load(out.join("adapter_model.safetensors"), &Device::Cpu)?;
    let lora_b = tensors
        .iter()
        .find(|(name, _)| name.contains("lora_b"))
        .map(|(_, t)| t)
        .expect("lora_b weights saved");
    let magnitude = lora_b.abs()?.sum_all()?.to_scalar::<f32>()?;
    assert!(magnitude > 0.0, "lora_b still zero after training");

    let entry = configured_entry(&manager).unwrap();
    assert_eq!(entry.fine_tuned_versions.len(), 1);
    let metadata = &entry.fine_tuned_versions[0].metadata;
    assert_eq!(metadata["dataset_size"], 8);
    assert_eq!(metadata["training_args"]["gradient_accumulation_steps"], 2);

    // Metrics log
    let records = TrainingLogger::read(&out.join(TRAINING_LOG_FILE))?;
    let train_events = records
        .iter()
        .filter(|r| matches!(r.event, TrainingEvent::Train { .. }))
        .count();
    assert_eq!(train_events, 4);
    assert!(matches!(
        records.last().unwrap().event,
        TrainingEvent::Complete { global_step: 4, .. }
    ));

    // The artifact loads back through the registry
    let mut fresh = ModelSession::new();
    manager.load_fine_tuned(&mut fresh, &out, None)?;
    assert!(fresh.current().unwrap().adapter.is_some());
    Ok(())
}

#[test]
fn test_training_without_eval_set() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut manager, _) = manager(dir.path())?;
    let mut session = ModelSession::new();
    let trainer = Trainer::new(training_settings());
    trainer.prepare_model_for_training(&mut manager, &mut session, None, None)?;

    let overrides = TrainingOverrides {
        gradient_accumulation_steps: Some(1),
        save_steps: Some(0),
        max_seq_length: Some(16),
        ..Default::default()
    };
    let out = dir.path().join("no_eval");
    let report = trainer.train(&mut manager, &mut session, &corpus(3), None, Some(&out), Some(&overrides))?;

    assert_eq!(report.global_step, 3);
    assert_eq!(report.best_eval_loss, None);
    assert_eq!(report.best_checkpoint, None);
    assert!(!report.args.load_best_model_at_end);
    assert!(out.join("adapter_config.json").exists());
    Ok(())
}

#[test]
fn test_split_is_reproducible() -> Result<()> {
    let trainer = Trainer::new(training_settings());
    let texts = corpus(100);
    let first = trainer.prepare_training_data(&texts, 0.2)?;
    let second = trainer.prepare_training_data(&texts, 0.2)?;
    assert_eq!(first, second);
    assert_eq!(first.0.len(), 80);
    assert_eq!(first.1.len(), 20);
    Ok(())
}
