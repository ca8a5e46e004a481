// Integration tests for model loading, fine-tuned overlays and the registry

mod common;

use anyhow::Result;
use candle_core::Device;
use std::sync::atomic::Ordering;
use tempfile::TempDir;

use common::{configured_entry, manager, HIDDEN, MODEL_ID, VOCAB};
use ipms::models::{artifact_key, LoraAdapter, LoraSettings, ModelRegistry, ModelSession, Quantization};
use ipms::AiError;

fn attach_adapter(session: &mut ModelSession) -> Result<()> {
    let settings = LoraSettings {
        rank: 2,
        alpha: 4.0,
        dropout: 0.0,
        ..Default::default()
    };
    let loaded = session.current_mut().expect("model loaded");
    loaded.adapter = Some(LoraAdapter::new(settings, HIDDEN, VOCAB, Device::Cpu)?);
    Ok(())
}

#[test]
fn test_load_model_registers_once() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut manager, backend) = manager(dir.path())?;
    let mut session = ModelSession::new();

    manager.load_model(&mut session, None, None)?;
    manager.load_model(&mut session, None, Some(Quantization::Int4))?;

    assert_eq!(backend.loads.load(Ordering::SeqCst), 2);
    assert_eq!(manager.registry().len(), 1);

    // First registration wins
    let entry = configured_entry(&manager).expect("configured model registered");
    assert_eq!(entry.base_model, "test/byte-model");
    assert_eq!(entry.quantization, Quantization::None);

    // The session holds the latest load only
    assert_eq!(session.current().unwrap().quantization, Quantization::Int4);
    Ok(())
}

#[test]
fn test_model_info_without_id_lists_every_base() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut manager, _) = manager(dir.path())?;
    let mut session = ModelSession::new();

    manager.load_model(&mut session, None, None)?;
    manager.load_model(&mut session, Some("org/other"), Some(Quantization::Int8))?;

    let info = manager.model_info(None).expect("whole registry");
    assert!(info.entry().is_none());
    let ids: Vec<&str> = info.entries().iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec!["org/other", MODEL_ID]);

    let single = manager.model_info(Some("org/other")).unwrap();
    assert_eq!(single.entry().unwrap().quantization, Quantization::Int8);
    Ok(())
}

#[test]
fn test_registry_survives_reopen() -> Result<()> {
    let dir = TempDir::new()?;
    {
        let (mut manager, _) = manager(dir.path())?;
        manager.load_model(&mut ModelSession::new(), Some("org/other"), Some(Quantization::Int8))?;
    }

    let registry = ModelRegistry::open(dir.path().join("model_registry.json"))?;
    assert_eq!(registry.get("org/other").unwrap().quantization, Quantization::Int8);
    Ok(())
}

#[test]
fn test_failed_load_keeps_previous_model() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut manager, _) = manager(dir.path())?;
    let mut session = ModelSession::new();

    manager.load_model(&mut session, None, None)?;
    assert!(manager.load_model(&mut session, Some("missing/model"), None).is_err());

    assert_eq!(session.current().unwrap().base_id, "test/byte-model");
    assert!(manager.model_info(Some("missing/model")).is_none());
    assert_eq!(manager.model_info(None).unwrap().entries().len(), 1);
    Ok(())
}

#[test]
fn test_save_requires_model_and_adapter() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut manager, _) = manager(dir.path())?;
    let mut session = ModelSession::new();
    let out = dir.path().join("out");

    let err = manager.save_fine_tuned(&session, &out, None, None).unwrap_err();
    assert!(matches!(err.downcast_ref::<AiError>(), Some(AiError::NoModelLoaded)));

    manager.load_model(&mut session, None, None)?;
    let err = manager.save_fine_tuned(&session, &out, None, None).unwrap_err();
    assert!(matches!(err.downcast_ref::<AiError>(), Some(AiError::NoAdapter)));
    Ok(())
}

#[test]
fn test_save_then_load_fine_tuned() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut manager, _) = manager(dir.path())?;
    let mut session = ModelSession::new();
    manager.load_model(&mut session, None, None)?;
    attach_adapter(&mut session)?;

    let out = dir.path().join("fine_tuned");
    let key = manager.save_fine_tuned(&session, &out, None, Some(serde_json::json!({"note": "first"})))?;

    assert!(out.join("adapter_model.safetensors").exists());
    assert!(out.join("adapter_config.json").exists());
    assert!(out.join("tokenizer.json").exists());

    let entry = configured_entry(&manager).unwrap();
    assert_eq!(entry.fine_tuned_versions.len(), 1);
    assert_eq!(entry.fine_tuned_versions[0].path, key.to_string_lossy());
    assert_eq!(entry.fine_tuned_versions[0].metadata["note"], "first");

    // Saving again to the same directory refreshes the record
    manager.save_fine_tuned(&session, &out, None, None)?;
    assert_eq!(configured_entry(&manager).unwrap().fine_tuned_versions.len(), 1);

    let mut fresh = ModelSession::new();
    manager.load_fine_tuned(&mut fresh, &out, None)?;
    let loaded = fresh.current().unwrap();
    assert_eq!(loaded.base_id, "test/byte-model");
    assert!(loaded.adapter.is_some());
    Ok(())
}

#[test]
fn test_load_fine_tuned_unregistered_path_fails() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut manager, backend) = manager(dir.path())?;
    let mut session = ModelSession::new();
    manager.load_model(&mut session, None, None)?;

    let stray = dir.path().join("never_saved");
    std::fs::create_dir_all(&stray)?;

    let err = manager.load_fine_tuned(&mut session, &stray, None).unwrap_err();
    match err.downcast_ref::<AiError>() {
        Some(AiError::UnresolvedBaseModel { path }) => assert_eq!(path, &artifact_key(&stray)),
        other => panic!("expected UnresolvedBaseModel, got {:?}", other),
    }

    // Nothing was loaded and the held model is untouched
    assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
    assert!(session.current().unwrap().adapter.is_none());
    Ok(())
}

#[test]
fn test_load_fine_tuned_with_explicit_base_but_no_adapter_fails_cleanly() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut manager, _) = manager(dir.path())?;
    let mut session = ModelSession::new();

    let empty = dir.path().join("empty");
    std::fs::create_dir_all(&empty)?;

    assert!(manager
        .load_fine_tuned(&mut session, &empty, Some("test/byte-model"))
        .is_err());
    assert!(!session.is_loaded());
    Ok(())
}
