// Model Registry - persistent base model → fine-tuned derivative mapping
//
// Stored as a single JSON document under the models root:
//   { base_model_id: { base_model, quantization, fine_tuned_versions: [...] } }
//
// Every mutation re-reads the document, applies the change in memory and
// replaces the file via temp-file + rename, so a crash mid-write never
// leaves a truncated registry. Last writer wins between processes.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::common::Quantization;
use crate::errors::AiError;

/// One fine-tuned artifact produced from a base model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivativeRecord {
    /// Artifact directory; doubles as the primary key
    pub path: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Registry entry for a base model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub base_model: String,
    pub quantization: Quantization,
    #[serde(default)]
    pub fine_tuned_versions: Vec<DerivativeRecord>,
}

type Entries = BTreeMap<String, RegistryEntry>;

/// JSON-backed model registry
#[derive(Debug)]
pub struct ModelRegistry {
    path: PathBuf,
    entries: Entries,
}

impl ModelRegistry {
    /// Open the registry at `path`, creating an empty document if absent
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let entries = if path.exists() {
            read_entries(&path)?
        } else {
            let entries = Entries::new();
            write_entries(&path, &entries)?;
            entries
        };

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a base model. Returns true if a new entry was inserted.
    ///
    /// Re-registering leaves the existing entry (quantization and
    /// derivative list) untouched.
    pub fn register(&mut self, base_id: &str, quantization: Quantization) -> Result<bool> {
        if self.entries.contains_key(base_id) {
            return Ok(false);
        }

        self.update(|entries| {
            if entries.contains_key(base_id) {
                return Ok(false);
            }
            entries.insert(
                base_id.to_string(),
                RegistryEntry {
                    base_model: base_id.to_string(),
                    quantization,
                    fine_tuned_versions: Vec::new(),
                },
            );
            Ok(true)
        })
    }

    /// Append (or refresh) a derivative record under `base_id` and persist
    pub fn record_derivative(
        &mut self,
        base_id: &str,
        path: &str,
        metadata: serde_json::Value,
    ) -> Result<()> {
        self.update(|entries| {
            if let Some(owner) = owning_base(entries, path) {
                if owner != base_id {
                    return Err(AiError::DerivativeConflict {
                        path: path.to_string(),
                        existing_base: owner,
                    }
                    .into());
                }
            }

            let entry = entries
                .get_mut(base_id)
                .ok_or_else(|| AiError::UnknownBaseModel(base_id.to_string()))?;

            let record = DerivativeRecord {
                path: path.to_string(),
                timestamp: Utc::now(),
                metadata,
            };

            match entry
                .fine_tuned_versions
                .iter_mut()
                .find(|v| v.path == path)
            {
                Some(existing) => *existing = record,
                None => entry.fine_tuned_versions.push(record),
            }
            Ok(())
        })
    }

    /// Find the base model owning a derivative path (linear scan)
    pub fn resolve_base(&self, path: &str) -> Result<String> {
        owning_base(&self.entries, path).ok_or_else(|| {
            AiError::UnresolvedBaseModel {
                path: path.to_string(),
            }
            .into()
        })
    }

    pub fn get(&self, base_id: &str) -> Option<&RegistryEntry> {
        self.entries.get(base_id)
    }

    /// All entries, ordered by base model id
    pub fn entries(&self) -> impl Iterator<Item = (&String, &RegistryEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Transactional update: load, mutate in memory, atomic rename-on-write
    fn update<R>(&mut self, mutate: impl FnOnce(&mut Entries) -> Result<R>) -> Result<R> {
        let mut entries = if self.path.exists() {
            read_entries(&self.path)?
        } else {
            Entries::new()
        };

        let result = mutate(&mut entries)?;
        write_entries(&self.path, &entries)?;
        self.entries = entries;

        Ok(result)
    }
}

fn owning_base(entries: &Entries, path: &str) -> Option<String> {
    entries.values().find_map(|entry| {
        entry
            .fine_tuned_versions
            .iter()
            .any(|v| v.path == path)
            .then(|| entry.base_model.clone())
    })
}

fn read_entries(path: &Path) -> Result<Entries> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read model registry from {:?}", path))?;
    if json.trim().is_empty() {
        return Ok(Entries::new());
    }
    serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse model registry {:?}", path))
}

fn write_entries(path: &Path, entries: &Entries) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
    serde_json::to_writer_pretty(&mut tmp, entries)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace model registry {:?}", path))?;

    Ok(())
}
