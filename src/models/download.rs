// Model Downloader - resolves a model identifier to a local directory
// Uses HuggingFace Hub for download management and caching

use anyhow::{anyhow, Context, Result};
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

/// Files every causal LM snapshot needs
const REQUIRED_FILES: &[&str] = &["config.json", "tokenizer.json"];

const SINGLE_WEIGHTS_FILE: &str = "model.safetensors";
const SHARD_INDEX_FILE: &str = "model.safetensors.index.json";

/// Local model snapshot: config, tokenizer and weight files
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub dir: PathBuf,
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

/// Model downloader with HuggingFace Hub integration
pub struct ModelDownloader {
    cache_dir: PathBuf,
    show_progress: bool,
}

impl ModelDownloader {
    /// Create downloader with custom cache directory
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Resolve `model_id` to local files.
    ///
    /// An existing directory is used as-is; anything else is treated as a
    /// HuggingFace repo id and fetched into the cache (resumes if present).
    /// This is a blocking operation.
    pub fn resolve(&self, model_id: &str) -> Result<ModelFiles> {
        let local = Path::new(model_id);
        if local.is_dir() {
            return local_files(local);
        }
        self.download(model_id)
    }

    fn download(&self, model_id: &str) -> Result<ModelFiles> {
        std::fs::create_dir_all(&self.cache_dir).context("Failed to create cache directory")?;

        let api = ApiBuilder::new()
            .with_cache_dir(self.cache_dir.clone())
            .with_progress(false)
            .build()
            .context("Failed to create HuggingFace Hub API")?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

        tracing::info!("Downloading {} to cache...", model_id);

        let pb = if self.show_progress {
            ProgressBar::new(REQUIRED_FILES.len() as u64 + 1)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .map_err(|e| anyhow!("Invalid progress template: {}", e))?
                .progress_chars("=>-"),
        );

        let mut fetched = Vec::new();
        for file in REQUIRED_FILES {
            pb.set_message(format!("Downloading {}", file));
            let path = repo
                .get(file)
                .with_context(|| format!("Failed to download {} from {}", file, model_id))?;
            fetched.push(path);
            pb.inc(1);
        }

        // Single safetensors file for smaller models, index + shards otherwise
        pb.set_message("Downloading weights");
        let weights = match repo.get(SINGLE_WEIGHTS_FILE) {
            Ok(path) => vec![path],
            Err(single_err) => {
                tracing::debug!("No single weights file ({}), trying sharded index", single_err);
                let index = repo
                    .get(SHARD_INDEX_FILE)
                    .with_context(|| format!("No safetensors weights found for {}", model_id))?;
                shard_names(&index)?
                    .iter()
                    .map(|name| {
                        repo.get(name)
                            .with_context(|| format!("Failed to download shard {}", name))
                    })
                    .collect::<Result<Vec<_>>>()?
            }
        };
        pb.inc(1);
        pb.finish_with_message("Download complete");

        let dir = fetched[0]
            .parent()
            .ok_or_else(|| anyhow!("Downloaded file has no parent directory"))?
            .to_path_buf();

        tracing::info!("Model {} available at {:?}", model_id, dir);

        Ok(ModelFiles {
            dir,
            config: fetched[0].clone(),
            tokenizer: fetched[1].clone(),
            weights,
        })
    }
}

/// ONNX model candidates, preferred first (Xenova exports keep them under onnx/)
const ONNX_CANDIDATES: &[&str] = &[
    "onnx/model_quantized.onnx",
    "onnx/model.onnx",
    "model_quantized.onnx",
    "model.onnx",
];

/// Local ONNX encoder snapshot (embedding and classification models)
#[derive(Debug, Clone)]
pub struct OnnxModelFiles {
    pub model: PathBuf,
    pub tokenizer: PathBuf,
    /// config.json, when the repo ships one (carries id2label)
    pub config: Option<PathBuf>,
}

impl ModelDownloader {
    /// Resolve an ONNX encoder from a local directory or a HuggingFace repo
    pub fn resolve_onnx(&self, repo_id: &str) -> Result<OnnxModelFiles> {
        let local = Path::new(repo_id);
        if local.is_dir() {
            let model = ONNX_CANDIDATES
                .iter()
                .map(|c| local.join(c))
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No ONNX model found in {:?}", local))?;
            let tokenizer = local.join("tokenizer.json");
            if !tokenizer.exists() {
                anyhow::bail!("Tokenizer not found: {:?}", tokenizer);
            }
            let config = Some(local.join("config.json")).filter(|p| p.exists());
            return Ok(OnnxModelFiles {
                model,
                tokenizer,
                config,
            });
        }

        std::fs::create_dir_all(&self.cache_dir).context("Failed to create cache directory")?;
        let api = ApiBuilder::new()
            .with_cache_dir(self.cache_dir.clone())
            .with_progress(self.show_progress)
            .build()
            .context("Failed to create HuggingFace Hub API")?;
        let repo = api.repo(Repo::new(repo_id.to_string(), RepoType::Model));

        tracing::info!("Fetching ONNX model {}", repo_id);

        let model = ONNX_CANDIDATES
            .iter()
            .find_map(|c| repo.get(c).ok())
            .ok_or_else(|| anyhow!("Failed to download an ONNX model from {} (tried {:?})", repo_id, ONNX_CANDIDATES))?;
        let tokenizer = repo
            .get("tokenizer.json")
            .with_context(|| format!("Failed to download tokenizer.json from {}", repo_id))?;
        let config = repo.get("config.json").ok();

        Ok(OnnxModelFiles {
            model,
            tokenizer,
            config,
        })
    }
}

/// Collect files from an on-disk model directory
fn local_files(dir: &Path) -> Result<ModelFiles> {
    let config = dir.join("config.json");
    let tokenizer = dir.join("tokenizer.json");
    for path in [&config, &tokenizer] {
        if !path.exists() {
            anyhow::bail!("Model directory {:?} is missing {:?}", dir, path.file_name());
        }
    }

    let single = dir.join(SINGLE_WEIGHTS_FILE);
    let weights = if single.exists() {
        vec![single]
    } else {
        let index = dir.join(SHARD_INDEX_FILE);
        if !index.exists() {
            anyhow::bail!("No safetensors weights found in {:?}", dir);
        }
        shard_names(&index)?
            .into_iter()
            .map(|name| dir.join(name))
            .collect()
    };

    Ok(ModelFiles {
        dir: dir.to_path_buf(),
        config,
        tokenizer,
        weights,
    })
}

/// Unique shard file names from a safetensors index, in first-seen order
fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let json = std::fs::read_to_string(index_path)
        .with_context(|| format!("Failed to read {:?}", index_path))?;
    let index: serde_json::Value = serde_json::from_str(&json)?;
    let map = index["weight_map"]
        .as_object()
        .ok_or_else(|| anyhow!("{:?} has no weight_map", index_path))?;

    let mut names: Vec<String> = Vec::new();
    for file in map.values().filter_map(|v| v.as_str()) {
        if !names.iter().any(|n| n == file) {
            names.push(file.to_string());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_directory_with_single_weights() -> Result<()> {
        let dir = TempDir::new()?;
        for f in ["config.json", "tokenizer.json", "model.safetensors"] {
            std::fs::write(dir.path().join(f), "{}")?;
        }

        let files = local_files(dir.path())?;
        assert_eq!(files.weights, vec![dir.path().join("model.safetensors")]);
        Ok(())
    }

    #[test]
    fn test_local_directory_with_shards() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("config.json"), "{}")?;
        std::fs::write(dir.path().join("tokenizer.json"), "{}")?;
        std::fs::write(
            dir.path().join(SHARD_INDEX_FILE),
            r#"{"weight_map": {"a": "model-00001.safetensors", "b": "model-00002.safetensors", "c": "model-00001.safetensors"}}"#,
        )?;

        let files = local_files(dir.path())?;
        assert_eq!(files.weights.len(), 2);
        assert!(files.weights[0].ends_with("model-00001.safetensors"));
        Ok(())
    }

    #[test]
    fn test_local_onnx_prefers_quantized_export() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::create_dir(dir.path().join("onnx"))?;
        std::fs::write(dir.path().join("onnx/model.onnx"), "")?;
        std::fs::write(dir.path().join("onnx/model_quantized.onnx"), "")?;
        std::fs::write(dir.path().join("tokenizer.json"), "{}")?;

        let downloader = ModelDownloader::new(dir.path().join("cache"));
        let files = downloader.resolve_onnx(dir.path().to_str().unwrap())?;
        assert!(files.model.ends_with("onnx/model_quantized.onnx"));
        assert!(files.config.is_none());
        Ok(())
    }

    #[test]
    fn test_local_directory_missing_tokenizer() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("config.json"), "{}")?;
        assert!(local_files(dir.path()).is_err());
        Ok(())
    }
}
