// LoRA (Low-Rank Adaptation) Implementation
// Real implementation with low-rank matrices, saved as safetensors + JSON config

use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, Module, Tensor, Var};
use candle_nn::{init, Init, Linear, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.safetensors";
pub const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";

/// Projections an adapter can target
pub const SUPPORTED_TARGETS: &[&str] = &["lm_head"];

/// LoRA hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraSettings {
    pub rank: usize,
    pub alpha: f64,
    pub dropout: f32,
    pub target_modules: Vec<String>,
    /// Only causal language modelling is supported
    pub task_type: String,
    pub bias: String,
}

impl Default for LoraSettings {
    fn default() -> Self {
        Self {
            rank: 8,
            alpha: 16.0,
            dropout: 0.05,
            target_modules: vec!["lm_head".to_string()],
            task_type: "CAUSAL_LM".to_string(),
            bias: "none".to_string(),
        }
    }
}

impl LoraSettings {
    /// Scaling factor applied to the low-rank update
    pub fn scaling(&self) -> f64 {
        self.alpha / self.rank as f64
    }
}

/// On-disk adapter description
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AdapterConfigFile {
    #[serde(flatten)]
    settings: LoraSettings,
    in_features: usize,
    out_features: usize,
}

/// Low-rank matrices for a single projection
#[derive(Debug, Clone)]
pub struct LoraLayer {
    /// A matrix: input_dim → rank
    lora_a: Linear,
    /// B matrix: rank → output_dim
    lora_b: Linear,
    scaling: f64,
    dropout: f32,
}

impl LoraLayer {
    fn new(input_dim: usize, output_dim: usize, settings: &LoraSettings, vb: VarBuilder) -> Result<Self> {
        // A: Kaiming initialization
        let a = vb.get_with_hints((settings.rank, input_dim), "lora_a.weight", init::DEFAULT_KAIMING_NORMAL)?;
        // B: Zero initialization (starts with no effect)
        let b = vb.get_with_hints((output_dim, settings.rank), "lora_b.weight", Init::Const(0.0))?;

        Ok(Self {
            lora_a: Linear::new(a, None),
            lora_b: Linear::new(b, None),
            scaling: settings.scaling(),
            dropout: settings.dropout,
        })
    }

    /// output = base_output + (B @ A @ dropout(input)) * scaling
    fn forward(&self, input: &Tensor, base_output: &Tensor, train: bool) -> Result<Tensor> {
        let input = if train && self.dropout > 0.0 {
            candle_nn::ops::dropout(input, self.dropout)?
        } else {
            input.clone()
        };

        let update = self.lora_b.forward(&self.lora_a.forward(&input)?)?;
        Ok((base_output + (update * self.scaling)?)?)
    }
}

/// LoRA adapter over a model's projections
pub struct LoraAdapter {
    layers: BTreeMap<String, LoraLayer>,
    settings: LoraSettings,
    in_features: usize,
    out_features: usize,
    varmap: VarMap,
    device: Device,
    enabled: bool,
}

impl std::fmt::Debug for LoraAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoraAdapter")
            .field("layers", &self.layers.keys().collect::<Vec<_>>())
            .field("settings", &self.settings)
            .field("device", &self.device)
            .field("enabled", &self.enabled)
            .field("varmap", &"<VarMap>")
            .finish()
    }
}

impl LoraAdapter {
    /// Create an adapter for a head projection of `in_features → out_features`
    pub fn new(settings: LoraSettings, in_features: usize, out_features: usize, device: Device) -> Result<Self> {
        if settings.rank == 0 {
            bail!("LoRA rank must be at least 1");
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mut layers = BTreeMap::new();

        for module_name in &settings.target_modules {
            if !SUPPORTED_TARGETS.contains(&module_name.as_str()) {
                tracing::warn!("Skipping unsupported LoRA target module: {}", module_name);
                continue;
            }
            let layer = LoraLayer::new(in_features, out_features, &settings, vb.pp(module_name))?;
            layers.insert(module_name.clone(), layer);
        }

        if layers.is_empty() {
            bail!(
                "No supported LoRA target modules in {:?} (supported: {:?})",
                settings.target_modules,
                SUPPORTED_TARGETS
            );
        }

        Ok(Self {
            layers,
            settings,
            in_features,
            out_features,
            varmap,
            device,
            enabled: true,
        })
    }

    /// Apply the head adapter to base logits
    pub fn apply(&self, hidden: &Tensor, base_logits: &Tensor, train: bool) -> Result<Tensor> {
        match self.layers.get("lm_head") {
            Some(layer) if self.enabled => layer.forward(hidden, base_logits, train),
            _ => Ok(base_logits.clone()),
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn settings(&self) -> &LoraSettings {
        &self.settings
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Trainable variables (the only parameters the optimizer sees)
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn trainable_parameter_count(&self) -> usize {
        self.varmap.all_vars().iter().map(|v| v.elem_count()).sum()
    }

    /// Save adapter weights and config into `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create adapter directory {:?}", dir))?;

        let weights_path = dir.join(ADAPTER_WEIGHTS_FILE);
        self.varmap
            .save(&weights_path)
            .with_context(|| format!("Failed to save LoRA adapter to {:?}", weights_path))?;

        let config = AdapterConfigFile {
            settings: self.settings.clone(),
            in_features: self.in_features,
            out_features: self.out_features,
        };
        let config_path = dir.join(ADAPTER_CONFIG_FILE);
        std::fs::write(&config_path, serde_json::to_string_pretty(&config)?)
            .with_context(|| format!("Failed to save config to {:?}", config_path))?;

        tracing::info!("Saved LoRA adapter to {:?}", dir);
        Ok(())
    }

    /// Load adapter weights and config from `dir`
    pub fn load(dir: &Path, device: Device) -> Result<Self> {
        let config_path = dir.join(ADAPTER_CONFIG_FILE);
        let config_json = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        let config: AdapterConfigFile = serde_json::from_str(&config_json)
            .with_context(|| format!("Failed to parse adapter config {:?}", config_path))?;

        let mut adapter = Self::new(config.settings, config.in_features, config.out_features, device)?;
        adapter.load_weights(dir)?;

        tracing::info!("Loaded LoRA adapter from {:?}", dir);
        Ok(adapter)
    }

    /// Overwrite current weights with the ones saved in `dir`
    pub fn load_weights(&mut self, dir: &Path) -> Result<()> {
        let weights_path = dir.join(ADAPTER_WEIGHTS_FILE);
        self.varmap
            .load(&weights_path)
            .with_context(|| format!("Failed to load LoRA weights from {:?}", weights_path))
    }

    /// Whether this adapter fits a model with the given head dimensions
    pub fn fits(&self, hidden_size: usize, vocab_size: usize) -> bool {
        self.in_features == hidden_size && self.out_features == vocab_size
    }
}
