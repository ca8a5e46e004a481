// Local language models
// Base model loading, LoRA adapters, registry bookkeeping and generation

pub mod backend;
pub mod common;
pub mod download;
pub mod generator;
pub mod loaders;
pub mod lora_impl;
pub mod manager;
pub mod onnx_encoder;
pub mod registry;
pub mod sampling;

pub use backend::{LanguageModel, LoadedModel, ModelBackend, ModelSession};
pub use common::{select_device, PrecisionPolicy, Quantization};
pub use download::{ModelDownloader, ModelFiles, OnnxModelFiles};
pub use generator::{LocalGenerator, TextGenerator};
pub use loaders::CandleBackend;
pub use lora_impl::{LoraAdapter, LoraSettings};
pub use manager::{artifact_key, ModelInfo, ModelManager};
pub use onnx_encoder::{EncoderOutput, OnnxEncoder};
pub use registry::{DerivativeRecord, ModelRegistry, RegistryEntry};
pub use sampling::SamplingConfig;
