// External LLM providers
//
// A thin abstraction over hosted (OpenAI-compatible) and self-hosted
// (Ollama) completion APIs. Used for task analysis; the local model
// stack in `models` is independent of this module.

use anyhow::Result;
use async_trait::async_trait;

pub mod factory;
pub mod ollama;
pub mod openai;
pub mod tasks;

pub use factory::create_provider;
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
pub use tasks::{TaskAdvisor, TaskInfo};

/// Trait for LLM providers
///
/// One prompt in, the complete response text out. No retries are
/// attempted; transport and API errors propagate to the caller.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Provider name ("openai", "ollama")
    fn name(&self) -> &str;

    /// Model requested from the provider
    fn model(&self) -> &str;
}
