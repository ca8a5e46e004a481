// IPMS - personal management assistant
// Library exports

pub mod assistant;
pub mod cli;
pub mod config;
pub mod documents;
pub mod errors;
pub mod logging;
pub mod models;
pub mod providers;
pub mod training;

pub use assistant::Assistant;
pub use config::{load_config, AiConfig};
pub use documents::DocumentProcessor;
pub use errors::AiError;
pub use models::{ModelManager, ModelSession};
pub use training::Trainer;
