// Fine-tuning
// Data partitioning, adapter preparation and the supervised training loop

pub mod args;
pub mod trainer;

pub use args::{TrainingArgs, TrainingOverrides};
pub use trainer::{Trainer, TrainingReport};
