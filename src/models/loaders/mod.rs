// Model loaders
//
// Candle is the backend for base model inference and adapter training.

pub mod candle;

pub use self::candle::{CandleBackend, QwenModel};
