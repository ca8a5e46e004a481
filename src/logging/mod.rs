// Logging
//
// Process-wide tracing setup plus the JSONL training metrics log.

pub mod training_log;

pub use training_log::{TrainingEvent, TrainingLogRecord, TrainingLogger, TRAINING_LOG_FILE};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` when verbose.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Already initialized (tests, embedding applications) is fine
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
