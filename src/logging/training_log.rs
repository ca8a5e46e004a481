// Training metrics log (JSONL, one record per logged event)

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const TRAINING_LOG_FILE: &str = "trainer_log.jsonl";

/// Something worth recording during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrainingEvent {
    Train {
        step: usize,
        epoch: f64,
        loss: f64,
        learning_rate: f64,
    },
    Eval {
        step: usize,
        epoch: f64,
        eval_loss: f64,
    },
    Checkpoint {
        step: usize,
        path: PathBuf,
    },
    Complete {
        global_step: usize,
        train_loss: f64,
        best_eval_loss: Option<f64>,
    },
}

/// A logged event with its wall-clock time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingLogRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TrainingEvent,
}

/// Appends training events to a JSONL file
pub struct TrainingLogger {
    log_path: PathBuf,
    buffer: Vec<TrainingLogRecord>,
    flush_threshold: usize,
}

impl TrainingLogger {
    /// Logger writing to `trainer_log.jsonl` inside `output_dir`
    pub fn new(output_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(output_dir).context("Failed to create training output directory")?;

        Ok(Self {
            log_path: output_dir.join(TRAINING_LOG_FILE),
            buffer: Vec::new(),
            flush_threshold: 10,
        })
    }

    pub fn log(&mut self, event: TrainingEvent) -> Result<()> {
        self.buffer.push(TrainingLogRecord {
            timestamp: Utc::now(),
            event,
        });

        if self.buffer.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush buffered records to disk
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        debug!("Flushing {} training log records", self.buffer.len());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .context("Failed to open training log")?;

        for record in &self.buffer {
            let json = serde_json::to_string(record).context("Failed to serialize training log record")?;
            writeln!(file, "{}", json).context("Failed to write training log record")?;
        }

        self.buffer.clear();
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Read back every record from a log file
    pub fn read(path: &Path) -> Result<Vec<TrainingLogRecord>> {
        let contents = std::fs::read_to_string(path).context("Failed to read training log")?;
        contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("Failed to parse training log record"))
            .collect()
    }
}

impl Drop for TrainingLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!("Failed to flush training log on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_flush_and_read() -> Result<()> {
        let dir = TempDir::new()?;
        let mut logger = TrainingLogger::new(dir.path())?;

        logger.log(TrainingEvent::Train {
            step: 10,
            epoch: 0.5,
            loss: 2.25,
            learning_rate: 1e-5,
        })?;
        logger.log(TrainingEvent::Eval {
            step: 10,
            epoch: 0.5,
            eval_loss: 2.5,
        })?;
        logger.flush()?;

        let contents = std::fs::read_to_string(logger.path())?;
        assert!(contents.lines().next().unwrap().contains("\"event\":\"train\""));

        let records = TrainingLogger::read(logger.path())?;
        assert_eq!(records.len(), 2);
        assert!(matches!(records[1].event, TrainingEvent::Eval { step: 10, .. }));
        Ok(())
    }

    #[test]
    fn test_drop_flushes_buffer() -> Result<()> {
        let dir = TempDir::new()?;
        let path = {
            let mut logger = TrainingLogger::new(dir.path())?;
            logger.log(TrainingEvent::Complete {
                global_step: 3,
                train_loss: 1.0,
                best_eval_loss: None,
            })?;
            logger.path().to_path_buf()
        };
        assert_eq!(TrainingLogger::read(&path)?.len(), 1);
        Ok(())
    }
}
