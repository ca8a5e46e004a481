// CLI module
// Argument definitions for the `ipms` binary

mod commands;

pub use commands::run;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ipms")]
#[command(about = "Local model fine-tuning, retrieval and suggestions for IPMS", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.ipms/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download and prepare a model for use
    DownloadModel {
        /// Name or path of the model (default: configured model)
        #[arg(long)]
        model_name: Option<String>,
        /// Quantization method (4bit, 8bit or none)
        #[arg(long)]
        quantization: Option<String>,
    },
    /// List all models in the registry
    ListModels,
    /// Index journal entries, activities and goals from a JSON file
    Ingest {
        /// JSON object with `journal_entries`, `activities` and `goals` arrays
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Export indexed chunks as training CSV
    PrepareTrainingData {
        #[arg(long)]
        output_file: PathBuf,
        /// Types to include (journal_entry, activity, goal); all when omitted
        #[arg(long)]
        data_types: Vec<String>,
    },
    /// Fine-tune a model on the `text` column of a training CSV
    Train {
        #[arg(long)]
        training_data: PathBuf,
        #[arg(long)]
        output_dir: PathBuf,
        /// Base model to fine-tune (default: configured model)
        #[arg(long)]
        base_model: Option<String>,
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Fraction held out for evaluation
        #[arg(long, default_value_t = 0.2)]
        eval_split: f64,
    },
    /// Generate a response to a prompt
    TestGeneration {
        prompt: String,
        /// Fine-tuned model directory (base model when omitted)
        #[arg(long)]
        model_path: Option<PathBuf>,
        #[arg(long)]
        max_length: Option<usize>,
        /// Ground the reply in indexed chunks of these types
        #[arg(long)]
        context_types: Vec<String>,
    },
    /// Sentiment of a piece of journal text
    Sentiment {
        text: String,
        #[arg(long)]
        model_path: Option<PathBuf>,
    },
    /// Suggest goals from a JSON user data file
    SuggestGoals {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        model_path: Option<PathBuf>,
    },
    /// Categorize an activity from a JSON file
    Categorize {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        model_path: Option<PathBuf>,
    },
    /// Analyze a task with the configured external provider
    AnalyzeTask {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
}
