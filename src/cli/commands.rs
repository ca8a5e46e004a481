// Subcommand handlers

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use super::{Cli, Commands};
use crate::assistant::{Assistant, LocalPipelines};
use crate::config::{load_config, AiConfig};
use crate::documents::{export_training_csv, read_training_texts, Activity, DocumentProcessor, UserData};
use crate::models::{ModelManager, ModelSession, Quantization};
use crate::providers::{create_provider, TaskAdvisor};
use crate::training::{Trainer, TrainingOverrides};

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    config.ensure_dirs()?;

    match cli.command {
        Commands::DownloadModel {
            model_name,
            quantization,
        } => download_model(&config, model_name.as_deref(), quantization.as_deref()),
        Commands::ListModels => list_models(&config),
        Commands::Ingest { input } => ingest(&config, &input),
        Commands::PrepareTrainingData {
            output_file,
            data_types,
        } => prepare_training_data(&config, &output_file, &data_types),
        Commands::Train {
            training_data,
            output_dir,
            base_model,
            epochs,
            batch_size,
            eval_split,
        } => {
            let overrides = TrainingOverrides {
                num_train_epochs: epochs,
                per_device_train_batch_size: batch_size,
                ..Default::default()
            };
            train(
                &config,
                &training_data,
                &output_dir,
                base_model.as_deref(),
                eval_split,
                &overrides,
            )
        }
        Commands::TestGeneration {
            prompt,
            model_path,
            max_length,
            context_types,
        } => test_generation(&config, &prompt, model_path, max_length, &context_types),
        Commands::Sentiment { text, model_path } => sentiment(&config, &text, model_path),
        Commands::SuggestGoals { input, model_path } => suggest_goals(&config, &input, model_path),
        Commands::Categorize { input, model_path } => categorize(&config, &input, model_path),
        Commands::AnalyzeTask { title, description } => analyze_task(&config, &title, &description).await,
    }
}

fn download_model(config: &AiConfig, model_name: Option<&str>, quantization: Option<&str>) -> Result<()> {
    let quantization = quantization.map(str::parse::<Quantization>).transpose()?;

    let mut manager = ModelManager::from_config(config)?;
    let mut session = ModelSession::new();

    println!(
        "Downloading model: {}",
        model_name.unwrap_or(&config.model.model_name)
    );
    manager.load_model(&mut session, model_name, quantization)?;
    println!("Model downloaded successfully!");
    Ok(())
}

fn list_models(config: &AiConfig) -> Result<()> {
    let manager = ModelManager::from_config(config)?;
    let entries = manager
        .model_info(None)
        .map(|info| info.entries())
        .unwrap_or_default();

    if entries.is_empty() {
        println!("No models registered yet.");
        return Ok(());
    }

    println!("{:<48} {:<12} {}", "Base Model", "Quantization", "Fine-tuned Versions");
    for (base, entry) in entries {
        println!(
            "{:<48} {:<12} {}",
            base,
            entry.quantization.to_string(),
            entry.fine_tuned_versions.len()
        );
    }
    Ok(())
}

fn ingest(config: &AiConfig, input: &Path) -> Result<()> {
    let data: UserData = read_json(input)?;
    let processor = DocumentProcessor::from_config(config)?;

    let mut chunks = processor.process_journal_entries(&data.journal_entries);
    chunks.extend(processor.process_activities(&data.activities));
    chunks.extend(processor.process_goals(&data.goals));

    let added = processor.add_to_index(&chunks)?;
    println!(
        "Indexed {} chunks from {} journal entries, {} activities and {} goals",
        added,
        data.journal_entries.len(),
        data.activities.len(),
        data.goals.len()
    );
    Ok(())
}

fn prepare_training_data(config: &AiConfig, output_file: &Path, data_types: &[String]) -> Result<()> {
    let processor = DocumentProcessor::from_config(config)?;

    let include = (!data_types.is_empty()).then_some(data_types);
    let records = processor.get_training_data(include)?;
    export_training_csv(&records, output_file)?;

    println!("Saved {} records to {}", records.len(), output_file.display());
    Ok(())
}

fn train(
    config: &AiConfig,
    training_data: &Path,
    output_dir: &Path,
    base_model: Option<&str>,
    eval_split: f64,
    overrides: &TrainingOverrides,
) -> Result<()> {
    let texts = read_training_texts(training_data)?;
    let trainer = Trainer::new(config.training.clone()).with_progress(true);
    let (train_set, eval_set) = trainer.prepare_training_data(&texts, eval_split)?;

    let mut manager = ModelManager::from_config(config)?;
    let mut session = ModelSession::new();
    trainer.prepare_model_for_training(&mut manager, &mut session, base_model, None)?;

    let eval_set = (!eval_set.is_empty()).then_some(eval_set.as_slice());
    let report = trainer.train(
        &mut manager,
        &mut session,
        &train_set,
        eval_set,
        Some(output_dir),
        Some(overrides),
    )?;

    println!("Training completed successfully!");
    println!("  Output:      {}", report.output_dir.display());
    println!("  Steps:       {}", report.global_step);
    println!("  Train loss:  {:.4}", report.train_loss);
    if let Some(eval_loss) = report.best_eval_loss {
        println!("  Best eval:   {:.4}", eval_loss);
    }
    Ok(())
}

/// Assistant over the persistent index, initialized with the base or
/// fine-tuned model
fn ready_assistant(config: &AiConfig, session: &mut ModelSession, model_path: Option<PathBuf>) -> Result<Assistant> {
    let mut manager = ModelManager::from_config(config)?;
    let processor = DocumentProcessor::from_config(config)?;
    let mut assistant = Assistant::new(processor, Box::new(LocalPipelines::new(config.cache_dir.clone())));

    eprintln!("Initializing assistant...");
    assistant.initialize(&mut manager, session, model_path.as_deref(), None)?;
    Ok(assistant)
}

fn test_generation(
    config: &AiConfig,
    prompt: &str,
    model_path: Option<PathBuf>,
    max_length: Option<usize>,
    context_types: &[String],
) -> Result<()> {
    let mut session = ModelSession::new();
    let mut assistant = ready_assistant(config, &mut session, model_path)?;

    let context_types = (!context_types.is_empty()).then_some(context_types);
    let response = assistant.generate_response(&mut session, prompt, context_types, max_length)?;

    println!("{}", response);
    Ok(())
}

fn sentiment(config: &AiConfig, text: &str, model_path: Option<PathBuf>) -> Result<()> {
    let mut session = ModelSession::new();
    let assistant = ready_assistant(config, &mut session, model_path)?;

    print_json(&assistant.analyze_sentiment(text)?)
}

fn suggest_goals(config: &AiConfig, input: &Path, model_path: Option<PathBuf>) -> Result<()> {
    let data: UserData = read_json(input)?;
    let mut session = ModelSession::new();
    let mut assistant = ready_assistant(config, &mut session, model_path)?;

    print_json(&assistant.suggest_goals(&mut session, &data)?)
}

fn categorize(config: &AiConfig, input: &Path, model_path: Option<PathBuf>) -> Result<()> {
    let activity: Activity = read_json(input)?;
    let mut session = ModelSession::new();
    let mut assistant = ready_assistant(config, &mut session, model_path)?;

    println!("{}", assistant.categorize_activity(&mut session, &activity)?);
    Ok(())
}

async fn analyze_task(config: &AiConfig, title: &str, description: &str) -> Result<()> {
    let provider = create_provider(&config.provider)?;
    tracing::info!("Analyzing task with {} ({})", provider.name(), provider.model());

    let advisor = TaskAdvisor::new(provider);
    println!("{}", advisor.analyze_task(title, description).await?);
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
