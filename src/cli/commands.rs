//! CLI command definitions and handlers

use clap::{Args as ClapArgs, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::core::checkpoint::{OutputPaths, ProgressCheckpoint};
use crate::core::client::HttpGateway;
use crate::core::config::TranslatorConfig;
use crate::core::lookup::SqliteLookup;
use crate::core::models::{RunStats, UnitKind};
use crate::core::parser::ResponseParser;
use crate::core::pool::WorkerPool;
use crate::core::retry::RetryPolicy;
use crate::core::store::ArtifactStore;
use crate::processors::batch::{BatchJobCoordinator, IngestOutputs};
use crate::processors::text::UnitExtractor;

/// Options shared by every command that reads configuration
#[derive(ClapArgs, Debug, Clone)]
pub struct RunOptions {
    /// Configuration file (JSON, YAML or TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Language pair, e.g. de-en
    #[arg(long)]
    pub pair: Option<String>,

    /// Output directory for SQL, journal and error log
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

/// Commands for Wordbook Translator
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract unique words from text and translate each one
    Words {
        /// Input text file or directory of .txt files
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        options: RunOptions,

        /// SQLite database used to skip words already translated
        #[arg(long)]
        db: Option<PathBuf>,

        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Split text into sentences and translate each one
    Sentences {
        /// Input text file or directory of .txt files
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        options: RunOptions,

        /// SQLite database used to skip sentences already translated
        #[arg(long)]
        db: Option<PathBuf>,

        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Write a JSONL batch request file instead of calling the model
    BatchBuild {
        /// Input text file or directory of .txt files
        #[arg(short, long)]
        file: PathBuf,

        /// Unit kind: word or sentence
        #[arg(short, long, default_value = "word")]
        kind: UnitKind,

        /// Request file to write
        #[arg(long)]
        output: PathBuf,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Turn a JSONL batch response file into SQL and a retry file
    BatchIngest {
        /// Response file from the batch job
        #[arg(short, long)]
        file: PathBuf,

        /// Unit kind: word or sentence
        #[arg(short, long, default_value = "word")]
        kind: UnitKind,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Write the effective configuration to a file
    InitConfig {
        /// Destination (.json or .yaml)
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn load_config(options: &RunOptions) -> anyhow::Result<TranslatorConfig> {
    let mut config = TranslatorConfig::load(options.config.as_deref())?;
    if let Some(pair) = &options.pair {
        config.language_pair = pair.clone();
    }
    if let Some(dir) = &options.output_dir {
        config.output_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb
}

/// Handle the live `words` / `sentences` commands
pub async fn handle_translate(
    file: PathBuf,
    kind: UnitKind,
    options: RunOptions,
    db: Option<PathBuf>,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    let start_time = Instant::now();

    let mut config = load_config(&options)?;
    if let Some(workers) = workers {
        config.concurrency.workers = workers;
        config.validate()?;
    }
    let pair = config.language_pair()?;

    info!("Starting {} translation", kind);
    info!("Input: {}", file.display());
    info!("Output: {}", config.output_dir.display());
    info!("Language pair: {}", pair);

    let units = UnitExtractor::new(pair)
        .extract_from_path(&file, kind)
        .await?;
    if units.is_empty() {
        anyhow::bail!("No {} units found in {}", kind, file.display());
    }

    let gateway = Arc::new(HttpGateway::new(&config)?);
    let store = Arc::new(ArtifactStore::new());
    let checkpoint = ProgressCheckpoint::new(store.clone(), OutputPaths::in_dir(&config.output_dir));
    let mut pool = WorkerPool::new(
        gateway,
        ResponseParser::new(kind),
        RetryPolicy::from_config(&config),
        checkpoint.clone(),
        store,
        config.concurrency.clone(),
    )
    .with_progress(progress_bar());

    if let Some(db) = db.or_else(|| config.database_path.clone()) {
        pool = pool.with_lookup(Arc::new(SqliteLookup::new(db)));
    }

    let cancel = pool.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight units");
            cancel.cancel();
        }
    });

    let stats = pool.process_all(units).await?;
    print_summary(&stats, checkpoint.paths(), start_time.elapsed());

    Ok(())
}

fn print_summary(stats: &RunStats, paths: &OutputPaths, duration: std::time::Duration) {
    println!("\n✅ Translation completed!");
    println!("   Processed: {}", stats.processed);
    println!("   Successful: {}", stats.successful);
    println!("   Failed: {}", stats.failed);
    if stats.skipped > 0 {
        println!("   Skipped (already in database): {}", stats.skipped);
    }
    println!("   Time: {:?}", duration);
    println!("   SQL: {}", paths.sql.display());
    if stats.failed > 0 {
        println!("   Errors: {}", paths.error_log.display());
    }
}

/// Handle batch request file generation
pub async fn handle_batch_build(
    file: PathBuf,
    kind: UnitKind,
    output: PathBuf,
    options: RunOptions,
) -> anyhow::Result<()> {
    let config = load_config(&options)?;
    let pair = config.language_pair()?;

    let units = UnitExtractor::new(pair.clone())
        .extract_from_path(&file, kind)
        .await?;
    if units.is_empty() {
        anyhow::bail!("No {} units found in {}", kind, file.display());
    }

    let coordinator =
        BatchJobCoordinator::new(kind, pair, &config.primary_model, config.generation_settings());
    let path = coordinator.build_batch_file(&units, &output).await?;

    println!("✅ Wrote {} request(s) to {}", units.len(), path.display());
    Ok(())
}

/// Handle batch response ingestion
pub async fn handle_batch_ingest(
    file: PathBuf,
    kind: UnitKind,
    options: RunOptions,
) -> anyhow::Result<()> {
    let config = load_config(&options)?;
    let coordinator = BatchJobCoordinator::new(
        kind,
        config.language_pair()?,
        &config.primary_model,
        config.generation_settings(),
    );
    let outputs = IngestOutputs::in_dir(&config.output_dir);
    let stats = coordinator.ingest_response_file(&file, &outputs).await?;

    println!("\n✅ Batch ingestion completed!");
    println!("   Total: {}", stats.total);
    println!("   Successful: {}", stats.successful);
    println!("   Failed: {}", stats.failed);
    if stats.duplicates > 0 {
        println!("   Duplicate lines ignored: {}", stats.duplicates);
    }
    println!("   SQL: {}", outputs.artifacts.sql.display());
    if let Some(retry) = stats.retry_file {
        println!("   Resubmit failed units with: {}", retry.display());
    }
    Ok(())
}

/// Handle config file generation
pub async fn handle_init_config(output: PathBuf) -> anyhow::Result<()> {
    let mut config = TranslatorConfig::load(None)?;
    // Never write a secret picked up from the environment
    config.api_key.clear();
    config.to_file(&output)?;
    println!("✅ Configuration written to {}", output.display());
    Ok(())
}
