//! Main entry point for Wordbook Translator CLI

#![forbid(unsafe_code)]

use clap::Parser;
use dotenvy::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wordbook_translator::cli::commands::{self, Commands};
use wordbook_translator::core::models::UnitKind;

/// Wordbook Translator - concurrent word and sentence translation into SQL
#[derive(Parser, Debug)]
#[command(name = "wordbook-translator", version, about, long_about = None)]
struct Args {
    /// API key (optional, defaults to GEMINI_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("wordbook_translator={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(api_key) = args.api_key {
        std::env::set_var("GEMINI_API_KEY", api_key);
    }

    match args.command {
        Some(Commands::Words {
            file,
            options,
            db,
            workers,
        }) => {
            commands::handle_translate(file, UnitKind::Word, options, db, workers).await?;
        }
        Some(Commands::Sentences {
            file,
            options,
            db,
            workers,
        }) => {
            commands::handle_translate(file, UnitKind::Sentence, options, db, workers).await?;
        }
        Some(Commands::BatchBuild {
            file,
            kind,
            output,
            options,
        }) => {
            commands::handle_batch_build(file, kind, output, options).await?;
        }
        Some(Commands::BatchIngest {
            file,
            kind,
            options,
        }) => {
            commands::handle_batch_ingest(file, kind, options).await?;
        }
        Some(Commands::InitConfig { output }) => {
            commands::handle_init_config(output).await?;
        }
        None => {
            println!("Please specify a command. Use --help for more information.");
        }
    }

    Ok(())
}
