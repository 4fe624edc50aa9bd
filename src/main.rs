//! Main entry point for Live Translator CLI

#![forbid(unsafe_code)]

use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_translator::cli::commands::{self, Commands};
use live_translator::TranslatorConfig;

/// Live Translator - incremental in-place translation of live pages
#[derive(Parser, Debug)]
#[command(name = "live-translator", version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target language override
    #[arg(long)]
    target_lang: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("live_translator={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = TranslatorConfig::load(args.config.as_deref())?;
    if let Some(target_lang) = args.target_lang {
        config.target_lang = target_lang;
    }

    // Execute command
    match args.command {
        Some(Commands::Page { file, output, url }) => {
            commands::handle_page(file, output, url, config).await?;
        }
        Some(Commands::Text { text }) => {
            commands::handle_text(text, config).await?;
        }
        Some(Commands::Server { host, port }) => {
            commands::handle_server(host, port, config).await?;
        }
        None => {
            println!("Please specify a command. Use --help for more information.");
        }
    }

    Ok(())
}
