//! CLI command definitions and handlers

use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::core::client::TranslationClient;
use crate::core::config::TranslatorConfig;
use crate::engine::scheduler::{Scheduler, StartOutcome};
use crate::processors::html::{parse_document, serialize};

/// Commands for Live Translator
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Translate an HTML page in place
    Page {
        /// Input HTML file (required)
        #[arg(short, long)]
        file: PathBuf,

        /// Output file (default: <file>_translated.html)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Page URL recorded as the document location
        #[arg(long, default_value = "about:blank")]
        url: String,
    },

    /// Translate a single text
    Text {
        /// Text to translate
        #[arg(short, long)]
        text: String,
    },

    /// Start HTTP API server hosting live page sessions
    Server {
        /// Bind address (default: 0.0.0.0)
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Listen port (default: 8000)
        #[arg(short, long, default_value_t = 8000)]
        port: u16,
    },
}

/// Default output path next to the input file
pub fn default_output(file: &Path) -> PathBuf {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page".to_string());
    file.with_file_name(format!("{}_translated.html", stem))
}

/// Handle page translation command
pub async fn handle_page(
    file: PathBuf,
    output: Option<PathBuf>,
    url: String,
    config: TranslatorConfig,
) -> anyhow::Result<()> {
    let start_time = Instant::now();
    let output = output.unwrap_or_else(|| default_output(&file));

    info!("Starting page translation");
    info!("Input: {}", file.display());
    info!("Output: {}", output.display());
    info!("Languages: {} -> {}", config.source_lang, config.target_lang);

    let html = tokio::fs::read_to_string(&file).await?;
    let config = Arc::new(config);
    let client = Arc::new(TranslationClient::from_config(config.clone())?);
    let document = parse_document(&html, &url);
    let scheduler = Scheduler::spawn(config, document, client)?;

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(format!("Translating {}", file.display()));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let outcome = scheduler.start().await;
    scheduler.shutdown();
    spinner.finish_with_message("Completed");
    let outcome = outcome?;

    let stats = match outcome {
        StartOutcome::Completed(stats) => stats,
        other => anyhow::bail!("Translation did not complete: {:?}", other),
    };

    tokio::fs::write(&output, serialize(scheduler.document())).await?;

    let duration = start_time.elapsed();
    info!(
        "Completed: {} translated, {} failed in {:?}",
        stats.translated, stats.failed, duration
    );

    println!("\n✅ Translation completed!");
    println!("   Translated: {}", stats.translated);
    println!("   Unchanged: {}", stats.unchanged);
    println!("   Failed: {}", stats.failed);
    println!("   Output: {}", output.display());
    println!("   Time: {:?}", duration);

    Ok(())
}

/// Handle single text command
pub async fn handle_text(text: String, config: TranslatorConfig) -> anyhow::Result<()> {
    let client = TranslationClient::from_config(Arc::new(config))?;
    let translation = client.translate(&text).await?;
    println!("{}", translation);
    Ok(())
}

/// Handle server command
pub async fn handle_server(host: String, port: u16, config: TranslatorConfig) -> anyhow::Result<()> {
    use crate::server::api::run_server;

    info!("Starting HTTP server on {}:{}", host, port);
    println!("🚀 Server starting on http://{}:{}", host, port);

    run_server(host, port, config).await?;

    Ok(())
}
