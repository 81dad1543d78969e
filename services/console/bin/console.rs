//! Console entry point for realtime review sessions.
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Building the session host for the selected mode.
//! 4. Driving the session until shutdown.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use viva_console::{config::Config, session::SessionHost};
use viva_core::SessionMode;

/// Realtime voice/text session console.
#[derive(Parser, Debug)]
#[command(name = "viva", version, about)]
struct Cli {
    /// File holding the system instruction for this session.
    #[arg(long)]
    instruction: Option<PathBuf>,
    /// Session mode override: "live" or "chat".
    #[arg(long)]
    mode: Option<String>,
    /// Enable the scoring tool for this session.
    #[arg(long)]
    score_tracking: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    if let Some(mode) = cli.mode.as_deref() {
        config.mode = match mode.to_lowercase().as_str() {
            "chat" => SessionMode::Chat,
            _ => SessionMode::Live,
        };
    }
    if cli.score_tracking {
        config.score_tracking = true;
    }

    let instruction = match &cli.instruction {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read instruction file {}", path.display()))?,
        None => String::new(),
    };

    info!(mode = ?config.mode, voice = %config.voice, "Starting session");
    let mut host = SessionHost::new(config.mode, config.api_key.clone());
    host.connect(config.session_config(instruction))
        .await
        .context("Failed to open session")?;

    host.run().await?;
    host.shutdown().await;
    info!("Session closed.");
    Ok(())
}
