mod actions;
mod alerts;
mod api;
mod board;
mod cli;
mod commands;
mod config;
mod dispatch;
mod errors;
mod gauges;
mod ui;

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    init_tracing(&cli.command, &config)?;

    commands::run(cli.command, &config).await
}

/// The dashboard owns the terminal, so its logs go to the data directory.
fn init_tracing(command: &Commands, config: &AppConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if matches!(command, Commands::Ui { .. }) {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_path)
            .with_context(|| format!("failed to open {}", config.log_path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}
