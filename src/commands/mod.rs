mod common;
mod delete;
mod list;
mod nodes;
mod start;
mod stop;
mod ui;

use anyhow::Result;

use crate::cli::Commands;
use crate::config::AppConfig;

pub async fn run(command: Commands, config: &AppConfig) -> Result<()> {
    match command {
        Commands::Ui { node } => ui::run(config, node).await,
        Commands::List { node } => list::run(config, node).await,
        Commands::Nodes => nodes::run(config).await,
        Commands::Start { target } => start::run(config, target).await,
        Commands::Stop { target } => stop::run(config, target).await,
        Commands::Delete { target, yes } => delete::run(config, target, yes).await,
    }
}
