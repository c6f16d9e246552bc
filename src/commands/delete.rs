use std::io;

use anyhow::Result;

use crate::api::VmAction;
use crate::cli::VmTarget;
use crate::config::AppConfig;
use crate::dispatch::DELETE_PROMPT;

use super::common::{confirm, run_action};

pub(crate) async fn run(config: &AppConfig, target: VmTarget, yes: bool) -> Result<()> {
    if !yes {
        let stdin = io::stdin();
        let accepted = confirm(DELETE_PROMPT, &mut stdin.lock(), &mut io::stdout())?;
        if !accepted {
            println!("Delete cancelled.");
            return Ok(());
        }
    }

    run_action(config, VmAction::Delete, target).await
}
