use anyhow::Result;

use crate::api::VmAction;
use crate::cli::VmTarget;
use crate::config::AppConfig;

use super::common::run_action;

pub(crate) async fn run(config: &AppConfig, target: VmTarget) -> Result<()> {
    run_action(config, VmAction::Start, target).await
}
