use std::io::{BufRead, Write};

use anyhow::{Context, Result};

use crate::actions::failure_message;
use crate::api::{ActionOutcome, HttpVmApi, VmAction, VmApi, VmRef};
use crate::cli::VmTarget;
use crate::config::AppConfig;

pub(crate) fn expect_success(action: VmAction, outcome: ActionOutcome) -> Result<&'static str> {
    match outcome {
        ActionOutcome::Success => Ok(action.success_message()),
        ActionOutcome::Failure { error } => {
            anyhow::bail!(failure_message(action, error.as_deref()))
        }
    }
}

pub(crate) async fn run_action(
    config: &AppConfig,
    action: VmAction,
    target: VmTarget,
) -> Result<()> {
    let api = HttpVmApi::new(config.api_url.clone());
    let target = VmRef {
        vm_id: target.vmid,
        node: target.node,
    };
    let outcome = api
        .perform(action, &target)
        .await
        .with_context(|| format!("{action} request for VM {} failed", target.vm_id))?;
    println!("{}", expect_success(action, outcome)?);
    Ok(())
}

/// Asks a yes/no question; anything but `y`/`yes` declines, including EOF.
pub(crate) fn confirm(
    prompt: &str,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<bool> {
    write!(out, "{prompt} [y/N] ").context("failed writing confirmation prompt")?;
    out.flush().context("failed flushing confirmation prompt")?;

    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("failed reading confirmation answer")?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}
