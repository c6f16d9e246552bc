//! Start, stop, and delete executors.
//!
//! Each executor disables its control and shows a progress label, makes one
//! backend call, turns the result into an alert (plus a status change or card
//! removal on success), and finally puts the control back the way it was.
//! Nothing is retried and no error escapes as a UI failure: the raw result is
//! handed back only so callers can inspect it.

use std::sync::Arc;

use tracing::warn;

use crate::alerts::show_alert;
use crate::api::{ActionOutcome, VmAction, VmApi, VmRef};
use crate::board::{AlertLevel, ControlId, ControlKind, Dashboard, VmStatus};
use crate::errors::VmdeckError;

pub const UNKNOWN_ERROR: &str = "Unknown error";

impl VmAction {
    pub fn success_message(self) -> &'static str {
        match self {
            Self::Start => "VM started successfully",
            Self::Stop => "VM stopped successfully",
            Self::Delete => "VM deleted successfully",
        }
    }

    pub fn failure_prefix(self) -> &'static str {
        match self {
            Self::Start => "Failed to start VM: ",
            Self::Stop => "Failed to stop VM: ",
            Self::Delete => "Failed to delete VM: ",
        }
    }

    /// Status a VM ends up in after this action succeeds, if it keeps existing.
    pub fn resulting_status(self) -> Option<VmStatus> {
        match self {
            Self::Start => Some(VmStatus::Running),
            Self::Stop => Some(VmStatus::Stopped),
            Self::Delete => None,
        }
    }
}

pub fn failure_message(action: VmAction, error: Option<&str>) -> String {
    format!(
        "{}{}",
        action.failure_prefix(),
        error.unwrap_or(UNKNOWN_ERROR)
    )
}

pub fn transport_message(err: &VmdeckError) -> String {
    format!("Error: {err}")
}

/// Holds a control in its busy state; dropping it restores the idle label of
/// the action that engaged it.
struct ControlGuard<'a> {
    board: &'a Dashboard,
    control: &'a ControlId,
    kind: ControlKind,
}

impl<'a> ControlGuard<'a> {
    fn engage(board: &'a Dashboard, control: &'a ControlId, action: VmAction) -> Self {
        let kind = ControlKind::from(action);
        board.begin_control(control, kind.progress_label());
        Self {
            board,
            control,
            kind,
        }
    }
}

impl Drop for ControlGuard<'_> {
    fn drop(&mut self) {
        self.board
            .restore_control(self.control, self.kind.idle_label());
    }
}

pub async fn start_vm<A>(
    api: &A,
    board: &Arc<Dashboard>,
    target: &VmRef,
    control: &ControlId,
) -> Result<ActionOutcome, VmdeckError>
where
    A: VmApi + ?Sized,
{
    run_action(api, board, VmAction::Start, target, control).await
}

pub async fn stop_vm<A>(
    api: &A,
    board: &Arc<Dashboard>,
    target: &VmRef,
    control: &ControlId,
) -> Result<ActionOutcome, VmdeckError>
where
    A: VmApi + ?Sized,
{
    run_action(api, board, VmAction::Stop, target, control).await
}

/// On success the card enclosing `control` is removed. A rejected delete
/// leaves the card in place.
pub async fn delete_vm<A>(
    api: &A,
    board: &Arc<Dashboard>,
    target: &VmRef,
    control: &ControlId,
) -> Result<ActionOutcome, VmdeckError>
where
    A: VmApi + ?Sized,
{
    run_action(api, board, VmAction::Delete, target, control).await
}

pub async fn run_action<A>(
    api: &A,
    board: &Arc<Dashboard>,
    action: VmAction,
    target: &VmRef,
    control: &ControlId,
) -> Result<ActionOutcome, VmdeckError>
where
    A: VmApi + ?Sized,
{
    let _guard = ControlGuard::engage(board, control, action);

    let result = api.perform(action, target).await;
    match &result {
        Ok(ActionOutcome::Success) => {
            show_alert(board, action.success_message(), AlertLevel::Success);
            match action.resulting_status() {
                Some(status) => board.update_vm_status(&target.vm_id, status),
                None => {
                    board.remove_card(&control.card);
                }
            }
        }
        Ok(ActionOutcome::Failure { error }) => {
            show_alert(
                board,
                failure_message(action, error.as_deref()),
                AlertLevel::Danger,
            );
        }
        Err(err) => {
            warn!(%action, vm_id = %target.vm_id, error = %err, "VM action request failed");
            show_alert(board, transport_message(err), AlertLevel::Danger);
        }
    }

    result
}
