//! Turns clicks on start/stop/delete controls into executor calls.
//!
//! Target attributes are read from the control at click time. A click is
//! dropped when the control is hidden, disabled, or lacks a VM id or node.
//! Delete goes through a confirmation step first.

use std::sync::Arc;

use crate::actions::{delete_vm, start_vm, stop_vm};
use crate::api::{ActionOutcome, VmAction, VmApi, VmRef};
use crate::board::{Control, ControlId, ControlKind, Dashboard};
use crate::errors::VmdeckError;

pub const DELETE_PROMPT: &str =
    "Are you sure you want to delete this VM? This action cannot be undone.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub action: VmAction,
    pub target: VmRef,
    pub control: ControlId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Run(PendingAction),
    /// Ask the user; feed the answer to [`on_confirm`].
    Confirm {
        control: ControlId,
        prompt: &'static str,
    },
    Ignored,
}

pub fn on_click(board: &Dashboard, control: &ControlId) -> Dispatch {
    let Some(state) = board.control(control) else {
        return Dispatch::Ignored;
    };
    if state.disabled || !state.visible {
        return Dispatch::Ignored;
    }

    match control.kind {
        ControlKind::Delete => Dispatch::Confirm {
            control: control.clone(),
            prompt: DELETE_PROMPT,
        },
        ControlKind::Start | ControlKind::Stop => pending(control, &state)
            .map(Dispatch::Run)
            .unwrap_or(Dispatch::Ignored),
    }
}

/// Resolves a delete confirmation. Declining yields nothing to run.
pub fn on_confirm(board: &Dashboard, control: &ControlId, accepted: bool) -> Option<PendingAction> {
    if !accepted {
        return None;
    }
    let state = board.control(control)?;
    pending(control, &state)
}

fn pending(control: &ControlId, state: &Control) -> Option<PendingAction> {
    let vm_id = non_empty(state.vm_id.as_deref())?;
    let node = non_empty(state.node.as_deref())?;
    Some(PendingAction {
        action: control.kind.action(),
        target: VmRef {
            vm_id: vm_id.to_string(),
            node: node.to_string(),
        },
        control: control.clone(),
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

pub async fn execute<A>(
    api: &A,
    board: &Arc<Dashboard>,
    pending: &PendingAction,
) -> Result<ActionOutcome, VmdeckError>
where
    A: VmApi + ?Sized,
{
    match pending.action {
        VmAction::Start => start_vm(api, board, &pending.target, &pending.control).await,
        VmAction::Stop => stop_vm(api, board, &pending.target, &pending.control).await,
        VmAction::Delete => delete_vm(api, board, &pending.target, &pending.control).await,
    }
}
