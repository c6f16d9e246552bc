//! Transient alert banners.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::debug;

use crate::board::{AlertId, AlertLevel, Dashboard};

/// Appends a dismissible alert to the board's shelf and schedules its expiry:
/// it fades after the configured TTL and is dropped once the fade delay has
/// passed. Each alert runs its own timer task.
///
/// Returns `None`, touching nothing, when the board has no alert shelf.
pub fn show_alert(
    board: &Arc<Dashboard>,
    message: impl Into<String>,
    level: AlertLevel,
) -> Option<AlertId> {
    let id = board.push_alert(message.into(), level)?;
    let timing = board.timing();
    let board = Arc::clone(board);

    tokio::spawn(async move {
        sleep(timing.ttl).await;
        board.fade_alert(id);
        sleep(timing.fade).await;
        if board.remove_alert(id) {
            debug!(alert_id = id, "alert expired");
        }
    });

    Some(id)
}
