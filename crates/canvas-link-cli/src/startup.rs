//! Startup sequence for `canvas-link run`: reconcile and connect together,
//! then flush queued writes whenever the socket opens.

use tokio::sync::watch;
use tracing::{info, warn};

use canvas_link_core::canvas::CanvasState;
use canvas_link_sync::{CanvasRemote, DrainReport, ReconcileOutcome, Reconciler, SyncQueue};
use canvas_link_transport::{ConnectionManager, ConnectionStatus, RouterHandle};

/// Run reconciliation and connection bring-up concurrently.
///
/// The status receiver is taken before dialing, so an `Open` reached while
/// reconciliation is still waiting on the snapshot shows up as unseen.
pub async fn start(
    connection: &mut ConnectionManager,
    router: RouterHandle,
    reconciler: &Reconciler,
    local: &mut CanvasState,
    queue: &mut SyncQueue,
) -> anyhow::Result<(ReconcileOutcome, watch::Receiver<ConnectionStatus>)> {
    let status = connection.subscribe_status();
    let (outcome, connected) = tokio::join!(
        reconciler.reconcile(local, queue),
        connection.connect(router),
    );
    let url = connected?;
    info!(url = %url, "Connecting");
    Ok((outcome, status))
}

/// Drain the queue when `status` is open and there is work waiting.
pub async fn flush_if_open(
    status: ConnectionStatus,
    queue: &mut SyncQueue,
    remote: &dyn CanvasRemote,
) -> Option<DrainReport> {
    if status != ConnectionStatus::Open || queue.is_empty() {
        return None;
    }
    match queue.drain(remote).await {
        Ok(report) => {
            info!(sent = report.sent, remaining = report.remaining, "Flushed sync queue");
            Some(report)
        }
        Err(e) => {
            warn!(error = %e, "Failed to flush sync queue");
            None
        }
    }
}
