//! Applies the tracker change feed to the in-memory registry mirror and
//! triggers an immediate check on every upserted tracker.

use std::sync::Arc;

use anyhow::bail;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use rastro_domain::{TrackerChange, TrackerMonitor, TrackerRegistry};

pub async fn run_registry_worker(
    mut changes: broadcast::Receiver<TrackerChange>,
    registry: Arc<TrackerRegistry>,
    monitor: Arc<TrackerMonitor>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    debug!("listening to tracker change feed");
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            change = changes.recv() => match change {
                Ok(change) => {
                    if let Some(tracker_id) = registry.apply(change).await {
                        monitor.check_tracker(&tracker_id).await;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "tracker change feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    bail!("tracker change feed closed");
                }
            },
        }
    }
}
