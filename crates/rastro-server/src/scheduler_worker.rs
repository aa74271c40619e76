//! Global tick loop: runs the per-tracker probe scheduler and the pending
//! configuration cycle on a fixed cadence.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use rastro_domain::{ConfigUpdater, TrackerMonitor, TrackerRegistry};

pub async fn run_scheduler(
    registry: Arc<TrackerRegistry>,
    monitor: Arc<TrackerMonitor>,
    config_updater: Arc<ConfigUpdater>,
    tick: Duration,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = interval.tick() => {
                debug!("running periodic check");
                for tracker in registry.snapshot().await {
                    monitor.check_tracker(&tracker.id).await;
                    if let Err(e) = config_updater.apply_pending(&tracker).await {
                        error!(tracker = %tracker.name, error = %e, "configuration cycle failed");
                    }
                }
            }
        }
    }
}
