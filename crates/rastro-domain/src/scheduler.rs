use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::commands::probe_command;
use crate::correlation::SmsOutbox;
use crate::feed::FeedIngestService;
use crate::registry::TrackerRegistry;
use crate::repository::TrackerRepository;
use crate::types::TrackerModel;

/// Probes per due-cycle before the cycle is abandoned. A hard ceiling, not a
/// backoff: the next natural due time starts fresh.
pub const MAX_PROBE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPlan {
    /// Not due yet.
    Wait { remaining_secs: i64 },
    /// Due, but the attempt ceiling was reached: give up on this cycle.
    AbandonCycle,
    /// Due: dispatch the model probe. `attempt` is 1-based.
    Probe { attempt: u32 },
}

/// Pure per-tracker tick decision.
pub fn plan_tick(
    last_check: Option<DateTime<Utc>>,
    update_interval_secs: u64,
    attempts: u32,
    now: DateTime<Utc>,
) -> TickPlan {
    if let Some(last_check) = last_check {
        let elapsed = (now - last_check).num_seconds();
        let interval = update_interval_secs as i64;
        if elapsed < interval {
            return TickPlan::Wait {
                remaining_secs: interval - elapsed,
            };
        }
    }

    if attempts >= MAX_PROBE_ATTEMPTS {
        TickPlan::AbandonCycle
    } else {
        TickPlan::Probe {
            attempt: attempts + 1,
        }
    }
}

/// Drives the per-device liveness/position probes on the global tick.
pub struct TrackerMonitor {
    registry: Arc<TrackerRegistry>,
    trackers: Arc<dyn TrackerRepository>,
    outbox: Arc<SmsOutbox>,
    feed: Arc<FeedIngestService>,
}

impl TrackerMonitor {
    pub fn new(
        registry: Arc<TrackerRegistry>,
        trackers: Arc<dyn TrackerRepository>,
        outbox: Arc<SmsOutbox>,
        feed: Arc<FeedIngestService>,
    ) -> Self {
        Self {
            registry,
            trackers,
            outbox,
            feed,
        }
    }

    async fn record_check(&self, tracker_id: &str, at: DateTime<Utc>) {
        self.registry.set_last_check(tracker_id, at).await;
        self.registry.reset_attempts(tracker_id).await;
        if let Err(e) = self.trackers.set_last_check(tracker_id, at).await {
            warn!(tracker_id = %tracker_id, error = %e, "failed to persist last check");
        }
    }

    pub async fn check_tracker(&self, tracker_id: &str) {
        let Some(tracker) = self.registry.get(tracker_id).await else {
            return;
        };
        let attempts = self.registry.attempts(tracker_id).await.unwrap_or(0);
        let now = Utc::now();

        match plan_tick(tracker.last_check, tracker.update_interval_secs, attempts, now) {
            TickPlan::Wait { remaining_secs } => {
                debug!(
                    tracker = %tracker.name,
                    remaining_secs,
                    "tracker not due for check"
                );
            }
            TickPlan::AbandonCycle => {
                error!(
                    tracker = %tracker.name,
                    attempts,
                    "tracker did not respond, abandoning cycle until next due time"
                );
                self.record_check(tracker_id, now).await;
            }
            TickPlan::Probe { attempt } => {
                self.registry.increment_attempts(tracker_id).await;
                match &tracker.model {
                    TrackerModel::Tk102b | TrackerModel::St940 => {
                        let Some(command) = probe_command(&tracker.model, &tracker.id) else {
                            return;
                        };
                        // `last_check` advances only when the device's reply
                        // arrives and is reconciled.
                        match self.outbox.send_command(&tracker, &command).await {
                            Ok(reference) => {
                                debug!(
                                    tracker = %tracker.name,
                                    attempt,
                                    reference = %reference,
                                    "probe dispatched"
                                );
                            }
                            Err(e) => {
                                error!(tracker = %tracker.name, error = %e, "failed to dispatch probe");
                            }
                        }
                    }
                    TrackerModel::SpotTrace => match self.feed.poll(&tracker).await {
                        Ok(_) => {
                            self.record_check(tracker_id, Utc::now()).await;
                        }
                        Err(e) => {
                            error!(tracker = %tracker.name, error = %e, "feed poll failed");
                        }
                    },
                    TrackerModel::Other(model) => {
                        warn!(
                            tracker = %tracker.name,
                            model = %model,
                            "unknown tracker model, nothing to probe"
                        );
                        self.record_check(tracker_id, now).await;
                    }
                }
            }
        }
    }
}
