use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{error, info, warn};

use crate::arbiter::ConfigArbiter;
use crate::commands::config_command;
use crate::correlation::SmsOutbox;
use crate::error::DomainResult;
use crate::repository::ConfigRepository;
use crate::types::{ConfigStep, Tracker};

/// A claimed configuration older than this is considered stalled and
/// re-applied on the next cycle.
pub const STALE_CONFIG_AFTER_HOURS: i64 = 24;

/// Applies pending configuration changes to a tracker, guarded by the
/// cross-instance ownership arbiter.
pub struct ConfigUpdater {
    configs: Arc<dyn ConfigRepository>,
    arbiter: ConfigArbiter,
    outbox: Arc<SmsOutbox>,
}

impl ConfigUpdater {
    pub fn new(
        configs: Arc<dyn ConfigRepository>,
        arbiter: ConfigArbiter,
        outbox: Arc<SmsOutbox>,
    ) -> Self {
        Self {
            configs,
            arbiter,
            outbox,
        }
    }

    pub async fn apply_pending(&self, tracker: &Tracker) -> DomainResult<()> {
        let now = Utc::now();

        for mut config in self.configs.list_configs(&tracker.id).await? {
            let stale = config
                .status
                .updated_at
                .map(|at| now - at > Duration::hours(STALE_CONFIG_AFTER_HOURS))
                .unwrap_or(true);
            if config.status.step != ConfigStep::Requested && !stale {
                continue;
            }

            let decision = self.arbiter.evaluate(&mut config.status);
            if !decision.granted() {
                continue;
            }
            // Publish the claim before dispatching so peers observe it.
            self.configs.save_config(&tracker.id, config.clone()).await?;

            let Some(command) = config_command(&tracker.model, &config) else {
                warn!(
                    tracker = %tracker.name,
                    config = %config.name,
                    model = %tracker.model.as_str(),
                    "no command vocabulary for configuration"
                );
                continue;
            };

            match self.outbox.send_command(tracker, &command).await {
                Ok(_) => {
                    config.status.step = ConfigStep::CommandSent;
                    config.status.in_progress = false;
                    config.status.updated_at = Some(Utc::now());
                    if let Err(e) = self.configs.save_config(&tracker.id, config.clone()).await {
                        warn!(
                            tracker = %tracker.name,
                            config = %config.name,
                            error = %e,
                            "could not persist configuration progress"
                        );
                    }
                    info!(tracker = %tracker.name, config = %config.name, "configuration command sent");
                }
                Err(e) => {
                    // The claim stays in place; the attempt counter keeps
                    // accruing until a peer may seize it.
                    error!(
                        tracker = %tracker.name,
                        config = %config.name,
                        error = %e,
                        "failed to dispatch configuration command"
                    );
                }
            }
        }

        Ok(())
    }
}
