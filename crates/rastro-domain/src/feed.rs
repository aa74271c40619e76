use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::collaborators::FeedClient;
use crate::dedup::DedupCache;
use crate::error::DomainResult;
use crate::reconciliation::Reconciler;
use crate::registry::TrackerRegistry;
use crate::types::Tracker;

/// Ingests the polled vendor feed for one tracker: deduplicates entries,
/// drops stale ones and reconciles the rest oldest-first, with a minimum
/// spacing between reconciliations to rate-limit downstream enrichment.
pub struct FeedIngestService {
    feed: Arc<dyn FeedClient>,
    registry: Arc<TrackerRegistry>,
    reconciler: Arc<dyn Reconciler>,
    dedup: Mutex<DedupCache>,
    spacing: Duration,
}

impl FeedIngestService {
    pub fn new(
        feed: Arc<dyn FeedClient>,
        registry: Arc<TrackerRegistry>,
        reconciler: Arc<dyn Reconciler>,
        dedup_capacity: usize,
        spacing: Duration,
    ) -> Self {
        Self {
            feed,
            registry,
            reconciler,
            dedup: Mutex::new(DedupCache::new(dedup_capacity)),
            spacing,
        }
    }

    /// Fetch and reconcile the tracker's feed. Returns how many entries were
    /// reconciled.
    pub async fn poll(&self, tracker: &Tracker) -> DomainResult<usize> {
        let mut entries = self.feed.fetch(&tracker.identification).await?;
        // The vendor serves newest-first; reconciliation wants increasing
        // timestamp order.
        entries.reverse();

        let mut accepted = 0;
        for entry in entries {
            {
                let mut dedup = self.dedup.lock().await;
                if !dedup.insert(entry.id.clone()) {
                    continue;
                }
            }

            let last_update = self
                .registry
                .get(&tracker.id)
                .await
                .and_then(|current| current.last_update);
            if let Some(last_update) = last_update {
                if entry.timestamp <= last_update {
                    // Already seen through another path; keep the dedup
                    // entry but do not reprocess.
                    debug!(
                        tracker = %tracker.name,
                        entry_id = %entry.id,
                        "feed entry is not newer than the tracker's last update"
                    );
                    continue;
                }
            }

            if accepted > 0 && !self.spacing.is_zero() {
                tokio::time::sleep(self.spacing).await;
            }

            let entry_id = entry.id.clone();
            if let Err(e) = self
                .reconciler
                .reconcile(&tracker.id, entry.into_sample())
                .await
            {
                error!(
                    tracker = %tracker.name,
                    entry_id = %entry_id,
                    error = %e,
                    "failed to reconcile feed entry"
                );
            }
            accepted += 1;
        }

        info!(tracker = %tracker.name, accepted, "feed parsed");
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockFeedClient;
    use crate::reconciliation::{MockReconciler, ReconcileOutcome};
    use crate::types::{FeedEntry, Position, TrackerChange, TrackerModel, TrackerStatusPatch};
    use chrono::{TimeZone, Utc};

    fn tracker() -> Tracker {
        Tracker {
            id: "spot-1".to_string(),
            name: "Spot 1".to_string(),
            model: TrackerModel::SpotTrace,
            identification: "0abc123".to_string(),
            update_interval_secs: 600,
            last_check: None,
            last_update: None,
            last_coordinate: None,
            last_coordinate_type: None,
            battery_level: None,
            signal_level: None,
        }
    }

    fn entry(id: &str, minute: u32) -> FeedEntry {
        FeedEntry {
            id: id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2018, 2, 1, 12, minute, 0).unwrap(),
            position: Position::new(-23.5, -51.9),
            moving: false,
            battery_good: true,
        }
    }

    async fn registry() -> Arc<TrackerRegistry> {
        let registry = Arc::new(TrackerRegistry::new());
        registry.apply(TrackerChange::Upserted(tracker())).await;
        registry
    }

    #[tokio::test]
    async fn test_entries_reconciled_oldest_first() {
        let mut feed = MockFeedClient::new();
        // Newest first, as the vendor serves them.
        feed.expect_fetch()
            .returning(|_| Ok(vec![entry("m-2", 30), entry("m-1", 10)]));

        let mut reconciler = MockReconciler::new();
        let mut seen = Vec::new();
        reconciler
            .expect_reconcile()
            .times(2)
            .returning(move |_, sample| {
                seen.push(sample.external_id.clone().unwrap_or_default());
                // Oldest entry must come through first.
                if seen.len() == 1 {
                    assert_eq!(seen[0], "m-1");
                }
                Ok(ReconcileOutcome::Inserted)
            });

        let service = FeedIngestService::new(
            Arc::new(feed),
            registry().await,
            Arc::new(reconciler),
            16,
            Duration::ZERO,
        );

        let accepted = service.poll(&tracker()).await.unwrap();
        assert_eq!(accepted, 2);
    }

    #[tokio::test]
    async fn test_duplicate_entries_processed_once() {
        let mut feed = MockFeedClient::new();
        feed.expect_fetch()
            .times(2)
            .returning(|_| Ok(vec![entry("m-1", 10)]));

        let mut reconciler = MockReconciler::new();
        reconciler
            .expect_reconcile()
            .times(1)
            .returning(|_, _| Ok(ReconcileOutcome::Inserted));

        let service = FeedIngestService::new(
            Arc::new(feed),
            registry().await,
            Arc::new(reconciler),
            16,
            Duration::ZERO,
        );

        assert_eq!(service.poll(&tracker()).await.unwrap(), 1);
        assert_eq!(service.poll(&tracker()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_entry_marked_seen_but_not_reconciled() {
        let registry = registry().await;
        registry
            .update_status(
                "spot-1",
                &TrackerStatusPatch {
                    last_update: Some(Utc.with_ymd_and_hms(2018, 2, 1, 12, 20, 0).unwrap()),
                    ..Default::default()
                },
            )
            .await;

        let mut feed = MockFeedClient::new();
        // First poll returns only the stale entry, second poll repeats it.
        feed.expect_fetch()
            .times(2)
            .returning(|_| Ok(vec![entry("m-old", 10)]));

        let mut reconciler = MockReconciler::new();
        reconciler.expect_reconcile().never();

        let service = FeedIngestService::new(
            Arc::new(feed),
            registry,
            Arc::new(reconciler),
            16,
            Duration::ZERO,
        );

        assert_eq!(service.poll(&tracker()).await.unwrap(), 0);
        // Second poll: the id is already in the dedup cache.
        assert_eq!(service.poll(&tracker()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_error_does_not_abort_the_batch() {
        let mut feed = MockFeedClient::new();
        feed.expect_fetch()
            .returning(|_| Ok(vec![entry("m-2", 30), entry("m-1", 10)]));

        let mut reconciler = MockReconciler::new();
        reconciler.expect_reconcile().times(2).returning(|_, sample| {
            if sample.external_id.as_deref() == Some("m-1") {
                Err(crate::error::DomainError::Repository(anyhow::anyhow!(
                    "store offline"
                )))
            } else {
                Ok(ReconcileOutcome::Inserted)
            }
        });

        let service = FeedIngestService::new(
            Arc::new(feed),
            registry().await,
            Arc::new(reconciler),
            16,
            Duration::ZERO,
        );

        assert_eq!(service.poll(&tracker()).await.unwrap(), 2);
    }
}
