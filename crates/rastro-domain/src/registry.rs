use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::info;

use crate::types::{Tracker, TrackerChange, TrackerStatusPatch};

#[derive(Debug, Clone)]
struct TrackerEntry {
    tracker: Tracker,
    update_attempts: u32,
}

/// In-memory mirror of the tracker registry, kept current by applying the
/// external change feed. Probe attempt counters are registry-local state and
/// never persisted.
pub struct TrackerRegistry {
    inner: RwLock<HashMap<String, TrackerEntry>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Apply one change-feed event. Returns the id of an upserted tracker so
    /// the caller can trigger an immediate check on it.
    pub async fn apply(&self, change: TrackerChange) -> Option<String> {
        let mut inner = self.inner.write().await;
        match change {
            TrackerChange::Upserted(tracker) => {
                let id = tracker.id.clone();
                info!(tracker_id = %id, name = %tracker.name, "tracker upserted");
                inner.insert(
                    id.clone(),
                    TrackerEntry {
                        tracker,
                        update_attempts: 0,
                    },
                );
                Some(id)
            }
            TrackerChange::Removed(id) => {
                info!(tracker_id = %id, "tracker removed");
                inner.remove(&id);
                None
            }
        }
    }

    pub async fn get(&self, tracker_id: &str) -> Option<Tracker> {
        let inner = self.inner.read().await;
        inner.get(tracker_id).map(|entry| entry.tracker.clone())
    }

    /// Find a tracker by its transport identification (phone number or feed
    /// id) when the document id does not match directly.
    pub async fn find_by_identification(&self, identification: &str) -> Option<Tracker> {
        let inner = self.inner.read().await;
        inner
            .values()
            .find(|entry| entry.tracker.identification == identification)
            .map(|entry| entry.tracker.clone())
    }

    pub async fn snapshot(&self) -> Vec<Tracker> {
        let inner = self.inner.read().await;
        inner.values().map(|entry| entry.tracker.clone()).collect()
    }

    pub async fn update_status(&self, tracker_id: &str, patch: &TrackerStatusPatch) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.get_mut(tracker_id) {
            entry.tracker.apply_patch(patch);
        }
    }

    pub async fn set_last_check(&self, tracker_id: &str, at: chrono::DateTime<chrono::Utc>) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.get_mut(tracker_id) {
            entry.tracker.last_check = Some(at);
        }
    }

    pub async fn attempts(&self, tracker_id: &str) -> Option<u32> {
        let inner = self.inner.read().await;
        inner.get(tracker_id).map(|entry| entry.update_attempts)
    }

    /// Returns the new counter value.
    pub async fn increment_attempts(&self, tracker_id: &str) -> Option<u32> {
        let mut inner = self.inner.write().await;
        inner.get_mut(tracker_id).map(|entry| {
            entry.update_attempts += 1;
            entry.update_attempts
        })
    }

    pub async fn reset_attempts(&self, tracker_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.get_mut(tracker_id) {
            entry.update_attempts = 0;
        }
    }

    pub async fn len(&self) -> usize {
        let inner = self.inner.read().await;
        inner.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
