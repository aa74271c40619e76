//! In-memory document store backing the repository traits.
//!
//! This is the registry-interface seam: a remote document store plugs into
//! the same traits. The tracker collection additionally feeds a broadcast
//! change channel so the in-process registry mirror (and any cooperating
//! consumer) converges on lifecycle changes. Status merges are deliberately
//! not broadcast: they originate from this process and are already applied
//! to the mirror by the services performing them.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::warn;

use rastro_domain::{
    ConfigRepository, CoordinateRepository, DomainResult, InboundSms, OutboundSms, PendingConfig,
    SmsLogRepository, SmsStatus, StoredCoordinate, Tracker, TrackerChange, TrackerRepository,
    TrackerStatusPatch,
};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

pub struct MemoryStore {
    trackers: RwLock<HashMap<String, Tracker>>,
    coordinates: RwLock<HashMap<String, Vec<StoredCoordinate>>>,
    configs: RwLock<HashMap<String, HashMap<String, PendingConfig>>>,
    outbound_sms: RwLock<HashMap<String, HashMap<String, OutboundSms>>>,
    inbound_sms: RwLock<Vec<(String, InboundSms)>>,
    unknown_sms: RwLock<Vec<(String, InboundSms)>>,
    changes: broadcast::Sender<TrackerChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            trackers: RwLock::new(HashMap::new()),
            coordinates: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
            outbound_sms: RwLock::new(HashMap::new()),
            inbound_sms: RwLock::new(Vec::new()),
            unknown_sms: RwLock::new(Vec::new()),
            changes,
        }
    }

    /// Subscribe to tracker lifecycle changes (the change feed).
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerChange> {
        self.changes.subscribe()
    }

    pub async fn remove_tracker(&self, tracker_id: &str) {
        self.trackers.write().await.remove(tracker_id);
        let _ = self
            .changes
            .send(TrackerChange::Removed(tracker_id.to_string()));
    }

    pub async fn list_trackers(&self) -> Vec<Tracker> {
        self.trackers.read().await.values().cloned().collect()
    }

    pub async fn coordinates_for(&self, tracker_id: &str) -> Vec<StoredCoordinate> {
        self.coordinates
            .read()
            .await
            .get(tracker_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn outbound_sms_for(&self, tracker_id: &str) -> Vec<OutboundSms> {
        self.outbound_sms
            .read()
            .await
            .get(tracker_id)
            .map(|by_key| by_key.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn unknown_sms_count(&self) -> usize {
        self.unknown_sms.read().await.len()
    }

    pub async fn put_config(&self, tracker_id: &str, config: PendingConfig) {
        self.configs
            .write()
            .await
            .entry(tracker_id.to_string())
            .or_default()
            .insert(config.name.clone(), config);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrackerRepository for MemoryStore {
    async fn get_tracker(&self, tracker_id: &str) -> DomainResult<Option<Tracker>> {
        Ok(self.trackers.read().await.get(tracker_id).cloned())
    }

    async fn upsert_tracker(&self, tracker: Tracker) -> DomainResult<()> {
        self.trackers
            .write()
            .await
            .insert(tracker.id.clone(), tracker.clone());
        // Nobody listening yet is fine; the registry worker subscribes at
        // startup.
        let _ = self.changes.send(TrackerChange::Upserted(tracker));
        Ok(())
    }

    async fn merge_tracker_status(
        &self,
        tracker_id: &str,
        patch: TrackerStatusPatch,
    ) -> DomainResult<()> {
        let mut trackers = self.trackers.write().await;
        match trackers.get_mut(tracker_id) {
            Some(tracker) => tracker.apply_patch(&patch),
            None => warn!(tracker_id = %tracker_id, "status merge for unknown tracker"),
        }
        Ok(())
    }

    async fn set_last_check(&self, tracker_id: &str, at: DateTime<Utc>) -> DomainResult<()> {
        if let Some(tracker) = self.trackers.write().await.get_mut(tracker_id) {
            tracker.last_check = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinateRepository for MemoryStore {
    async fn latest_before(
        &self,
        tracker_id: &str,
        upper: DateTime<Utc>,
    ) -> DomainResult<Option<StoredCoordinate>> {
        let coordinates = self.coordinates.read().await;
        Ok(coordinates.get(tracker_id).and_then(|rows| {
            rows.iter()
                .filter(|row| row.datetime <= upper)
                .max_by_key(|row| row.datetime)
                .cloned()
        }))
    }

    async fn insert(&self, tracker_id: &str, coordinate: StoredCoordinate) -> DomainResult<()> {
        let mut coordinates = self.coordinates.write().await;
        let rows = coordinates.entry(tracker_id.to_string()).or_default();
        // Document-store set semantics: writing an existing key replaces it.
        rows.retain(|row| row.key != coordinate.key);
        rows.push(coordinate);
        Ok(())
    }

    async fn update(&self, tracker_id: &str, coordinate: StoredCoordinate) -> DomainResult<()> {
        let mut coordinates = self.coordinates.write().await;
        let rows = coordinates.entry(tracker_id.to_string()).or_default();
        match rows.iter_mut().find(|row| row.key == coordinate.key) {
            Some(row) => *row = coordinate,
            None => {
                warn!(tracker_id = %tracker_id, key = %coordinate.key, "update for missing coordinate");
                rows.push(coordinate);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigRepository for MemoryStore {
    async fn list_configs(&self, tracker_id: &str) -> DomainResult<Vec<PendingConfig>> {
        Ok(self
            .configs
            .read()
            .await
            .get(tracker_id)
            .map(|by_name| by_name.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_config(&self, tracker_id: &str, config: PendingConfig) -> DomainResult<()> {
        self.put_config(tracker_id, config).await;
        Ok(())
    }
}

#[async_trait]
impl SmsLogRepository for MemoryStore {
    async fn record_outbound(&self, sms: OutboundSms) -> DomainResult<()> {
        self.outbound_sms
            .write()
            .await
            .entry(sms.tracker_id.clone())
            .or_default()
            .insert(sms.key.clone(), sms);
        Ok(())
    }

    async fn mark_delivered(
        &self,
        tracker_id: &str,
        key: &str,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let mut outbound = self.outbound_sms.write().await;
        if let Some(sms) = outbound
            .get_mut(tracker_id)
            .and_then(|by_key| by_key.get_mut(key))
        {
            sms.received_at = Some(at);
            sms.status = SmsStatus::Delivered;
        }
        Ok(())
    }

    async fn record_inbound(&self, tracker_id: &str, sms: InboundSms) -> DomainResult<()> {
        self.inbound_sms
            .write()
            .await
            .push((tracker_id.to_string(), sms));
        Ok(())
    }

    async fn record_unknown_sender(&self, server: &str, sms: InboundSms) -> DomainResult<()> {
        self.unknown_sms
            .write()
            .await
            .push((server.to_string(), sms));
        Ok(())
    }
}
