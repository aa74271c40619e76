use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DomainResult;
use crate::types::{
    InboundSms, OutboundSms, PendingConfig, StoredCoordinate, Tracker, TrackerStatusPatch,
};

/// Tracker document access. The infrastructure layer (the in-memory store in
/// `rastro-server`, or a remote document store) implements this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackerRepository: Send + Sync {
    async fn get_tracker(&self, tracker_id: &str) -> DomainResult<Option<Tracker>>;

    /// Create or fully replace a tracker document. Implementations emit a
    /// change-feed event for upserts so every instance's registry converges.
    async fn upsert_tracker(&self, tracker: Tracker) -> DomainResult<()>;

    /// Merge a partial status update over the stored document, leaving
    /// unset fields untouched.
    async fn merge_tracker_status(
        &self,
        tracker_id: &str,
        patch: TrackerStatusPatch,
    ) -> DomainResult<()>;

    async fn set_last_check(&self, tracker_id: &str, at: DateTime<Utc>) -> DomainResult<()>;
}

/// Stored coordinate access, ordered by timestamp per tracker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CoordinateRepository: Send + Sync {
    /// Most recent coordinate with `datetime <= upper`, if any.
    async fn latest_before(
        &self,
        tracker_id: &str,
        upper: DateTime<Utc>,
    ) -> DomainResult<Option<StoredCoordinate>>;

    async fn insert(&self, tracker_id: &str, coordinate: StoredCoordinate) -> DomainResult<()>;

    /// Update an existing coordinate in place, keyed by `coordinate.key`.
    async fn update(&self, tracker_id: &str, coordinate: StoredCoordinate) -> DomainResult<()>;
}

/// Pending configuration documents shared between cooperating instances.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn list_configs(&self, tracker_id: &str) -> DomainResult<Vec<PendingConfig>>;

    async fn save_config(&self, tracker_id: &str, config: PendingConfig) -> DomainResult<()>;
}

/// Durable log of SMS traffic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmsLogRepository: Send + Sync {
    async fn record_outbound(&self, sms: OutboundSms) -> DomainResult<()>;

    async fn mark_delivered(
        &self,
        tracker_id: &str,
        key: &str,
        at: DateTime<Utc>,
    ) -> DomainResult<()>;

    async fn record_inbound(&self, tracker_id: &str, sms: InboundSms) -> DomainResult<()>;

    /// Messages from numbers no tracker claims, kept in a server-scoped log.
    async fn record_unknown_sender(&self, server: &str, sms: InboundSms) -> DomainResult<()>;
}
