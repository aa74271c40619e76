use async_trait::async_trait;

use crate::error::DomainResult;
use crate::types::{CellTowerRef, FeedEntry, Notification, Position};

/// Reverse geocoding: position to human-readable address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse(&self, position: Position) -> DomainResult<String>;
}

/// GSM cell tower geolocation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CellLocator: Send + Sync {
    async fn locate(&self, cell: &CellTowerRef) -> DomainResult<Position>;
}

/// Publish-by-topic push notifications, at-most-once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, tracker_id: &str, notification: Notification) -> DomainResult<()>;
}

/// Outbound SMS transport. Returns the transport-assigned message reference
/// used to correlate the later delivery report.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, destination: &str, text: &str) -> DomainResult<String>;
}

/// Polled vendor feed, already decoded into entries (newest first, as the
/// vendor serves them).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedClient: Send + Sync {
    async fn fetch(&self, feed_id: &str) -> DomainResult<Vec<FeedEntry>>;
}

/// Decoder for compact-text tracker reports (SMS bodies and Coban TCP
/// frames). Implemented in `rastro-protocol`.
#[cfg_attr(test, mockall::automock)]
pub trait ReportParser: Send + Sync {
    fn parse(&self, text: &str) -> crate::types::TrackerReport;
}
