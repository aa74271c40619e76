use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::collaborators::{Geocoder, NotificationPublisher};
use crate::error::DomainResult;
use crate::geo::haversine_distance;
use crate::registry::TrackerRegistry;
use crate::repository::{CoordinateRepository, TrackerRepository};
use crate::types::{
    LocationSample, Notification, NotificationKind, StoredCoordinate, TrackerStatusPatch,
};

/// Positions closer than this to the previous stored coordinate are treated
/// as "still in the same place" and merged instead of inserted.
pub const MOVEMENT_THRESHOLD_M: f64 = 50.0;

/// Placeholder address when reverse geocoding is unavailable.
pub const FALLBACK_ADDRESS: &str = "address unavailable";

const COORDINATE_KEY_FORMAT: &str = "%Y_%m_%d_%H_%M_%S_%3f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Inserted,
    Merged,
}

/// Seam for components that feed samples into reconciliation, so they can be
/// tested against a mock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(
        &self,
        tracker_id: &str,
        sample: LocationSample,
    ) -> DomainResult<ReconcileOutcome>;
}

/// Decides insert-vs-merge for every incoming position and triggers address
/// enrichment and the movement/stationary notification.
pub struct ReconciliationService {
    registry: Arc<TrackerRegistry>,
    trackers: Arc<dyn TrackerRepository>,
    coordinates: Arc<dyn CoordinateRepository>,
    geocoder: Arc<dyn Geocoder>,
    notifier: Arc<dyn NotificationPublisher>,
}

impl ReconciliationService {
    pub fn new(
        registry: Arc<TrackerRegistry>,
        trackers: Arc<dyn TrackerRepository>,
        coordinates: Arc<dyn CoordinateRepository>,
        geocoder: Arc<dyn Geocoder>,
        notifier: Arc<dyn NotificationPublisher>,
    ) -> Self {
        Self {
            registry,
            trackers,
            coordinates,
            geocoder,
            notifier,
        }
    }

    async fn notify(&self, tracker_id: &str, notification: Notification) {
        // Fire-and-forget: a lost notification never blocks reconciliation.
        if let Err(e) = self.notifier.publish(tracker_id, notification).await {
            warn!(tracker_id = %tracker_id, error = %e, "failed to publish notification");
        }
    }

    async fn insert_coordinate(
        &self,
        tracker_id: &str,
        sample: &LocationSample,
    ) -> DomainResult<()> {
        let key = sample
            .external_id
            .clone()
            .unwrap_or_else(|| sample.timestamp.format(COORDINATE_KEY_FORMAT).to_string());

        debug!(
            tracker_id = %tracker_id,
            latitude = sample.position.latitude,
            longitude = sample.position.longitude,
            "requesting reverse geocoding"
        );

        let (address, geocoded) = match self.geocoder.reverse(sample.position).await {
            Ok(address) => (address, true),
            Err(e) => {
                warn!(tracker_id = %tracker_id, error = %e, "reverse geocoding failed");
                (FALLBACK_ADDRESS.to_string(), false)
            }
        };

        let coordinate = StoredCoordinate {
            key,
            datetime: sample.timestamp,
            last_seen: None,
            position: sample.position,
            speed: sample.speed,
            battery_level: sample.battery_level,
            signal_level: sample.signal_level,
            address: Some(address.clone()),
        };
        self.coordinates.insert(tracker_id, coordinate).await?;

        let content = if geocoded {
            address
        } else {
            format!("Coordinates: {}", sample.position.to_field())
        };
        let notification = Notification::new(NotificationKind::Movement, "Movement alert", content)
            .with_field("coordinates", sample.position.to_field());
        self.notify(tracker_id, notification).await;

        info!(tracker_id = %tracker_id, "coordinate inserted");
        Ok(())
    }

    async fn merge_coordinate(
        &self,
        tracker_id: &str,
        previous: StoredCoordinate,
        sample: &LocationSample,
    ) -> DomainResult<()> {
        let merged = StoredCoordinate {
            key: previous.key,
            // The original sighting time is preserved; `last_seen` records
            // the latest time the device was observed at this place.
            datetime: previous.datetime,
            last_seen: Some(sample.timestamp),
            position: sample.position,
            speed: sample.speed,
            battery_level: sample.battery_level,
            signal_level: sample.signal_level,
            address: previous.address,
        };
        self.coordinates.update(tracker_id, merged).await?;

        let notification = Notification::new(
            NotificationKind::Stationary,
            "Stationary alert",
            "Tracker remains at the same position.",
        )
        .with_field("coordinates", sample.position.to_field());
        self.notify(tracker_id, notification).await;

        info!(tracker_id = %tracker_id, "coordinate updated in place");
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ReconciliationService {
    async fn reconcile(
        &self,
        tracker_id: &str,
        sample: LocationSample,
    ) -> DomainResult<ReconcileOutcome> {
        // Scalar fields always reflect the most recent sample, regardless of
        // the insert/merge decision below.
        let patch = TrackerStatusPatch {
            battery_level: sample.battery_level,
            signal_level: sample.signal_level,
            last_check: Some(Utc::now()),
            last_update: Some(sample.timestamp),
            last_coordinate: Some(sample.position),
            last_coordinate_type: Some(sample.source),
        };
        self.registry.update_status(tracker_id, &patch).await;
        if let Err(e) = self.trackers.merge_tracker_status(tracker_id, patch).await {
            // The in-memory mirror is already updated; the next sample will
            // re-persist these fields.
            warn!(tracker_id = %tracker_id, error = %e, "failed to persist tracker status");
        }

        let previous = self
            .coordinates
            .latest_before(tracker_id, sample.timestamp)
            .await?;

        match previous {
            Some(previous)
                if haversine_distance(sample.position, previous.position)
                    <= MOVEMENT_THRESHOLD_M =>
            {
                self.merge_coordinate(tracker_id, previous, &sample).await?;
                Ok(ReconcileOutcome::Merged)
            }
            _ => {
                self.insert_coordinate(tracker_id, &sample).await?;
                Ok(ReconcileOutcome::Inserted)
            }
        }
    }
}
