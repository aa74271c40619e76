use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::collaborators::{CellLocator, NotificationPublisher, ReportParser};
use crate::error::DomainResult;
use crate::phone::normalize_msisdn;
use crate::reconciliation::Reconciler;
use crate::registry::TrackerRegistry;
use crate::repository::{SmsLogRepository, TrackerRepository};
use crate::types::{
    CoordinateSource, InboundSms, LocationSample, Notification, NotificationKind, Position,
    Tracker, TrackerModel, TrackerReport, TrackerStatusPatch,
};

/// Routes inbound SMS traffic: identifies the sending tracker, persists the
/// message, notifies subscribers and hands the text to the model's decoder.
/// Also decodes Coban report bodies arriving over TCP.
pub struct InboundSmsRouter {
    server_name: String,
    country_code: String,
    /// Carrier-injected delivery echo marker; such texts carry no report.
    delivery_echo_marker: String,
    registry: Arc<TrackerRegistry>,
    trackers: Arc<dyn TrackerRepository>,
    log: Arc<dyn SmsLogRepository>,
    notifier: Arc<dyn NotificationPublisher>,
    parser: Arc<dyn ReportParser>,
    cells: Arc<dyn CellLocator>,
    reconciler: Arc<dyn Reconciler>,
}

impl InboundSmsRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server_name: impl Into<String>,
        country_code: impl Into<String>,
        delivery_echo_marker: impl Into<String>,
        registry: Arc<TrackerRegistry>,
        trackers: Arc<dyn TrackerRepository>,
        log: Arc<dyn SmsLogRepository>,
        notifier: Arc<dyn NotificationPublisher>,
        parser: Arc<dyn ReportParser>,
        cells: Arc<dyn CellLocator>,
        reconciler: Arc<dyn Reconciler>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            country_code: country_code.into(),
            delivery_echo_marker: delivery_echo_marker.into(),
            registry,
            trackers,
            log,
            notifier,
            parser,
            cells,
            reconciler,
        }
    }

    pub async fn handle_inbound(&self, sms: InboundSms) -> DomainResult<()> {
        let tracker_id = normalize_msisdn(&sms.sender, &self.country_code);
        let text = sms.text.replace('\0', "");

        let Some(tracker) = self.registry.get(&tracker_id).await else {
            warn!(sender = %sms.sender, "sms received from unknown number");
            self.log
                .record_unknown_sender(
                    &self.server_name,
                    InboundSms {
                        text,
                        ..sms
                    },
                )
                .await?;
            return Ok(());
        };

        if !self.delivery_echo_marker.is_empty() && text.contains(&self.delivery_echo_marker) {
            // The dedicated status-report path already handled the delivery;
            // the carrier echo itself carries nothing.
            debug!(tracker = %tracker.name, "carrier delivery echo received");
            return Ok(());
        }

        if let Err(e) = self
            .log
            .record_inbound(
                &tracker.id,
                InboundSms {
                    sender: sms.sender.clone(),
                    text: text.clone(),
                    received_at: sms.received_at,
                },
            )
            .await
        {
            warn!(tracker_id = %tracker.id, error = %e, "inbound sms could not be logged");
        }

        let notification = Notification::new(
            NotificationKind::Available,
            "SMS received",
            "An SMS sent by the tracker was received.",
        )
        .with_field("expanded", format!("Tracker SMS received: {text}"));
        if let Err(e) = self.notifier.publish(&tracker.id, notification).await {
            warn!(tracker_id = %tracker.id, error = %e, "failed to publish sms notification");
        }

        match tracker.model {
            TrackerModel::Tk102b => self.route_report(&tracker, &text).await,
            _ => {
                warn!(
                    tracker = %tracker.name,
                    model = %tracker.model.as_str(),
                    "no sms decoder for tracker model"
                );
                Ok(())
            }
        }
    }

    /// Decode one compact-text report and apply its effect. Shared by the
    /// SMS path and the Coban-over-TCP path.
    pub async fn route_report(&self, tracker: &Tracker, text: &str) -> DomainResult<()> {
        match self.parser.parse(text) {
            TrackerReport::Status { signal, battery } => {
                let patch = TrackerStatusPatch {
                    battery_level: Some(battery),
                    signal_level: Some(signal),
                    ..Default::default()
                };
                self.registry.update_status(&tracker.id, &patch).await;
                if let Err(e) = self.trackers.merge_tracker_status(&tracker.id, patch).await {
                    warn!(tracker_id = %tracker.id, error = %e, "failed to persist status levels");
                }

                let notification = Notification::new(
                    NotificationKind::Status,
                    "Status update",
                    format!("Battery: {battery}% / GSM signal: {signal}%"),
                );
                if let Err(e) = self.notifier.publish(&tracker.id, notification).await {
                    warn!(tracker_id = %tracker.id, error = %e, "failed to publish status notification");
                }

                info!(tracker = %tracker.name, "status message parsed");
                Ok(())
            }
            TrackerReport::CellFix(cell) => {
                debug!(
                    mcc = cell.mcc,
                    mnc = cell.mnc,
                    lac = cell.lac,
                    cid = cell.cid,
                    "requesting geolocation from cell tower"
                );
                match self.cells.locate(&cell).await {
                    Ok(position)
                        if position.latitude.abs() < 90.0 && position.longitude.abs() < 90.0 =>
                    {
                        let sample = LocationSample {
                            timestamp: Utc::now(),
                            position,
                            speed: 0.0,
                            battery_level: tracker.battery_level,
                            signal_level: tracker.signal_level,
                            source: CoordinateSource::GsmCell,
                            external_id: None,
                        };
                        self.reconciler.reconcile(&tracker.id, sample).await?;
                        Ok(())
                    }
                    Ok(position) => {
                        // Out-of-range result from the lookup provider;
                        // dropped, never retried.
                        warn!(
                            tracker = %tracker.name,
                            latitude = position.latitude,
                            longitude = position.longitude,
                            "cell tower geolocation out of range"
                        );
                        Ok(())
                    }
                    Err(e) => {
                        warn!(tracker = %tracker.name, error = %e, "cell tower geolocation failed");
                        Ok(())
                    }
                }
            }
            TrackerReport::Position {
                latitude,
                longitude,
                speed,
            } => {
                let sample = LocationSample {
                    timestamp: Utc::now(),
                    position: Position::new(latitude, longitude),
                    speed,
                    battery_level: tracker.battery_level,
                    signal_level: tracker.signal_level,
                    source: CoordinateSource::Gps,
                    external_id: None,
                };
                self.reconciler.reconcile(&tracker.id, sample).await?;
                Ok(())
            }
            TrackerReport::Unrecognized => {
                warn!(tracker = %tracker.name, text = %text, "unparseable tracker report");
                Ok(())
            }
        }
    }
}
