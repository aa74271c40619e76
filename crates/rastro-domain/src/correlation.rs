use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::collaborators::{NotificationPublisher, SmsSender};
use crate::error::DomainResult;
use crate::phone::normalize_msisdn;
use crate::registry::TrackerRegistry;
use crate::repository::SmsLogRepository;
use crate::types::{
    DeliveryReport, Notification, NotificationKind, OutboundSms, SmsStatus, Tracker,
};

const SMS_KEY_FORMAT: &str = "%Y_%m_%d_%H_%M_%S_%3f";

#[derive(Debug, Clone)]
struct PendingDelivery {
    tracker_id: String,
    key: String,
    text: String,
}

/// Dispatches commands over SMS and correlates later delivery reports back
/// to the record created at send time, by transport reference first and by
/// normalized sender number as a fallback.
pub struct SmsOutbox {
    server_name: String,
    country_code: String,
    sender: Arc<dyn SmsSender>,
    log: Arc<dyn SmsLogRepository>,
    registry: Arc<TrackerRegistry>,
    notifier: Arc<dyn NotificationPublisher>,
    pending: Mutex<HashMap<String, PendingDelivery>>,
}

impl SmsOutbox {
    pub fn new(
        server_name: impl Into<String>,
        country_code: impl Into<String>,
        sender: Arc<dyn SmsSender>,
        log: Arc<dyn SmsLogRepository>,
        registry: Arc<TrackerRegistry>,
        notifier: Arc<dyn NotificationPublisher>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            country_code: country_code.into(),
            sender,
            log,
            registry,
            notifier,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Send a command to a tracker and record it as enroute. Returns the
    /// transport reference.
    pub async fn send_command(&self, tracker: &Tracker, text: &str) -> DomainResult<String> {
        let reference = self.sender.send(&tracker.identification, text).await?;

        let now = Utc::now();
        let key = now.format(SMS_KEY_FORMAT).to_string();
        let record = OutboundSms {
            key: key.clone(),
            tracker_id: tracker.id.clone(),
            text: text.to_string(),
            reference: reference.clone(),
            sent_at: now,
            received_at: None,
            status: SmsStatus::Enroute,
        };
        if let Err(e) = self.log.record_outbound(record).await {
            warn!(
                tracker_id = %tracker.id,
                reference = %reference,
                error = %e,
                "sent command could not be logged"
            );
        }

        self.pending.lock().await.insert(
            reference.clone(),
            PendingDelivery {
                tracker_id: tracker.id.clone(),
                key,
                text: text.to_string(),
            },
        );

        debug!(
            tracker_id = %tracker.id,
            command = %text,
            reference = %reference,
            server = %self.server_name,
            "command dispatched over sms"
        );
        Ok(reference)
    }

    /// Handle an SMS-STATUS-REPORT from the transport. Never fails: every
    /// outcome (matched, fallback-matched, orphaned) is terminal.
    pub async fn handle_delivery_report(&self, report: DeliveryReport) {
        info!(reference = %report.reference, delivered = report.delivered, "delivery report received");

        let mut notification = if report.delivered {
            Notification::new(
                NotificationKind::Available,
                "Availability alert",
                "Tracker confirmed SMS receipt",
            )
        } else {
            Notification::new(
                NotificationKind::Available,
                "Unavailability alert",
                "Tracker was not available to receive SMS",
            )
        };

        let pending = self.pending.lock().await.remove(&report.reference);
        let tracker_id = match pending {
            Some(pending) => {
                if let Err(e) = self
                    .log
                    .mark_delivered(&pending.tracker_id, &pending.key, report.received_at)
                    .await
                {
                    warn!(
                        tracker_id = %pending.tracker_id,
                        error = %e,
                        "could not mark sms as delivered"
                    );
                }
                notification = notification.with_field(
                    "expanded",
                    format!("Tracker confirmed receipt of: {}", pending.text),
                );
                Some(pending.tracker_id)
            }
            None => self
                .registry
                .get(&normalize_msisdn(&report.sender, &self.country_code))
                .await
                .map(|tracker| tracker.id),
        };

        match tracker_id {
            Some(tracker_id) if self.registry.get(&tracker_id).await.is_some() => {
                if let Err(e) = self.notifier.publish(&tracker_id, notification).await {
                    warn!(tracker_id = %tracker_id, error = %e, "failed to publish availability notification");
                }
            }
            _ => {
                warn!(sender = %report.sender, "delivery report without a matching tracker");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MockNotificationPublisher, MockSmsSender};
    use crate::repository::MockSmsLogRepository;
    use crate::types::{TrackerChange, TrackerModel};

    fn tracker(id: &str) -> Tracker {
        Tracker {
            id: id.to_string(),
            name: format!("Tracker {id}"),
            model: TrackerModel::Tk102b,
            identification: id.to_string(),
            update_interval_secs: 60,
            last_check: None,
            last_update: None,
            last_coordinate: None,
            last_coordinate_type: None,
            battery_level: None,
            signal_level: None,
        }
    }

    async fn registry_with(tracker_id: &str) -> Arc<TrackerRegistry> {
        let registry = Arc::new(TrackerRegistry::new());
        registry
            .apply(TrackerChange::Upserted(tracker(tracker_id)))
            .await;
        registry
    }

    #[tokio::test]
    async fn test_send_command_records_outbound() {
        let mut sender = MockSmsSender::new();
        sender
            .expect_send()
            .withf(|destination, text| destination == "11987654321" && text == "check123456")
            .times(1)
            .returning(|_, _| Ok("41".to_string()));

        let mut log = MockSmsLogRepository::new();
        log.expect_record_outbound()
            .withf(|sms: &OutboundSms| {
                sms.tracker_id == "11987654321"
                    && sms.reference == "41"
                    && sms.status == SmsStatus::Enroute
                    && sms.received_at.is_none()
            })
            .times(1)
            .returning(|_| Ok(()));

        let outbox = SmsOutbox::new(
            "server-a",
            "55",
            Arc::new(sender),
            Arc::new(log),
            registry_with("11987654321").await,
            Arc::new(MockNotificationPublisher::new()),
        );

        let reference = outbox
            .send_command(&tracker("11987654321"), "check123456")
            .await
            .unwrap();
        assert_eq!(reference, "41");
    }

    #[tokio::test]
    async fn test_delivery_report_matched_by_reference() {
        let mut sender = MockSmsSender::new();
        sender.expect_send().returning(|_, _| Ok("41".to_string()));

        let mut log = MockSmsLogRepository::new();
        log.expect_record_outbound().returning(|_| Ok(()));
        log.expect_mark_delivered()
            .withf(|tracker_id, _, _| tracker_id == "11987654321")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut notifier = MockNotificationPublisher::new();
        notifier
            .expect_publish()
            .withf(|tracker_id, notification| {
                tracker_id == "11987654321"
                    && notification.kind == NotificationKind::Available
                    && notification.fields.contains_key("expanded")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let outbox = SmsOutbox::new(
            "server-a",
            "55",
            Arc::new(sender),
            Arc::new(log),
            registry_with("11987654321").await,
            Arc::new(notifier),
        );

        outbox
            .send_command(&tracker("11987654321"), "check123456")
            .await
            .unwrap();
        outbox
            .handle_delivery_report(DeliveryReport {
                reference: "41".to_string(),
                sender: "+5511987654321".to_string(),
                delivered: true,
                received_at: Utc::now(),
            })
            .await;
    }

    #[tokio::test]
    async fn test_delivery_report_falls_back_to_sender_number() {
        let mut notifier = MockNotificationPublisher::new();
        notifier
            .expect_publish()
            .withf(|tracker_id, notification| {
                tracker_id == "11987654321" && !notification.fields.contains_key("expanded")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut log = MockSmsLogRepository::new();
        log.expect_mark_delivered().never();

        let outbox = SmsOutbox::new(
            "server-a",
            "55",
            Arc::new(MockSmsSender::new()),
            Arc::new(log),
            registry_with("11987654321").await,
            Arc::new(notifier),
        );

        outbox
            .handle_delivery_report(DeliveryReport {
                reference: "77".to_string(),
                sender: "+5511987654321".to_string(),
                delivered: false,
                received_at: Utc::now(),
            })
            .await;
    }

    #[tokio::test]
    async fn test_orphaned_report_publishes_nothing() {
        let mut notifier = MockNotificationPublisher::new();
        notifier.expect_publish().never();

        let outbox = SmsOutbox::new(
            "server-a",
            "55",
            Arc::new(MockSmsSender::new()),
            Arc::new(MockSmsLogRepository::new()),
            Arc::new(TrackerRegistry::new()),
            Arc::new(notifier),
        );

        outbox
            .handle_delivery_report(DeliveryReport {
                reference: "12".to_string(),
                sender: "+5599999999999".to_string(),
                delivered: true,
                received_at: Utc::now(),
            })
            .await;
    }
}
