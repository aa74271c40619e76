//! End-to-end pipeline tests over the in-memory store: TCP frames through
//! reconciliation, inbound SMS routing, and delivery report correlation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use rastro_domain::{
    CellLocator, CellTowerRef, DomainError, DomainResult, Geocoder, InboundSms, InboundSmsRouter,
    Notification, NotificationPublisher, Position, Reconciler, ReconciliationService, SmsOutbox,
    SmsSender, SmsStatus, Tracker, TrackerModel, TrackerRegistry, TrackerRepository,
};
use rastro_protocol::CobanParser;
use rastro_server::modem::SmsEvent;
use rastro_server::sms_worker::run_sms_worker;
use rastro_server::store::MemoryStore;
use rastro_server::tcp_worker::{serve_connections, TcpWorkerDeps};

const EMERGENCY_FRAME: &str =
    "ST910;Emergency;696478;500;20180201;12;26;55;-23.076226;-054.206427;000.367;4.1;0;1;02;1865\r\n";
const LOCATION_FRAME: &str =
    "ST910;Location;696478;501;20180201;12;27;55;-23.076226;-054.206427;000.000;4.1;0;1;02;1865\r\n";

struct FakeGeocoder {
    fail: bool,
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn reverse(&self, _position: Position) -> DomainResult<String> {
        if self.fail {
            Err(DomainError::Geocoding("unavailable".to_string()))
        } else {
            Ok("Avenida Brasil 1500".to_string())
        }
    }
}

#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<(String, Notification)>>,
}

impl RecordingPublisher {
    async fn categories(&self) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .map(|(_, notification)| notification.kind.category().to_string())
            .collect()
    }
}

#[async_trait]
impl NotificationPublisher for RecordingPublisher {
    async fn publish(&self, tracker_id: &str, notification: Notification) -> DomainResult<()> {
        self.sent
            .lock()
            .await
            .push((tracker_id.to_string(), notification));
        Ok(())
    }
}

#[derive(Default)]
struct FakeSmsSender {
    sent: Mutex<Vec<(String, String)>>,
    references: AtomicUsize,
}

#[async_trait]
impl SmsSender for FakeSmsSender {
    async fn send(&self, destination: &str, text: &str) -> DomainResult<String> {
        self.sent
            .lock()
            .await
            .push((destination.to_string(), text.to_string()));
        Ok(self.references.fetch_add(1, Ordering::SeqCst).to_string())
    }
}

struct FakeCellLocator;

#[async_trait]
impl CellLocator for FakeCellLocator {
    async fn locate(&self, _cell: &CellTowerRef) -> DomainResult<Position> {
        Ok(Position::new(-23.42, -51.93))
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    registry: Arc<TrackerRegistry>,
    reconciler: Arc<dyn Reconciler>,
    router: Arc<InboundSmsRouter>,
    outbox: Arc<SmsOutbox>,
    publisher: Arc<RecordingPublisher>,
    sms: Arc<FakeSmsSender>,
}

fn harness(geocoder_fails: bool) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(TrackerRegistry::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let sms = Arc::new(FakeSmsSender::default());

    let trackers: Arc<dyn TrackerRepository> = store.clone();
    let reconciler: Arc<dyn Reconciler> = Arc::new(ReconciliationService::new(
        registry.clone(),
        trackers.clone(),
        store.clone(),
        Arc::new(FakeGeocoder {
            fail: geocoder_fails,
        }),
        publisher.clone(),
    ));
    let outbox = Arc::new(SmsOutbox::new(
        "server-test",
        "55",
        sms.clone(),
        store.clone(),
        registry.clone(),
        publisher.clone(),
    ));
    let router = Arc::new(InboundSmsRouter::new(
        "server-test",
        "55",
        "entregue",
        registry.clone(),
        trackers,
        store.clone(),
        publisher.clone(),
        Arc::new(CobanParser::new()),
        Arc::new(FakeCellLocator),
        reconciler.clone(),
    ));

    Harness {
        store,
        registry,
        reconciler,
        router,
        outbox,
        publisher,
        sms,
    }
}

fn tk102_tracker() -> Tracker {
    Tracker {
        id: "11987654321".to_string(),
        name: "Truck".to_string(),
        model: TrackerModel::Tk102b,
        identification: "11987654321".to_string(),
        update_interval_secs: 60,
        last_check: None,
        last_update: None,
        last_coordinate: None,
        last_coordinate_type: None,
        battery_level: Some(50.0),
        signal_level: Some(60.0),
    }
}

async fn mirror_store_into_registry(harness: &Harness) {
    for tracker in harness.store.list_trackers().await {
        harness
            .registry
            .apply(rastro_domain::TrackerChange::Upserted(tracker))
            .await;
    }
}

async fn start_tcp(harness: &Harness, token: CancellationToken) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let deps = Arc::new(TcpWorkerDeps {
        registry: harness.registry.clone(),
        trackers: harness.store.clone(),
        reconciler: harness.reconciler.clone(),
        router: harness.router.clone(),
    });
    tokio::spawn(serve_connections(listener, deps, token));
    addr
}

#[tokio::test]
async fn test_emergency_frame_is_acked_provisioned_and_reconciled() {
    let harness = harness(false);
    let token = CancellationToken::new();
    let addr = start_tcp(&harness, token.clone()).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    conn.write_all(EMERGENCY_FRAME.as_bytes()).await.unwrap();

    // The Emergency frame must be acknowledged with the exact literal.
    let mut ack = vec![0u8; 64];
    let n = tokio::time::timeout(Duration::from_secs(5), conn.read(&mut ack))
        .await
        .expect("no ack arrived")
        .unwrap();
    assert_eq!(&ack[..n], b"AT^ST910;ACK;696478");

    // Unknown device id was auto-provisioned with defaults.
    let tracker = harness
        .store
        .get_tracker("696478")
        .await
        .unwrap()
        .expect("tracker was not provisioned");
    assert_eq!(tracker.model, TrackerModel::St940);
    assert_eq!(tracker.update_interval_secs, 60);

    // One coordinate row, geocoded.
    let rows = harness.store.coordinates_for("696478").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].address.as_deref(), Some("Avenida Brasil 1500"));

    // Movement notification went out.
    assert!(harness
        .publisher
        .categories()
        .await
        .contains(&"movement".to_string()));

    token.cancel();
}

#[tokio::test]
async fn test_location_frame_gets_no_ack_and_repeat_is_merged() {
    let harness = harness(false);
    let token = CancellationToken::new();
    let addr = start_tcp(&harness, token.clone()).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    conn.write_all(LOCATION_FRAME.as_bytes()).await.unwrap();

    // No ACK for Location frames: the read must time out.
    let mut buffer = vec![0u8; 8];
    let no_ack =
        tokio::time::timeout(Duration::from_millis(300), conn.read(&mut buffer)).await;
    assert!(no_ack.is_err(), "unexpected bytes from server");

    // Same externally-keyed frame again: merged, not duplicated.
    conn.write_all(LOCATION_FRAME.as_bytes()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let categories = harness.publisher.categories().await;
            if categories.contains(&"stationary".to_string()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("second frame never reconciled");

    let rows = harness.store.coordinates_for("696478").await;
    assert_eq!(rows.len(), 1, "duplicate coordinate row");
    assert!(rows[0].last_seen.is_some());

    token.cancel();
}

#[tokio::test]
async fn test_inbound_status_sms_updates_levels() {
    let harness = harness(false);
    harness
        .store
        .upsert_tracker(tk102_tracker())
        .await
        .unwrap();
    mirror_store_into_registry(&harness).await;

    let (events_tx, events_rx) = mpsc::channel(8);
    let token = CancellationToken::new();
    tokio::spawn(run_sms_worker(
        events_rx,
        harness.router.clone(),
        harness.outbox.clone(),
        token.clone(),
    ));

    events_tx
        .send(SmsEvent::Inbound(InboundSms {
            sender: "+5511987654321".to_string(),
            text: "GSM: 87% ... BATTERY: 64%".to_string(),
            received_at: Utc::now(),
        }))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let tracker = harness.store.get_tracker("11987654321").await.unwrap();
            if tracker.and_then(|t| t.battery_level) == Some(64.0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("status sms never applied");

    let tracker = harness
        .store
        .get_tracker("11987654321")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tracker.signal_level, Some(87.0));

    let categories = harness.publisher.categories().await;
    assert!(categories.contains(&"available".to_string()));
    assert!(categories.contains(&"status".to_string()));

    token.cancel();
}

#[tokio::test]
async fn test_delivery_report_marks_command_delivered() {
    let harness = harness(false);
    harness
        .store
        .upsert_tracker(tk102_tracker())
        .await
        .unwrap();
    mirror_store_into_registry(&harness).await;

    let reference = harness
        .outbox
        .send_command(&tk102_tracker(), "check123456")
        .await
        .unwrap();
    assert_eq!(harness.sms.sent.lock().await.len(), 1);

    let (events_tx, events_rx) = mpsc::channel(8);
    let token = CancellationToken::new();
    tokio::spawn(run_sms_worker(
        events_rx,
        harness.router.clone(),
        harness.outbox.clone(),
        token.clone(),
    ));

    events_tx
        .send(SmsEvent::Delivery(rastro_domain::DeliveryReport {
            reference,
            sender: "+5511987654321".to_string(),
            delivered: true,
            received_at: Utc::now(),
        }))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let records = harness.store.outbound_sms_for("11987654321").await;
            if records
                .first()
                .map(|sms| sms.status == SmsStatus::Delivered)
                .unwrap_or(false)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("delivery report never correlated");

    assert!(harness
        .publisher
        .categories()
        .await
        .contains(&"available".to_string()));

    token.cancel();
}

#[tokio::test]
async fn test_geocoder_outage_still_stores_coordinate() {
    let harness = harness(true);
    let token = CancellationToken::new();
    let addr = start_tcp(&harness, token.clone()).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    conn.write_all(LOCATION_FRAME.as_bytes()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if !harness.store.coordinates_for("696478").await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("coordinate never stored");

    let rows = harness.store.coordinates_for("696478").await;
    assert_eq!(rows[0].address.as_deref(), Some("address unavailable"));

    token.cancel();
}
