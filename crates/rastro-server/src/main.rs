use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use rastro_domain::{
    CellLocator, ConfigArbiter, ConfigUpdater, FeedClient, FeedIngestService, Geocoder,
    InboundSmsRouter, NotificationPublisher, Reconciler, ReconciliationService, SmsOutbox,
    SmsSender, TrackerMonitor, TrackerRegistry, TrackerRepository,
};
use rastro_protocol::CobanParser;
use rastro_runner::Runner;
use rastro_server::clients::{FcmPublisher, GoogleGeocoder, SpotFeedClient, UnwiredCellLocator};
use rastro_server::config::ServiceConfig;
use rastro_server::modem::{ModemConfig, SerialModem};
use rastro_server::registry_worker::run_registry_worker;
use rastro_server::scheduler_worker::run_scheduler;
use rastro_server::sms_worker::run_sms_worker;
use rastro_server::store::MemoryStore;
use rastro_server::tcp_worker::{run_tcp_listener, TcpWorkerDeps};
use rastro_server::telemetry::init_telemetry;

const SMS_EVENT_CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    init_telemetry(&config.log_level);
    info!(server = %config.server_name, "application initialized, dependencies loaded");

    let token = CancellationToken::new();

    // Owned state: the store is the registry-interface seam, the registry is
    // the in-memory mirror fed by the store's change feed.
    let store = Arc::new(MemoryStore::new());
    let changes = store.subscribe();
    let registry = Arc::new(TrackerRegistry::new());

    // External collaborators.
    let geocoder: Arc<dyn Geocoder> = Arc::new(GoogleGeocoder::new(
        config.geocoder_url.clone(),
        config.geocoder_api_key.clone(),
    ));
    let cells: Arc<dyn CellLocator> = Arc::new(UnwiredCellLocator::new(
        config.cell_lookup_url.clone(),
        config.cell_lookup_token.clone(),
    ));
    let notifier: Arc<dyn NotificationPublisher> = Arc::new(FcmPublisher::new(
        config.push_url.clone(),
        config.push_server_key.clone(),
    ));
    let feed_client: Arc<dyn FeedClient> = Arc::new(SpotFeedClient::new(config.feed_base_url.clone()));

    // Modem transport.
    let (sms_events_tx, sms_events_rx) = mpsc::channel(SMS_EVENT_CHANNEL_CAPACITY);
    let modem = SerialModem::start(
        ModemConfig {
            port: config.modem_port.clone(),
            baud: config.modem_baud,
            reconnect_delay: Duration::from_secs(config.modem_reconnect_secs),
        },
        sms_events_tx,
        token.clone(),
    );
    let sms_sender: Arc<dyn SmsSender> = Arc::new(modem);

    // Domain services.
    let trackers: Arc<dyn TrackerRepository> = store.clone();
    let reconciler: Arc<dyn Reconciler> = Arc::new(ReconciliationService::new(
        registry.clone(),
        trackers.clone(),
        store.clone(),
        geocoder,
        notifier.clone(),
    ));
    let outbox = Arc::new(SmsOutbox::new(
        config.server_name.clone(),
        config.country_code.clone(),
        sms_sender,
        store.clone(),
        registry.clone(),
        notifier.clone(),
    ));
    let feed_service = Arc::new(FeedIngestService::new(
        feed_client,
        registry.clone(),
        reconciler.clone(),
        config.dedup_capacity,
        Duration::from_millis(config.feed_spacing_ms),
    ));
    let router = Arc::new(InboundSmsRouter::new(
        config.server_name.clone(),
        config.country_code.clone(),
        config.delivery_echo_marker.clone(),
        registry.clone(),
        trackers.clone(),
        store.clone(),
        notifier.clone(),
        Arc::new(CobanParser::new()),
        cells,
        reconciler.clone(),
    ));
    let monitor = Arc::new(TrackerMonitor::new(
        registry.clone(),
        trackers.clone(),
        outbox.clone(),
        feed_service,
    ));
    let config_updater = Arc::new(ConfigUpdater::new(
        store.clone(),
        ConfigArbiter::new(config.server_name.clone()),
        outbox.clone(),
    ));

    let tcp_deps = Arc::new(TcpWorkerDeps {
        registry: registry.clone(),
        trackers,
        reconciler,
        router: router.clone(),
    });
    let tcp_bind = format!("{}:{}", config.tcp_host, config.tcp_port);
    let tick = Duration::from_secs(config.tick_interval_secs);

    let runner = Runner::new()
        .with_cancellation_token(token)
        .with_named_process("tcp_listener", {
            move |ctx| run_tcp_listener(tcp_bind, tcp_deps, ctx)
        })
        .with_named_process("sms_worker", {
            let outbox = outbox.clone();
            move |ctx| run_sms_worker(sms_events_rx, router, outbox, ctx)
        })
        .with_named_process("registry_worker", {
            let registry = registry.clone();
            let monitor = monitor.clone();
            move |ctx| run_registry_worker(changes, registry, monitor, ctx)
        })
        .with_named_process("scheduler", {
            move |ctx| run_scheduler(registry, monitor, config_updater, tick, ctx)
        })
        .with_closer(|| async {
            info!("shutdown complete");
            Ok(())
        });

    std::process::exit(runner.run().await);
}
