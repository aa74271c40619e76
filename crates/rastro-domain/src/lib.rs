//! Domain layer for the rastro tracking server: canonical types, the
//! repository and collaborator seams, and the services that reconcile
//! positions, schedule probes and arbitrate configuration ownership.

pub mod arbiter;
pub mod collaborators;
pub mod commands;
pub mod config_updater;
pub mod correlation;
pub mod dedup;
pub mod error;
pub mod feed;
pub mod geo;
pub mod phone;
pub mod reconciliation;
pub mod registry;
pub mod repository;
pub mod scheduler;
pub mod sms_ingest;
pub mod types;

pub use arbiter::{ClaimDecision, ConfigArbiter, OWNERSHIP_OVERRIDE_ATTEMPTS};
pub use collaborators::{
    CellLocator, FeedClient, Geocoder, NotificationPublisher, ReportParser, SmsSender,
};
pub use config_updater::{ConfigUpdater, STALE_CONFIG_AFTER_HOURS};
pub use correlation::SmsOutbox;
pub use dedup::DedupCache;
pub use error::{DomainError, DomainResult};
pub use feed::FeedIngestService;
pub use geo::haversine_distance;
pub use phone::normalize_msisdn;
pub use reconciliation::{
    ReconcileOutcome, Reconciler, ReconciliationService, FALLBACK_ADDRESS, MOVEMENT_THRESHOLD_M,
};
pub use registry::TrackerRegistry;
pub use repository::{
    ConfigRepository, CoordinateRepository, SmsLogRepository, TrackerRepository,
};
pub use scheduler::{plan_tick, TickPlan, TrackerMonitor, MAX_PROBE_ATTEMPTS};
pub use sms_ingest::InboundSmsRouter;
pub use types::*;
