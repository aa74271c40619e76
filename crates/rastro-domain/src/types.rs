use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// A WGS84 latitude/longitude pair, decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// `"<lat>,<lon>"`, the form used in notification payloads.
    pub fn to_field(&self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}

/// How a coordinate was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateSource {
    /// Direct GPS fix reported by the device.
    Gps,
    /// Approximate fix triangulated from a GSM cell tower.
    GsmCell,
}

impl CoordinateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinateSource::Gps => "GPS",
            CoordinateSource::GsmCell => "GSM",
        }
    }
}

/// Supported tracker hardware families.
///
/// `Other` preserves whatever string the registry carried so unknown models
/// can still be logged and skipped instead of failing to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerModel {
    /// Coban TK102B, commanded and reporting over SMS (and Coban GPRS frames
    /// over TCP).
    Tk102b,
    /// Suntech ST910/ST940, reporting over a raw TCP stream.
    St940,
    /// SPOT Trace, read through the vendor's public XML feed.
    SpotTrace,
    Other(String),
}

impl TrackerModel {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "tk102b" | "tk 102b" | "tk102" => TrackerModel::Tk102b,
            "st940" | "st910" => TrackerModel::St940,
            "spot" | "spot trace" | "spottrace" => TrackerModel::SpotTrace,
            _ => TrackerModel::Other(value.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TrackerModel::Tk102b => "tk102b",
            TrackerModel::St940 => "st940",
            TrackerModel::SpotTrace => "spot",
            TrackerModel::Other(other) => other.as_str(),
        }
    }
}

/// A tracked device, mirrored in memory from the external registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracker {
    pub id: String,
    pub name: String,
    pub model: TrackerModel,
    /// Phone number for SMS models, feed id for polled models, device id for
    /// TCP models.
    pub identification: String,
    pub update_interval_secs: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub last_coordinate: Option<Position>,
    pub last_coordinate_type: Option<CoordinateSource>,
    pub battery_level: Option<f64>,
    pub signal_level: Option<f64>,
}

/// Partial tracker update, merged over the stored document. `None` fields
/// are left untouched, matching the store's merge semantics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerStatusPatch {
    pub battery_level: Option<f64>,
    pub signal_level: Option<f64>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub last_coordinate: Option<Position>,
    pub last_coordinate_type: Option<CoordinateSource>,
}

impl Tracker {
    pub fn apply_patch(&mut self, patch: &TrackerStatusPatch) {
        if let Some(battery) = patch.battery_level {
            self.battery_level = Some(battery);
        }
        if let Some(signal) = patch.signal_level {
            self.signal_level = Some(signal);
        }
        if let Some(at) = patch.last_check {
            self.last_check = Some(at);
        }
        if let Some(at) = patch.last_update {
            self.last_update = Some(at);
        }
        if let Some(position) = patch.last_coordinate {
            self.last_coordinate = Some(position);
        }
        if let Some(source) = patch.last_coordinate_type {
            self.last_coordinate_type = Some(source);
        }
    }
}

/// Lifecycle event from the external registry change feed.
#[derive(Debug, Clone)]
pub enum TrackerChange {
    Upserted(Tracker),
    Removed(String),
}

/// One normalized position reading, produced by a parser and consumed once
/// by reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSample {
    pub timestamp: DateTime<Utc>,
    pub position: Position,
    pub speed: f64,
    pub battery_level: Option<f64>,
    pub signal_level: Option<f64>,
    pub source: CoordinateSource,
    /// Stable message id supplied by the source protocol, when it has one.
    /// Used as the stored coordinate key so reprocessing cannot duplicate
    /// rows.
    pub external_id: Option<String>,
}

/// Persisted form of a location sample.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCoordinate {
    pub key: String,
    pub datetime: DateTime<Utc>,
    /// Set when the device was seen again at (effectively) the same place;
    /// the original `datetime` is preserved.
    pub last_seen: Option<DateTime<Utc>>,
    pub position: Position,
    pub speed: f64,
    pub battery_level: Option<f64>,
    pub signal_level: Option<f64>,
    pub address: Option<String>,
}

/// GSM cell tower reference extracted from a triangulation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellTowerRef {
    pub mcc: u16,
    pub mnc: u16,
    pub lac: u32,
    pub cid: u32,
}

/// Decoded content of one compact-text tracker report (Coban TK102 family).
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerReport {
    /// Signal/battery status, no position.
    Status { signal: f64, battery: f64 },
    /// Request to triangulate from a cell tower.
    CellFix(CellTowerRef),
    /// Inline GPS fix.
    Position {
        latitude: f64,
        longitude: f64,
        speed: f64,
    },
    Unrecognized,
}

/// One entry of the SPOT Trace public XML feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub position: Position,
    /// Feed flagged this entry as the start of a new movement.
    pub moving: bool,
    /// Feed reported battery state as good.
    pub battery_good: bool,
}

impl FeedEntry {
    /// The feed only carries coarse movement/battery flags, so speed and
    /// battery become coarse binary levels.
    pub fn into_sample(self) -> LocationSample {
        LocationSample {
            timestamp: self.timestamp,
            position: self.position,
            speed: if self.moving { 30.0 } else { 0.0 },
            battery_level: Some(if self.battery_good { 80.0 } else { 30.0 }),
            signal_level: Some(100.0),
            source: CoordinateSource::Gps,
            external_id: Some(self.id),
        }
    }
}

/// Steps a pending configuration moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStep {
    /// Requested by a user, not yet dispatched.
    Requested,
    /// Command was handed to the transport; awaiting device confirmation.
    CommandSent,
}

/// Shared progress record guarding a configuration against concurrent
/// application by cooperating server instances.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigStatus {
    pub step: ConfigStep,
    pub in_progress: bool,
    pub owner: Option<String>,
    pub attempts: u32,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingConfig {
    pub name: String,
    pub value: String,
    pub status: ConfigStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsStatus {
    Enroute,
    Delivered,
}

/// Record of a command dispatched over SMS, correlated to a later delivery
/// report by the transport-assigned `reference`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundSms {
    pub key: String,
    pub tracker_id: String,
    pub text: String,
    pub reference: String,
    pub sent_at: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
    pub status: SmsStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundSms {
    pub sender: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// SMS-STATUS-REPORT delivered by the modem for a previously sent message.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub reference: String,
    pub sender: String,
    pub delivered: bool,
    pub received_at: DateTime<Utc>,
}

/// Notification categories published per tracker. The topic is
/// `<tracker_id>_<category>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Movement,
    Stationary,
    Status,
    Available,
}

impl NotificationKind {
    pub fn category(&self) -> &'static str {
        match self {
            NotificationKind::Movement => "movement",
            NotificationKind::Stationary => "stationary",
            NotificationKind::Status => "status",
            NotificationKind::Available => "available",
        }
    }
}

/// Flat key/value payload published to a tracker topic. Delivery is
/// at-most-once; publish failures are logged and never retried.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub fields: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: &str, content: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), title.to_string());
        fields.insert("content".to_string(), content.into());
        fields.insert("datetime".to_string(), Utc::now().timestamp_millis().to_string());
        Self { kind, fields }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}
