use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Instance name used for configuration ownership arbitration and the
    /// unknown-sender SMS log. Must differ between cooperating instances.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    // TCP ingress
    /// TCP listener host
    #[serde(default = "default_tcp_host")]
    pub tcp_host: String,

    /// TCP listener port
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    // Scheduler
    /// Global tick cadence in seconds
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Minimum spacing between feed reconciliations per device, milliseconds
    #[serde(default = "default_feed_spacing_ms")]
    pub feed_spacing_ms: u64,

    /// Capacity of the feed message id dedup cache
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    // Modem
    /// Serial port of the GSM modem
    #[serde(default = "default_modem_port")]
    pub modem_port: String,

    /// Modem baud rate
    #[serde(default = "default_modem_baud")]
    pub modem_baud: u32,

    /// Delay before reopening the modem after a transport error, seconds
    #[serde(default = "default_modem_reconnect_secs")]
    pub modem_reconnect_secs: u64,

    // SMS routing
    /// Country code stripped from sender numbers during normalization
    #[serde(default = "default_country_code")]
    pub country_code: String,

    /// Carrier-injected delivery echo marker; inbound texts containing it
    /// carry no report and are dropped
    #[serde(default = "default_delivery_echo_marker")]
    pub delivery_echo_marker: String,

    // Geocoding
    /// Reverse geocoding endpoint
    #[serde(default = "default_geocoder_url")]
    pub geocoder_url: String,

    /// Reverse geocoding API key
    #[serde(default)]
    pub geocoder_api_key: String,

    // Cell tower geolocation
    /// Cell geolocation endpoint
    #[serde(default = "default_cell_lookup_url")]
    pub cell_lookup_url: String,

    /// Cell geolocation API token
    #[serde(default)]
    pub cell_lookup_token: String,

    // Polled feed
    /// Base URL of the SPOT Trace public feed
    #[serde(default = "default_feed_base_url")]
    pub feed_base_url: String,

    // Push notifications
    /// Push topic publish endpoint
    #[serde(default = "default_push_url")]
    pub push_url: String,

    /// Push service server key
    #[serde(default)]
    pub push_server_key: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_server_name() -> String {
    "rastro-1".to_string()
}

// TCP defaults
fn default_tcp_host() -> String {
    "0.0.0.0".to_string()
}

fn default_tcp_port() -> u16 {
    5001
}

// Scheduler defaults
fn default_tick_interval_secs() -> u64 {
    60
}

fn default_feed_spacing_ms() -> u64 {
    1000
}

fn default_dedup_capacity() -> usize {
    4096
}

// Modem defaults
fn default_modem_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_modem_baud() -> u32 {
    115_200
}

fn default_modem_reconnect_secs() -> u64 {
    5
}

// SMS defaults
fn default_country_code() -> String {
    "55".to_string()
}

fn default_delivery_echo_marker() -> String {
    "entregue".to_string()
}

// Collaborator endpoints
fn default_geocoder_url() -> String {
    "https://maps.googleapis.com/maps/api/geocode/json".to_string()
}

fn default_cell_lookup_url() -> String {
    "https://us1.unwiredlabs.com/v2/process.php".to_string()
}

fn default_feed_base_url() -> String {
    "https://api.findmespot.com/spot-main-web/consumer/rest-api/2.0/public/feed".to_string()
}

fn default_push_url() -> String {
    "https://fcm.googleapis.com/fcm/send".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("RASTRO"))
            .build()?
            .try_deserialize()
    }
}
