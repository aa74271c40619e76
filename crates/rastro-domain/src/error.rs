use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("tracker not found: {0}")]
    TrackerNotFound(String),

    #[error("unsupported tracker model: {0}")]
    UnsupportedModel(String),

    #[error("geocoding failed: {0}")]
    Geocoding(String),

    #[error("cell geolocation failed: {0}")]
    CellLookup(String),

    #[error("sms dispatch failed: {0}")]
    SmsDispatch(String),

    #[error("notification publish failed: {0}")]
    Notification(String),

    #[error("feed fetch failed: {0}")]
    Feed(String),

    #[error("repository error: {0}")]
    Repository(#[from] anyhow::Error),
}

pub type DomainResult<T> = Result<T, DomainError>;
