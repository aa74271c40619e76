use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("truncated frame: expected at least {expected} fields, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },

    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("malformed feed document: {0}")]
    MalformedFeed(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
