//! Centralized error types for the Ownly core

use thiserror::Error;

/// Main crate error type
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Normalization error: {0}")]
    Normalization(#[from] ParseError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Chain transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Access node returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Stream closed")]
    Closed,
}

/// Event payload normalization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("payload is null")]
    NullPayload,

    #[error("payload is not an object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Configuration(err.to_string())
    }
}

impl From<validator::ValidationErrors> for CoreError {
    fn from(err: validator::ValidationErrors) -> Self {
        CoreError::Configuration(err.to_string())
    }
}

impl From<prometheus::Error> for CoreError {
    fn from(err: prometheus::Error) -> Self {
        CoreError::Telemetry(err.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            TransportError::ConnectionFailed(err.to_string())
        } else {
            TransportError::Subscription(err.to_string())
        }
    }
}
