//! Failure classification
//!
//! Turns heterogeneous failures into an [`OwnlyError`]. Precedence is fixed:
//! already classified errors pass through untouched, known upstream API errors
//! go through an explicit lookup table, plain messages are matched against a
//! short list of substrings, and everything else becomes a critical system
//! error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

use super::taxonomy::OwnlyError;
use crate::core::{CoreError, TransportError};

/// Error kinds reported by the Dapper Core API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorType {
    AuthenticationError,
    AuthorizationError,
    ValidationError,
    NotFound,
    RateLimitExceeded,
    ServerError,
    NetworkError,
    Timeout,
}

/// Error object returned by the upstream marketplace API
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{error_type:?}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct UpstreamApiError {
    #[serde(rename = "type")]
    pub error_type: ApiErrorType,
    pub message: String,
    pub status: Option<u16>,
    /// Seconds the caller should wait before retrying, when the API says so
    pub retry_after_secs: Option<u64>,
}

impl UpstreamApiError {
    pub fn new(error_type: ApiErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            status: None,
            retry_after_secs: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }
}

/// Anything that can be handed to the classifier
#[derive(Debug, Clone)]
pub enum Failure {
    Classified(OwnlyError),
    Upstream(UpstreamApiError),
    Message(String),
    Unknown(Value),
}

impl From<OwnlyError> for Failure {
    fn from(err: OwnlyError) -> Self {
        Failure::Classified(err)
    }
}

impl From<UpstreamApiError> for Failure {
    fn from(err: UpstreamApiError) -> Self {
        Failure::Upstream(err)
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Failure::Message(message)
    }
}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Failure::Message(message.to_string())
    }
}

impl From<TransportError> for Failure {
    fn from(err: TransportError) -> Self {
        Failure::Message(err.to_string())
    }
}

impl From<CoreError> for Failure {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Other(inner) => Failure::from(inner),
            other => Failure::Message(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        if let Some(classified) = err.downcast_ref::<OwnlyError>() {
            return Failure::Classified(classified.clone());
        }
        if let Some(upstream) = err.downcast_ref::<UpstreamApiError>() {
            return Failure::Upstream(upstream.clone());
        }
        // Keep the whole context chain so substring matching sees the root cause
        Failure::Message(format!("{:#}", err))
    }
}

impl From<Value> for Failure {
    fn from(value: Value) -> Self {
        if let Ok(upstream) = serde_json::from_value::<UpstreamApiError>(value.clone()) {
            return Failure::Upstream(upstream);
        }
        match value {
            Value::String(message) => Failure::Message(message),
            Value::Object(ref fields) => match fields.get("message").and_then(Value::as_str) {
                Some(message) => Failure::Message(message.to_string()),
                None => Failure::Unknown(value),
            },
            other => Failure::Unknown(other),
        }
    }
}

/// Classify a failure
pub fn classify(failure: impl Into<Failure>) -> OwnlyError {
    classify_with_context(failure, Map::new())
}

/// Classify a failure, attaching call-site context to newly built errors.
///
/// Already classified errors are returned unchanged, context included.
pub fn classify_with_context(failure: impl Into<Failure>, context: Map<String, Value>) -> OwnlyError {
    match failure.into() {
        Failure::Classified(err) => err,
        Failure::Upstream(err) => from_upstream(&err).caused_by(err.to_string()).with_context(context),
        Failure::Message(message) => from_message(&message).caused_by(message).with_context(context),
        Failure::Unknown(value) => {
            let rendered = value.to_string();
            OwnlyError::system(format!("Unknown error: {}", rendered))
                .caused_by(rendered)
                .with_context(context)
        }
    }
}

/// Upstream API lookup table
fn from_upstream(err: &UpstreamApiError) -> OwnlyError {
    match err.error_type {
        ApiErrorType::AuthenticationError | ApiErrorType::AuthorizationError => {
            OwnlyError::api_unauthorized(err.message.clone())
        }
        ApiErrorType::RateLimitExceeded => {
            OwnlyError::api_rate_limited(err.retry_after_secs.map(Duration::from_secs))
        }
        ApiErrorType::ServerError => OwnlyError::api_server_error(err.message.clone()),
        ApiErrorType::NotFound => OwnlyError::api_not_found(err.message.clone()),
        ApiErrorType::ValidationError => OwnlyError::missing_field(err.message.clone()),
        ApiErrorType::NetworkError => OwnlyError::network_error(err.message.clone()),
        ApiErrorType::Timeout => OwnlyError::api_timeout(None),
    }
}

/// Substring heuristics for native errors
fn from_message(message: &str) -> OwnlyError {
    let lower = message.to_lowercase();

    if lower.contains("network") {
        OwnlyError::network_error(message)
    } else if lower.contains("timeout") || lower.contains("timed out") {
        OwnlyError::network_timeout()
    } else if lower.contains("signature") || lower.contains("rejected") || lower.contains("declined") {
        OwnlyError::signature_rejected()
    } else {
        OwnlyError::system(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity};
    use serde_json::json;

    #[test]
    fn test_classified_errors_pass_through() {
        let original = OwnlyError::nft_already_sold("7");
        let classified = classify(original.clone());
        assert_eq!(classified, original);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let inputs: Vec<Failure> = vec![
            "network unreachable".into(),
            "request timeout".into(),
            "User rejected signature".into(),
            "something odd".into(),
            UpstreamApiError::new(ApiErrorType::ServerError, "boom").into(),
            Failure::Unknown(json!(42)),
        ];

        for input in inputs {
            let once = classify(input);
            let twice = classify(once.clone());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_upstream_table() {
        let auth = classify(UpstreamApiError::new(ApiErrorType::AuthenticationError, "bad token"));
        assert_eq!(auth.code, ErrorCode::ApiUnauthorized);
        assert_eq!(auth.severity, ErrorSeverity::High);
        assert!(!auth.retryable);

        let limited = classify(
            UpstreamApiError::new(ApiErrorType::RateLimitExceeded, "slow down").with_retry_after(12),
        );
        assert_eq!(limited.code, ErrorCode::ApiRateLimited);
        assert_eq!(limited.severity, ErrorSeverity::Medium);
        assert!(limited.retryable);
        assert_eq!(limited.retry_after, Some(Duration::from_secs(12)));

        let server = classify(UpstreamApiError::new(ApiErrorType::ServerError, "500"));
        assert_eq!(server.category, ErrorCategory::Api);
        assert_eq!(server.severity, ErrorSeverity::High);
        assert!(server.retryable);
    }

    #[test]
    fn test_message_heuristics() {
        assert_eq!(classify("Network request failed").code, ErrorCode::NetworkError);
        assert_eq!(classify("operation timed out").code, ErrorCode::NetworkTimeout);
        assert_eq!(classify("Declined: User rejected signature").code, ErrorCode::SignatureRejected);
    }

    #[test]
    fn test_fallback_is_critical_system_error() {
        let err = classify("division by zero");
        assert_eq!(err.code, ErrorCode::SystemError);
        assert_eq!(err.category, ErrorCategory::System);
        assert_eq!(err.severity, ErrorSeverity::Critical);
        assert!(err.retryable);
        assert_eq!(err.original_error.as_deref(), Some("division by zero"));
    }

    #[test]
    fn test_anyhow_downcasts_to_classified() {
        let err = anyhow::Error::new(OwnlyError::wallet_not_connected());
        assert_eq!(classify(err).code, ErrorCode::WalletNotConnected);

        let wrapped = anyhow::Error::new(UpstreamApiError::new(ApiErrorType::NotFound, "listing 9"));
        assert_eq!(classify(wrapped).code, ErrorCode::ApiNotFound);
    }

    #[test]
    fn test_json_values() {
        let upstream = json!({ "type": "TIMEOUT", "message": "gateway" });
        assert_eq!(classify(upstream).code, ErrorCode::ApiTimeout);

        let with_message = json!({ "message": "network down" });
        assert_eq!(classify(with_message).code, ErrorCode::NetworkError);

        let opaque = classify(json!([1, 2]));
        assert_eq!(opaque.code, ErrorCode::SystemError);
    }

    #[test]
    fn test_context_only_attached_to_new_errors() {
        let mut context = Map::new();
        context.insert("endpoint".to_string(), json!("/api/listings"));

        let fresh = classify_with_context("server exploded", context.clone());
        assert_eq!(fresh.context["endpoint"], "/api/listings");

        let existing = OwnlyError::network_offline();
        let passed = classify_with_context(existing.clone(), context);
        assert!(passed.context.is_empty());
        assert_eq!(passed, existing);
    }
}
