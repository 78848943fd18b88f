//! Closed error taxonomy surfaced to users and operators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

const HELP_BASE_URL: &str = "https://ownly.market/help";

/// Broad failure domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Wallet,
    Transaction,
    Api,
    Validation,
    Network,
    Ipfs,
    Marketplace,
    System,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Wallet => "WALLET",
            ErrorCategory::Transaction => "TRANSACTION",
            ErrorCategory::Api => "API",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::Ipfs => "IPFS",
            ErrorCategory::Marketplace => "MARKETPLACE",
            ErrorCategory::System => "SYSTEM",
        };
        f.write_str(label)
    }
}

/// Severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// How long a notification for this severity stays on screen.
    ///
    /// `None` means it never auto-dismisses.
    pub fn display_duration(&self) -> Option<Duration> {
        match self {
            ErrorSeverity::Critical => None,
            ErrorSeverity::High => Some(Duration::from_secs(10)),
            ErrorSeverity::Medium => Some(Duration::from_secs(7)),
            ErrorSeverity::Low => Some(Duration::from_secs(5)),
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorSeverity::Low => "LOW",
            ErrorSeverity::Medium => "MEDIUM",
            ErrorSeverity::High => "HIGH",
            ErrorSeverity::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

/// Machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Wallet
    WalletNotConnected,
    WalletConnectionFailed,
    SignatureRejected,
    InsufficientFunds,
    // Transaction
    TransactionFailed,
    TransactionTimeout,
    // API
    ApiTimeout,
    ApiRateLimited,
    ApiUnauthorized,
    ApiServerError,
    ApiNotFound,
    // Validation
    InvalidAddress,
    InvalidNftId,
    MissingRequiredField,
    // Network
    NetworkOffline,
    NetworkTimeout,
    NetworkError,
    // IPFS
    IpfsUploadFailed,
    IpfsFetchFailed,
    // Marketplace
    NftNotForSale,
    NftAlreadySold,
    // System
    SystemError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::WalletNotConnected => "WALLET_NOT_CONNECTED",
            ErrorCode::WalletConnectionFailed => "WALLET_CONNECTION_FAILED",
            ErrorCode::SignatureRejected => "SIGNATURE_REJECTED",
            ErrorCode::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorCode::TransactionFailed => "TRANSACTION_FAILED",
            ErrorCode::TransactionTimeout => "TRANSACTION_TIMEOUT",
            ErrorCode::ApiTimeout => "API_TIMEOUT",
            ErrorCode::ApiRateLimited => "API_RATE_LIMITED",
            ErrorCode::ApiUnauthorized => "API_UNAUTHORIZED",
            ErrorCode::ApiServerError => "API_SERVER_ERROR",
            ErrorCode::ApiNotFound => "API_NOT_FOUND",
            ErrorCode::InvalidAddress => "INVALID_ADDRESS",
            ErrorCode::InvalidNftId => "INVALID_NFT_ID",
            ErrorCode::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            ErrorCode::NetworkOffline => "NETWORK_OFFLINE",
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::IpfsUploadFailed => "IPFS_UPLOAD_FAILED",
            ErrorCode::IpfsFetchFailed => "IPFS_FETCH_FAILED",
            ErrorCode::NftNotForSale => "NFT_NOT_FOR_SALE",
            ErrorCode::NftAlreadySold => "NFT_ALREADY_SOLD",
            ErrorCode::SystemError => "SYSTEM_ERROR",
        }
    }

    /// Category every code belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::WalletNotConnected
            | ErrorCode::WalletConnectionFailed
            | ErrorCode::SignatureRejected
            | ErrorCode::InsufficientFunds => ErrorCategory::Wallet,
            ErrorCode::TransactionFailed | ErrorCode::TransactionTimeout => ErrorCategory::Transaction,
            ErrorCode::ApiTimeout
            | ErrorCode::ApiRateLimited
            | ErrorCode::ApiUnauthorized
            | ErrorCode::ApiServerError
            | ErrorCode::ApiNotFound => ErrorCategory::Api,
            ErrorCode::InvalidAddress | ErrorCode::InvalidNftId | ErrorCode::MissingRequiredField => {
                ErrorCategory::Validation
            }
            ErrorCode::NetworkOffline | ErrorCode::NetworkTimeout | ErrorCode::NetworkError => {
                ErrorCategory::Network
            }
            ErrorCode::IpfsUploadFailed | ErrorCode::IpfsFetchFailed => ErrorCategory::Ipfs,
            ErrorCode::NftNotForSale | ErrorCode::NftAlreadySold => ErrorCategory::Marketplace,
            ErrorCode::SystemError => ErrorCategory::System,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully classified failure.
///
/// Built once through one of the factory constructors below and never mutated
/// afterwards; classification of an `OwnlyError` returns it unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct OwnlyError {
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
    pub user_message: String,
    pub context: Map<String, Value>,
    pub original_error: Option<String>,
    pub retryable: bool,
    #[serde(default, with = "optional_millis")]
    pub retry_after: Option<Duration>,
    pub actionable: bool,
    pub suggested_actions: Vec<String>,
    pub help_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Private builder so every factory spells out the same fields
struct Blueprint {
    code: ErrorCode,
    severity: ErrorSeverity,
    message: String,
    user_message: &'static str,
    retryable: bool,
    actionable: bool,
    actions: &'static [&'static str],
    help: Option<&'static str>,
}

impl Blueprint {
    fn build(self) -> OwnlyError {
        OwnlyError {
            code: self.code,
            category: self.code.category(),
            severity: self.severity,
            message: self.message,
            user_message: self.user_message.to_string(),
            context: Map::new(),
            original_error: None,
            retryable: self.retryable,
            retry_after: None,
            actionable: self.actionable,
            suggested_actions: self.actions.iter().map(|a| a.to_string()).collect(),
            help_url: self.help.map(|path| format!("{}/{}", HELP_BASE_URL, path)),
            timestamp: Utc::now(),
        }
    }
}

impl OwnlyError {
    // Wallet

    pub fn wallet_not_connected() -> Self {
        Blueprint {
            code: ErrorCode::WalletNotConnected,
            severity: ErrorSeverity::Medium,
            message: "Wallet is not connected".to_string(),
            user_message: "Please connect your wallet to continue.",
            retryable: false,
            actionable: true,
            actions: &["Connect your wallet", "Refresh the page and try again"],
            help: Some("wallet-connection"),
        }
        .build()
    }

    pub fn wallet_connection_failed(reason: impl Into<String>) -> Self {
        Blueprint {
            code: ErrorCode::WalletConnectionFailed,
            severity: ErrorSeverity::High,
            message: format!("Wallet connection failed: {}", reason.into()),
            user_message: "We couldn't connect to your wallet.",
            retryable: true,
            actionable: true,
            actions: &[
                "Make sure your wallet extension is unlocked",
                "Disable conflicting wallet extensions",
                "Try connecting again",
            ],
            help: Some("wallet-connection"),
        }
        .build()
    }

    pub fn signature_rejected() -> Self {
        Blueprint {
            code: ErrorCode::SignatureRejected,
            severity: ErrorSeverity::Low,
            message: "User rejected the signature request".to_string(),
            user_message: "The transaction was cancelled in your wallet.",
            retryable: false,
            actionable: true,
            actions: &["Approve the request in your wallet to continue"],
            help: None,
        }
        .build()
    }

    pub fn insufficient_funds(required: Option<String>) -> Self {
        let message = match &required {
            Some(amount) => format!("Insufficient funds: {} required", amount),
            None => "Insufficient funds".to_string(),
        };
        let mut error = Blueprint {
            code: ErrorCode::InsufficientFunds,
            severity: ErrorSeverity::Medium,
            message,
            user_message: "Your wallet balance is too low for this purchase.",
            retryable: false,
            actionable: true,
            actions: &["Add funds to your wallet", "Choose a lower priced item"],
            help: Some("funding-your-wallet"),
        }
        .build();
        if let Some(amount) = required {
            error.context.insert("required".to_string(), Value::String(amount));
        }
        error
    }

    // Transaction

    pub fn transaction_failed(reason: impl Into<String>, transaction_id: Option<String>) -> Self {
        let mut error = Blueprint {
            code: ErrorCode::TransactionFailed,
            severity: ErrorSeverity::High,
            message: format!("Transaction failed: {}", reason.into()),
            user_message: "The blockchain transaction failed.",
            retryable: true,
            actionable: true,
            actions: &["Check your wallet balance", "Try the transaction again"],
            help: Some("transactions"),
        }
        .build();
        if let Some(id) = transaction_id {
            error.context.insert("transactionId".to_string(), Value::String(id));
        }
        error
    }

    pub fn transaction_timeout(transaction_id: Option<String>) -> Self {
        let mut error = Blueprint {
            code: ErrorCode::TransactionTimeout,
            severity: ErrorSeverity::High,
            message: "Transaction was not sealed in time".to_string(),
            user_message: "The transaction is taking longer than expected.",
            retryable: true,
            actionable: true,
            actions: &[
                "Check the transaction status in a block explorer",
                "Wait a few minutes before trying again",
            ],
            help: Some("transactions"),
        }
        .build();
        if let Some(id) = transaction_id {
            error.context.insert("transactionId".to_string(), Value::String(id));
        }
        error
    }

    // API

    pub fn api_timeout(endpoint: Option<String>) -> Self {
        let mut error = Blueprint {
            code: ErrorCode::ApiTimeout,
            severity: ErrorSeverity::Medium,
            message: "API request timed out".to_string(),
            user_message: "The server took too long to respond.",
            retryable: true,
            actionable: true,
            actions: &["Try again in a moment"],
            help: None,
        }
        .build();
        if let Some(endpoint) = endpoint {
            error.context.insert("endpoint".to_string(), Value::String(endpoint));
        }
        error
    }

    pub fn api_rate_limited(retry_after: Option<Duration>) -> Self {
        let mut error = Blueprint {
            code: ErrorCode::ApiRateLimited,
            severity: ErrorSeverity::Medium,
            message: "API rate limit exceeded".to_string(),
            user_message: "Too many requests. Please slow down.",
            retryable: true,
            actionable: true,
            actions: &["Wait a moment before trying again"],
            help: None,
        }
        .build();
        error.retry_after = retry_after;
        error
    }

    pub fn api_unauthorized(message: impl Into<String>) -> Self {
        Blueprint {
            code: ErrorCode::ApiUnauthorized,
            severity: ErrorSeverity::High,
            message: message.into(),
            user_message: "Your session is not authorized for this action.",
            retryable: false,
            actionable: true,
            actions: &["Sign in again", "Reconnect your wallet"],
            help: Some("account-access"),
        }
        .build()
    }

    pub fn api_server_error(message: impl Into<String>) -> Self {
        Blueprint {
            code: ErrorCode::ApiServerError,
            severity: ErrorSeverity::High,
            message: message.into(),
            user_message: "Something went wrong on our side.",
            retryable: true,
            actionable: false,
            actions: &["Try again in a few minutes"],
            help: None,
        }
        .build()
    }

    pub fn api_not_found(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        let mut error = Blueprint {
            code: ErrorCode::ApiNotFound,
            severity: ErrorSeverity::Low,
            message: format!("Resource not found: {}", resource),
            user_message: "We couldn't find what you were looking for.",
            retryable: false,
            actionable: false,
            actions: &["Check the link and try again"],
            help: None,
        }
        .build();
        error.context.insert("resource".to_string(), Value::String(resource));
        error
    }

    // Validation

    pub fn invalid_address(address: impl Into<String>) -> Self {
        let address = address.into();
        let mut error = Blueprint {
            code: ErrorCode::InvalidAddress,
            severity: ErrorSeverity::Low,
            message: format!("Invalid Flow address: {}", address),
            user_message: "That doesn't look like a valid Flow address.",
            retryable: false,
            actionable: true,
            actions: &["Flow addresses start with 0x followed by 16 hex characters"],
            help: None,
        }
        .build();
        error.context.insert("address".to_string(), Value::String(address));
        error
    }

    pub fn invalid_nft_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let mut error = Blueprint {
            code: ErrorCode::InvalidNftId,
            severity: ErrorSeverity::Low,
            message: format!("Invalid NFT id: {}", id),
            user_message: "That NFT id is not valid.",
            retryable: false,
            actionable: true,
            actions: &["NFT ids are non-negative integers"],
            help: None,
        }
        .build();
        error.context.insert("nftId".to_string(), Value::String(id));
        error
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        let field = field.into();
        let mut error = Blueprint {
            code: ErrorCode::MissingRequiredField,
            severity: ErrorSeverity::Low,
            message: format!("Missing required field: {}", field),
            user_message: "Some required information is missing.",
            retryable: false,
            actionable: true,
            actions: &["Fill in all required fields"],
            help: None,
        }
        .build();
        error.context.insert("field".to_string(), Value::String(field));
        error
    }

    // Network

    pub fn network_offline() -> Self {
        Blueprint {
            code: ErrorCode::NetworkOffline,
            severity: ErrorSeverity::High,
            message: "Network is offline".to_string(),
            user_message: "You appear to be offline.",
            retryable: true,
            actionable: true,
            actions: &["Check your internet connection"],
            help: None,
        }
        .build()
    }

    pub fn network_timeout() -> Self {
        Blueprint {
            code: ErrorCode::NetworkTimeout,
            severity: ErrorSeverity::Medium,
            message: "Network request timed out".to_string(),
            user_message: "The connection timed out.",
            retryable: true,
            actionable: true,
            actions: &["Check your internet connection", "Try again"],
            help: None,
        }
        .build()
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        Blueprint {
            code: ErrorCode::NetworkError,
            severity: ErrorSeverity::High,
            message: message.into(),
            user_message: "A network error occurred.",
            retryable: true,
            actionable: true,
            actions: &["Check your internet connection", "Try again"],
            help: None,
        }
        .build()
    }

    // IPFS

    pub fn ipfs_upload_failed(reason: impl Into<String>) -> Self {
        Blueprint {
            code: ErrorCode::IpfsUploadFailed,
            severity: ErrorSeverity::High,
            message: format!("IPFS upload failed: {}", reason.into()),
            user_message: "We couldn't upload your file.",
            retryable: true,
            actionable: true,
            actions: &["Check the file size and format", "Try uploading again"],
            help: Some("uploading-media"),
        }
        .build()
    }

    pub fn ipfs_fetch_failed(cid: impl Into<String>) -> Self {
        let cid = cid.into();
        let mut error = Blueprint {
            code: ErrorCode::IpfsFetchFailed,
            severity: ErrorSeverity::Medium,
            message: format!("IPFS fetch failed for {}", cid),
            user_message: "We couldn't load this item's media.",
            retryable: true,
            actionable: false,
            actions: &["Refresh the page"],
            help: None,
        }
        .build();
        error.context.insert("cid".to_string(), Value::String(cid));
        error
    }

    // Marketplace

    pub fn nft_not_for_sale(nft_id: impl Into<String>) -> Self {
        let nft_id = nft_id.into();
        let mut error = Blueprint {
            code: ErrorCode::NftNotForSale,
            severity: ErrorSeverity::Low,
            message: format!("NFT {} is not listed for sale", nft_id),
            user_message: "This item is no longer for sale.",
            retryable: false,
            actionable: true,
            actions: &["Browse other listings"],
            help: None,
        }
        .build();
        error.context.insert("nftId".to_string(), Value::String(nft_id));
        error
    }

    pub fn nft_already_sold(nft_id: impl Into<String>) -> Self {
        let nft_id = nft_id.into();
        let mut error = Blueprint {
            code: ErrorCode::NftAlreadySold,
            severity: ErrorSeverity::Medium,
            message: format!("NFT {} has already been sold", nft_id),
            user_message: "Someone else bought this item first.",
            retryable: false,
            actionable: true,
            actions: &["Browse other listings"],
            help: None,
        }
        .build();
        error.context.insert("nftId".to_string(), Value::String(nft_id));
        error
    }

    // System

    pub fn system(message: impl Into<String>) -> Self {
        Blueprint {
            code: ErrorCode::SystemError,
            severity: ErrorSeverity::Critical,
            message: message.into(),
            user_message: "An unexpected error occurred.",
            retryable: true,
            actionable: false,
            actions: &["Refresh the page", "Contact support if the problem persists"],
            help: Some("support"),
        }
        .build()
    }

    /// Attach the stringified source failure
    pub(crate) fn caused_by(mut self, original: impl Into<String>) -> Self {
        self.original_error = Some(original.into());
        self
    }

    /// Attach call-site context; only used while the error is being built
    pub(crate) fn with_context(mut self, context: Map<String, Value>) -> Self {
        for (key, value) in context {
            self.context.entry(key).or_insert(value);
        }
        self
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_map_to_their_category() {
        assert_eq!(ErrorCode::SignatureRejected.category(), ErrorCategory::Wallet);
        assert_eq!(ErrorCode::ApiRateLimited.category(), ErrorCategory::Api);
        assert_eq!(ErrorCode::NftAlreadySold.category(), ErrorCategory::Marketplace);
        assert_eq!(OwnlyError::ipfs_fetch_failed("bafy").category, ErrorCategory::Ipfs);
    }

    #[test]
    fn test_severity_display_durations() {
        assert_eq!(ErrorSeverity::Critical.display_duration(), None);
        assert_eq!(ErrorSeverity::High.display_duration(), Some(Duration::from_secs(10)));
        assert_eq!(ErrorSeverity::Medium.display_duration(), Some(Duration::from_secs(7)));
        assert_eq!(ErrorSeverity::Low.display_duration(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_serializes_codes_in_screaming_case() {
        let error = OwnlyError::invalid_nft_id("abc");
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["code"], "INVALID_NFT_ID");
        assert_eq!(json["category"], "VALIDATION");
        assert_eq!(json["severity"], "LOW");
        assert_eq!(json["context"]["nftId"], "abc");
    }

    #[test]
    fn test_rate_limit_keeps_retry_after() {
        let error = OwnlyError::api_rate_limited(Some(Duration::from_secs(30)));
        assert!(error.retryable);
        assert_eq!(error.retry_after, Some(Duration::from_secs(30)));
        assert_eq!(error.to_string(), "API_RATE_LIMITED: API rate limit exceeded");
    }
}
