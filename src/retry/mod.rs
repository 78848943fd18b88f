//! Retry executor with exponential backoff and jitter
//!
//! [`execute_with_retry`] re-runs a fallible async operation until it succeeds,
//! the failure is judged permanent, or the attempt budget is spent. The error
//! from the last attempt is always the one returned. The domain wrappers
//! ([`retry_api_call`], [`retry_transaction`], [`retry_ipfs`]) pin sensible
//! budgets and classify the final error exactly once.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::{CoreError, TransportError};
use crate::errors::{classify, ErrorCode, Failure, OwnlyError, UpstreamApiError};

/// Upper bound (exclusive) of the multiplicative jitter
pub const MAX_JITTER: f64 = 0.1;

/// Backoff settings for one call site
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Classified codes that are retried even when the error itself says otherwise
    pub retryable_error_codes: Vec<ErrorCode>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            retryable_error_codes: vec![
                ErrorCode::NetworkError,
                ErrorCode::NetworkTimeout,
                ErrorCode::ApiTimeout,
                ErrorCode::ApiServerError,
                ErrorCode::ApiRateLimited,
            ],
        }
    }
}

impl RetryConfig {
    /// Marketplace / Core API calls
    pub fn api() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            ..Self::default()
        }
    }

    /// Blockchain transactions are expensive to resubmit
    pub fn transaction() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(2000),
            ..Self::default()
        }
    }

    /// IPFS gateways are flaky and cheap to retry
    pub fn ipfs() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

/// Errors the executor knows how to judge
pub trait RetryableError {
    /// The classified form, when the error carries or maps to one
    fn classification(&self) -> Option<OwnlyError> {
        None
    }

    /// Text used by the message heuristic
    fn describe(&self) -> String;
}

impl RetryableError for OwnlyError {
    fn classification(&self) -> Option<OwnlyError> {
        Some(self.clone())
    }

    fn describe(&self) -> String {
        self.message.clone()
    }
}

impl RetryableError for anyhow::Error {
    fn classification(&self) -> Option<OwnlyError> {
        if let Some(classified) = self.downcast_ref::<OwnlyError>() {
            return Some(classified.clone());
        }
        self.downcast_ref::<UpstreamApiError>().map(|upstream| classify(upstream.clone()))
    }

    fn describe(&self) -> String {
        format!("{:#}", self)
    }
}

impl RetryableError for CoreError {
    fn describe(&self) -> String {
        self.to_string()
    }
}

impl RetryableError for TransportError {
    fn describe(&self) -> String {
        self.to_string()
    }
}

impl RetryableError for UpstreamApiError {
    fn classification(&self) -> Option<OwnlyError> {
        Some(classify(self.clone()))
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

impl RetryableError for String {
    fn describe(&self) -> String {
        self.clone()
    }
}

impl RetryableError for &str {
    fn describe(&self) -> String {
        self.to_string()
    }
}

type ShouldRetry<E> = Box<dyn Fn(&E, u32) -> bool + Send + Sync>;
type OnRetry<E> = Box<dyn Fn(u32, &E) + Send + Sync>;

/// Config plus optional hooks for one invocation
pub struct RetryOptions<E> {
    pub config: RetryConfig,
    should_retry: Option<ShouldRetry<E>>,
    on_retry: Option<OnRetry<E>>,
}

impl<E> Default for RetryOptions<E> {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl<E> RetryOptions<E> {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            should_retry: None,
            on_retry: None,
        }
    }

    /// Override the retryability decision entirely
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E, u32) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Box::new(predicate));
        self
    }

    /// Observe each failed attempt that is about to be retried
    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, &E) + Send + Sync + 'static,
    {
        self.on_retry = Some(Box::new(callback));
        self
    }
}

/// Run `operation` until it succeeds or the failure is final
pub async fn execute_with_retry<T, E, F, Fut>(mut operation: F, options: RetryOptions<E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    let config = &options.config;
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Operation succeeded after {} attempts", attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                let classified = e.classification();
                let retryable = match &options.should_retry {
                    Some(predicate) => predicate(&e, attempt),
                    None => classified
                        .as_ref()
                        .map_or_else(|| looks_transient(&e.describe()), |c| retryable_code(c, config)),
                };

                if !retryable || attempt >= max_attempts {
                    if retryable {
                        warn!("Operation exhausted {} attempts: {}", max_attempts, e.describe());
                    }
                    return Err(e);
                }

                let mut delay = backoff_delay(config, attempt);
                // Rate-limited responses tell us how long to stay away
                if let Some(retry_after) = classified.and_then(|c| c.retry_after) {
                    delay = delay.max(retry_after.min(config.max_delay));
                }
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after failure: {}",
                    e.describe()
                );

                if let Some(callback) = &options.on_retry {
                    callback(attempt, &e);
                }

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Default retryability decision
pub fn is_retryable<E: RetryableError>(error: &E, config: &RetryConfig) -> bool {
    match error.classification() {
        Some(classified) => retryable_code(&classified, config),
        None => looks_transient(&error.describe()),
    }
}

fn retryable_code(classified: &OwnlyError, config: &RetryConfig) -> bool {
    classified.retryable || config.retryable_error_codes.contains(&classified.code)
}

/// Message heuristic for unclassified errors
pub fn looks_transient(message: &str) -> bool {
    const PATTERNS: &[&str] = &[
        "network",
        "timeout",
        "timed out",
        "connection",
        "econnreset",
        "econnrefused",
        "etimedout",
        "socket hang up",
        "server error",
        "rate limit",
        "too many requests",
        "service unavailable",
        "bad gateway",
        "gateway timeout",
        "500",
        "502",
        "503",
        "504",
    ];

    let lower = message.to_lowercase();
    PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Delay before retrying after `attempt` (1-based) with a fresh jitter draw
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.0..MAX_JITTER);
    compute_delay(config, attempt, jitter)
}

/// `min(base * multiplier^(attempt-1) * (1 + jitter), max_delay)`
pub fn compute_delay(config: &RetryConfig, attempt: u32, jitter: f64) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let base_ms = config.base_delay.as_millis() as f64;
    let raw_ms = base_ms * config.backoff_multiplier.powi(exponent) * (1.0 + jitter);
    let capped_ms = raw_ms.min(config.max_delay.as_millis() as f64);
    Duration::from_millis(capped_ms.max(0.0) as u64)
}

async fn retry_classified<T, E, F, Fut>(operation: F, config: RetryConfig) -> Result<T, OwnlyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + Into<Failure>,
{
    execute_with_retry(operation, RetryOptions::new(config))
        .await
        .map_err(classify)
}

/// Core / marketplace API call: 3 attempts starting at 1s
pub async fn retry_api_call<T, E, F, Fut>(operation: F) -> Result<T, OwnlyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + Into<Failure>,
{
    retry_classified(operation, RetryConfig::api()).await
}

/// Transaction submission: 2 attempts starting at 2s
pub async fn retry_transaction<T, E, F, Fut>(operation: F) -> Result<T, OwnlyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + Into<Failure>,
{
    retry_classified(operation, RetryConfig::transaction()).await
}

/// IPFS upload / fetch: 4 attempts starting at 500ms
pub async fn retry_ipfs<T, E, F, Fut>(operation: F) -> Result<T, OwnlyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + Into<Failure>,
{
    retry_classified(operation, RetryConfig::ipfs()).await
}
