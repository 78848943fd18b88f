//! Recovery boundary and notification presentation
//!
//! The boundary is a plain state machine (catch, classify, offer retry, reset)
//! so any host supervisor can drive it; [`RecoveryBoundary::run`] is the thin
//! async adapter used by background tasks.

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::classify::{classify, Failure};
use super::taxonomy::{ErrorSeverity, OwnlyError};

/// Default number of automatic recovery attempts
pub const DEFAULT_MAX_RECOVERIES: u32 = 3;

/// How a classified error should be shown to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
    pub title: String,
    pub message: String,
    /// `None` keeps the notification until the user closes it
    pub auto_dismiss_after: Option<Duration>,
    pub show_retry: bool,
    pub suggested_actions: Vec<String>,
    pub help_url: Option<String>,
}

impl Presentation {
    pub fn for_error(error: &OwnlyError) -> Self {
        let title = match error.severity {
            ErrorSeverity::Critical => "Something went wrong",
            ErrorSeverity::High => "Error",
            ErrorSeverity::Medium => "Warning",
            ErrorSeverity::Low => "Notice",
        };

        Self {
            title: title.to_string(),
            message: error.user_message.clone(),
            auto_dismiss_after: error.severity.display_duration(),
            show_retry: error.retryable,
            suggested_actions: error.suggested_actions.clone(),
            help_url: error.help_url.clone(),
        }
    }
}

/// Catch / classify / retry state
#[derive(Debug, Clone)]
pub struct RecoveryBoundary {
    max_retries: u32,
    retry_count: u32,
    error: Option<OwnlyError>,
}

impl Default for RecoveryBoundary {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECOVERIES)
    }
}

impl RecoveryBoundary {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_count: 0,
            error: None,
        }
    }

    /// Record a failure; returns the classified error now held by the boundary
    pub fn capture(&mut self, failure: impl Into<Failure>) -> &OwnlyError {
        self.error.insert(classify(failure))
    }

    pub fn error(&self) -> Option<&OwnlyError> {
        self.error.as_ref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether a retry may be offered for the captured error
    pub fn can_retry(&self) -> bool {
        match &self.error {
            Some(error) => error.retryable && self.retry_count < self.max_retries,
            None => false,
        }
    }

    /// Consume one recovery attempt; returns false when none is left
    pub fn retry(&mut self) -> bool {
        if !self.can_retry() {
            return false;
        }
        self.retry_count += 1;
        self.error = None;
        true
    }

    /// Forget the failure and the attempt counter
    pub fn reset(&mut self) {
        self.retry_count = 0;
        self.error = None;
    }

    /// Run `operation` under the boundary, recovering automatically while
    /// retries remain
    pub async fn run<T, E, F, Fut>(&mut self, mut operation: F) -> Result<T, OwnlyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Failure>,
    {
        loop {
            match operation().await {
                Ok(value) => {
                    self.reset();
                    return Ok(value);
                }
                Err(e) => {
                    let code = self.capture(e).code;
                    if self.retry() {
                        debug!("Recovering from {} (attempt {}/{})", code, self.retry_count, self.max_retries);
                        continue;
                    }
                    warn!("Recovery boundary gave up on {} after {} attempts", code, self.retry_count);
                    let error = self.error.clone().unwrap_or_else(|| OwnlyError::system("recovery failed"));
                    return Err(error);
                }
            }
        }
    }
}
