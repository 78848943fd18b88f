//! Error handler instance: classify once, log by severity, notify subscribers

use futures::FutureExt;
use serde_json::{Map, Value};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::classify::{classify_with_context, Failure};
use super::taxonomy::{ErrorSeverity, OwnlyError};

/// Callback receiving errors meant for the user
pub type ErrorCallback = Arc<dyn Fn(&OwnlyError) + Send + Sync>;

/// Per-call handling options
#[derive(Debug, Clone)]
pub struct HandleOptions {
    pub context: Map<String, Value>,
    pub show_to_user: bool,
    pub log: bool,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            context: Map::new(),
            show_to_user: true,
            log: true,
        }
    }
}

impl HandleOptions {
    pub fn silent() -> Self {
        Self {
            show_to_user: false,
            ..Self::default()
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Central error funnel shared by every component.
///
/// Constructed once by the service container; UI bridges register through
/// [`ErrorHandler::on_error`].
#[derive(Default)]
pub struct ErrorHandler {
    callbacks: RwLock<Vec<ErrorCallback>>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for user-facing errors
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&OwnlyError) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Classify, log and (optionally) surface a failure
    pub fn handle(&self, failure: impl Into<Failure>, options: HandleOptions) -> OwnlyError {
        let classified = classify_with_context(failure, options.context);

        if options.log {
            log_error(&classified);
        }

        if options.show_to_user {
            self.notify(&classified);
        }

        classified
    }

    /// Funnel for failures nobody awaited; logged, never shown
    pub fn handle_unhandled(&self, failure: impl Into<Failure>) -> OwnlyError {
        self.handle(failure, HandleOptions::silent().with_context("unhandled", true))
    }

    /// Spawn a background task whose error or panic is routed through
    /// [`ErrorHandler::handle_unhandled`]
    pub fn spawn_supervised<F>(self: &Arc<Self>, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler = Arc::clone(self);
        tokio::spawn(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    handler.handle_unhandled(e.context(format!("task {} failed", name)));
                }
                Err(panic) => {
                    let message = panic_message(&panic);
                    handler.handle_unhandled(format!("task {} panicked: {}", name, message));
                }
            }
        })
    }

    fn notify(&self, error: &OwnlyError) {
        let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner).clone();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(error))).is_err() {
                warn!("Error callback panicked while handling {}", error.code);
            }
        }
    }
}

fn log_error(error: &OwnlyError) {
    match error.severity {
        ErrorSeverity::Critical | ErrorSeverity::High => error!(
            code = %error.code,
            category = %error.category,
            severity = %error.severity,
            retryable = error.retryable,
            original = error.original_error.as_deref().unwrap_or(""),
            "{}",
            error.message
        ),
        ErrorSeverity::Medium => warn!(
            code = %error.code,
            category = %error.category,
            retryable = error.retryable,
            "{}",
            error.message
        ),
        ErrorSeverity::Low => info!(code = %error.code, category = %error.category, "{}", error.message),
    }
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
