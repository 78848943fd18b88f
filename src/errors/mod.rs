//! Error classification layer
//!
//! Every external-facing failure ends up here exactly once: classified into an
//! [`OwnlyError`], logged according to its severity and, when it came from an
//! explicit user action, handed to the registered UI bridges.

pub mod boundary;
pub mod classify;
pub mod handler;
pub mod taxonomy;

pub use boundary::{Presentation, RecoveryBoundary};
pub use classify::{classify, classify_with_context, ApiErrorType, Failure, UpstreamApiError};
pub use handler::{ErrorHandler, HandleOptions};
pub use taxonomy::{ErrorCategory, ErrorCode, ErrorSeverity, OwnlyError};
