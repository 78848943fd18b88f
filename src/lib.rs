//! Ownly marketplace core services
//!
//! Blockchain event ingestion for Flow (listener, normalization, FIFO queue),
//! retry with backoff, a closed error taxonomy with classification, and
//! performance collection with threshold alerts.

pub mod adapters;
pub mod api;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod infrastructure;
pub mod performance;
pub mod retry;

// Re-export commonly used types
pub use config::OwnlyConfig;
pub use core::{CoreError, CoreResult};
pub use errors::{classify, ErrorHandler, OwnlyError};
pub use events::{BlockchainEvent, EventKind, EventListener, EventQueue};
pub use infrastructure::ServiceContainer;
pub use performance::PerformanceCollector;
pub use retry::{execute_with_retry, RetryConfig, RetryOptions};
