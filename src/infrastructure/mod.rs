//! Infrastructure layer
//!
//! Cross-cutting concerns like telemetry and service orchestration

pub mod service_container;
pub mod telemetry;

pub use service_container::ServiceContainer;
pub use telemetry::Telemetry;
