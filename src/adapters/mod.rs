//! Adapters layer
//!
//! Concrete implementations of the core ports.

pub mod flow;

pub use flow::{FlowRestTransport, MockChainTransport};
