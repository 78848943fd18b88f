//! Core abstractions and types
//!
//! Foundational types, ports and error definitions shared by the event
//! pipeline, the retry layer and the performance collector. Nothing in here
//! depends on a concrete transport or storage backend.

pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used items
pub use error::{CoreError, CoreResult, ParseError, TransportError};
pub use traits::{ChainTransport, RawEventStream};
pub use types::{RawChainEvent, TimeRange};
