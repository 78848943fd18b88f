//! Blockchain event pipeline
//!
//! Listener (transport stream, normalization, reconnect) feeding an
//! in-process FIFO queue that dispatches to one processor per event type.

pub mod activity;
pub mod event;
pub mod listener;
pub mod normalize;
pub mod queue;

pub use activity::{ActivityEntry, ActivityFeed, ActivityKind};
pub use event::{BlockchainEvent, EventPayload};
pub use listener::{EventCallback, EventListener, ReconnectConfig, SubscriptionHandle};
pub use normalize::{normalize, EventKind, NormalizedEvent, NORMALIZATION_VERSION};
pub use queue::{processor_fn, EventProcessor, EventQueue, FnProcessor};
