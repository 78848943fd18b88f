//! Core trait abstractions (ports)

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use super::error::TransportError;
use super::types::RawChainEvent;

/// Raw event stream handed out by a transport subscription
pub type RawEventStream = Pin<Box<dyn Stream<Item = Result<RawChainEvent, TransportError>> + Send>>;

/// Chain transport port - push-based event subscription by qualified event name
///
/// Dropping the returned stream is the unsubscribe operation.
#[async_trait]
pub trait ChainTransport: Send + Sync {
    /// Open a subscription to `event_name` (e.g. `A.0x1234.Collectible.Minted`)
    async fn subscribe(&self, event_name: &str) -> Result<RawEventStream, TransportError>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}
