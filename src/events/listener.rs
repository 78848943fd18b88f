//! Chain event listener
//!
//! Holds one subscription task per qualified event name. Each task reads the
//! transport stream, normalizes payloads and hands them to the callback. When
//! the stream fails, ends, or cannot be opened, the task re-subscribes with
//! capped exponential backoff. After `max_retries` consecutive failed
//! re-subscriptions it gives up and drops out of the active set. A delivered
//! event resets the count.

use futures::StreamExt;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::event::{BlockchainEvent, EventPayload};
use super::normalize::{EventKind, NormalizedEvent};
use super::queue::EventQueue;
use crate::config::{ListenerConfig, ReconnectSettings};
use crate::core::ChainTransport;
use crate::infrastructure::Telemetry;

pub type EventCallback = Arc<dyn Fn(BlockchainEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&ReconnectSettings::default())
    }
}

impl From<&ReconnectSettings> for ReconnectConfig {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
        }
    }
}

impl ReconnectConfig {
    /// `min(base * multiplier^attempt, max)`, attempt counted from zero
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

struct Subscription {
    id: u64,
    task: AbortHandle,
}

struct ListenerInner {
    transport: Arc<dyn ChainTransport>,
    collectible_address: String,
    storefront_address: String,
    reconnect: ReconnectConfig,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    next_id: AtomicU64,
    telemetry: Option<Arc<Telemetry>>,
}

impl ListenerInner {
    fn subscriptions(&self) -> MutexGuard<'_, HashMap<String, Subscription>> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the entry only if it still belongs to subscription `id`
    fn release(&self, event_name: &str, id: u64) -> Option<Subscription> {
        let mut subscriptions = self.subscriptions();
        match subscriptions.get(event_name) {
            Some(entry) if entry.id == id => subscriptions.remove(event_name),
            _ => None,
        }
    }
}

/// Returned by every subscribe call; dropping it does not unsubscribe
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    event_name: String,
    id: u64,
    listener: Weak<ListenerInner>,
}

impl std::fmt::Debug for ListenerInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerInner")
            .field("transport", &self.transport.name())
            .finish_non_exhaustive()
    }
}

impl SubscriptionHandle {
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Cancel the stream and any pending backoff timer. Safe to call at any
    /// time, including after the subscription gave up or was replaced.
    pub fn unsubscribe(&self) {
        if let Some(listener) = self.listener.upgrade() {
            if let Some(subscription) = listener.release(&self.event_name, self.id) {
                subscription.task.abort();
                debug!(event = %self.event_name, "Unsubscribed");
            }
        }
    }
}

#[derive(Clone)]
pub struct EventListener {
    inner: Arc<ListenerInner>,
}

impl EventListener {
    pub fn new(transport: Arc<dyn ChainTransport>, config: &ListenerConfig) -> Self {
        Self::build(transport, config, None)
    }

    pub fn build(transport: Arc<dyn ChainTransport>, config: &ListenerConfig, telemetry: Option<Arc<Telemetry>>) -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                transport,
                collectible_address: config.collectible_address.clone(),
                storefront_address: config.storefront_address.clone(),
                reconnect: ReconnectConfig::from(&config.reconnect),
                subscriptions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                telemetry,
            }),
        }
    }

    /// Fully qualified Flow event type for `kind`
    pub fn event_name(&self, kind: EventKind) -> String {
        let address = if kind.is_storefront() {
            &self.inner.storefront_address
        } else {
            &self.inner.collectible_address
        };
        kind.qualified_name(address)
    }

    /// Subscribe to `kind`. A second subscription to the same event replaces
    /// the first. Must be called from within a Tokio runtime.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionHandle
    where
        F: Fn(BlockchainEvent) + Send + Sync + 'static,
    {
        let event_name = self.event_name(kind);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let task = SubscriptionTask {
            event_name: event_name.clone(),
            id,
            kind,
            callback: Arc::new(callback),
            transport: Arc::clone(&self.inner.transport),
            reconnect: self.inner.reconnect.clone(),
            telemetry: self.inner.telemetry.clone(),
            listener: Arc::downgrade(&self.inner),
        };

        // Hold the lock across spawn so the task cannot release itself
        // before it is registered
        let mut subscriptions = self.inner.subscriptions();
        let handle = tokio::spawn(task.run()).abort_handle();
        if let Some(previous) = subscriptions.insert(event_name.clone(), Subscription { id, task: handle }) {
            previous.task.abort();
            debug!(event = %event_name, "Replaced existing subscription");
        }
        info!(event = %event_name, "Subscribed");

        SubscriptionHandle {
            event_name,
            id,
            listener: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscribe_to_minted<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(BlockchainEvent) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::CollectibleMinted, callback)
    }

    pub fn subscribe_to_deposits<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(BlockchainEvent) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::CollectibleDeposit, callback)
    }

    pub fn subscribe_to_withdrawals<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(BlockchainEvent) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::CollectibleWithdraw, callback)
    }

    pub fn subscribe_to_listings<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(BlockchainEvent) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::ListingAvailable, callback)
    }

    /// Completed listings that ended in a sale. Cancelled or expired
    /// listings are skipped; malformed payloads are passed through.
    pub fn subscribe_to_purchases<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(BlockchainEvent) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::ListingCompleted, move |event| {
            let purchased = match &event.payload {
                EventPayload::Normalized(NormalizedEvent::ListingCompleted(listing)) => listing.purchased,
                _ => true,
            };
            if purchased {
                callback(event);
            }
        })
    }

    /// Forward every event of `kind` into `queue`
    pub fn pipe_to_queue(&self, kind: EventKind, queue: &EventQueue) -> SubscriptionHandle {
        let queue = queue.clone();
        self.subscribe(kind, move |event| queue.enqueue(event))
    }

    /// Qualified names of the subscriptions currently held, sorted
    pub fn active_subscriptions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.subscriptions().keys().cloned().collect();
        names.sort();
        names
    }

    /// Cancel everything. Never fails.
    pub fn unsubscribe_all(&self) {
        let drained: Vec<(String, Subscription)> = self.inner.subscriptions().drain().collect();
        for (event_name, subscription) in drained {
            subscription.task.abort();
            debug!(event = %event_name, "Unsubscribed");
        }
    }
}

struct SubscriptionTask {
    event_name: String,
    id: u64,
    kind: EventKind,
    callback: EventCallback,
    transport: Arc<dyn ChainTransport>,
    reconnect: ReconnectConfig,
    telemetry: Option<Arc<Telemetry>>,
    listener: Weak<ListenerInner>,
}

impl SubscriptionTask {
    async fn run(self) {
        let mut attempt: u32 = 0;

        loop {
            match self.transport.subscribe(&self.event_name).await {
                Ok(mut stream) => {
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(raw) => {
                                let event = BlockchainEvent::from_raw(self.kind, &raw);
                                if event.payload.is_malformed() {
                                    warn!(event = %self.event_name, tx = %event.transaction_id, "Delivering malformed event payload");
                                }
                                if self.deliver(event) {
                                    attempt = 0;
                                }
                            }
                            Err(e) => {
                                warn!(event = %self.event_name, "Subscription stream error: {}", e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!(event = %self.event_name, "Subscribe failed: {}", e),
            }

            if attempt >= self.reconnect.max_retries {
                warn!(
                    event = %self.event_name,
                    retries = attempt,
                    "Giving up on subscription after repeated failures"
                );
                if let Some(listener) = self.listener.upgrade() {
                    listener.release(&self.event_name, self.id);
                }
                return;
            }

            let delay = self.reconnect.delay_for(attempt);
            attempt += 1;
            if let Some(telemetry) = &self.telemetry {
                telemetry.listener_reconnects.with_label_values(&[self.event_name.as_str()]).inc();
            }
            info!(
                event = %self.event_name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Re-subscribing"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn deliver(&self, event: BlockchainEvent) -> bool {
        let callback = &self.callback;
        match catch_unwind(AssertUnwindSafe(|| callback(event))) {
            Ok(()) => true,
            Err(_) => {
                warn!(event = %self.event_name, "Event callback panicked");
                false
            }
        }
    }
}
