//! Mock chain transport for tests and local development
//!
//! Two modes. Scripted: each `subscribe` for an event name pops the next
//! script queued for it, and unscripted calls get a stream that fails
//! immediately. Generator: unscripted calls get an endless stream of
//! synthetic Cadence payloads, one per interval.

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, info};

use crate::core::{ChainTransport, RawChainEvent, RawEventStream, TransportError};
use crate::events::EventKind;

type Item = Result<RawChainEvent, TransportError>;

enum Script {
    /// Yield the items, then stay open
    Open(Vec<Item>),
    /// Yield the items, then end
    Closed(Vec<Item>),
    /// Fail the subscribe call itself
    Fail(TransportError),
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<String, VecDeque<Script>>,
    calls: HashMap<String, usize>,
}

#[derive(Default)]
pub struct MockChainTransport {
    state: Mutex<MockState>,
    generator: Option<Duration>,
}

impl MockChainTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce a synthetic event every `interval` for any event name
    pub fn generator(interval: Duration) -> Self {
        info!("Mock transport: generating synthetic chain events every {:?}", interval);
        Self {
            state: Mutex::default(),
            generator: Some(interval),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, event_name: &str, script: Script) {
        self.state()
            .scripts
            .entry(event_name.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn script_open(&self, event_name: &str, items: Vec<Item>) {
        self.push(event_name, Script::Open(items));
    }

    pub fn script_closed(&self, event_name: &str, items: Vec<Item>) {
        self.push(event_name, Script::Closed(items));
    }

    pub fn script_failing(&self, event_name: &str, error: TransportError) {
        self.push(event_name, Script::Fail(error));
    }

    /// How many times `subscribe` was called for `event_name`
    pub fn subscribe_calls(&self, event_name: &str) -> usize {
        self.state().calls.get(event_name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ChainTransport for MockChainTransport {
    async fn subscribe(&self, event_name: &str) -> Result<RawEventStream, TransportError> {
        let script = {
            let mut state = self.state();
            *state.calls.entry(event_name.to_string()).or_default() += 1;
            state.scripts.get_mut(event_name).and_then(VecDeque::pop_front)
        };

        match script {
            Some(Script::Open(items)) => Ok(Box::pin(stream::iter(items).chain(stream::pending()))),
            Some(Script::Closed(items)) => Ok(Box::pin(stream::iter(items))),
            Some(Script::Fail(error)) => Err(error),
            None => match (self.generator, EventKind::from_qualified_name(event_name)) {
                (Some(interval), Some(kind)) => {
                    debug!(event = %event_name, "Mock transport: starting generator stream");
                    Ok(synthetic_stream(kind, interval))
                }
                _ => Ok(Box::pin(stream::iter(vec![Err(TransportError::Subscription(
                    "mock stream dropped".to_string(),
                ))]))),
            },
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

fn synthetic_stream(kind: EventKind, interval: Duration) -> RawEventStream {
    let ticks = IntervalStream::new(tokio::time::interval_at(Instant::now() + interval, interval));
    let stream = ticks.enumerate().map(move |(i, _)| {
        let n = i as u64 + 1;
        let raw = RawChainEvent::new(format!("{:064x}", n), synthetic_payload(kind, n)).with_block(1_000_000 + n, 0);
        Ok::<_, TransportError>(raw)
    });
    Box::pin(stream)
}

fn cadence(ty: &str, value: impl Into<Value>) -> Value {
    json!({ "type": ty, "value": value.into() })
}

fn address(n: u64) -> Value {
    cadence("Optional", cadence("Address", format!("0x{:016x}", n)))
}

/// Cadence JSON-CDC fields shaped like the access node's decoded payloads
pub fn synthetic_payload(kind: EventKind, n: u64) -> Value {
    let id = cadence("UInt64", n.to_string());
    let price = cadence("UFix64", format!("{}.00000000", 5 + n % 20));
    match kind {
        EventKind::CollectibleMinted => json!({
            "id": id,
            "creator": address(n % 7),
            "name": cadence("Optional", cadence("String", format!("Ownly #{}", n))),
        }),
        EventKind::CollectibleDeposit => json!({ "id": id, "to": address(n % 5) }),
        EventKind::CollectibleWithdraw => json!({ "id": id, "from": address(n % 3) }),
        EventKind::ListingAvailable => json!({
            "storefrontAddress": cadence("Address", format!("0x{:016x}", n % 11)),
            "listingResourceID": cadence("UInt64", (10_000 + n).to_string()),
            "nftID": id,
            "salePrice": price,
            "expiry": cadence("UInt64", "4102444800"),
        }),
        EventKind::ListingCompleted => json!({
            "listingResourceID": cadence("UInt64", (10_000 + n).to_string()),
            "purchased": cadence("Bool", n % 4 != 0),
            "nftID": id,
            "salePrice": cadence("Optional", price),
        }),
    }
}
