//! Flow Access REST transport
//!
//! Flow's access nodes expose events over plain HTTP, so a subscription is a
//! polling loop: read the latest sealed height, fetch events for the block
//! range not yet seen, decode each base64 JSON-CDC payload into a field map.

use async_trait::async_trait;
use base64::Engine;
use futures::stream;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ListenerConfig;
use crate::core::{ChainTransport, RawChainEvent, RawEventStream, TransportError};

/// Access nodes reject event queries spanning more blocks than this
pub const MAX_BLOCK_RANGE: u64 = 250;

#[derive(Debug, Deserialize)]
struct BlockEnvelope {
    header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    height: String,
}

#[derive(Debug, Deserialize)]
struct BlockEvents {
    block_height: String,
    #[serde(default)]
    events: Vec<FlowEvent>,
}

#[derive(Debug, Deserialize)]
struct FlowEvent {
    transaction_id: String,
    event_index: String,
    payload: String,
}

#[derive(Clone)]
pub struct FlowRestTransport {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

impl FlowRestTransport {
    pub fn new(base_url: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval,
        }
    }

    pub fn from_config(config: &ListenerConfig) -> Self {
        Self::new(config.access_node.clone(), Duration::from_millis(config.poll_interval_ms))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, TransportError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| TransportError::InvalidPayload(e.to_string()))
    }

    async fn sealed_height(&self) -> Result<u64, TransportError> {
        let blocks: Vec<BlockEnvelope> = self.get_json("/v1/blocks", &[("height", "sealed".to_string())]).await?;
        let block = blocks
            .first()
            .ok_or_else(|| TransportError::InvalidPayload("no sealed block returned".to_string()))?;
        parse_u64("height", &block.header.height)
    }

    async fn events_in_range(&self, event_name: &str, start: u64, end: u64) -> Result<Vec<RawChainEvent>, TransportError> {
        let blocks: Vec<BlockEvents> = self
            .get_json(
                "/v1/events",
                &[
                    ("type", event_name.to_string()),
                    ("start_height", start.to_string()),
                    ("end_height", end.to_string()),
                ],
            )
            .await?;

        raw_events(blocks)
    }
}

/// Flatten one `/v1/events` response into raw events in block order.
///
/// A payload that does not decode is passed on as its raw string, so the
/// event still reaches normalization and surfaces as malformed.
fn raw_events(blocks: Vec<BlockEvents>) -> Result<Vec<RawChainEvent>, TransportError> {
    let mut events = Vec::new();
    for block in blocks {
        let height = parse_u64("block_height", &block.block_height)?;
        for event in block.events {
            let index = parse_u64("event_index", &event.event_index)? as u32;
            let data = match decode_payload(&event.payload) {
                Ok(data) => data,
                Err(e) => {
                    warn!(
                        transaction_id = %event.transaction_id,
                        height,
                        index,
                        "Undecodable event payload: {}",
                        e
                    );
                    Value::String(event.payload)
                }
            };
            events.push(RawChainEvent::new(event.transaction_id, data).with_block(height, index));
        }
    }
    Ok(events)
}

struct PollState {
    transport: FlowRestTransport,
    event_name: String,
    next_height: u64,
    buffered: VecDeque<RawChainEvent>,
}

#[async_trait]
impl ChainTransport for FlowRestTransport {
    async fn subscribe(&self, event_name: &str) -> Result<RawEventStream, TransportError> {
        // Start after the current head; history is not replayed
        let head = self.sealed_height().await?;
        info!(event = %event_name, height = head, "Polling Flow access node from sealed height");

        let state = PollState {
            transport: self.clone(),
            event_name: event_name.to_string(),
            next_height: head + 1,
            buffered: VecDeque::new(),
        };

        let stream = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.buffered.pop_front() {
                    return Some((Ok(event), state));
                }

                tokio::time::sleep(state.transport.poll_interval).await;

                let sealed = match state.transport.sealed_height().await {
                    Ok(height) => height,
                    Err(e) => return Some((Err(e), state)),
                };
                if sealed < state.next_height {
                    continue;
                }

                let end = sealed.min(state.next_height + MAX_BLOCK_RANGE - 1);
                match state
                    .transport
                    .events_in_range(&state.event_name, state.next_height, end)
                    .await
                {
                    Ok(events) => {
                        debug!(
                            event = %state.event_name,
                            start = state.next_height,
                            end,
                            count = events.len(),
                            "Polled events"
                        );
                        state.next_height = end + 1;
                        state.buffered.extend(events);
                    }
                    Err(e) => return Some((Err(e), state)),
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &'static str {
        "flow-rest"
    }
}

fn parse_u64(field: &str, raw: &str) -> Result<u64, TransportError> {
    raw.parse::<u64>()
        .map_err(|e| TransportError::InvalidPayload(format!("{} `{}`: {}", field, raw, e)))
}

/// Decode a base64 JSON-CDC event payload into a `name -> value` map.
///
/// Field values keep their `{type, value}` envelopes; normalization strips
/// them.
pub fn decode_payload(payload: &str) -> Result<Value, TransportError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| TransportError::InvalidPayload(format!("payload is not base64: {}", e)))?;
    let cdc: Value = serde_json::from_slice(&bytes)
        .map_err(|e| TransportError::InvalidPayload(format!("payload is not JSON: {}", e)))?;

    let Some(fields) = cdc.pointer("/value/fields").and_then(Value::as_array) else {
        // Not an event envelope; hand it over untouched
        return Ok(cdc);
    };

    let mut data = Map::new();
    for field in fields {
        if let Some(name) = field.get("name").and_then(Value::as_str) {
            data.insert(name.to_string(), field.get("value").cloned().unwrap_or(Value::Null));
        }
    }
    Ok(Value::Object(data))
}
