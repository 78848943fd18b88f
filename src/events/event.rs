//! Blockchain event model

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::normalize::{normalize, EventKind, NormalizedEvent};
use crate::core::{ParseError, RawChainEvent};

/// What the listener made of a raw payload
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Normalized(NormalizedEvent),
    /// Payload failed normalization; `data` holds `{ "rawData": ... }`
    Malformed { error: ParseError },
    /// Built by hand rather than from a chain payload
    Untyped,
}

impl EventPayload {
    pub fn is_malformed(&self) -> bool {
        matches!(self, EventPayload::Malformed { .. })
    }
}

/// Event flowing from the listener through the queue to processors.
///
/// Not deduplicated: `(transaction_id, event_index)` is the only identity and
/// processors are expected to be idempotent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub transaction_id: String,
    pub block_height: Option<u64>,
    pub event_index: Option<u32>,
    pub data: Map<String, Value>,
    #[serde(skip)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl BlockchainEvent {
    pub fn new(event_type: impl Into<String>, transaction_id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            transaction_id: transaction_id.into(),
            block_height: None,
            event_index: None,
            data,
            payload: EventPayload::Untyped,
            timestamp: Utc::now(),
        }
    }

    /// Normalize a raw chain event. Never fails: bad payloads come back as
    /// [`EventPayload::Malformed`].
    pub fn from_raw(kind: EventKind, raw: &RawChainEvent) -> Self {
        let (data, payload) = match normalize(kind, raw) {
            Ok(normalized) => (normalized.to_data(), EventPayload::Normalized(normalized)),
            Err(error) => {
                let mut data = Map::new();
                data.insert("rawData".to_string(), raw.data.clone());
                (data, EventPayload::Malformed { error })
            }
        };

        Self {
            event_type: kind.as_str().to_string(),
            transaction_id: raw.transaction_id.clone(),
            block_height: raw.block_height,
            event_index: raw.event_index,
            data,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn normalized(&self) -> Option<&NormalizedEvent> {
        match &self.payload {
            EventPayload::Normalized(event) => Some(event),
            _ => None,
        }
    }
}
