//! Core domain types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw event as delivered by a chain transport, before normalization.
///
/// `data` keeps whatever the access node sent: fields may be plain values or
/// wrapped as `{ "value": ... }` (Cadence JSON-CDC), and may be `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChainEvent {
    pub transaction_id: String,
    pub block_height: Option<u64>,
    pub event_index: Option<u32>,
    #[serde(default)]
    pub data: Value,
}

impl RawChainEvent {
    pub fn new(transaction_id: impl Into<String>, data: Value) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            block_height: None,
            event_index: None,
            data,
        }
    }

    pub fn with_block(mut self, block_height: u64, event_index: u32) -> Self {
        self.block_height = Some(block_height);
        self.event_index = Some(event_index);
        self
    }
}

/// Inclusive time window used by metric queries and aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window ending now and reaching `span` into the past
    pub fn last(span: Duration) -> Self {
        let end = Utc::now();
        Self { start: end - span, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}
