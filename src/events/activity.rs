//! Marketplace activity feed
//!
//! The processor the binary registers for every listened event kind. It turns
//! queue events into a bounded, newest-first feed of marketplace activity
//! (mints, transfers, listings, sales) served by the dashboard API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use super::event::{BlockchainEvent, EventPayload};
use super::normalize::NormalizedEvent;
use super::queue::{EventProcessor, EventQueue};
use super::EventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Mint,
    Deposit,
    Withdraw,
    Listing,
    Sale,
    Delisting,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    pub nft_id: Option<String>,
    pub price: Option<String>,
    pub account: Option<String>,
    pub transaction_id: String,
    pub block_height: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEntry {
    fn from_event(event: &BlockchainEvent) -> Self {
        let (kind, nft_id, price, account) = match &event.payload {
            EventPayload::Normalized(normalized) => match normalized {
                NormalizedEvent::CollectibleMinted(p) => (ActivityKind::Mint, Some(p.nft_id.clone()), None, p.creator.clone()),
                NormalizedEvent::CollectibleDeposit(p) => {
                    (ActivityKind::Deposit, Some(p.nft_id.clone()), None, p.account.clone())
                }
                NormalizedEvent::CollectibleWithdraw(p) => {
                    (ActivityKind::Withdraw, Some(p.nft_id.clone()), None, p.account.clone())
                }
                NormalizedEvent::ListingAvailable(p) => (
                    ActivityKind::Listing,
                    Some(p.nft_id.clone()),
                    Some(p.sale_price.clone()),
                    Some(p.storefront_address.clone()),
                ),
                NormalizedEvent::ListingCompleted(p) => {
                    let kind = if p.purchased { ActivityKind::Sale } else { ActivityKind::Delisting };
                    (kind, Some(p.nft_id.clone()), p.sale_price.clone(), None)
                }
            },
            EventPayload::Malformed { .. } | EventPayload::Untyped => (ActivityKind::Unknown, None, None, None),
        };

        Self {
            kind,
            nft_id,
            price,
            account,
            transaction_id: event.transaction_id.clone(),
            block_height: event.block_height,
            timestamp: event.timestamp,
        }
    }
}

/// Bounded activity feed; also the queue processor that fills it
pub struct ActivityFeed {
    capacity: usize,
    entries: RwLock<VecDeque<ActivityEntry>>,
}

impl ActivityFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::new()),
        }
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register this feed as the processor for each kind
    pub fn register(self: &Arc<Self>, queue: &EventQueue, kinds: &[EventKind]) {
        for kind in kinds {
            queue.add_processor(kind.as_str(), Arc::clone(self) as Arc<dyn EventProcessor>);
        }
        debug!(kinds = kinds.len(), "Activity feed registered");
    }
}

#[async_trait]
impl EventProcessor for ActivityFeed {
    async fn process(&self, event: &BlockchainEvent) -> anyhow::Result<()> {
        if let EventPayload::Malformed { error } = &event.payload {
            anyhow::bail!("malformed {} payload in {}: {}", event.event_type, event.transaction_id, error);
        }

        let entry = ActivityEntry::from_event(event);
        info!(
            kind = ?entry.kind,
            nft_id = entry.nft_id.as_deref().unwrap_or("-"),
            tx = %entry.transaction_id,
            "Marketplace activity"
        );

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        Ok(())
    }
}
