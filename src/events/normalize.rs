//! Raw chain payload normalization
//!
//! Flow access nodes deliver event fields either plain or wrapped in Cadence
//! JSON-CDC envelopes (`{"type": "UInt64", "value": "42"}`, optionals nest a
//! second envelope). Each known event kind has one normalization function that
//! unwraps those envelopes and returns a typed payload or a [`ParseError`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::core::{ParseError, RawChainEvent};

/// Bumped whenever a normalized field changes meaning or name
pub const NORMALIZATION_VERSION: u32 = 1;

/// Chain events the marketplace listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    CollectibleMinted,
    CollectibleDeposit,
    CollectibleWithdraw,
    ListingAvailable,
    ListingCompleted,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::CollectibleMinted,
        EventKind::CollectibleDeposit,
        EventKind::CollectibleWithdraw,
        EventKind::ListingAvailable,
        EventKind::ListingCompleted,
    ];

    /// Event type string used for queue routing
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CollectibleMinted => "CollectibleMinted",
            EventKind::CollectibleDeposit => "CollectibleDeposit",
            EventKind::CollectibleWithdraw => "CollectibleWithdraw",
            EventKind::ListingAvailable => "ListingAvailable",
            EventKind::ListingCompleted => "ListingCompleted",
        }
    }

    /// Cadence contract and event names
    fn cadence_path(&self) -> (&'static str, &'static str) {
        match self {
            EventKind::CollectibleMinted => ("Collectible", "Minted"),
            EventKind::CollectibleDeposit => ("Collectible", "Deposit"),
            EventKind::CollectibleWithdraw => ("Collectible", "Withdraw"),
            EventKind::ListingAvailable => ("NFTStorefrontV2", "ListingAvailable"),
            EventKind::ListingCompleted => ("NFTStorefrontV2", "ListingCompleted"),
        }
    }

    pub fn is_storefront(&self) -> bool {
        matches!(self, EventKind::ListingAvailable | EventKind::ListingCompleted)
    }

    /// Fully qualified Flow event type, e.g. `A.f8d6e0586b0a20c7.Collectible.Minted`
    pub fn qualified_name(&self, contract_address: &str) -> String {
        let (contract, event) = self.cadence_path();
        let address = contract_address.trim_start_matches("0x");
        format!("A.{}.{}.{}", address, contract, event)
    }

    /// Inverse of [`EventKind::qualified_name`], ignoring the address
    pub fn from_qualified_name(name: &str) -> Option<Self> {
        let mut parts = name.rsplitn(3, '.');
        let event = parts.next()?;
        let contract = parts.next()?;
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.cadence_path() == (contract, event))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event kind: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintedPayload {
    pub nft_id: String,
    pub creator: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPayload {
    pub nft_id: String,
    /// Receiving account for deposits, sending account for withdrawals
    pub account: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingAvailablePayload {
    pub listing_resource_id: String,
    pub storefront_address: String,
    pub nft_id: String,
    pub nft_type: Option<String>,
    /// UFix64 kept as its decimal string
    pub sale_price: String,
    pub expiry: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingCompletedPayload {
    pub listing_resource_id: String,
    pub storefront_resource_id: Option<String>,
    pub purchased: bool,
    pub nft_id: String,
    pub sale_price: Option<String>,
}

/// Typed payload per event kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum NormalizedEvent {
    CollectibleMinted(MintedPayload),
    CollectibleDeposit(TransferPayload),
    CollectibleWithdraw(TransferPayload),
    ListingAvailable(ListingAvailablePayload),
    ListingCompleted(ListingCompletedPayload),
}

impl NormalizedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            NormalizedEvent::CollectibleMinted(_) => EventKind::CollectibleMinted,
            NormalizedEvent::CollectibleDeposit(_) => EventKind::CollectibleDeposit,
            NormalizedEvent::CollectibleWithdraw(_) => EventKind::CollectibleWithdraw,
            NormalizedEvent::ListingAvailable(_) => EventKind::ListingAvailable,
            NormalizedEvent::ListingCompleted(_) => EventKind::ListingCompleted,
        }
    }

    pub fn nft_id(&self) -> &str {
        match self {
            NormalizedEvent::CollectibleMinted(p) => &p.nft_id,
            NormalizedEvent::CollectibleDeposit(p) | NormalizedEvent::CollectibleWithdraw(p) => &p.nft_id,
            NormalizedEvent::ListingAvailable(p) => &p.nft_id,
            NormalizedEvent::ListingCompleted(p) => &p.nft_id,
        }
    }

    /// Flat camelCase field map (`nftId`, `salePrice`, ...)
    pub fn to_data(&self) -> Map<String, Value> {
        let value = match self {
            NormalizedEvent::CollectibleMinted(p) => serde_json::to_value(p),
            NormalizedEvent::CollectibleDeposit(p) | NormalizedEvent::CollectibleWithdraw(p) => {
                serde_json::to_value(p)
            }
            NormalizedEvent::ListingAvailable(p) => serde_json::to_value(p),
            NormalizedEvent::ListingCompleted(p) => serde_json::to_value(p),
        };
        match value {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Normalize a raw payload for `kind`
pub fn normalize(kind: EventKind, raw: &RawChainEvent) -> Result<NormalizedEvent, ParseError> {
    let fields = Fields::new(&raw.data)?;

    match kind {
        EventKind::CollectibleMinted => Ok(NormalizedEvent::CollectibleMinted(MintedPayload {
            nft_id: fields.id("id")?,
            creator: fields.optional_string("creator"),
            name: fields.optional_string("name"),
        })),
        EventKind::CollectibleDeposit => Ok(NormalizedEvent::CollectibleDeposit(TransferPayload {
            nft_id: fields.id("id")?,
            account: fields.optional_string("to"),
        })),
        EventKind::CollectibleWithdraw => Ok(NormalizedEvent::CollectibleWithdraw(TransferPayload {
            nft_id: fields.id("id")?,
            account: fields.optional_string("from"),
        })),
        EventKind::ListingAvailable => Ok(NormalizedEvent::ListingAvailable(ListingAvailablePayload {
            listing_resource_id: fields.id("listingResourceID")?,
            storefront_address: fields.string("storefrontAddress")?,
            nft_id: fields.id("nftID")?,
            nft_type: fields.optional_string("nftType"),
            sale_price: fields.string("salePrice")?,
            expiry: fields.optional_u64("expiry")?,
        })),
        EventKind::ListingCompleted => Ok(NormalizedEvent::ListingCompleted(ListingCompletedPayload {
            listing_resource_id: fields.id("listingResourceID")?,
            storefront_resource_id: fields.optional_string("storefrontResourceID"),
            purchased: fields.bool("purchased")?,
            nft_id: fields.id("nftID")?,
            sale_price: fields.optional_string("salePrice"),
        })),
    }
}

/// Strip `{ "value": ... }` envelopes, however deeply nested
pub fn unwrap_value(value: &Value) -> &Value {
    let mut current = value;
    while let Some(inner) = current.as_object().and_then(|obj| obj.get("value")) {
        current = inner;
    }
    current
}

/// Field accessor over an event's data object
struct Fields<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn new(data: &'a Value) -> Result<Self, ParseError> {
        match data {
            Value::Null => Err(ParseError::NullPayload),
            Value::Object(map) => Ok(Self { map }),
            _ => Err(ParseError::NotAnObject),
        }
    }

    fn get(&self, field: &'static str) -> Option<&'a Value> {
        self.map.get(field).map(unwrap_value).filter(|v| !v.is_null())
    }

    fn string(&self, field: &'static str) -> Result<String, ParseError> {
        match self.get(field) {
            Some(value) => scalar_to_string(value).ok_or_else(|| ParseError::InvalidField {
                field,
                reason: format!("expected a scalar, got {}", value),
            }),
            None => Err(ParseError::MissingField(field)),
        }
    }

    fn optional_string(&self, field: &'static str) -> Option<String> {
        self.get(field).and_then(scalar_to_string)
    }

    /// Identifiers are UInt64 on chain; keep them as decimal strings
    fn id(&self, field: &'static str) -> Result<String, ParseError> {
        let id = self.string(field)?;
        if id.parse::<u64>().is_err() {
            return Err(ParseError::InvalidField {
                field,
                reason: format!("`{}` is not an unsigned integer", id),
            });
        }
        Ok(id)
    }

    fn optional_u64(&self, field: &'static str) -> Result<Option<u64>, ParseError> {
        match self.optional_string(field) {
            Some(raw) => raw.parse::<u64>().map(Some).map_err(|e| ParseError::InvalidField {
                field,
                reason: e.to_string(),
            }),
            None => Ok(None),
        }
    }

    fn bool(&self, field: &'static str) -> Result<bool, ParseError> {
        match self.get(field) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) if s == "true" || s == "false" => Ok(s == "true"),
            Some(other) => Err(ParseError::InvalidField {
                field,
                reason: format!("expected a bool, got {}", other),
            }),
            None => Err(ParseError::MissingField(field)),
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
