//! Performance metric model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricCategory {
    Api,
    Event,
    Blockchain,
    Ui,
}

impl MetricCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricCategory::Api => "api",
            MetricCategory::Event => "event",
            MetricCategory::Blockchain => "blockchain",
            MetricCategory::Ui => "ui",
        }
    }
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(MetricCategory::Api),
            "event" => Ok(MetricCategory::Event),
            "blockchain" => Ok(MetricCategory::Blockchain),
            "ui" => Ok(MetricCategory::Ui),
            other => Err(format!("unknown metric category: {}", other)),
        }
    }
}

/// One inbound or outbound API call; times in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMetricData {
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub response_time: f64,
    #[serde(default)]
    pub request_size: Option<u64>,
    #[serde(default)]
    pub response_size: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    /// Caller tags; the grouping keys derived from the fields win on conflict
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ApiMetricData {
    pub fn new(endpoint: impl Into<String>, method: impl Into<String>, status_code: u16, response_time: f64) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            status_code,
            response_time,
            request_size: None,
            response_size: None,
            user_agent: None,
            ip: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }
}

/// One processed queue event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetricData {
    pub event_type: String,
    pub processing_time: f64,
    pub queue_size: usize,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A chain query or transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainMetricData {
    pub operation: String,
    pub duration: f64,
    pub success: bool,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub gas_used: Option<u64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl BlockchainMetricData {
    /// Transactions are judged against their own, looser thresholds
    pub fn is_transaction(&self) -> bool {
        self.operation.to_lowercase().contains("transaction")
    }
}

/// Client-side render or interaction timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiMetricData {
    pub component: String,
    pub action: String,
    pub render_time: f64,
    #[serde(default)]
    pub interaction_time: Option<f64>,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MetricDetails {
    Api(ApiMetricData),
    Event(EventMetricData),
    Blockchain(BlockchainMetricData),
    Ui(UiMetricData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetric {
    pub id: String,
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub category: MetricCategory,
    pub tags: BTreeMap<String, String>,
    pub details: MetricDetails,
}

impl PerformanceMetric {
    fn build(name: &str, value: f64, category: MetricCategory, tags: BTreeMap<String, String>, details: MetricDetails) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            value,
            unit: "ms".to_string(),
            timestamp: Utc::now(),
            category,
            tags,
            details,
        }
    }

    pub fn api(data: ApiMetricData) -> Self {
        let tags = tags(&data.tags, [
            ("endpoint", data.endpoint.clone()),
            ("method", data.method.clone()),
            ("status", data.status_code.to_string()),
        ]);
        Self::build("api_response_time", data.response_time, MetricCategory::Api, tags, MetricDetails::Api(data))
    }

    pub fn event(data: EventMetricData) -> Self {
        let tags = tags(&data.tags, [
            ("eventType", data.event_type.clone()),
            ("success", data.success.to_string()),
        ]);
        Self::build(
            "event_processing_time",
            data.processing_time,
            MetricCategory::Event,
            tags,
            MetricDetails::Event(data),
        )
    }

    pub fn blockchain(data: BlockchainMetricData) -> Self {
        let tags = tags(&data.tags, [
            ("operation", data.operation.clone()),
            ("success", data.success.to_string()),
        ]);
        Self::build(
            "blockchain_operation_time",
            data.duration,
            MetricCategory::Blockchain,
            tags,
            MetricDetails::Blockchain(data),
        )
    }

    pub fn ui(data: UiMetricData) -> Self {
        let tags = tags(&data.tags, [("component", data.component.clone()), ("action", data.action.clone())]);
        Self::build("ui_render_time", data.render_time, MetricCategory::Ui, tags, MetricDetails::Ui(data))
    }

    /// Backdate a metric; used when replaying or in tests
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

fn tags<const N: usize>(caller: &BTreeMap<String, String>, pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    let mut tags = caller.clone();
    tags.extend(pairs.into_iter().map(|(k, v)| (k.to_string(), v)));
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_metric_tags_endpoint() {
        let metric = PerformanceMetric::api(ApiMetricData::new("/api/marketplace", "GET", 200, 120.0));

        assert_eq!(metric.category, MetricCategory::Api);
        assert_eq!(metric.value, 120.0);
        assert_eq!(metric.tag("endpoint"), Some("/api/marketplace"));
        assert_eq!(metric.tag("status"), Some("200"));
    }

    #[test]
    fn test_caller_tags_cannot_shadow_grouping_keys() {
        let data = ApiMetricData::new("/api/nfts", "GET", 200, 80.0)
            .with_tag("region", "eu-west")
            .with_tag("endpoint", "/spoofed");
        let metric = PerformanceMetric::api(data);

        assert_eq!(metric.tag("region"), Some("eu-west"));
        assert_eq!(metric.tag("endpoint"), Some("/api/nfts"));

        let ui: UiMetricData = serde_json::from_value(serde_json::json!({
            "component": "Navbar",
            "action": "click",
            "renderTime": 3.0,
            "tags": { "theme": "dark" }
        }))
        .unwrap();
        assert_eq!(PerformanceMetric::ui(ui).tag("theme"), Some("dark"));
    }

    #[test]
    fn test_transaction_operations() {
        let tx = BlockchainMetricData {
            operation: "submitTransaction".to_string(),
            duration: 1.0,
            success: true,
            transaction_id: None,
            gas_used: None,
            tags: BTreeMap::new(),
        };
        let query = BlockchainMetricData {
            operation: "getAccount".to_string(),
            ..tx.clone()
        };
        assert!(tx.is_transaction());
        assert!(!query.is_transaction());
    }

    #[test]
    fn test_serialized_shape() {
        let metric = PerformanceMetric::event(EventMetricData {
            event_type: "CollectibleMinted".to_string(),
            processing_time: 12.5,
            queue_size: 3,
            success: true,
            error: None,
            tags: BTreeMap::new(),
        });
        let value = serde_json::to_value(&metric).unwrap();

        assert_eq!(value["category"], "event");
        assert_eq!(value["details"]["kind"], "event");
        assert_eq!(value["details"]["queueSize"], 3);
        assert_eq!(value["tags"]["eventType"], "CollectibleMinted");
    }
}
