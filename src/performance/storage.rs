//! Metric storage port and the in-memory backend
//!
//! The in-memory store is a bounded buffer: once `max_entries` is exceeded
//! the oldest insertions are evicted regardless of age. Age-based removal is
//! a separate `cleanup` call driven by the collector's owner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use super::metric::{MetricCategory, PerformanceMetric};
use crate::core::{CoreError, CoreResult, TimeRange};

/// Metric query; every supplied filter must match
#[derive(Debug, Clone, Default)]
pub struct MetricQuery {
    pub category: Option<MetricCategory>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub tags: BTreeMap<String, String>,
    pub name: Option<String>,
    pub limit: Option<usize>,
}

impl MetricQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: MetricCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn range(mut self, range: TimeRange) -> Self {
        self.start = Some(range.start);
        self.end = Some(range.end);
        self
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, metric: &PerformanceMetric) -> bool {
        if self.category.is_some_and(|c| c != metric.category) {
            return false;
        }
        if self.start.is_some_and(|start| metric.timestamp < start) {
            return false;
        }
        if self.end.is_some_and(|end| metric.timestamp > end) {
            return false;
        }
        if self.name.as_ref().is_some_and(|name| name != &metric.name) {
            return false;
        }
        self.tags.iter().all(|(k, v)| metric.tag(k) == Some(v.as_str()))
    }
}

/// Aggregation key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupBy {
    Endpoint,
    EventType,
    Operation,
    Component,
    Hour,
    Day,
}

impl GroupBy {
    fn key_for(&self, metric: &PerformanceMetric) -> String {
        let tag = |name: &str| metric.tag(name).unwrap_or("unknown").to_string();
        match self {
            GroupBy::Endpoint => tag("endpoint"),
            GroupBy::EventType => tag("eventType"),
            GroupBy::Operation => tag("operation"),
            GroupBy::Component => tag("component"),
            GroupBy::Hour => metric.timestamp.format("%Y-%m-%dT%H:00").to_string(),
            GroupBy::Day => metric.timestamp.format("%Y-%m-%d").to_string(),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupBy::Endpoint => "endpoint",
            GroupBy::EventType => "eventType",
            GroupBy::Operation => "operation",
            GroupBy::Component => "component",
            GroupBy::Hour => "hour",
            GroupBy::Day => "day",
        };
        f.write_str(name)
    }
}

impl FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "endpoint" => Ok(GroupBy::Endpoint),
            "eventType" => Ok(GroupBy::EventType),
            "operation" => Ok(GroupBy::Operation),
            "component" => Ok(GroupBy::Component),
            "hour" => Ok(GroupBy::Hour),
            "day" => Ok(GroupBy::Day),
            other => Err(format!("unknown group_by: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedMetric {
    pub group: String,
    pub count: usize,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
    pub p99: f64,
}

impl AggregatedMetric {
    fn from_values(group: String, mut values: Vec<f64>) -> Self {
        values.sort_by(|a, b| a.total_cmp(b));
        let count = values.len();
        let sum: f64 = values.iter().sum();

        Self {
            group,
            count,
            average: if count == 0 { 0.0 } else { sum / count as f64 },
            min: values.first().copied().unwrap_or(0.0),
            max: values.last().copied().unwrap_or(0.0),
            p95: percentile(&values, 0.95),
            p99: percentile(&values, 0.99),
        }
    }
}

/// Nearest-rank percentile over sorted values: index `floor(len * p)`,
/// clamped to the last element
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * p).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// Storage port for performance metrics
#[async_trait]
pub trait MetricStorage: Send + Sync {
    async fn store(&self, metric: PerformanceMetric) -> CoreResult<()>;

    /// Matching metrics, newest first
    async fn query(&self, query: &MetricQuery) -> CoreResult<Vec<PerformanceMetric>>;

    /// Per-group statistics; without `group_by` everything lands in `all`
    async fn aggregate(
        &self,
        category: MetricCategory,
        range: TimeRange,
        group_by: Option<GroupBy>,
    ) -> CoreResult<Vec<AggregatedMetric>>;

    /// Remove metrics older than `older_than`, returning how many went
    async fn cleanup(&self, older_than: DateTime<Utc>) -> CoreResult<usize>;

    async fn len(&self) -> CoreResult<usize>;
}

pub struct InMemoryMetricStorage {
    max_entries: usize,
    metrics: RwLock<VecDeque<PerformanceMetric>>,
}

impl InMemoryMetricStorage {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            metrics: RwLock::new(VecDeque::new()),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}

fn poisoned() -> CoreError {
    CoreError::Storage("metric store lock poisoned".to_string())
}

#[async_trait]
impl MetricStorage for InMemoryMetricStorage {
    async fn store(&self, metric: PerformanceMetric) -> CoreResult<()> {
        let mut metrics = self.metrics.write().map_err(|_| poisoned())?;
        metrics.push_back(metric);
        while metrics.len() > self.max_entries {
            metrics.pop_front();
        }
        Ok(())
    }

    async fn query(&self, query: &MetricQuery) -> CoreResult<Vec<PerformanceMetric>> {
        let metrics = self.metrics.read().map_err(|_| poisoned())?;

        // Walk newest insertion first so equal timestamps keep that order
        let mut matched: Vec<PerformanceMetric> = metrics.iter().rev().filter(|m| query.matches(m)).cloned().collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn aggregate(
        &self,
        category: MetricCategory,
        range: TimeRange,
        group_by: Option<GroupBy>,
    ) -> CoreResult<Vec<AggregatedMetric>> {
        let metrics = self.metrics.read().map_err(|_| poisoned())?;

        let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for metric in metrics.iter().filter(|m| m.category == category && range.contains(m.timestamp)) {
            let key = match group_by {
                Some(group_by) => group_by.key_for(metric),
                None => "all".to_string(),
            };
            groups.entry(key).or_default().push(metric.value);
        }

        Ok(groups
            .into_iter()
            .map(|(group, values)| AggregatedMetric::from_values(group, values))
            .collect())
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> CoreResult<usize> {
        let mut metrics = self.metrics.write().map_err(|_| poisoned())?;
        let before = metrics.len();
        metrics.retain(|m| m.timestamp >= older_than);
        Ok(before - metrics.len())
    }

    async fn len(&self) -> CoreResult<usize> {
        Ok(self.metrics.read().map_err(|_| poisoned())?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::metric::{ApiMetricData, UiMetricData};
    use chrono::Duration;

    fn api(endpoint: &str, response_time: f64) -> PerformanceMetric {
        PerformanceMetric::api(ApiMetricData::new(endpoint, "GET", 200, response_time))
    }

    #[tokio::test]
    async fn test_eviction_keeps_most_recent() {
        let storage = InMemoryMetricStorage::new(10);
        for i in 0..15 {
            storage.store(api("/a", i as f64)).await.unwrap();
        }

        let all = storage.query(&MetricQuery::new()).await.unwrap();
        assert_eq!(all.len(), 10);

        let mut values: Vec<f64> = all.iter().map(|m| m.value).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(values, (5..15).map(|v| v as f64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        let storage = InMemoryMetricStorage::new(100);
        let now = Utc::now();
        storage.store(api("/a", 1.0).at(now - Duration::minutes(10))).await.unwrap();
        storage.store(api("/b", 2.0).at(now - Duration::minutes(5))).await.unwrap();
        storage.store(api("/a", 3.0).at(now)).await.unwrap();
        storage
            .store(PerformanceMetric::ui(UiMetricData {
                component: "Gallery".to_string(),
                action: "render".to_string(),
                render_time: 16.0,
                interaction_time: None,
                page: None,
                tags: BTreeMap::new(),
            }))
            .await
            .unwrap();

        let a = storage
            .query(&MetricQuery::new().category(MetricCategory::Api).tag("endpoint", "/a"))
            .await
            .unwrap();
        assert_eq!(a.iter().map(|m| m.value).collect::<Vec<_>>(), vec![3.0, 1.0]);

        let recent = storage
            .query(&MetricQuery::new().category(MetricCategory::Api).since(now - Duration::minutes(5)))
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);

        let limited = storage.query(&MetricQuery::new().limit(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_aggregate_percentiles() {
        let storage = InMemoryMetricStorage::new(1000);
        for v in 1..=100 {
            storage.store(api("/a", v as f64)).await.unwrap();
        }

        let range = TimeRange::last(Duration::hours(1));
        let groups = storage.aggregate(MetricCategory::Api, range, None).await.unwrap();

        assert_eq!(groups.len(), 1);
        let all = &groups[0];
        assert_eq!(all.group, "all");
        assert_eq!(all.count, 100);
        assert_eq!(all.min, 1.0);
        assert_eq!(all.max, 100.0);
        assert_eq!(all.average, 50.5);
        assert_eq!(all.p95, 96.0);
        assert_eq!(all.p99, 100.0);
    }

    #[tokio::test]
    async fn test_aggregate_by_endpoint() {
        let storage = InMemoryMetricStorage::new(100);
        storage.store(api("/a", 10.0)).await.unwrap();
        storage.store(api("/a", 30.0)).await.unwrap();
        storage.store(api("/b", 5.0)).await.unwrap();

        let range = TimeRange::last(Duration::minutes(1));
        let groups = storage
            .aggregate(MetricCategory::Api, range, Some(GroupBy::Endpoint))
            .await
            .unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group, "/a");
        assert_eq!(groups[0].average, 20.0);
        assert_eq!(groups[1].group, "/b");
        assert_eq!(groups[1].count, 1);
    }

    #[tokio::test]
    async fn test_cleanup_counts_removed() {
        let storage = InMemoryMetricStorage::new(100);
        let now = Utc::now();
        storage.store(api("/a", 1.0).at(now - Duration::days(10))).await.unwrap();
        storage.store(api("/a", 2.0).at(now - Duration::days(8))).await.unwrap();
        storage.store(api("/a", 3.0)).await.unwrap();

        let removed = storage.cleanup(now - Duration::days(7)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(storage.len().await.unwrap(), 1);
    }

    #[test]
    fn test_percentile_edges() {
        assert_eq!(percentile(&[], 0.95), 0.0);
        assert_eq!(percentile(&[7.0], 0.99), 7.0);
        assert_eq!(percentile(&[1.0, 2.0], 0.5), 2.0);
        assert_eq!("eventType".parse::<GroupBy>(), Ok(GroupBy::EventType));
    }
}
