//! Performance monitoring
//!
//! Typed metrics for API calls, queue events, chain operations and UI
//! timings, a swappable storage port, and the collector that samples,
//! threshold-checks and raises alerts.

pub mod alert;
pub mod collector;
pub mod metric;
pub mod storage;

pub use alert::{AlertType, PerformanceAlert};
pub use collector::{AlertCallback, CleanupReport, PerformanceCollector};
pub use metric::{
    ApiMetricData, BlockchainMetricData, EventMetricData, MetricCategory, MetricDetails, PerformanceMetric,
    UiMetricData,
};
pub use storage::{percentile, AggregatedMetric, GroupBy, InMemoryMetricStorage, MetricQuery, MetricStorage};
