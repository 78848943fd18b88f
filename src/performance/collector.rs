//! Performance collector
//!
//! Samples, stores and threshold-checks metrics for the four categories and
//! fans alerts out to registered callbacks. The collector never schedules
//! itself: whoever owns it calls [`PerformanceCollector::cleanup`]
//! periodically.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, warn};

use super::alert::{AlertType, PerformanceAlert};
use super::metric::{
    ApiMetricData, BlockchainMetricData, EventMetricData, MetricCategory, PerformanceMetric, UiMetricData,
};
use super::storage::{AggregatedMetric, GroupBy, InMemoryMetricStorage, MetricQuery, MetricStorage};
use crate::config::{PerformanceConfig, Threshold};
use crate::core::{CoreResult, TimeRange};
use crate::infrastructure::Telemetry;

/// Trailing window for the API error-rate check
const ERROR_RATE_WINDOW_MINUTES: i64 = 5;

/// Alerts older than this are dropped by [`PerformanceCollector::cleanup`]
const ALERT_RETENTION_DAYS: i64 = 30;

pub type AlertCallback = Arc<dyn Fn(&PerformanceAlert) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub metrics_removed: usize,
    pub alerts_removed: usize,
}

pub struct PerformanceCollector {
    config: PerformanceConfig,
    storage: Arc<dyn MetricStorage>,
    alerts: RwLock<Vec<PerformanceAlert>>,
    callbacks: RwLock<Vec<AlertCallback>>,
    telemetry: Option<Arc<Telemetry>>,
}

impl PerformanceCollector {
    pub fn new(config: PerformanceConfig, storage: Arc<dyn MetricStorage>) -> Self {
        Self {
            config,
            storage,
            alerts: RwLock::new(Vec::new()),
            callbacks: RwLock::new(Vec::new()),
            telemetry: None,
        }
    }

    /// Collector backed by an in-memory store sized from the config
    pub fn in_memory(config: PerformanceConfig) -> Self {
        let storage = Arc::new(InMemoryMetricStorage::new(config.storage.max_memory_entries));
        Self::new(config, storage)
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn MetricStorage> {
        &self.storage
    }

    pub fn on_alert<F>(&self, callback: F)
    where
        F: Fn(&PerformanceAlert) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Returns the stored metric, or `None` when disabled or sampled out
    pub async fn record_api_metric(&self, data: ApiMetricData) -> CoreResult<Option<PerformanceMetric>> {
        if !self.sampled() {
            return Ok(None);
        }
        let metric = PerformanceMetric::api(data.clone());
        self.storage.store(metric.clone()).await?;
        self.check_api_thresholds(&metric, &data).await?;
        Ok(Some(metric))
    }

    pub async fn record_event_metric(&self, data: EventMetricData) -> CoreResult<Option<PerformanceMetric>> {
        if !self.sampled() {
            return Ok(None);
        }
        let metric = PerformanceMetric::event(data.clone());
        self.storage.store(metric.clone()).await?;

        let thresholds = &self.config.thresholds.events;
        self.check(
            &metric,
            metric.value,
            thresholds.processing_time,
            |value, limit| format!("Processing {} took {:.0}ms (threshold {:.0}ms)", data.event_type, value, limit),
        );
        self.check(
            &metric,
            data.queue_size as f64,
            thresholds.queue_size,
            |value, limit| format!("Event queue holds {:.0} events (threshold {:.0})", value, limit),
        );
        Ok(Some(metric))
    }

    pub async fn record_blockchain_metric(&self, data: BlockchainMetricData) -> CoreResult<Option<PerformanceMetric>> {
        if !self.sampled() {
            return Ok(None);
        }
        let metric = PerformanceMetric::blockchain(data.clone());
        self.storage.store(metric.clone()).await?;

        let thresholds = &self.config.thresholds.blockchain;
        let (threshold, label) = if data.is_transaction() {
            (thresholds.transaction_time, "Transaction")
        } else {
            (thresholds.query_time, "Query")
        };
        self.check(&metric, metric.value, threshold, |value, limit| {
            format!("{} {} took {:.0}ms (threshold {:.0}ms)", label, data.operation, value, limit)
        });
        Ok(Some(metric))
    }

    /// UI metrics are stored for aggregation only
    pub async fn record_ui_metric(&self, data: UiMetricData) -> CoreResult<Option<PerformanceMetric>> {
        if !self.sampled() {
            return Ok(None);
        }
        let metric = PerformanceMetric::ui(data);
        self.storage.store(metric.clone()).await?;
        Ok(Some(metric))
    }

    async fn check_api_thresholds(&self, metric: &PerformanceMetric, data: &ApiMetricData) -> CoreResult<()> {
        let thresholds = &self.config.thresholds.api;

        self.check(metric, data.response_time, thresholds.response_time, |value, limit| {
            format!(
                "{} {} responded in {:.0}ms (threshold {:.0}ms)",
                data.method, data.endpoint, value, limit
            )
        });

        let window = MetricQuery::new()
            .category(MetricCategory::Api)
            .tag("endpoint", data.endpoint.clone())
            .since(Utc::now() - Duration::minutes(ERROR_RATE_WINDOW_MINUTES));
        let recent = self.storage.query(&window).await?;
        if !recent.is_empty() {
            let failures = recent
                .iter()
                .filter(|m| m.tag("status").and_then(|s| s.parse::<u16>().ok()).is_some_and(|s| s >= 400))
                .count();
            let rate = failures as f64 / recent.len() as f64;
            self.check(metric, rate, thresholds.error_rate, |value, limit| {
                format!(
                    "{} error rate is {:.1}% over the last {} minutes (threshold {:.1}%)",
                    data.endpoint,
                    value * 100.0,
                    ERROR_RATE_WINDOW_MINUTES,
                    limit * 100.0
                )
            });
        }
        Ok(())
    }

    /// Raise at most one alert, at the highest tier crossed
    fn check<F>(&self, metric: &PerformanceMetric, value: f64, threshold: Threshold, message: F)
    where
        F: Fn(f64, f64) -> String,
    {
        let tier = if value > threshold.critical {
            Some((AlertType::Critical, threshold.critical))
        } else if value > threshold.warning {
            Some((AlertType::Warning, threshold.warning))
        } else {
            None
        };

        if let Some((alert_type, limit)) = tier {
            self.raise(PerformanceAlert::new(alert_type, message(value, limit), metric, limit));
        }
    }

    fn raise(&self, alert: PerformanceAlert) {
        match alert.alert_type {
            AlertType::Critical => error!(category = %alert.category, alert_id = %alert.id, "{}", alert.message),
            AlertType::Warning => warn!(category = %alert.category, alert_id = %alert.id, "{}", alert.message),
        }

        if let Some(telemetry) = &self.telemetry {
            telemetry.alerts_raised.with_label_values(&[alert.alert_type.as_str()]).inc();
        }

        self.alerts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(alert.clone());

        let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner).clone();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&alert))).is_err() {
                warn!(alert_id = %alert.id, "Alert callback panicked");
            }
        }
    }

    /// Mark an alert resolved. Returns false for unknown ids; resolving twice
    /// keeps the first timestamp.
    pub fn resolve_alert(&self, id: &str) -> bool {
        let mut alerts = self.alerts.write().unwrap_or_else(PoisonError::into_inner);
        match alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.resolve();
                true
            }
            None => false,
        }
    }

    pub fn active_alerts(&self) -> Vec<PerformanceAlert> {
        let alerts = self.alerts.read().unwrap_or_else(PoisonError::into_inner);
        alerts.iter().filter(|a| !a.resolved).cloned().collect()
    }

    pub fn alerts(&self) -> Vec<PerformanceAlert> {
        self.alerts.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drop metrics past the retention window and alerts older than 30 days
    pub async fn cleanup(&self) -> CoreResult<CleanupReport> {
        let now = Utc::now();
        let metrics_removed = self
            .storage
            .cleanup(now - Duration::days(i64::from(self.config.retention_days)))
            .await?;

        let alert_cutoff = now - Duration::days(ALERT_RETENTION_DAYS);
        let alerts_removed = {
            let mut alerts = self.alerts.write().unwrap_or_else(PoisonError::into_inner);
            let before = alerts.len();
            alerts.retain(|a| a.timestamp >= alert_cutoff);
            before - alerts.len()
        };

        debug!(metrics_removed, alerts_removed, "Performance cleanup finished");
        Ok(CleanupReport {
            metrics_removed,
            alerts_removed,
        })
    }

    pub async fn aggregated_metrics(
        &self,
        category: MetricCategory,
        range: TimeRange,
        group_by: Option<GroupBy>,
    ) -> CoreResult<Vec<AggregatedMetric>> {
        self.storage.aggregate(category, range, group_by).await
    }

    pub async fn metrics(&self, query: &MetricQuery) -> CoreResult<Vec<PerformanceMetric>> {
        self.storage.query(query).await
    }

    fn sampled(&self) -> bool {
        self.config.enabled && rand::random::<f64>() < self.config.sample_rate
    }

    #[cfg(test)]
    pub(crate) fn push_alert(&self, alert: PerformanceAlert) {
        self.alerts.write().unwrap_or_else(PoisonError::into_inner).push(alert);
    }
}
