//! Threshold alerts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::metric::{MetricCategory, PerformanceMetric};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Warning,
    Critical,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Warning => "warning",
            AlertType::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceAlert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub category: MetricCategory,
    pub message: String,
    /// Snapshot of the metric that crossed the threshold
    pub metric: PerformanceMetric,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PerformanceAlert {
    pub fn new(alert_type: AlertType, message: impl Into<String>, metric: &PerformanceMetric, threshold: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            alert_type,
            category: metric.category,
            message: message.into(),
            metric: metric.clone(),
            threshold,
            timestamp: Utc::now(),
            resolved: false,
            resolved_at: None,
        }
    }

    /// Mark resolved; a second call keeps the first timestamp
    pub fn resolve(&mut self) {
        if !self.resolved {
            self.resolved = true;
            self.resolved_at = Some(Utc::now());
        }
    }
}
