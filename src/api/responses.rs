//! API response types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;

use crate::events::ActivityEntry;
use crate::performance::{AggregatedMetric, MetricCategory, PerformanceAlert};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub category: MetricCategory,
    pub hours: i64,
    pub group_by: Option<String>,
    pub groups: Vec<AggregatedMetric>,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<PerformanceAlert>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub id: String,
    pub resolved: bool,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// False when the sample was dropped by sampling or a disabled collector
    pub recorded: bool,
}

#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    pub activity: Vec<ActivityEntry>,
}

/// Error body returned by every handler
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.status.canonical_reason().unwrap_or("error"),
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}
