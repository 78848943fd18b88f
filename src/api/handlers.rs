//! API request handlers

use super::{responses::*, ApiState};
use crate::core::TimeRange;
use crate::performance::{GroupBy, MetricCategory, UiMetricData};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Longest window the dashboard may aggregate over
const MAX_HOURS: i64 = 24 * 30;

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub category: Option<String>,
    pub hours: Option<i64>,
    pub group_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    /// Only unresolved alerts (default true)
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// Health check handler
pub async fn health(State(state): State<ApiState>) -> Json<Value> {
    let report = state.container.health();
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
        "service": "ownly-core",
        "pipeline": report,
    }))
}

/// Prometheus exposition
pub async fn metrics(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let body = state.container.telemetry.render().map_err(|e| {
        tracing::error!("Failed to render metrics: {}", e);
        ApiError::internal("metrics unavailable")
    })?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

/// Aggregated performance metrics
pub async fn performance_metrics(
    State(state): State<ApiState>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<MetricsResponse>, ApiError> {
    let category = match query.category.as_deref() {
        Some(raw) => raw.parse::<MetricCategory>().map_err(ApiError::bad_request)?,
        None => MetricCategory::Api,
    };
    let group_by = match query.group_by.as_deref() {
        Some(raw) => Some(raw.parse::<GroupBy>().map_err(ApiError::bad_request)?),
        None => None,
    };
    let hours = query.hours.unwrap_or(24).clamp(1, MAX_HOURS);

    let range = TimeRange::last(chrono::Duration::hours(hours));
    let groups = state
        .container
        .collector
        .aggregated_metrics(category, range, group_by)
        .await
        .map_err(|e| {
            tracing::error!("Failed to aggregate metrics: {}", e);
            ApiError::internal("aggregation failed")
        })?;

    Ok(Json(MetricsResponse {
        category,
        hours,
        group_by: group_by.map(|g| g.to_string()),
        groups,
    }))
}

pub async fn list_alerts(State(state): State<ApiState>, Query(query): Query<AlertsQuery>) -> Json<AlertsResponse> {
    let collector = &state.container.collector;
    let alerts = if query.active.unwrap_or(true) {
        collector.active_alerts()
    } else {
        collector.alerts()
    };
    let total = alerts.len();
    Json(AlertsResponse { alerts, total })
}

pub async fn resolve_alert(State(state): State<ApiState>, Path(id): Path<String>) -> Result<Json<ResolveResponse>, ApiError> {
    if state.container.collector.resolve_alert(&id) {
        Ok(Json(ResolveResponse { id, resolved: true }))
    } else {
        Err(ApiError::not_found(format!("alert {} not found", id)))
    }
}

/// Client-side UI timings
pub async fn ingest_ui_metric(
    State(state): State<ApiState>,
    Json(data): Json<UiMetricData>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let recorded = state
        .container
        .collector
        .record_ui_metric(data)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            recorded: recorded.is_some(),
        }),
    ))
}

/// Recent marketplace activity, newest first
pub async fn recent_activity(State(state): State<ApiState>, Query(query): Query<LimitQuery>) -> Json<ActivityResponse> {
    let limit = query.limit.unwrap_or(50).min(200);
    Json(ActivityResponse {
        activity: state.container.activity.recent(limit),
    })
}
