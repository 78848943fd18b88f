//! Dashboard HTTP API
//!
//! Health, Prometheus metrics, performance aggregates and alert management.
//! Every request passing through the router is itself recorded as an API
//! metric.

mod handlers;
mod responses;

pub use responses::ApiError;

use crate::config::ApiConfig;
use crate::infrastructure::ServiceContainer;
use crate::performance::ApiMetricData;
use anyhow::Result;
use axum::{
    extract::{MatchedPath, Request, State},
    http::header,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub container: Arc<ServiceContainer>,
}

impl ApiState {
    pub fn new(container: Arc<ServiceContainer>) -> Self {
        Self { container }
    }
}

/// Start the API server
pub async fn start_server(container: Arc<ServiceContainer>, config: &ApiConfig) -> Result<tokio::task::JoinHandle<()>> {
    let app = create_app(container, config);

    let listener = TcpListener::bind(&config.bind_address).await?;
    info!("API server listening on {}", config.bind_address);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(handle)
}

/// Build the router
pub fn create_app(container: Arc<ServiceContainer>, config: &ApiConfig) -> Router {
    let state = ApiState::new(container);

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/api/performance/metrics", get(handlers::performance_metrics))
        .route("/api/performance/alerts", get(handlers::list_alerts))
        .route("/api/performance/alerts/:id/resolve", post(handlers::resolve_alert))
        .route("/api/performance/ui", post(handlers::ingest_ui_metric))
        .route("/api/activity", get(handlers::recent_activity))
        .layer(middleware::from_fn_with_state(state.clone(), track_request))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    if config.enable_cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Record an API metric once the response exists, whatever its status
async fn track_request(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let method = request.method().to_string();
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let request_size = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let started = Instant::now();
    let response = next.run(request).await;

    let mut data = ApiMetricData::new(
        endpoint,
        method,
        response.status().as_u16(),
        started.elapsed().as_secs_f64() * 1000.0,
    );
    data.user_agent = user_agent;
    data.request_size = request_size;

    if let Err(e) = state.container.collector.record_api_metric(data).await {
        warn!("Failed to record API metric: {}", e);
    }

    response
}
