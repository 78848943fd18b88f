//! Ownly core service
//!
//! Listens for Collectible and NFTStorefrontV2 events on Flow, feeds them
//! through the event queue and serves the performance dashboard API.

use anyhow::Result;
use clap::Parser;
use ownly_core::adapters::{FlowRestTransport, MockChainTransport};
use ownly_core::core::ChainTransport;
use ownly_core::{api, OwnlyConfig, ServiceContainer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ownly-core")]
#[command(about = "Ownly marketplace event pipeline and performance monitor")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override log level
    #[arg(long)]
    log_level: Option<String>,

    /// Dry run mode (validate config and exit)
    #[arg(long)]
    dry_run: bool,

    /// Use the synthetic mock transport instead of the access node
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = OwnlyConfig::load(cli.config.as_deref())?;

    if let Some(log_level) = cli.log_level {
        config.monitoring.log_level = log_level;
    }

    init_logging(&config);

    info!("Starting Ownly core");
    info!("Access node: {}", config.listener.access_node);
    info!("Listening for {} event kinds", config.listener.events.len());

    if cli.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        return Ok(());
    }

    let transport: Arc<dyn ChainTransport> = if cli.mock {
        Arc::new(MockChainTransport::generator(Duration::from_millis(
            config.listener.poll_interval_ms,
        )))
    } else {
        Arc::new(FlowRestTransport::from_config(&config.listener))
    };

    let container = Arc::new(ServiceContainer::new(config, transport)?);

    let handles = container.start_pipeline();
    info!("Subscribed to {} events", handles.len());

    let api_server = api::start_server(Arc::clone(&container), &container.config.api).await?;

    let cleanup_every = Duration::from_secs(container.config.monitoring.cleanup_interval_secs);
    let cleanup = container
        .errors
        .spawn_supervised("metrics-cleanup", run_cleanup(Arc::clone(&container), cleanup_every));

    info!("Ownly core started. Press Ctrl+C to shutdown.");
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = api_server => {
            match result {
                Ok(_) => warn!("API server finished"),
                Err(e) => error!("API server task error: {}", e),
            }
        }
    }

    cleanup.abort();
    container.shutdown().await;

    info!("Shutting down Ownly core");
    Ok(())
}

/// Purge expired metrics and alerts every `every`
async fn run_cleanup(container: Arc<ServiceContainer>, every: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let report = container.collector.cleanup().await?;
        info!(
            metrics_removed = report.metrics_removed,
            alerts_removed = report.alerts_removed,
            "Performance data cleanup finished"
        );
    }
}

fn init_logging(config: &OwnlyConfig) {
    let log_level = config
        .monitoring
        .log_level
        .parse()
        .unwrap_or(tracing::Level::INFO);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("ownly_core={},tower_http=info", log_level).into());

    if config.monitoring.structured_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
