//! Service container for dependency injection

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::config::OwnlyConfig;
use crate::core::{ChainTransport, CoreResult};
use crate::errors::ErrorHandler;
use crate::events::{ActivityFeed, EventListener, EventQueue, SubscriptionHandle};
use crate::infrastructure::Telemetry;
use crate::performance::PerformanceCollector;

/// Entries kept by the activity feed
const ACTIVITY_FEED_CAPACITY: usize = 500;

/// Service container holding one instance of every component
pub struct ServiceContainer {
    /// Configuration
    pub config: OwnlyConfig,

    pub telemetry: Arc<Telemetry>,

    /// Funnel for classified errors
    pub errors: Arc<ErrorHandler>,

    pub collector: Arc<PerformanceCollector>,

    pub queue: EventQueue,

    pub listener: EventListener,

    /// Default processor for every listened event kind
    pub activity: Arc<ActivityFeed>,

    transport_name: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub transport: &'static str,
    pub active_subscriptions: Vec<String>,
    pub queue_size: usize,
    pub active_alerts: usize,
}

impl ServiceContainer {
    /// Wire every component around `transport`
    pub fn new(config: OwnlyConfig, transport: Arc<dyn ChainTransport>) -> CoreResult<Self> {
        let transport_name = transport.name();
        info!(transport = transport_name, "Initializing service container");

        let telemetry = Arc::new(Telemetry::new()?);
        let errors = Arc::new(ErrorHandler::new());

        let collector = Arc::new(
            PerformanceCollector::in_memory(config.performance.clone()).with_telemetry(Arc::clone(&telemetry)),
        );
        info!(
            enabled = config.performance.enabled,
            sample_rate = config.performance.sample_rate,
            "Performance collector initialized"
        );

        let queue = EventQueue::build(Some(Arc::clone(&collector)), Some(Arc::clone(&telemetry)));
        let listener = EventListener::build(transport, &config.listener, Some(Arc::clone(&telemetry)));
        let activity = Arc::new(ActivityFeed::new(ACTIVITY_FEED_CAPACITY));

        info!("Event pipeline initialized");

        Ok(Self {
            config,
            telemetry,
            errors,
            collector,
            queue,
            listener,
            activity,
            transport_name,
        })
    }

    /// Register the activity feed and pipe every configured event kind from
    /// the listener into the queue
    pub fn start_pipeline(&self) -> Vec<SubscriptionHandle> {
        let kinds = &self.config.listener.events;
        self.activity.register(&self.queue, kinds);

        kinds
            .iter()
            .map(|kind| self.listener.pipe_to_queue(*kind, &self.queue))
            .collect()
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            transport: self.transport_name,
            active_subscriptions: self.listener.active_subscriptions(),
            queue_size: self.queue.queue_size(),
            active_alerts: self.collector.active_alerts().len(),
        }
    }

    /// Stop listening, then let queued events finish
    pub async fn shutdown(&self) {
        info!("Shutting down service container");
        self.listener.unsubscribe_all();
        self.queue.wait_idle().await;
        info!("Event queue drained");
    }
}
