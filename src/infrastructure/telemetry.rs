//! Prometheus telemetry for the event pipeline and alerting
//!
//! Every [`Telemetry`] owns its own registry, so tests and multiple containers
//! in one process never collide on metric names.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::core::CoreResult;

pub struct Telemetry {
    registry: Registry,
    pub events_enqueued: IntCounterVec,
    pub events_processed: IntCounterVec,
    pub events_failed: IntCounterVec,
    pub events_dropped: IntCounterVec,
    pub queue_depth: IntGauge,
    pub listener_reconnects: IntCounterVec,
    pub alerts_raised: IntCounterVec,
}

impl Telemetry {
    pub fn new() -> CoreResult<Self> {
        let registry = Registry::new_custom(Some("ownly".to_string()), None)?;

        let events_enqueued = counter_vec("events_enqueued_total", "Events accepted by the queue", "event_type")?;
        let events_processed = counter_vec("events_processed_total", "Events handled successfully", "event_type")?;
        let events_failed = counter_vec(
            "events_failed_total",
            "Events whose processor returned an error or panicked",
            "event_type",
        )?;
        let events_dropped = counter_vec(
            "events_dropped_total",
            "Events with no registered processor",
            "event_type",
        )?;
        let queue_depth = IntGauge::new("event_queue_depth", "Events waiting in the queue")?;
        let listener_reconnects = counter_vec(
            "listener_reconnects_total",
            "Automatic re-subscriptions after a stream failure",
            "event",
        )?;
        let alerts_raised = counter_vec("alerts_raised_total", "Performance alerts raised", "alert_type")?;

        registry.register(Box::new(events_enqueued.clone()))?;
        registry.register(Box::new(events_processed.clone()))?;
        registry.register(Box::new(events_failed.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(listener_reconnects.clone()))?;
        registry.register(Box::new(alerts_raised.clone()))?;

        Ok(Self {
            registry,
            events_enqueued,
            events_processed,
            events_failed,
            events_dropped,
            queue_depth,
            listener_reconnects,
            alerts_raised,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of everything registered
    pub fn render(&self) -> CoreResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::core::CoreError::Telemetry(e.to_string()))
    }
}

fn counter_vec(name: &str, help: &str, label: &str) -> prometheus::Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), &[label])
}
