//! In-process event queue
//!
//! Events are delivered strictly in enqueue order, one at a time, to the
//! single processor registered for their type. A processor that fails or
//! panics is logged and counted; the next event is delivered regardless.
//! There is no retry here: processors that need it wrap their own work with
//! [`crate::retry`].
//!
//! A hung processor stalls the whole queue. Processors must bound their own
//! work.

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use super::event::BlockchainEvent;
use crate::errors::handler::panic_message;
use crate::infrastructure::Telemetry;
use crate::performance::{EventMetricData, PerformanceCollector};

/// Handles every event of one type
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, event: &BlockchainEvent) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into an [`EventProcessor`]
pub struct FnProcessor<F>(F);

#[async_trait]
impl<F, Fut> EventProcessor for FnProcessor<F>
where
    F: Fn(BlockchainEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn process(&self, event: &BlockchainEvent) -> anyhow::Result<()> {
        (self.0)(event.clone()).await
    }
}

pub fn processor_fn<F, Fut>(f: F) -> Arc<dyn EventProcessor>
where
    F: Fn(BlockchainEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnProcessor(f))
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<BlockchainEvent>,
    draining: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    processors: RwLock<HashMap<String, Arc<dyn EventProcessor>>>,
    /// `true` while nothing is pending or in flight
    idle: watch::Sender<bool>,
    collector: Option<Arc<PerformanceCollector>>,
    telemetry: Option<Arc<Telemetry>>,
}

/// Cheap to clone; clones share the same queue
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// Queue that records an event metric per processed event
    pub fn with_collector(collector: Arc<PerformanceCollector>) -> Self {
        Self::build(Some(collector), None)
    }

    pub fn build(collector: Option<Arc<PerformanceCollector>>, telemetry: Option<Arc<Telemetry>>) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                processors: RwLock::new(HashMap::new()),
                idle,
                collector,
                telemetry,
            }),
        }
    }

    /// Register the processor for `event_type`, replacing any earlier one
    pub fn add_processor(&self, event_type: impl Into<String>, processor: Arc<dyn EventProcessor>) {
        let event_type = event_type.into();
        let mut processors = self.inner.processors.write().unwrap_or_else(PoisonError::into_inner);
        if processors.insert(event_type.clone(), processor).is_some() {
            debug!(event_type = %event_type, "Replaced event processor");
        }
    }

    /// Later events of this type are dropped
    pub fn remove_processor(&self, event_type: &str) -> bool {
        let mut processors = self.inner.processors.write().unwrap_or_else(PoisonError::into_inner);
        processors.remove(event_type).is_some()
    }

    pub fn has_processor(&self, event_type: &str) -> bool {
        let processors = self.inner.processors.read().unwrap_or_else(PoisonError::into_inner);
        processors.contains_key(event_type)
    }

    /// Append an event and make sure a drain task is running.
    ///
    /// Outside a Tokio runtime the event stays pending until the next
    /// `enqueue` made from inside one.
    pub fn enqueue(&self, event: BlockchainEvent) {
        let mut state = self.inner.lock_state();
        if let Some(telemetry) = &self.inner.telemetry {
            telemetry.events_enqueued.with_label_values(&[event.event_type.as_str()]).inc();
        }
        state.pending.push_back(event);
        self.inner.set_depth(state.pending.len());

        if state.draining {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                state.draining = true;
                self.inner.idle.send_replace(false);
                runtime.spawn(drain(Arc::clone(&self.inner)));
            }
            Err(_) => warn!(
                pending = state.pending.len(),
                "No Tokio runtime to drain the event queue, leaving events pending"
            ),
        }
    }

    /// Events enqueued and not yet taken by the drain loop
    pub fn queue_size(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    /// Resolves once nothing is pending and no processor is running
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = idle.wait_for(|idle| *idle).await;
    }
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_depth(&self, depth: usize) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.queue_depth.set(depth as i64);
        }
    }

    async fn dispatch(&self, event: BlockchainEvent, remaining: usize) {
        let processor = self
            .processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.event_type)
            .cloned();

        let Some(processor) = processor else {
            debug!(event_type = %event.event_type, tx = %event.transaction_id, "No processor registered, dropping event");
            if let Some(telemetry) = &self.telemetry {
                telemetry.events_dropped.with_label_values(&[event.event_type.as_str()]).inc();
            }
            return;
        };

        let started = Instant::now();
        let outcome = AssertUnwindSafe(processor.process(&event)).catch_unwind().await;
        let processing_time = started.elapsed().as_secs_f64() * 1000.0;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(panic) => Some(format!("processor panicked: {}", panic_message(&panic))),
        };

        match &failure {
            None => {
                if let Some(telemetry) = &self.telemetry {
                    telemetry.events_processed.with_label_values(&[event.event_type.as_str()]).inc();
                }
            }
            Some(reason) => {
                error!(
                    event_type = %event.event_type,
                    tx = %event.transaction_id,
                    "Event processing failed: {}",
                    reason
                );
                if let Some(telemetry) = &self.telemetry {
                    telemetry.events_failed.with_label_values(&[event.event_type.as_str()]).inc();
                }
            }
        }

        if let Some(collector) = &self.collector {
            let data = EventMetricData {
                event_type: event.event_type.clone(),
                processing_time,
                queue_size: remaining,
                success: failure.is_none(),
                error: failure,
                tags: Default::default(),
            };
            if let Err(e) = collector.record_event_metric(data).await {
                warn!("Failed to record event metric: {}", e);
            }
        }
    }
}

async fn drain(inner: Arc<QueueInner>) {
    loop {
        let next = {
            let mut state = inner.lock_state();
            match state.pending.pop_front() {
                Some(event) => Some((event, state.pending.len())),
                None => {
                    state.draining = false;
                    inner.idle.send_replace(true);
                    None
                }
            }
        };

        let Some((event, remaining)) = next else {
            return;
        };
        inner.set_depth(remaining);
        inner.dispatch(event, remaining).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn event(event_type: &str, tx: &str) -> BlockchainEvent {
        BlockchainEvent::new(event_type, tx, Map::new())
    }

    fn recorder(log: Arc<Mutex<Vec<String>>>, delay_ms: u64) -> Arc<dyn EventProcessor> {
        processor_fn(move |event: BlockchainEvent| {
            let log = log.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                log.lock().unwrap().push(event.transaction_id);
                Ok::<(), anyhow::Error>(())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_across_types_with_uneven_delays() {
        let queue = EventQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.add_processor("Slow", recorder(log.clone(), 50));
        queue.add_processor("Fast", recorder(log.clone(), 1));

        for (i, ty) in ["Slow", "Fast", "Slow", "Fast", "Fast"].iter().enumerate() {
            queue.enqueue(event(ty, &i.to_string()));
        }
        queue.wait_idle().await;

        assert_eq!(*log.lock().unwrap(), vec!["0", "1", "2", "3", "4"]);
        assert_eq!(queue.queue_size(), 0);
    }

    #[tokio::test]
    async fn test_second_registration_replaces_first() {
        let queue = EventQueue::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        queue.add_processor(
            "CollectibleMinted",
            processor_fn(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), anyhow::Error>(())
                }
            }),
        );
        let counter = second.clone();
        queue.add_processor(
            "CollectibleMinted",
            processor_fn(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), anyhow::Error>(())
                }
            }),
        );

        queue.enqueue(event("CollectibleMinted", "tx"));
        queue.wait_idle().await;

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_and_panicking_processors_do_not_stop_the_loop() {
        let telemetry = Arc::new(Telemetry::new().unwrap());
        let queue = EventQueue::build(None, Some(telemetry.clone()));
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.add_processor("Err", processor_fn(|_| async { Err::<(), _>(anyhow::anyhow!("db unavailable")) }));
        queue.add_processor(
            "Panic",
            processor_fn(|event: BlockchainEvent| async move {
                if event.transaction_id == "c" {
                    panic!("bad payload");
                }
                Ok::<(), anyhow::Error>(())
            }),
        );
        queue.add_processor("Ok", recorder(log.clone(), 0));

        queue.enqueue(event("Err", "a"));
        queue.enqueue(event("Ok", "b"));
        queue.enqueue(event("Panic", "c"));
        queue.enqueue(event("Ok", "d"));
        queue.wait_idle().await;

        assert_eq!(*log.lock().unwrap(), vec!["b", "d"]);
        assert_eq!(telemetry.events_failed.with_label_values(&["Err"]).get(), 1);
        assert_eq!(telemetry.events_failed.with_label_values(&["Panic"]).get(), 1);
        assert_eq!(telemetry.events_processed.with_label_values(&["Ok"]).get(), 2);
    }

    #[tokio::test]
    async fn test_unregistered_types_are_dropped() {
        let telemetry = Arc::new(Telemetry::new().unwrap());
        let queue = EventQueue::build(None, Some(telemetry.clone()));
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.add_processor("ListingAvailable", recorder(log.clone(), 0));
        assert!(queue.remove_processor("ListingAvailable"));
        assert!(!queue.has_processor("ListingAvailable"));

        queue.enqueue(event("ListingAvailable", "x"));
        queue.wait_idle().await;

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(telemetry.events_dropped.with_label_values(&["ListingAvailable"]).get(), 1);
    }

    #[tokio::test]
    async fn test_collector_hook_records_event_metrics() {
        use crate::config::PerformanceConfig;
        use crate::performance::{MetricCategory, MetricQuery};

        let collector = Arc::new(PerformanceCollector::in_memory(PerformanceConfig::default()));
        let queue = EventQueue::with_collector(collector.clone());
        queue.add_processor("Ok", processor_fn(|_| async { Ok::<(), anyhow::Error>(()) }));
        queue.add_processor("Err", processor_fn(|_| async { Err::<(), _>(anyhow::anyhow!("nope")) }));

        queue.enqueue(event("Ok", "1"));
        queue.enqueue(event("Err", "2"));
        queue.wait_idle().await;

        let metrics = collector
            .metrics(&MetricQuery::new().category(MetricCategory::Event))
            .await
            .unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics.iter().filter(|m| m.tag("success") == Some("false")).count(), 1);
    }

    #[test]
    fn test_enqueue_outside_runtime_keeps_event_pending() {
        let queue = EventQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.add_processor("Ok", recorder(log.clone(), 0));

        queue.enqueue(event("Ok", "early"));
        assert_eq!(queue.queue_size(), 1);

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            queue.enqueue(event("Ok", "late"));
            queue.wait_idle().await;
        });

        assert_eq!(*log.lock().unwrap(), vec!["early", "late"]);
        assert_eq!(queue.queue_size(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_on_empty_queue_returns() {
        let queue = EventQueue::new();
        tokio_test::assert_ready!(tokio_test::task::spawn(queue.wait_idle()).poll());
    }
}
