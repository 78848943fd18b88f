//! Performance collector and metric storage tests

use chrono::{Duration as ChronoDuration, Utc};
use ownly_core::config::PerformanceConfig;
use ownly_core::core::TimeRange;
use ownly_core::performance::{
    percentile, AlertType, ApiMetricData, BlockchainMetricData, EventMetricData, GroupBy, InMemoryMetricStorage,
    MetricCategory, MetricQuery, MetricStorage, PerformanceCollector, PerformanceMetric, UiMetricData,
};
use std::sync::{Arc, Mutex};

fn collector() -> PerformanceCollector {
    PerformanceCollector::in_memory(PerformanceConfig::default())
}

#[tokio::test]
async fn test_slow_marketplace_call_raises_one_critical_alert() {
    let collector = collector();
    let raised = Arc::new(Mutex::new(Vec::new()));
    let sink = raised.clone();
    collector.on_alert(move |alert| sink.lock().unwrap().push(alert.clone()));

    let stored = collector
        .record_api_metric(ApiMetricData::new("/api/marketplace", "GET", 200, 3500.0))
        .await
        .unwrap();
    assert!(stored.is_some());

    let raised = raised.lock().unwrap();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].alert_type, AlertType::Critical);
    assert_eq!(raised[0].threshold, 3000.0);
    assert_eq!(raised[0].category, MetricCategory::Api);
    assert!(!raised[0].resolved);
}

#[tokio::test]
async fn test_alert_tiers_are_exclusive() {
    let collector = collector();

    collector
        .record_api_metric(ApiMetricData::new("/api/nfts", "GET", 200, 1500.0))
        .await
        .unwrap();
    collector
        .record_api_metric(ApiMetricData::new("/api/nfts", "GET", 200, 1000.0))
        .await
        .unwrap();

    // 1000ms sits exactly on the warning threshold and does not cross it
    let alerts = collector.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::Warning);
    assert_eq!(alerts[0].threshold, 1000.0);
}

#[tokio::test]
async fn test_error_rate_alert_over_window() {
    let collector = collector();

    for _ in 0..3 {
        collector
            .record_api_metric(ApiMetricData::new("/api/listings", "POST", 200, 20.0))
            .await
            .unwrap();
    }
    collector
        .record_api_metric(ApiMetricData::new("/api/listings", "POST", 502, 20.0))
        .await
        .unwrap();

    // One failure out of four is a 25% error rate
    let alerts = collector.active_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::Critical);
    assert_eq!(alerts[0].threshold, 0.1);
}

#[tokio::test]
async fn test_event_and_chain_thresholds() {
    let collector = collector();

    collector
        .record_event_metric(EventMetricData {
            event_type: "ListingCompleted".to_string(),
            processing_time: 40.0,
            queue_size: 600,
            success: true,
            error: None,
            tags: Default::default(),
        })
        .await
        .unwrap();
    collector
        .record_blockchain_metric(BlockchainMetricData {
            operation: "purchase_transaction".to_string(),
            duration: 12_000.0,
            success: true,
            transaction_id: Some("0xabc".to_string()),
            gas_used: None,
            tags: Default::default(),
        })
        .await
        .unwrap();
    collector
        .record_blockchain_metric(BlockchainMetricData {
            operation: "get_listing".to_string(),
            duration: 12_000.0,
            success: true,
            transaction_id: None,
            gas_used: None,
            tags: Default::default(),
        })
        .await
        .unwrap();

    let tiers: Vec<(MetricCategory, AlertType)> = collector
        .alerts()
        .iter()
        .map(|alert| (alert.category, alert.alert_type))
        .collect();
    assert_eq!(
        tiers,
        vec![
            (MetricCategory::Event, AlertType::Critical),
            (MetricCategory::Blockchain, AlertType::Warning),
            (MetricCategory::Blockchain, AlertType::Critical),
        ]
    );
}

#[tokio::test]
async fn test_ui_metrics_never_alert() {
    let collector = collector();
    let stored = collector
        .record_ui_metric(UiMetricData {
            component: "NftGrid".to_string(),
            action: "render".to_string(),
            render_time: 90_000.0,
            interaction_time: None,
            page: Some("/marketplace".to_string()),
            tags: Default::default(),
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(stored.name, "ui_render_time");
    assert_eq!(stored.tag("component"), Some("NftGrid"));
    assert!(collector.alerts().is_empty());
}

#[tokio::test]
async fn test_caller_tags_are_queryable() {
    let collector = collector();
    collector
        .record_api_metric(ApiMetricData::new("/api/marketplace", "GET", 200, 40.0).with_tag("region", "eu"))
        .await
        .unwrap();
    collector
        .record_api_metric(ApiMetricData::new("/api/marketplace", "GET", 200, 60.0).with_tag("region", "us"))
        .await
        .unwrap();

    let eu = collector
        .metrics(&MetricQuery::new().category(MetricCategory::Api).tag("region", "eu"))
        .await
        .unwrap();
    assert_eq!(eu.len(), 1);
    assert_eq!(eu[0].value, 40.0);
    assert_eq!(eu[0].tag("endpoint"), Some("/api/marketplace"));
}

#[tokio::test]
async fn test_disabled_collector_records_nothing() {
    let config = PerformanceConfig {
        enabled: false,
        ..PerformanceConfig::default()
    };
    let collector = PerformanceCollector::in_memory(config);

    let stored = collector
        .record_api_metric(ApiMetricData::new("/api/marketplace", "GET", 500, 9000.0))
        .await
        .unwrap();

    assert!(stored.is_none());
    assert_eq!(collector.storage().len().await.unwrap(), 0);
    assert!(collector.alerts().is_empty());
}

#[tokio::test]
async fn test_resolve_alert() {
    let collector = collector();
    collector
        .record_api_metric(ApiMetricData::new("/api/marketplace", "GET", 200, 5000.0))
        .await
        .unwrap();

    let id = collector.active_alerts()[0].id.clone();
    assert!(collector.resolve_alert(&id));
    assert!(!collector.resolve_alert("missing"));
    assert!(collector.active_alerts().is_empty());

    let all = collector.alerts();
    assert_eq!(all.len(), 1);
    assert!(all[0].resolved);
    assert!(all[0].resolved_at.is_some());
}

#[tokio::test]
async fn test_storage_evicts_oldest_entries() {
    let storage = InMemoryMetricStorage::new(3);
    for i in 0..5 {
        let metric = PerformanceMetric::api(ApiMetricData::new(format!("/api/{}", i), "GET", 200, i as f64))
            .at(Utc::now() + ChronoDuration::seconds(i));
        storage.store(metric).await.unwrap();
    }

    assert_eq!(storage.len().await.unwrap(), 3);
    let endpoints: Vec<String> = storage
        .query(&MetricQuery::new())
        .await
        .unwrap()
        .iter()
        .filter_map(|m| m.tag("endpoint").map(str::to_string))
        .collect();
    assert_eq!(endpoints, vec!["/api/4", "/api/3", "/api/2"]);
}

#[tokio::test]
async fn test_cleanup_respects_retention() {
    let storage = Arc::new(InMemoryMetricStorage::new(100));
    let collector = PerformanceCollector::new(PerformanceConfig::default(), storage.clone());

    let stale = PerformanceMetric::api(ApiMetricData::new("/api/old", "GET", 200, 10.0))
        .at(Utc::now() - ChronoDuration::days(8));
    storage.store(stale).await.unwrap();
    collector
        .record_api_metric(ApiMetricData::new("/api/new", "GET", 200, 10.0))
        .await
        .unwrap();

    let report = collector.cleanup().await.unwrap();
    assert_eq!(report.metrics_removed, 1);
    assert_eq!(report.alerts_removed, 0);
    assert_eq!(storage.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_aggregation_groups_by_endpoint() {
    let collector = collector();
    for (endpoint, time) in [("/api/a", 10.0), ("/api/a", 30.0), ("/api/b", 50.0)] {
        collector
            .record_api_metric(ApiMetricData::new(endpoint, "GET", 200, time))
            .await
            .unwrap();
    }

    let groups = collector
        .aggregated_metrics(
            MetricCategory::Api,
            TimeRange::last(ChronoDuration::hours(1)),
            Some(GroupBy::Endpoint),
        )
        .await
        .unwrap();

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].group, "/api/a");
    assert_eq!(groups[0].count, 2);
    assert_eq!(groups[0].average, 20.0);
    assert_eq!(groups[0].min, 10.0);
    assert_eq!(groups[0].max, 30.0);
    assert_eq!(groups[1].group, "/api/b");
}

#[test]
fn test_percentile_nearest_rank() {
    let values: Vec<f64> = (1..=100).map(f64::from).collect();
    assert_eq!(percentile(&values, 0.95), 96.0);
    assert_eq!(percentile(&values, 0.99), 100.0);
    assert_eq!(percentile(&[7.0], 0.99), 7.0);
    assert_eq!(percentile(&[], 0.5), 0.0);
}
