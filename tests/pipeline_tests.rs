//! Event pipeline integration tests: listener, mock transport and queue

use anyhow::anyhow;
use ownly_core::adapters::MockChainTransport;
use ownly_core::config::ListenerConfig;
use ownly_core::core::{RawChainEvent, TransportError};
use ownly_core::events::{processor_fn, BlockchainEvent, EventKind, EventListener, EventQueue, NormalizedEvent};
use serde_json::{json, Map};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const COLLECTIBLE: &str = "0xf8d6e0586b0a20c7";
const STOREFRONT: &str = "0x179b6b1cb6755e31";

fn listener_config() -> ListenerConfig {
    ListenerConfig {
        collectible_address: COLLECTIBLE.to_string(),
        storefront_address: STOREFRONT.to_string(),
        ..ListenerConfig::default()
    }
}

fn recording(log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn ownly_core::events::EventProcessor> {
    let log = log.clone();
    processor_fn(move |event: BlockchainEvent| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(event.transaction_id.clone());
            Ok::<(), anyhow::Error>(())
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_minted_event_reaches_processor() {
    let transport = Arc::new(MockChainTransport::new());
    transport.script_open(
        "A.f8d6e0586b0a20c7.Collectible.Minted",
        vec![Ok(RawChainEvent::new(
            "0xmint",
            json!({
                "id": { "type": "UInt64", "value": "42" },
                "creator": { "type": "Optional", "value": { "type": "Address", "value": "0x01cf0e2f2f715450" } },
            }),
        )
        .with_block(77, 0))],
    );

    let listener = EventListener::new(transport.clone(), &listener_config());
    let queue = EventQueue::new();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    queue.add_processor(
        "CollectibleMinted",
        processor_fn(move |event: BlockchainEvent| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(event);
                Ok::<(), anyhow::Error>(())
            }
        }),
    );

    let _handle = listener.pipe_to_queue(EventKind::CollectibleMinted, &queue);
    tokio::time::sleep(Duration::from_millis(10)).await;
    queue.wait_idle().await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].data["nftId"], "42");
    assert_eq!(seen[0].block_height, Some(77));
    match seen[0].normalized() {
        Some(NormalizedEvent::CollectibleMinted(minted)) => {
            assert_eq!(minted.creator.as_deref(), Some("0x01cf0e2f2f715450"));
        }
        other => panic!("expected a minted payload, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_listener_gives_up_after_max_retries() {
    // Unscripted subscriptions fail straight away
    let transport = Arc::new(MockChainTransport::new());
    let listener = EventListener::new(transport.clone(), &listener_config());

    let _handle = listener.subscribe_to_withdrawals(|_| {});
    assert_eq!(listener.active_subscriptions().len(), 1);

    // 1 + 2 + 4 + 8 + 16 seconds of backoff, with room to spare
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(transport.subscribe_calls("A.f8d6e0586b0a20c7.Collectible.Withdraw"), 6);
    assert!(listener.active_subscriptions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_payload_is_delivered() {
    let transport = Arc::new(MockChainTransport::new());
    transport.script_open(
        "A.179b6b1cb6755e31.NFTStorefrontV2.ListingAvailable",
        vec![Ok(RawChainEvent::new("0xbad", json!({ "nftID": "not-a-number" })))],
    );
    let listener = EventListener::new(transport, &listener_config());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _handle = listener.subscribe_to_listings(move |event| sink.lock().unwrap().push(event));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].payload.is_malformed());
    assert_eq!(seen[0].data["rawData"]["nftID"], "not-a-number");
}

#[tokio::test(start_paused = true)]
async fn test_purchases_skip_cancelled_listings() {
    let transport = Arc::new(MockChainTransport::new());
    let completed = |tx: &str, purchased: bool| -> Result<RawChainEvent, TransportError> {
        Ok(RawChainEvent::new(
            tx,
            json!({
                "listingResourceID": "9001",
                "purchased": { "type": "Bool", "value": purchased },
                "nftID": "5",
            }),
        ))
    };
    transport.script_open(
        "A.179b6b1cb6755e31.NFTStorefrontV2.ListingCompleted",
        vec![completed("0xsold", true), completed("0xcancelled", false)],
    );
    let listener = EventListener::new(transport, &listener_config());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _handle = listener.subscribe_to_purchases(move |event| sink.lock().unwrap().push(event.transaction_id));
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(*seen.lock().unwrap(), vec!["0xsold".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_replaces_previous_subscription() {
    let transport = Arc::new(MockChainTransport::new());
    let name = "A.f8d6e0586b0a20c7.Collectible.Deposit";
    transport.script_open(name, vec![]);
    transport.script_open(name, vec![Ok(RawChainEvent::new("0xdep", json!({ "id": "3" })))]);
    let listener = EventListener::new(transport, &listener_config());

    let first = Arc::new(Mutex::new(0usize));
    let second = Arc::new(Mutex::new(0usize));

    let counter = first.clone();
    let stale = listener.subscribe_to_deposits(move |_| *counter.lock().unwrap() += 1);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let counter = second.clone();
    let _current = listener.subscribe_to_deposits(move |_| *counter.lock().unwrap() += 1);
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The stale handle must not cancel its replacement
    stale.unsubscribe();
    assert_eq!(listener.active_subscriptions(), vec![name.to_string()]);
    assert_eq!(*first.lock().unwrap(), 0);
    assert_eq!(*second.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_queue_preserves_order_across_failures() {
    let queue = EventQueue::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let sink = log.clone();
    queue.add_processor(
        "CollectibleDeposit",
        processor_fn(move |event: BlockchainEvent| {
            let sink = sink.clone();
            async move {
                match event.transaction_id.as_str() {
                    "2" => Err(anyhow!("storage unavailable")),
                    "3" => panic!("processor bug"),
                    tx => {
                        sink.lock().unwrap().push(tx.to_string());
                        Ok::<(), anyhow::Error>(())
                    }
                }
            }
        }),
    );

    for tx in ["1", "2", "3", "4", "5"] {
        queue.enqueue(BlockchainEvent::new("CollectibleDeposit", tx, Map::new()));
    }
    queue.wait_idle().await;

    assert_eq!(*log.lock().unwrap(), vec!["1", "4", "5"]);
    assert_eq!(queue.queue_size(), 0);
}

#[tokio::test]
async fn test_queue_processor_registration() {
    let queue = EventQueue::new();
    let first = Arc::new(Mutex::new(Vec::new()));
    let second = Arc::new(Mutex::new(Vec::new()));

    queue.add_processor("ListingAvailable", recording(&first));
    queue.add_processor("ListingAvailable", recording(&second));
    assert!(queue.has_processor("ListingAvailable"));

    queue.enqueue(BlockchainEvent::new("ListingAvailable", "a", Map::new()));
    // Nobody handles this one; it is dropped without blocking the next
    queue.enqueue(BlockchainEvent::new("ListingCompleted", "b", Map::new()));
    queue.enqueue(BlockchainEvent::new("ListingAvailable", "c", Map::new()));
    queue.wait_idle().await;

    assert!(first.lock().unwrap().is_empty());
    assert_eq!(*second.lock().unwrap(), vec!["a", "c"]);

    assert!(queue.remove_processor("ListingAvailable"));
    assert!(!queue.remove_processor("ListingAvailable"));
    assert!(!queue.has_processor("ListingAvailable"));
}

#[tokio::test(start_paused = true)]
async fn test_stream_error_triggers_resubscribe() {
    let transport = Arc::new(MockChainTransport::new());
    let name = "A.f8d6e0586b0a20c7.Collectible.Minted";
    transport.script_closed(
        name,
        vec![
            Ok(RawChainEvent::new("0x1", json!({ "id": "1" }))),
            Err(TransportError::Subscription("connection reset".to_string())),
        ],
    );
    transport.script_open(name, vec![Ok(RawChainEvent::new("0x2", json!({ "id": "2" })))]);
    let listener = EventListener::new(transport.clone(), &listener_config());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _handle = listener.subscribe_to_minted(move |event| sink.lock().unwrap().push(event.transaction_id));

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(*seen.lock().unwrap(), vec!["0x1".to_string(), "0x2".to_string()]);
    assert_eq!(transport.subscribe_calls(name), 2);
}
