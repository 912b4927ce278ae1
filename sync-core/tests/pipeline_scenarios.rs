//! End-to-end scenarios over the in-memory store, a scripted source and a
//! scripted consumer

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use sync_core::consumer::{ConsumerMode, RecordingConsumer};
use sync_core::source::ScriptedSource;
use sync_core::status::MAX_RETRIES_MESSAGE;
use sync_core::{
    Delivery, Error, IngestOutcome, MemoryStore, RawEvent, RetryPolicy, SnapshotStore,
    SyncConfig, SyncLogStore, SyncMetrics, SyncPipeline, SyncStatus, WorkerPool,
};
use tokio_util::sync::CancellationToken;

fn raw_event(address: &str, height: i64, balance: i64, tx_id: &str) -> RawEvent {
    let payload = json!({
        "address": address,
        "height": height,
        "balance": balance,
        "changeValue": 25,
        "txId": tx_id,
    })
    .to_string();
    RawEvent::new(json!({
        "block_height": height,
        "chain_id": "chain1",
        "topic": "cic_topic",
        "tx_id": tx_id,
        "contract_name": "carbon_integral",
        "event_data": [payload],
    }))
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        poll_interval_ms: 20,
        retry: RetryPolicy {
            tactical_backoff_ms: 1,
            sent_stale_after_ms: 0,
            ..RetryPolicy::default()
        },
        ..SyncConfig::default()
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    consumer: Arc<RecordingConsumer>,
    pipeline: SyncPipeline,
}

async fn harness(config: SyncConfig, mode: ConsumerMode, events: Vec<RawEvent>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    store.insert_authorization("u1", "addr-1", 50, 1000).await;
    let consumer = Arc::new(RecordingConsumer::new(mode));
    let pipeline = SyncPipeline::new(
        config,
        store.clone(),
        Arc::new(ScriptedSource::live(events)),
        consumer.clone(),
        Arc::new(SyncMetrics::default()),
    )
    .unwrap();
    Harness {
        store,
        consumer,
        pipeline,
    }
}

async fn ingest_and_deliver(h: &Harness, raw: &RawEvent) -> Option<Result<Delivery, Error>> {
    match h.ingest(raw).await {
        IngestOutcome::Recorded(row) => Some(
            h.pipeline
                .delivery()
                .deliver(&row, &CancellationToken::new())
                .await,
        ),
        _ => None,
    }
}

impl Harness {
    async fn ingest(&self, raw: &RawEvent) -> IngestOutcome {
        self.pipeline.filter().ingest(raw).await.unwrap()
    }
}

#[tokio::test]
async fn test_unauthenticated_address_creates_no_row() {
    let h = harness(fast_config(), ConsumerMode::Accept, vec![]).await;
    let result = ingest_and_deliver(&h, &raw_event("addr-unknown", 100, 10, "tx1")).await;
    assert!(result.is_none());
    assert!(h.store.all_entries().await.is_empty());
}

#[tokio::test]
async fn test_event_below_baseline_creates_no_row() {
    let h = harness(fast_config(), ConsumerMode::Accept, vec![]).await;
    let result = ingest_and_deliver(&h, &raw_event("addr-1", 40, 10, "tx1")).await;
    assert!(result.is_none());
    assert!(h.store.all_entries().await.is_empty());
}

#[tokio::test]
async fn test_accepted_event_reaches_success() {
    let h = harness(fast_config(), ConsumerMode::Accept, vec![]).await;
    let result = ingest_and_deliver(&h, &raw_event("addr-1", 60, 1025, "tx1")).await;
    assert!(matches!(result, Some(Ok(Delivery::Confirmed))));

    let rows = h.store.all_entries().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, SyncStatus::Success);
    assert_eq!(rows[0].retry_count, 0);
    assert_eq!(rows[0].tx_id, "tx1");
    assert_eq!(h.consumer.delivered()[0].balance_after, 1025);

    let snapshot = h.store.get_snapshot("u1").await.unwrap().unwrap();
    assert_eq!(snapshot.current_version, 1);
    assert_eq!(snapshot.block_height, 60);
}

#[tokio::test]
async fn test_always_failing_consumer_ends_in_quarantine() {
    let h = harness(fast_config(), ConsumerMode::Reject, vec![]).await;
    let result = ingest_and_deliver(&h, &raw_event("addr-1", 60, 1025, "tx1")).await;
    assert!(matches!(result, Some(Err(Error::DeliveryExhausted { attempts: 3, .. }))));
    assert_eq!(h.consumer.calls().len(), 3);

    let id = h.store.all_entries().await[0].id;
    let row = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(row.status, SyncStatus::Sent);
    assert_eq!(row.retry_count, 1);

    let cancel = CancellationToken::new();
    for expected in 2..5 {
        h.pipeline.poller().sweep(&cancel).await.unwrap();
        let row = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, SyncStatus::Failed);
        assert_eq!(row.retry_count, expected);
    }

    let report = h.pipeline.poller().sweep(&cancel).await.unwrap();
    assert_eq!(report.quarantined, 1);
    let row = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(row.status, SyncStatus::Ignored);
    assert_eq!(row.retry_count, 5);
    assert_eq!(row.error_message.as_deref(), Some(MAX_RETRIES_MESSAGE));
    assert_eq!(h.store.list_by_status(SyncStatus::Ignored, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_tactical_exhaustion_at_threshold_marks_failed() {
    let mut config = fast_config();
    config.retry.failed_threshold = 1;
    let h = harness(config, ConsumerMode::Reject, vec![]).await;

    let result = ingest_and_deliver(&h, &raw_event("addr-1", 60, 1025, "tx1")).await;
    assert!(matches!(result, Some(Err(Error::DeliveryExhausted { .. }))));

    let row = &h.store.all_entries().await[0];
    assert_eq!(row.status, SyncStatus::Failed);
    assert_eq!(row.retry_count, 1);
}

#[tokio::test]
async fn test_redelivery_after_success_leaves_row_unchanged() {
    let h = harness(fast_config(), ConsumerMode::Accept, vec![]).await;
    let raw = raw_event("addr-1", 60, 1025, "tx1");
    ingest_and_deliver(&h, &raw).await;
    let before = h.store.all_entries().await;

    let outcome = h.ingest(&raw).await;
    assert!(matches!(outcome, IngestOutcome::Duplicate(ref row) if row.status == SyncStatus::Success));
    assert_eq!(h.store.all_entries().await, before);
    assert_eq!(h.consumer.calls().len(), 1);
}

#[tokio::test]
async fn test_failed_row_recovers_on_sweep() {
    let h = harness(fast_config(), ConsumerMode::Reject, vec![]).await;
    ingest_and_deliver(&h, &raw_event("addr-1", 60, 1025, "tx1")).await;

    h.consumer.set_mode(ConsumerMode::Accept);
    let report = h.pipeline.poller().sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.delivered, 1);

    let row = &h.store.all_entries().await[0];
    assert_eq!(row.status, SyncStatus::Success);
    assert_eq!(row.retry_count, 0);
    assert_eq!(row.error_message, None);
}

#[tokio::test]
async fn test_pipeline_runs_under_worker_pool() {
    let events = vec![
        raw_event("addr-1", 40, 900, "stale"),
        RawEvent::nil(),
        raw_event("addr-1", 60, 1025, "tx1"),
        raw_event("addr-2", 61, 10, "unknown"),
        raw_event("addr-1", 62, 1050, "tx2"),
        raw_event("addr-1", 62, 1050, "tx2"),
    ];
    let config = SyncConfig {
        retry: RetryPolicy {
            tactical_backoff_ms: 1,
            ..RetryPolicy::default()
        },
        ..fast_config()
    };
    let h = harness(config, ConsumerMode::Accept, events).await;

    let root = CancellationToken::new();
    let pool = WorkerPool::new(4, &root);
    pool.start();
    h.pipeline.submit_to(&pool).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let rows = h.store.all_entries().await;
        if rows.len() == 2 && rows.iter().all(|r| r.status == SyncStatus::Success) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "pipeline did not settle: {rows:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pool.stop().await;

    let mut delivered: Vec<String> = h.consumer.delivered().into_iter().map(|r| r.tx_id).collect();
    delivered.sort();
    assert_eq!(delivered, vec!["tx1", "tx2"]);
    assert_eq!(h.pipeline.metrics().duplicates.get(), 1);

    let snapshot = h.store.get_snapshot("u1").await.unwrap().unwrap();
    assert_eq!(snapshot.block_height, 62);
    assert_eq!(snapshot.current_balance, 1050);
}

#[tokio::test]
async fn test_listener_resumes_from_recorded_height() {
    let h = harness(fast_config(), ConsumerMode::Accept, vec![]).await;
    ingest_and_deliver(&h, &raw_event("addr-1", 75, 1025, "tx1")).await;
    assert_eq!(h.pipeline.listener().start_height().await.unwrap(), 75);
}

#[tokio::test]
async fn test_storage_outage_does_not_stop_sweep_loop() {
    let h = harness(fast_config(), ConsumerMode::Accept, vec![]).await;
    h.store.set_unavailable(true);
    assert!(h
        .pipeline
        .poller()
        .sweep(&CancellationToken::new())
        .await
        .unwrap_err()
        .is_storage());

    h.store.set_unavailable(false);
    assert!(h.pipeline.poller().sweep(&CancellationToken::new()).await.is_ok());
}
