//! End-to-end properties of the lineage pipeline.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use lineageflow::archive::{ArchiveStore, InMemoryArchive};
use lineageflow::cancellation::ShutdownToken;
use lineageflow::channel::{DurableChannel, RedeliveryBackoff};
use lineageflow::config::{ChannelConfig, PipelineConfig, RetraceConfig, StoreConfig};
use lineageflow::core::{LineageEvent, LineageRecord, RetraceRequest, RetraceState};
use lineageflow::pipeline::LineagePipeline;
use lineageflow::retrace::TraceReconstructor;
use lineageflow::store::{InMemoryLineageStore, LineageStore};
use lineageflow::testing::{
    assert_each_node_once, assert_tree_edges, fact, wide_tree_records, FlakyLineageStore,
};
use lineageflow::utils::{Clock, ManualClock};
use lineageflow::writer::StoreWriter;

fn immediate_store_config() -> StoreConfig {
    StoreConfig {
        redelivery: RedeliveryBackoff::immediate(),
        ..StoreConfig::default()
    }
}

fn immediate_retrace_config() -> RetraceConfig {
    RetraceConfig {
        redelivery: RedeliveryBackoff::immediate(),
        ..RetraceConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn duplicate_deliveries_leave_one_record_with_last_content() {
    let channel = Arc::new(DurableChannel::new(
        ChannelConfig::new("events")
            .with_batch_size(10)
            .with_batch_window(Duration::from_secs(1))
            .with_visibility_timeout(Duration::from_secs(5)),
    ));
    let store = Arc::new(InMemoryLineageStore::new());
    let writer = StoreWriter::new(channel.clone(), store.clone(), &immediate_store_config());

    let event = LineageEvent::new("R", "A", "created").with_payload(json!({"v": 1}));
    channel.publish(event.clone()).unwrap();
    channel.publish(event.clone()).unwrap();

    // A consumer that takes the batch and never acknowledges it.
    let lost = channel.receive_batch().await;
    assert_eq!(lost.len(), 2);
    tokio::time::sleep(Duration::from_secs(6)).await;

    let report = writer.run_once().await.unwrap();
    assert_eq!(report.written + report.unchanged, 2);
    assert_eq!(store.len(), 1);

    let newer = LineageEvent::new("R", "A", "created").with_payload(json!({"v": 2}));
    channel.publish(newer.clone()).unwrap();
    writer.run_once().await.unwrap();

    let stored = store.get("R", "A").await.unwrap().unwrap();
    assert_eq!(stored.payload, json!({"v": 2}));
    assert_eq!(store.find_by_node("A").await.unwrap().len(), 1);
}

#[tokio::test]
async fn complete_tree_contains_each_reachable_node_once() {
    let store = Arc::new(InMemoryLineageStore::new());
    let records = wide_tree_records("R", 3, 3);
    let expected: Vec<String> = records.iter().map(|r| r.node_id.clone()).collect();
    for record in records {
        store.put(record).await.unwrap();
    }
    let reconstructor = TraceReconstructor::new(
        Arc::new(DurableChannel::new(ChannelConfig::retrace_defaults())),
        store,
        Arc::new(InMemoryArchive::new()),
        &RetraceConfig::default(),
    );

    let tree = reconstructor.reconstruct("R", Some(expected.len())).await.unwrap();
    let expected: Vec<&str> = expected.iter().map(String::as_str).collect();
    assert_each_node_once(&tree, &expected);
    assert!(!tree.truncated);
    assert_eq!(tree.depth(), 4);
}

#[tokio::test]
async fn expired_ancestor_truncates_without_error() {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(InMemoryLineageStore::with_clock(clock.clone()));
    let soon = clock.now() + chrono::Duration::seconds(10);

    store.put(LineageRecord::new("R", "A", "created")).await.unwrap();
    store
        .put(
            LineageRecord::new("R", "B", "transformed")
                .with_parent("A")
                .with_ttl_expiry(soon),
        )
        .await
        .unwrap();
    store
        .put(LineageRecord::new("R", "C", "transformed").with_parent("B"))
        .await
        .unwrap();
    clock.advance(chrono::Duration::seconds(11));

    let reconstructor = TraceReconstructor::new(
        Arc::new(DurableChannel::new(ChannelConfig::retrace_defaults())),
        store,
        Arc::new(InMemoryArchive::new()),
        &RetraceConfig::default(),
    );
    let tree = reconstructor.reconstruct("R", None).await.unwrap();

    assert_eq!(tree.node_ids(), vec!["A"]);
    assert!(tree.truncated);
    assert_eq!(tree.orphans, vec!["C"]);
}

#[tokio::test]
async fn persistent_read_failures_dead_letter_and_archive_nothing() {
    let channel = Arc::new(DurableChannel::new(
        ChannelConfig::retrace_defaults()
            .with_batch_window(Duration::ZERO)
            .with_max_receive_count(3),
    ));
    let inner: Arc<dyn LineageStore> = Arc::new(InMemoryLineageStore::new());
    inner.put(LineageRecord::new("R", "A", "created")).await.unwrap();
    let store = Arc::new(FlakyLineageStore::new(inner).fail_all_reads());
    let archive = Arc::new(InMemoryArchive::new());
    let reconstructor = TraceReconstructor::new(
        channel.clone(),
        store.clone(),
        archive.clone(),
        &immediate_retrace_config(),
    );

    channel.publish(RetraceRequest::new("R")).unwrap();
    let mut finals = Vec::new();
    for _ in 0..3 {
        let outcomes = reconstructor.run_once().await;
        assert_eq!(outcomes.len(), 1);
        finals.push(outcomes[0].final_state());
    }

    assert_eq!(
        finals,
        vec![RetraceState::Retrying, RetraceState::Retrying, RetraceState::DeadLettered]
    );
    assert!(reconstructor.run_once().await.is_empty());
    assert!(channel.is_empty());
    assert_eq!(channel.dead_letters().len(), 1);
    assert_eq!(channel.dead_letters().entries()[0].body.root_id, "R");
    assert!(archive.is_empty());
    assert_eq!(store.read_calls(), 3);
}

#[tokio::test]
async fn reverse_order_delivery_rebuilds_chain() {
    let pipeline = LineagePipeline::new(PipelineConfig::default()).unwrap();

    pipeline.ingest(fact("C", Some("B"), Some("R"), "transformed")).unwrap();
    pipeline.ingest(fact("B", Some("A"), Some("R"), "transformed")).unwrap();
    pipeline.ingest(fact("A", None, Some("R"), "created")).unwrap();
    pipeline.drain().await;

    pipeline.request_retrace("R").unwrap();
    let report = pipeline.drain().await;
    assert!(report.retraces[0].is_archived());

    let tree = pipeline.archive().get("R").await.unwrap().unwrap();
    assert_tree_edges(&tree, &[("R", "A"), ("A", "B"), ("B", "C")]);
}

fn lagging_parent_pipeline() -> LineagePipeline {
    let mut config = PipelineConfig::default();
    config.retrace.redelivery = RedeliveryBackoff::immediate()
        .with_base_delay_ms(1_000)
        .with_max_delay_ms(1_000);
    LineagePipeline::new(config).unwrap()
}

#[tokio::test(start_paused = true)]
async fn lagging_parent_is_retried_then_archived_whole() {
    let pipeline = lagging_parent_pipeline();
    pipeline.ingest(fact("C", Some("B"), Some("R"), "transformed")).unwrap();
    pipeline.ingest(fact("A", None, Some("R"), "created")).unwrap();
    pipeline.drain().await;

    pipeline.request_retrace("R").unwrap();
    let first = pipeline.drain().await;
    assert_eq!(first.retraces[0].final_state(), RetraceState::Retrying);
    assert!(first.retraces[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("parent 'B' of node 'C'"));
    assert!(pipeline.archive().list().await.unwrap().is_empty());

    pipeline.ingest(fact("B", Some("A"), Some("R"), "transformed")).unwrap();
    assert!(pipeline.drain().await.retraces.is_empty());
    tokio::time::advance(Duration::from_secs(2)).await;

    let second = pipeline.drain().await;
    assert_eq!(
        second.retraces[0].transitions,
        vec![RetraceState::Retrying, RetraceState::Traversing, RetraceState::Archived]
    );
    let tree = pipeline.archive().get("R").await.unwrap().unwrap();
    assert_eq!(tree.node_ids(), vec!["A", "B", "C"]);
    assert!(!tree.truncated);
    assert_tree_edges(&tree, &[("R", "A"), ("A", "B"), ("B", "C")]);
}

#[tokio::test(start_paused = true)]
async fn parent_lag_beyond_budget_dead_letters() {
    let pipeline = lagging_parent_pipeline();
    pipeline.ingest(fact("C", Some("B"), Some("R"), "transformed")).unwrap();
    pipeline.ingest(fact("A", None, Some("R"), "created")).unwrap();
    pipeline.drain().await;
    pipeline.request_retrace("R").unwrap();

    let mut finals = Vec::new();
    for _ in 0..3 {
        let report = pipeline.drain().await;
        assert_eq!(report.retraces.len(), 1);
        finals.push(report.retraces[0].final_state());
        tokio::time::advance(Duration::from_secs(2)).await;
    }

    assert_eq!(
        finals,
        vec![RetraceState::Retrying, RetraceState::Retrying, RetraceState::DeadLettered]
    );
    assert!(pipeline.drain().await.retraces.is_empty());
    assert!(pipeline.archive().list().await.unwrap().is_empty());
    let dead = pipeline.retrace_channel().dead_letters().entries();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].body.root_id, "R");
}

#[tokio::test(start_paused = true)]
async fn batch_window_groups_events_into_two_invocations() {
    let channel = Arc::new(DurableChannel::new(
        ChannelConfig::new("events")
            .with_batch_size(100)
            .with_batch_window(Duration::from_secs(60)),
    ));
    let store = Arc::new(InMemoryLineageStore::new());
    let writer = Arc::new(StoreWriter::new(
        channel.clone(),
        store.clone(),
        &immediate_store_config(),
    ));

    for i in 0..150 {
        channel
            .publish(LineageEvent::new("R", format!("n{i}"), "created"))
            .unwrap();
    }

    let shutdown = ShutdownToken::new();
    let worker = {
        let writer = writer.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { writer.run(shutdown).await })
    };

    tokio::time::sleep(Duration::from_secs(150)).await;
    shutdown.shutdown("test complete");
    worker.await.unwrap();

    assert_eq!(writer.invocations(), 2);
    assert_eq!(store.len(), 150);
    assert!(channel.is_empty());
}

#[tokio::test(start_paused = true)]
async fn batch_sizes_follow_window() {
    let channel = Arc::new(DurableChannel::new(
        ChannelConfig::new("events")
            .with_batch_size(100)
            .with_batch_window(Duration::from_secs(60)),
    ));
    let writer = StoreWriter::new(
        channel.clone(),
        Arc::new(InMemoryLineageStore::new()),
        &immediate_store_config(),
    );
    for i in 0..150 {
        channel
            .publish(LineageEvent::new("R", format!("n{i}"), "created"))
            .unwrap();
    }

    let started = tokio::time::Instant::now();
    assert_eq!(writer.run_once().await.unwrap().received, 100);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(writer.run_once().await.unwrap().received, 50);
    assert_eq!(started.elapsed(), Duration::from_secs(60));
}

#[tokio::test]
async fn archive_is_written_once_per_root() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::default();
    config.archive.directory = Some(dir.path().to_path_buf());
    let pipeline = LineagePipeline::new(config).unwrap();

    pipeline.ingest(fact("A", None, Some("R"), "created")).unwrap();
    pipeline.drain().await;
    pipeline.request_retrace("R").unwrap();
    pipeline.drain().await;
    let first = std::fs::read(dir.path().join("R.json")).unwrap();

    pipeline.ingest(fact("B", Some("A"), Some("R"), "copied")).unwrap();
    pipeline.drain().await;
    pipeline.request_retrace("R").unwrap();
    let report = pipeline.drain().await;

    assert!(report.retraces[0].is_archived());
    assert_eq!(std::fs::read(dir.path().join("R.json")).unwrap(), first);
    assert_eq!(pipeline.archive().list().await.unwrap(), vec!["R"]);
}
