mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chipflow_core::types::ChipKey;
use chipflow_runtime::collab::Profile;
use chipflow_runtime::config::PipelineConfig;
use chipflow_runtime::detect::{DetectionPipeline, SegmentRequest};
use chipflow_store::{PersistenceGateway, Statement, Table};

use support::{series, shared, FakeSource, FlakyStore, LogBuffer, ScriptedDetector};

const CHIP: ChipKey = ChipKey::new(-2061585, 1922805);

fn request(n: Option<usize>) -> SegmentRequest {
    SegmentRequest {
        cx: Some(CHIP.cx),
        cy: Some(CHIP.cy),
        acquired: Some("1980/2019".to_string()),
        n,
    }
}

fn source_with_pixels(count: i64) -> Arc<FakeSource> {
    let pixels = (0..count).map(|i| series(CHIP, CHIP.cx + i * 30, CHIP.cy)).collect();
    shared(FakeSource::default().with(CHIP, Profile::Ard, pixels))
}

fn pipeline(
    source: Arc<FakeSource>,
    detector: Arc<ScriptedDetector>,
    store: Arc<FlakyStore>,
) -> DetectionPipeline {
    DetectionPipeline::new(
        Arc::new(PipelineConfig::default()),
        source,
        detector,
        PersistenceGateway::new(store),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_pixel_with_two_change_models_writes_two_segments() {
    let store = shared(FlakyStore::new());
    let p = pipeline(
        source_with_pixels(1),
        shared(ScriptedDetector::new(2)),
        store.clone(),
    );

    let resp = p.run(request(None)).await;

    assert_eq!(resp.status, 200);
    assert_eq!(
        serde_json::to_value(&resp).unwrap(),
        serde_json::json!({"cx": -2061585, "cy": 1922805, "acquired": "1980/2019"})
    );
    let counts = store.inner.row_counts().unwrap();
    assert_eq!((counts.chips, counts.pixels, counts.segments), (1, 1, 2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn row_counts_match_flattened_records() {
    let store = shared(FlakyStore::new());
    let p = pipeline(
        source_with_pixels(9),
        shared(ScriptedDetector::new(3)),
        store.clone(),
    );

    let summary = p.execute(&request(None)).await.unwrap();

    assert_eq!(summary.pixels, 9);
    assert_eq!(summary.records, 27);
    let counts = store.inner.row_counts().unwrap();
    assert_eq!(counts.segments, 27);
    assert_eq!(counts.pixels, 9);
    assert_eq!(counts.chips, 1);
    assert_eq!(p.metrics().records_total.get(), 27);
    assert_eq!(p.metrics().detect.snapshot().count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pixel_limit_caps_the_work() {
    let store = shared(FlakyStore::new());
    let detector = shared(ScriptedDetector::new(1));
    let p = pipeline(source_with_pixels(5), detector.clone(), store.clone());

    let summary = p.execute(&request(Some(2))).await.unwrap();

    assert_eq!(summary.pixels, 2);
    assert_eq!(detector.calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.inner.row_counts().unwrap().pixels, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_retrieval_is_no_input_data_and_writes_nothing() {
    let store = shared(FlakyStore::new());
    let detector = shared(ScriptedDetector::new(2));
    let p = pipeline(shared(FakeSource::default()), detector.clone(), store.clone());

    let resp = p.run(request(None)).await;

    assert_eq!(resp.status, 500);
    assert_eq!(resp.msg.as_deref(), Some("no input data"));
    assert_eq!(resp.cx, Some(CHIP.cx));
    assert!(store.log.lock().unwrap().is_empty());
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_pixel_cap_purges_and_writes_nothing() {
    let store = shared(FlakyStore::new());
    let detector = shared(ScriptedDetector::new(2));
    let p = pipeline(source_with_pixels(3), detector.clone(), store.clone());
    assert_eq!(p.run(request(None)).await.status, 200);
    let calls = detector.calls.load(Ordering::SeqCst);
    store.log.lock().unwrap().clear();

    let resp = p.run(request(Some(0))).await;

    assert_eq!(resp.status, 200);
    assert_eq!(resp.msg, None);
    assert_eq!(detector.calls.load(Ordering::SeqCst), calls);
    let counts = store.inner.row_counts().unwrap();
    assert_eq!((counts.chips, counts.pixels, counts.segments), (0, 0, 0));
    assert!(store
        .log
        .lock()
        .unwrap()
        .iter()
        .all(|s| matches!(s, Statement::DeletePartition { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_parameters_are_rejected_before_retrieval() {
    let source = source_with_pixels(1);
    let p = pipeline(
        source.clone(),
        shared(ScriptedDetector::new(1)),
        shared(FlakyStore::new()),
    );

    let resp = p
        .run(SegmentRequest {
            acquired: None,
            ..request(None)
        })
        .await;

    assert_eq!(resp.status, 400);
    assert_eq!(
        resp.msg.as_deref(),
        Some("cx, cy, and acquired are required parameters")
    );
    assert_eq!(resp.acquired, None);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rerun_replaces_instead_of_accumulating() {
    let store = shared(FlakyStore::new());
    let source = source_with_pixels(4);

    let first = pipeline(source.clone(), shared(ScriptedDetector::new(3)), store.clone());
    assert_eq!(first.run(request(None)).await.status, 200);
    assert_eq!(first.run(request(None)).await.status, 200);
    assert_eq!(store.inner.row_counts().unwrap().segments, 12);

    let second = pipeline(source, shared(ScriptedDetector::new(1)), store.clone());
    assert_eq!(second.run(request(None)).await.status, 200);
    let counts = store.inner.row_counts().unwrap();
    assert_eq!((counts.chips, counts.pixels, counts.segments), (1, 4, 4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn purge_failure_aborts_before_detection() {
    let store = shared(FlakyStore::new());
    store.fail_when(|s| matches!(s, Statement::DeletePartition { .. }));
    let detector = shared(ScriptedDetector::new(2));
    let p = pipeline(source_with_pixels(3), detector.clone(), store.clone());

    let resp = p.run(request(None)).await;

    assert_eq!(resp.status, 500);
    assert!(resp.msg.unwrap().starts_with("persistence error"));
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.writes_to(Table::Segment), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tables_are_written_chips_then_pixels_then_segments() {
    let store = shared(FlakyStore::new());
    store.fail_when(|s| matches!(s, Statement::InsertSegment(_)));
    let p = pipeline(
        source_with_pixels(2),
        shared(ScriptedDetector::new(2)),
        store.clone(),
    );

    let resp = p.run(request(None)).await;
    assert_eq!(resp.status, 500);

    let inserts: Vec<Table> = store
        .log
        .lock()
        .unwrap()
        .iter()
        .filter(|s| !matches!(s, Statement::DeletePartition { .. }))
        .map(Statement::table)
        .collect();
    let first_pixel = inserts.iter().position(|t| *t == Table::Pixel).unwrap();
    let first_segment = inserts.iter().position(|t| *t == Table::Segment).unwrap();
    assert!(inserts[..first_pixel].iter().all(|t| *t == Table::Chip));
    assert!(first_pixel < first_segment);

    // the chip and pixel batches landed, the segment batch did not
    let counts = store.inner.row_counts().unwrap();
    assert_eq!((counts.chips, counts.pixels, counts.segments), (1, 2, 0));

    store.heal();
    assert_eq!(p.run(request(None)).await.status, 200);
    assert_eq!(store.inner.row_counts().unwrap().segments, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn detector_failure_is_a_compute_error() {
    let store = shared(FlakyStore::new());
    let mut detector = ScriptedDetector::new(2);
    detector.fail_pixel = Some((CHIP.cx + 30, CHIP.cy));
    let p = pipeline(source_with_pixels(3), shared(detector), store.clone());

    let resp = p.run(request(None)).await;

    assert_eq!(resp.status, 500);
    let msg = resp.msg.unwrap();
    assert!(msg.starts_with("compute error"), "{msg}");
    assert!(msg.contains("model fit diverged"), "{msg}");
    assert_eq!(store.inner.row_counts().unwrap().segments, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retrieval_failure_is_an_upstream_error() {
    let source = shared(
        FakeSource::default()
            .with(CHIP, Profile::Ard, vec![series(CHIP, 0, 0)])
            .fail_on(Profile::Ard),
    );
    let p = pipeline(
        source,
        shared(ScriptedDetector::new(1)),
        shared(FlakyStore::new()),
    );

    let resp = p.run(request(None)).await;

    assert_eq!(resp.status, 500);
    assert!(resp
        .msg
        .unwrap()
        .contains("retrieval service unavailable"));
    assert_eq!(p.metrics().requests_failed_total.get(), 1);
}

#[tokio::test]
async fn phase_events_are_named_after_the_phase() {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(logs.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let store = shared(FlakyStore::new());
    store.fail_when(|s| matches!(s, Statement::InsertSegment(_)));
    let p = pipeline(
        source_with_pixels(2),
        shared(ScriptedDetector::new(1)),
        store,
    );
    assert_eq!(p.run(request(None)).await.status, 500);

    let out = logs.contents();
    for phase in ["retrieve", "purge", "detect"] {
        assert!(out.contains(&format!("{phase}_elapsed_seconds")), "{out}");
    }
    assert!(out.contains("persist_exception"), "{out}");
    assert!(!out.contains("persist_elapsed_seconds"), "{out}");
}
