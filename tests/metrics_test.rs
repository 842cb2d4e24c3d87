//! Tests for metrics emitted by the engine and the auth middleware.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter. Only operations
//! that settle on the calling task are covered here; downloads finish on
//! a spawned task, outside the local recorder's scope.

use futures_util::stream;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use tonic::Request;
use tonic::service::Interceptor;

use ferry::{
    CallContext, Chunk, Credential, FileName, LocalStore, MiddlewareChain, TransferEngine,
    telemetry,
};

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

/// Sum counter values for `name` whose labels include every `(key, value)`.
fn counter_total(snapshot: &SnapshotVec, name: &str, labels: &[(&str, &str)]) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .filter(|(key, _, _, _)| {
            labels.iter().all(|(k, v)| {
                key.key()
                    .labels()
                    .any(|label| label.key() == *k && label.value() == *v)
            })
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Runs async code within a local recorder scope on the multi-thread runtime.
fn with_recorder<F, T>(recorder: &DebuggingRecorder, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    metrics::with_local_recorder(recorder, || {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn upload_records_call_bytes_and_chunks() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let dir = tempfile::tempdir().unwrap();
    let engine = TransferEngine::new(LocalStore::new(dir.path()));

    let size = with_recorder(&recorder, async {
        let inbound = stream::iter(vec![
            Ok(Chunk::from(b"hello".to_vec())),
            Ok(Chunk::from(b" world".to_vec())),
        ]);
        let name = FileName::new("metered.txt").unwrap();
        engine.upload(Some(&name), inbound, CallContext::new()).await
    })
    .unwrap();
    assert_eq!(size, 11);

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_total(
            &snapshot,
            telemetry::CALLS_TOTAL,
            &[("operation", "upload"), ("status", "ok")]
        ),
        1
    );
    assert_eq!(
        counter_total(&snapshot, telemetry::BYTES_TOTAL, &[("direction", "received")]),
        11
    );
    assert_eq!(counter_total(&snapshot, telemetry::CHUNKS_TOTAL, &[]), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn rejected_download_records_error_status() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let dir = tempfile::tempdir().unwrap();
    let engine = TransferEngine::new(LocalStore::new(dir.path()));

    let result = with_recorder(&recorder, async {
        let name = FileName::new("missing.txt").unwrap();
        engine.download(&name, CallContext::new()).await.map(|_| ())
    });
    assert!(result.is_err());

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_total(
            &snapshot,
            telemetry::CALLS_TOTAL,
            &[("operation", "download"), ("status", "not_found")]
        ),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn list_records_call() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let dir = tempfile::tempdir().unwrap();
    let engine = TransferEngine::new(LocalStore::new(dir.path()));

    let names = with_recorder(&recorder, engine.list()).unwrap();
    assert!(names.is_empty());

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_total(&snapshot, telemetry::CALLS_TOTAL, &[("operation", "list")]),
        1
    );
}

#[test]
fn auth_rejections_are_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let mut chain = MiddlewareChain::standard(Credential::new("test-token"));

    metrics::with_local_recorder(&recorder, || {
        assert!(chain.call(Request::new(())).is_err());

        let mut wrong = Request::new(());
        wrong
            .metadata_mut()
            .insert("authorization", "Bearer nope".parse().unwrap());
        assert!(chain.call(wrong).is_err());

        let mut right = Request::new(());
        right
            .metadata_mut()
            .insert("authorization", "Bearer test-token".parse().unwrap());
        assert!(chain.call(right).is_ok());
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_total(&snapshot, telemetry::AUTH_REJECTIONS_TOTAL, &[]),
        2
    );
}
