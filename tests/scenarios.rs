//! End-to-end scenarios from SPEC_FULL.md §8, driven directly against the
//! public `MetadataStore`/`ProcessorRegistry`/`QueueItemManager` API (no
//! HTTP layer involved), the way the teacher's own `tests/` exercised the
//! agent through its Rust API rather than its CLI.

mod helpers;

use std::time::Duration;

use serde_json::json;

use harvestd::metadata_store::NewTask;
use harvestd::types::{DataSource, TaskStatus};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Scenario 1: throw-above-threshold, threshold=10, inputs 1..=10 — every
/// input is at or below the threshold, so everything succeeds.
#[tokio::test]
async fn throw_above_threshold_all_succeed() {
    let fixture = helpers::setup();
    let task = fixture
        .metadata_store
        .create_task(NewTask {
            data_source: DataSource::DummyApi,
            task_type: "throw-above-threshold".to_string(),
            params: Some(json!({ "threshold": 10 })),
            s3_prefix: "scenario-1".to_string(),
        })
        .unwrap();

    let inputs: Vec<_> = (1..=10).map(|n| json!(n)).collect();
    fixture.open_queue_manager(task.id).add_inputs(&inputs).unwrap();

    fixture.processor_registry.execute(task.id).await.unwrap();
    let finished = helpers::wait_for_done_or_error(&fixture, task.id, TIMEOUT).await;

    assert_eq!(finished.status, TaskStatus::Done);
    let counts = fixture.open_queue_manager(task.id).queue_item_counts().unwrap();
    assert_eq!(counts.successes, 10);
    assert_eq!(counts.failures, 0);
    assert_eq!(counts.inputs_without_output, 0);
    assert_eq!(counts.remaining, 0);
    assert_eq!(fixture.metadata_store.list_uploads(task.id).unwrap().len(), 1);
}

/// Scenario 2: threshold=5, inputs 1..=10 — half succeed, half fail.
#[tokio::test]
async fn throw_above_threshold_half_fail() {
    let fixture = helpers::setup();
    let task = fixture
        .metadata_store
        .create_task(NewTask {
            data_source: DataSource::DummyApi,
            task_type: "throw-above-threshold".to_string(),
            params: Some(json!({ "threshold": 5 })),
            s3_prefix: "scenario-2".to_string(),
        })
        .unwrap();

    let inputs: Vec<_> = (1..=10).map(|n| json!(n)).collect();
    fixture.open_queue_manager(task.id).add_inputs(&inputs).unwrap();

    fixture.processor_registry.execute(task.id).await.unwrap();
    let finished = helpers::wait_for_done_or_error(&fixture, task.id, TIMEOUT).await;

    assert_eq!(finished.status, TaskStatus::Done);
    let counts = fixture.open_queue_manager(task.id).queue_item_counts().unwrap();
    assert_eq!(counts.successes, 5);
    assert_eq!(counts.failures, 5);
    assert_eq!(counts.remaining, 0);
    assert_eq!(fixture.metadata_store.list_uploads(task.id).unwrap().len(), 1);
}

/// Scenario 3: flaky with flakiness=0.0 never fails.
#[tokio::test]
async fn flaky_with_zero_flakiness_always_succeeds() {
    let fixture = helpers::setup();
    let task = fixture
        .metadata_store
        .create_task(NewTask {
            data_source: DataSource::DummyApi,
            task_type: "flaky".to_string(),
            params: Some(json!({ "flakiness": 0.0 })),
            s3_prefix: "scenario-3".to_string(),
        })
        .unwrap();

    fixture
        .open_queue_manager(task.id)
        .add_inputs(&[json!(1), json!(2), json!(3)])
        .unwrap();

    fixture.processor_registry.execute(task.id).await.unwrap();
    let finished = helpers::wait_for_done_or_error(&fixture, task.id, TIMEOUT).await;

    assert_eq!(finished.status, TaskStatus::Done);
    let counts = fixture.open_queue_manager(task.id).queue_item_counts().unwrap();
    assert_eq!(counts.successes, 3);
    assert_eq!(counts.failures, 0);
    assert_eq!(counts.remaining, 0);
}

/// Scenario 4: a batch fetch function returning fewer outputs than inputs
/// is Fatal; the popped inputs are restored rather than lost.
#[tokio::test]
async fn mismatched_batch_length_is_fatal_and_restores_inputs() {
    use async_trait::async_trait;
    use harvestd::queue_manager::{OutputWriter, QueueItemManager};
    use harvestd::registry::{BatchFetch, FetchError};
    use harvestd::queue_store::QueueStore;
    use serde_json::Value;

    struct ShortBatch;

    #[async_trait]
    impl BatchFetch for ShortBatch {
        async fn call(&self, inputs: &[Value]) -> Result<Option<Vec<Option<Value>>>, FetchError> {
            Ok(Some(vec![Some(json!("ok")); inputs.len() - 1]))
        }

        fn max_batch_size(&self) -> usize {
            10
        }
    }

    struct NoopWriter;

    #[async_trait]
    impl OutputWriter for NoopWriter {
        async fn write(&mut self, _value: &Value) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let store = QueueStore::open(dir.path(), 1).unwrap();
    let manager = QueueItemManager::new(store);
    manager
        .add_inputs(&[json!("a"), json!("b"), json!("c")])
        .unwrap();

    let err = manager
        .process_next_batch_with_output(&ShortBatch, 3, &mut NoopWriter)
        .await
        .unwrap_err();
    assert!(matches!(err.0, harvestd::queue_manager::ErrorKind::Fatal(_)));

    let counts = manager.queue_item_counts().unwrap();
    assert_eq!(counts.remaining, 3, "restored inputs must still be pending");
    assert_eq!(counts.successes, 0);
    assert_eq!(counts.failures, 0);
}

/// Scenario 5: pause mid-run, verify the conservation invariant, then
/// resume to completion.
#[tokio::test]
async fn pause_mid_run_then_resume_to_completion() {
    let fixture = helpers::setup();
    let task = fixture
        .metadata_store
        .create_task(NewTask {
            data_source: DataSource::DummyApi,
            task_type: "echo".to_string(),
            params: Some(json!({ "delay_ms": 15 })),
            s3_prefix: "scenario-5".to_string(),
        })
        .unwrap();

    let inputs: Vec<_> = (0..100).map(|n| json!(n)).collect();
    fixture.open_queue_manager(task.id).add_inputs(&inputs).unwrap();

    fixture.processor_registry.execute(task.id).await.unwrap();
    helpers::wait_for(&fixture, task.id, TIMEOUT, |s| s == TaskStatus::Running).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    fixture.processor_registry.pause(task.id).unwrap();

    let paused = helpers::wait_for(&fixture, task.id, TIMEOUT, |s| s == TaskStatus::Paused).await;
    assert_eq!(paused.status, TaskStatus::Paused);

    let counts = fixture.open_queue_manager(task.id).queue_item_counts().unwrap();
    assert_eq!(
        counts.successes + counts.failures + counts.inputs_without_output + counts.remaining,
        100
    );
    assert!(counts.remaining > 0, "pause should have left work unfinished");

    fixture.processor_registry.execute(task.id).await.unwrap();
    let finished = helpers::wait_for_done_or_error(&fixture, task.id, TIMEOUT).await;

    assert_eq!(finished.status, TaskStatus::Done);
    let counts = fixture.open_queue_manager(task.id).queue_item_counts().unwrap();
    assert_eq!(counts.remaining, 0);
    assert_eq!(counts.successes, 100);
    assert_eq!(fixture.metadata_store.list_uploads(task.id).unwrap().len(), 1);
}

/// Scenario 6: a crash mid-processing (simulated by directly rewriting
/// the status to `running` with no live processor, the state startup
/// reconciliation is built to repair) is resumed to completion with
/// every input appearing at least once.
#[tokio::test]
async fn restart_mid_run_is_reconciled_and_completes() {
    let fixture = helpers::setup();
    let task = fixture
        .metadata_store
        .create_task(NewTask {
            data_source: DataSource::DummyApi,
            task_type: "echo".to_string(),
            params: None,
            s3_prefix: "scenario-6".to_string(),
        })
        .unwrap();

    let inputs: Vec<_> = (0..50).map(|n| json!(n)).collect();
    fixture.open_queue_manager(task.id).add_inputs(&inputs).unwrap();

    // Simulate a crash: no live processor exists for this task, yet its
    // persisted status claims `running`.
    fixture
        .metadata_store
        .update_status(task.id, TaskStatus::Running)
        .unwrap();

    fixture.processor_registry.reconcile_at_startup().await.unwrap();
    let finished = helpers::wait_for_done_or_error(&fixture, task.id, TIMEOUT).await;

    assert_eq!(finished.status, TaskStatus::Done);
    let counts = fixture.open_queue_manager(task.id).queue_item_counts().unwrap();
    assert_eq!(counts.successes, 50);
    assert_eq!(counts.remaining, 0);
}
