//! Shared fixtures for the end-to-end scenario tests (SPEC_FULL.md §8).
//! Grounded on the teacher's own `tests/helpers` convention of building a
//! throwaway environment per test via `tempfile`, swapped here for an
//! in-memory object store (`object_store::memory::InMemory`) so the
//! upload step exercised by every scenario needs no real S3 endpoint.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use object_store::memory::InMemory;
use tempfile::TempDir;

use harvestd::config::Config;
use harvestd::logging::LogManager;
use harvestd::metadata_store::{MetadataStore, Task};
use harvestd::objectstore::ObjectStoreClient;
use harvestd::processor::supervisor::ProcessorRegistry;
use harvestd::queue_manager::QueueItemManager;
use harvestd::queue_store::QueueStore;
use harvestd::registry::Registry;
use harvestd::types::{TaskId, TaskStatus};

static LOG_MANAGER: OnceLock<Arc<LogManager>> = OnceLock::new();

pub struct Fixture {
    // Kept alive for the fixture's lifetime; every configured path lives here.
    pub _dir: TempDir,
    pub config: Arc<Config>,
    pub metadata_store: MetadataStore,
    pub registry: Arc<Registry>,
    pub processor_registry: Arc<ProcessorRegistry>,
}

pub fn setup() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut config = Config::default();
    config.database_file_path = dir.path().join("metadata.db");
    config.task_progress_dbs_dir = dir.path().join("task_progress");
    config.task_output_dir = dir.path().join("task_output");
    config.task_log_dir = dir.path().join("task_logs");
    config.app_log_dir = dir.path().join("logs");
    config.ensure_directories().expect("ensure directories");

    let log_manager = LOG_MANAGER
        .get_or_init(|| {
            Arc::new(
                LogManager::init(&config.app_log_dir, &config.task_log_dir, "DEBUG")
                    .expect("init logging"),
            )
        })
        .clone();

    let metadata_store = MetadataStore::open(&config.database_file_path).expect("open metadata store");
    let registry = Arc::new(Registry::new(reqwest::Client::new()));
    let object_store = Arc::new(ObjectStoreClient::from_store(
        Box::new(InMemory::new()),
        "test-bucket".to_string(),
        "http://test.invalid".to_string(),
    ));

    let config = Arc::new(config);
    let processor_registry = ProcessorRegistry::new(
        config.clone(),
        metadata_store.clone(),
        registry.clone(),
        object_store,
        log_manager,
    );

    Fixture {
        _dir: dir,
        config,
        metadata_store,
        registry,
        processor_registry,
    }
}

impl Fixture {
    pub fn open_queue_manager(&self, task_id: TaskId) -> QueueItemManager {
        let store = QueueStore::open(&self.config.task_progress_dbs_dir, task_id).expect("open queue store");
        QueueItemManager::new(store)
    }
}

/// Polls `get_task` until `predicate` holds or `timeout` elapses.
pub async fn wait_for(fixture: &Fixture, task_id: TaskId, timeout: Duration, predicate: impl Fn(TaskStatus) -> bool) -> Task {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let task = fixture.metadata_store.require_task(task_id).expect("task exists");
        if predicate(task.status) {
            return task;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for task {task_id} status, last seen {:?}", task.status);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_for_done_or_error(fixture: &Fixture, task_id: TaskId, timeout: Duration) -> Task {
    wait_for(fixture, task_id, timeout, |s| matches!(s, TaskStatus::Done | TaskStatus::Error)).await
}
