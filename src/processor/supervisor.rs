//! Processor Registry & Recovery (§4.6): a process-wide map from task id
//! to live processor, plus startup reconciliation of tasks left
//! `running`/`pending` by a prior crash.
//!
//! Grounded on the teacher's `Uploader::reset_stalled_uploads` (the
//! crash-recovery analog run at startup) and on the redesign mandated by
//! §9 ("Global mutable state" — a single `Mutex`-guarded map, never an
//! actor with implicit global state).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use super::{ControlMessage, ErrorKind, Processor, Result};
use crate::config::Config;
use crate::logging::LogManager;
use crate::metadata_store::MetadataStore;
use crate::objectstore::ObjectStoreClient;
use crate::registry::Registry;
use crate::types::{TaskId, TaskStatus};

/// What the registry holds per live task: the background join handle, the
/// shared flag its processor polls to observe a pause request, and the
/// `mpsc` control channel used for out-of-band signals (currently just
/// shutdown) that the pause flag doesn't model (§4.6).
pub struct ProcessorHandle {
    join: JoinHandle<()>,
    pause_flag: Arc<AtomicBool>,
    control_tx: mpsc::Sender<ControlMessage>,
}

impl ProcessorHandle {
    pub fn request_pause(&self) {
        self.pause_flag.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

pub struct ProcessorRegistry {
    live: Mutex<HashMap<TaskId, ProcessorHandle>>,
    config: Arc<Config>,
    metadata_store: MetadataStore,
    registry: Arc<Registry>,
    object_store: Arc<ObjectStoreClient>,
    log_manager: Arc<LogManager>,
}

impl ProcessorRegistry {
    pub fn new(
        config: Arc<Config>,
        metadata_store: MetadataStore,
        registry: Arc<Registry>,
        object_store: Arc<ObjectStoreClient>,
        log_manager: Arc<LogManager>,
    ) -> Arc<Self> {
        Arc::new(ProcessorRegistry {
            live: Mutex::new(HashMap::new()),
            config,
            metadata_store,
            registry,
            object_store,
            log_manager,
        })
    }

    /// Execute request (§6): from `paused`/`error`, materializes and
    /// dispatches a processor immediately. Rejects from `done`, `pending`,
    /// or `running` (§4.5 "Concurrent execute while already running").
    pub async fn execute(self: &Arc<Self>, task_id: TaskId) -> Result<()> {
        let task = self.metadata_store.require_task(task_id)?;
        match task.status {
            TaskStatus::Paused | TaskStatus::Error => {}
            other => {
                return Err(ErrorKind::IllegalState {
                    task: task_id,
                    state: status_name(other),
                    operation: "execute",
                }
                .into())
            }
        }
        self.metadata_store.update_status(task_id, TaskStatus::Pending)?;
        self.dispatch(task_id).await
    }

    /// Pause request (§6): only valid while `running`.
    pub fn pause(&self, task_id: TaskId) -> Result<()> {
        let task = self.metadata_store.require_task(task_id)?;
        if task.status != TaskStatus::Running {
            return Err(ErrorKind::IllegalState {
                task: task_id,
                state: status_name(task.status),
                operation: "pause",
            }
            .into());
        }
        let live = self.live.lock().expect("registry mutex poisoned");
        let handle = live.get(&task_id).ok_or(ErrorKind::TaskNotFound(task_id))?;
        handle.request_pause();
        drop(live);
        self.metadata_store.update_status(task_id, TaskStatus::Pausing)?;
        Ok(())
    }

    /// Materializes a processor for a `pending` task and spawns it on the
    /// background scheduler. The registry is the only place allowed to
    /// insert/remove entries; the processor never looks itself up here.
    async fn dispatch(self: &Arc<Self>, task_id: TaskId) -> Result<()> {
        {
            let live = self.live.lock().expect("registry mutex poisoned");
            if live.contains_key(&task_id) {
                return Err(ErrorKind::AlreadyRunning(task_id).into());
            }
        }

        let pause_flag = Arc::new(AtomicBool::new(false));
        let (control_tx, control_rx) = mpsc::channel(1);
        let processor = Processor::build(
            task_id,
            &self.config,
            self.metadata_store.clone(),
            &self.registry,
            self.object_store.clone(),
            &self.log_manager,
            pause_flag.clone(),
            control_rx,
        )
        .await?;

        let this = self.clone();
        let join = tokio::task::spawn(async move {
            if let Err(err) = processor.run().await {
                log::error!("task {task_id} processor exited with error: {err}");
            }
            this.live.lock().expect("registry mutex poisoned").remove(&task_id);
        });

        self.live.lock().expect("registry mutex poisoned").insert(
            task_id,
            ProcessorHandle {
                join,
                pause_flag,
                control_tx,
            },
        );

        Ok(())
    }

    /// Graceful shutdown (§4.6 "Shutdown closes all sinks and queue stores
    /// cleanly"): signals every live processor over its control channel and
    /// waits for each to return. Tasks stay `running` in the metadata store
    /// so the next startup's reconciliation resumes them.
    pub async fn shutdown_all(&self) {
        let handles: Vec<ProcessorHandle> = self
            .live
            .lock()
            .expect("registry mutex poisoned")
            .drain()
            .map(|(_, handle)| handle)
            .collect();

        for handle in &handles {
            let _ = handle.control_tx.send(ControlMessage::Shutdown).await;
        }
        for handle in handles {
            let _ = handle.join.await;
        }
    }

    /// Startup reconciliation (§4.6): any `running` task had its live
    /// processor vanish with the previous process; rewrite it `pending`.
    /// Every `pending` task (now including those) is then dispatched, up
    /// to `reconciliation_dispatch_parallelism` at a time.
    pub async fn reconcile_at_startup(self: &Arc<Self>) -> Result<()> {
        let stale = self
            .metadata_store
            .list_tasks_with_status(&[TaskStatus::Running])?;
        for task in &stale {
            log::warn!("reconciling task {} from running to pending at startup", task.id);
            self.metadata_store.update_status(task.id, TaskStatus::Pending)?;
        }

        let pending = self
            .metadata_store
            .list_tasks_with_status(&[TaskStatus::Pending])?;

        let permits = self
            .config
            .reconciliation_dispatch_parallelism
            .unwrap_or_else(|| num_cpus::get().max(1));
        let semaphore = Arc::new(Semaphore::new(permits));
        let joins: Vec<_> = pending
            .into_iter()
            .map(|task| {
                let semaphore = semaphore.clone();
                let this = self.clone();
                tokio::task::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                    if let Err(err) = this.dispatch(task.id).await {
                        log::error!("failed to dispatch recovered task {}: {err}", task.id);
                    }
                })
            })
            .collect();
        futures::future::join_all(joins).await;
        Ok(())
    }
}

fn status_name(status: TaskStatus) -> &'static str {
    status.as_str()
}
