//! The Task Processor (§4.5): the per-task state machine and processing
//! loop. Owns a [`QueueItemManager`], an [`OutputSink`], a resolved fetch
//! function, and a dedicated log stream.
//!
//! Grounded directly on `TaskProcessor`/`SequentialTaskProcessor`/
//! `BatchTaskProcessor` in the original system's `app/tasks/processing.py`
//! (`run`, `pause`, the tail-flush-then-done sequence), reimplemented as
//! an `async fn run(self)` consumed by a `tokio::task` rather than a
//! thread-blocking loop, with pause as a shared `AtomicBool` per §9.

mod error;
pub mod supervisor;

pub use error::{Error, ErrorKind, Result};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::logging::{self, LogManager};
use crate::metadata_store::MetadataStore;
use crate::objectstore::ObjectStoreClient;
use crate::queue_manager::{OutputWriter, QueueItemManager};
use crate::queue_store::QueueStore;
use crate::registry::{FetchFunction, Registry};
use crate::sink::OutputSink;
use crate::types::{QueueItemCounts, TaskId, TaskStatus};

/// Adapts the processor's sink+metadata-store pairing to the Queue Item
/// Manager's [`OutputWriter`] seam: a successful write also records the
/// upload it may have triggered, so a caller only ever sees "durably
/// written" or an error.
struct SinkWriter<'a> {
    sink: &'a mut OutputSink,
    metadata_store: MetadataStore,
    task_id: TaskId,
}

#[async_trait::async_trait]
impl<'a> OutputWriter for SinkWriter<'a> {
    async fn write(&mut self, value: &serde_json::Value) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let event = self.sink.append(value).await.map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
        if let Some(event) = event {
            self.metadata_store
                .append_upload_record(self.task_id, &event.s3_key, &event.s3_bucket, &event.s3_endpoint_url, event.size_bytes)
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
        }
        Ok(())
    }
}

pub(crate) fn local_server_id() -> String {
    std::env::var("HARVESTD_SERVER_ID")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

/// Out-of-band control messages from the registry to a running processor,
/// carried over the `mpsc` channel in [`supervisor::ProcessorHandle`] (§4.6)
/// — distinct from the `Arc<AtomicBool>` pause flag, which only ever means
/// "finish the in-flight unit, then persist `paused`".
pub(crate) enum ControlMessage {
    /// Process shutdown: stop at the next safe point without persisting
    /// `paused` or `done`. The task stays `running` in the metadata store
    /// so startup reconciliation (§4.6) picks it back up as `pending`.
    Shutdown,
}

pub struct Processor {
    task_id: TaskId,
    metadata_store: MetadataStore,
    queue_manager: QueueItemManager,
    sink: OutputSink,
    fetch: FetchFunction,
    pause_flag: Arc<AtomicBool>,
    control_rx: tokio::sync::mpsc::Receiver<ControlMessage>,
    progress_cadence: Duration,
    log_target: String,
}

impl Processor {
    /// Materializes everything a task needs to run: opens its queue
    /// store, resolves its fetch function, opens its output sink
    /// (uploading any leftover compressed segment from a prior crash),
    /// and attaches its dedicated log stream.
    pub async fn build(
        task_id: TaskId,
        config: &Config,
        metadata_store: MetadataStore,
        registry: &Registry,
        object_store: Arc<ObjectStoreClient>,
        log_manager: &LogManager,
        pause_flag: Arc<AtomicBool>,
        control_rx: tokio::sync::mpsc::Receiver<ControlMessage>,
    ) -> Result<Self> {
        let task = metadata_store.require_task(task_id)?;

        let store = QueueStore::open(&config.task_progress_dbs_dir, task_id)?;
        let queue_manager = QueueItemManager::new(store);

        let fetch = registry.resolve(task.data_source, &task.task_type, &task.params)?;

        let (sink, leftover) = OutputSink::open(
            &config.task_output_dir,
            task_id,
            task.s3_prefix.clone(),
            config.segment_threshold_bytes,
            object_store,
            local_server_id(),
        )
        .await?;
        if let Some(event) = leftover {
            metadata_store.append_upload_record(
                task_id,
                &event.s3_key,
                &event.s3_bucket,
                &event.s3_endpoint_url,
                event.size_bytes,
            )?;
        }

        log_manager
            .attach_task_logger(task_id)
            .map_err(ErrorKind::Logging)?;

        Ok(Processor {
            task_id,
            metadata_store,
            queue_manager,
            sink,
            fetch,
            pause_flag,
            control_rx,
            progress_cadence: Duration::from_secs(config.progress_log_cadence_secs),
            log_target: logging::target_for_task(task_id),
        })
    }

    /// The top-level loop (§4.5). Consumes `self`; returns once the task
    /// reaches `done`, `paused`, or `error`.
    pub async fn run(mut self) -> Result<()> {
        logging::tag_thread_with_task(self.task_id);
        log::info!(target: &self.log_target, "task {} starting", self.task_id);
        self.metadata_store.update_status(self.task_id, TaskStatus::Running)?;

        let mut last_logged: Option<QueueItemCounts> = None;
        let mut last_logged_at = Instant::now() - self.progress_cadence;

        loop {
            logging::tag_thread_with_task(self.task_id);

            if let Ok(ControlMessage::Shutdown) = self.control_rx.try_recv() {
                log::info!(target: &self.log_target, "task {} observed shutdown, leaving state running for reconciliation", self.task_id);
                logging::clear_task_tag();
                return Ok(());
            }

            if self.pause_flag.load(Ordering::SeqCst) {
                log::info!(target: &self.log_target, "task {} observed pause request", self.task_id);
                self.metadata_store.update_status(self.task_id, TaskStatus::Paused)?;
                logging::clear_task_tag();
                return Ok(());
            }

            let exhausted = match self.process_one_unit().await {
                Ok(exhausted) => exhausted,
                Err(err) => {
                    log::error!(target: &self.log_target, "task {} failed fatally: {err}", self.task_id);
                    self.metadata_store.update_status(self.task_id, TaskStatus::Error)?;
                    logging::clear_task_tag();
                    return Err(err);
                }
            };

            if exhausted {
                break;
            }

            self.maybe_log_progress(&mut last_logged, &mut last_logged_at)?;
        }

        if let Some(event) = self.sink.tail_flush().await? {
            self.metadata_store.append_upload_record(
                self.task_id,
                &event.s3_key,
                &event.s3_bucket,
                &event.s3_endpoint_url,
                event.size_bytes,
            )?;
        }
        self.metadata_store.update_status(self.task_id, TaskStatus::Done)?;
        log::info!(target: &self.log_target, "task {} done", self.task_id);
        logging::clear_task_tag();
        Ok(())
    }

    /// Processes one single item or one batch. Every produced output is
    /// durably written via a [`SinkWriter`] *before* the Queue Item
    /// Manager routes its input to `successes` and acks it (§7). Returns
    /// `true` when the input queue was observed empty (the loop's exit
    /// signal).
    async fn process_one_unit(&mut self) -> Result<bool> {
        let fetch = self.fetch.clone();
        match &fetch {
            FetchFunction::SingleItem(f) => {
                let mut writer = SinkWriter {
                    sink: &mut self.sink,
                    metadata_store: self.metadata_store.clone(),
                    task_id: self.task_id,
                };
                let outcome = self
                    .queue_manager
                    .process_next_with_output(f.as_ref(), &mut writer)
                    .await?;
                Ok(outcome.is_none())
            }
            FetchFunction::Batch(f) => {
                let batch_size = f.max_batch_size();
                let mut writer = SinkWriter {
                    sink: &mut self.sink,
                    metadata_store: self.metadata_store.clone(),
                    task_id: self.task_id,
                };
                let items = self
                    .queue_manager
                    .process_next_batch_with_output(f.as_ref(), batch_size, &mut writer)
                    .await?;
                Ok(items.is_empty())
            }
        }
    }

    /// Logs progress at a bounded cadence, only when it has changed since
    /// the last report (§4.5 "Logging & progress reporting").
    fn maybe_log_progress(
        &self,
        last_logged: &mut Option<QueueItemCounts>,
        last_logged_at: &mut Instant,
    ) -> Result<()> {
        if last_logged_at.elapsed() < self.progress_cadence {
            return Ok(());
        }
        let counts = self.queue_manager.queue_item_counts()?;
        if last_logged.as_ref() != Some(&counts) {
            log::info!(
                target: &self.log_target,
                "task {} progress: success={} failure={} no_output={} remaining={}",
                self.task_id, counts.successes, counts.failures, counts.inputs_without_output, counts.remaining
            );
            *last_logged = Some(counts);
        }
        *last_logged_at = Instant::now();
        Ok(())
    }
}
