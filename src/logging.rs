//! App-wide and per-task logging, built on `log4rs` programmatic
//! configuration (the teacher's entrypoint configures log4rs the same
//! way) plus `log-mdc` for task-id correlation in the shared app log
//! (mirrors `ps::agent::mod`'s `setup_logging!` macro, which extends the
//! thread-local MDC with a correlation key before logging).
//!
//! A task's dedicated log file is a `log4rs` `Logger` keyed by the target
//! `task::{task_id}`, routed to its own non-additive rolling appender;
//! callers log through it with `log::info!(target: "task::42", ...)`
//! rather than reaching for a distinct `Log` implementation per task.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::runtime::ConfigErrors;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::Handle;
use thiserror::Error;

use crate::config::constants::{APP_LOG_FORMAT, TASK_LOG_FORMAT};
use crate::types::TaskId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid log4rs configuration: {0}")]
    Config(#[from] ConfigErrors),

    #[error("could not install global logger: {0}")]
    SetLogger(#[from] log::SetLoggerError),
}

pub fn target_for_task(task_id: TaskId) -> String {
    format!("task::{task_id}")
}

/// Owns the live `log4rs::Handle` and the set of task ids that currently
/// have a dedicated logger, so new tasks can be attached by rebuilding
/// and swapping in a fresh `Config` (`log4rs` has no incremental-append
/// API; `Handle::set_config` replaces the whole thing atomically).
pub struct LogManager {
    handle: Handle,
    app_log_dir: PathBuf,
    task_log_dir: PathBuf,
    level: log::LevelFilter,
    attached: Mutex<HashSet<TaskId>>,
}

impl LogManager {
    pub fn init(app_log_dir: &Path, task_log_dir: &Path, log_level: &str) -> Result<Self, Error> {
        let level = parse_level(log_level);
        let config = build_config(app_log_dir, task_log_dir, level, &[])?;
        let handle = log4rs::init_config(config)?;

        Ok(LogManager {
            handle,
            app_log_dir: app_log_dir.to_path_buf(),
            task_log_dir: task_log_dir.to_path_buf(),
            level,
            attached: Mutex::new(HashSet::new()),
        })
    }

    /// Adds a dedicated logger writing to `{task_log_dir}/{task_id}.log`.
    /// Idempotent: re-attaching an already-attached task is a no-op.
    pub fn attach_task_logger(&self, task_id: TaskId) -> Result<(), Error> {
        let mut attached = self.attached.lock().expect("log manager mutex poisoned");
        if !attached.insert(task_id) {
            return Ok(());
        }
        let ids: Vec<TaskId> = attached.iter().copied().collect();
        drop(attached);

        let config = build_config(&self.app_log_dir, &self.task_log_dir, self.level, &ids)?;
        self.handle.set_config(config);
        Ok(())
    }
}

/// MDC-tags the current OS thread with `task_id` so records logged at the
/// default (non-task) target still show the originating task when they
/// land in the shared app log. Re-insert at the top of every loop
/// iteration: `log-mdc` is thread-local and a `tokio` task may resume on
/// a different worker thread after an `.await`.
pub fn tag_thread_with_task(task_id: TaskId) {
    log_mdc::insert("task_id", task_id.to_string());
}

pub fn clear_task_tag() {
    log_mdc::remove("task_id");
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => log::LevelFilter::Debug,
        "INFO" => log::LevelFilter::Info,
        "WARNING" | "WARN" => log::LevelFilter::Warn,
        "ERROR" => log::LevelFilter::Error,
        "CRITICAL" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

fn build_config(
    app_log_dir: &Path,
    task_log_dir: &Path,
    level: log::LevelFilter,
    task_ids: &[TaskId],
) -> Result<Config, ConfigErrors> {
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(APP_LOG_FORMAT)))
        .build();
    let app_file = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(APP_LOG_FORMAT)))
        .build(app_log_dir.join("harvestd.log"))
        .expect("app log file path is always constructible");

    let mut builder = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)))
        .appender(Appender::builder().build("app_file", Box::new(app_file)));

    for &task_id in task_ids {
        let appender_name = format!("task_file_{task_id}");
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(TASK_LOG_FORMAT)))
            .build(task_log_dir.join(format!("{task_id}.log")))
            .expect("task log file path is always constructible");

        builder = builder
            .appender(Appender::builder().build(appender_name.clone(), Box::new(file)))
            .logger(
                Logger::builder()
                    .appender(appender_name)
                    .additive(false)
                    .build(target_for_task(task_id), level),
            );
    }

    builder.build(
        Root::builder()
            .appender("console")
            .appender("app_file")
            .build(level),
    )
}
