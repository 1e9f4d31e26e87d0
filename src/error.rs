//! Crate-level error aggregation.
//!
//! Every module that can fail owns its own `error.rs` with a local
//! `ErrorKind`/`Error` pair (mirrors the module-local errors the teacher
//! agent used throughout `ps::agent::*`). This module aggregates those into
//! a single top-level error any caller can match on, via `thiserror`'s
//! `#[from]` instead of the teacher's `failure::Context`.

use thiserror::Error;

use crate::{
    config, metadata_store, processor, queue_manager, queue_store, registry, server, sink,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ErrorKind),

    #[error(transparent)]
    QueueStore(#[from] queue_store::ErrorKind),

    #[error(transparent)]
    QueueManager(#[from] queue_manager::ErrorKind),

    #[error(transparent)]
    Sink(#[from] sink::ErrorKind),

    #[error(transparent)]
    Registry(#[from] registry::ErrorKind),

    #[error(transparent)]
    Processor(#[from] processor::ErrorKind),

    #[error(transparent)]
    MetadataStore(#[from] metadata_store::ErrorKind),

    #[error(transparent)]
    Server(#[from] server::ErrorKind),

    #[error("task {0} not found")]
    TaskNotFound(crate::types::TaskId),

    #[error("task {task} is in state {state}, which does not permit this operation")]
    IllegalState {
        task: crate::types::TaskId,
        state: &'static str,
    },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<config::Error> for Error {
    fn from(e: config::Error) -> Self {
        Error::Config(e.0)
    }
}

impl From<queue_store::Error> for Error {
    fn from(e: queue_store::Error) -> Self {
        Error::QueueStore(e.0)
    }
}

impl From<queue_manager::Error> for Error {
    fn from(e: queue_manager::Error) -> Self {
        Error::QueueManager(e.0)
    }
}

impl From<sink::Error> for Error {
    fn from(e: sink::Error) -> Self {
        Error::Sink(e.0)
    }
}

impl From<registry::Error> for Error {
    fn from(e: registry::Error) -> Self {
        Error::Registry(e.0)
    }
}

impl From<processor::Error> for Error {
    fn from(e: processor::Error) -> Self {
        Error::Processor(e.0)
    }
}

impl From<metadata_store::Error> for Error {
    fn from(e: metadata_store::Error) -> Self {
        Error::MetadataStore(e.0)
    }
}

impl From<server::Error> for Error {
    fn from(e: server::Error) -> Self {
        Error::Server(e.0)
    }
}
