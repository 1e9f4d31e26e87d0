use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(#[from] pub ErrorKind);

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error(transparent)]
    QueueStore(#[from] crate::queue_store::ErrorKind),

    #[error(transparent)]
    QueueManager(#[from] crate::queue_manager::ErrorKind),

    #[error(transparent)]
    Sink(#[from] crate::sink::ErrorKind),

    #[error(transparent)]
    MetadataStore(#[from] crate::metadata_store::ErrorKind),

    #[error(transparent)]
    Registry(#[from] crate::registry::ErrorKind),

    #[error("could not configure task log stream: {0}")]
    Logging(#[from] crate::logging::Error),

    #[error("task {task} is in state {state}, which does not permit {operation}")]
    IllegalState {
        task: crate::types::TaskId,
        state: &'static str,
        operation: &'static str,
    },

    #[error("task {0} not found")]
    TaskNotFound(crate::types::TaskId),

    #[error("task {0} is already running")]
    AlreadyRunning(crate::types::TaskId),
}

impl From<crate::queue_store::Error> for Error {
    fn from(e: crate::queue_store::Error) -> Self {
        Error(ErrorKind::QueueStore(e.0))
    }
}

impl From<crate::queue_manager::Error> for Error {
    fn from(e: crate::queue_manager::Error) -> Self {
        Error(ErrorKind::QueueManager(e.0))
    }
}

impl From<crate::sink::Error> for Error {
    fn from(e: crate::sink::Error) -> Self {
        Error(ErrorKind::Sink(e.0))
    }
}

impl From<crate::metadata_store::Error> for Error {
    fn from(e: crate::metadata_store::Error) -> Self {
        Error(ErrorKind::MetadataStore(e.0))
    }
}

impl From<crate::registry::Error> for Error {
    fn from(e: crate::registry::Error) -> Self {
        Error(ErrorKind::Registry(e.0))
    }
}
