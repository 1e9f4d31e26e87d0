use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(#[from] pub ErrorKind);

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("no fetch function registered for data source {data_source:?} and task type {task_type:?}")]
    UnknownTaskType {
        data_source: crate::types::DataSource,
        task_type: String,
    },

    #[error("invalid params for {data_source:?}/{task_type}: {message}")]
    InvalidParams {
        data_source: crate::types::DataSource,
        task_type: String,
        message: String,
    },
}

/// Whether a [`FetchError`] should stop the whole task (`Fatal`, §7) or
/// only the current item/batch (`NonFatal`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Fatal,
    NonFatal,
}

/// The error type a fetch function raises when it cannot produce a result.
/// Every fetch function in the registry returns this instead of an
/// ordinary `std::error::Error` so that the Queue Item Manager can decide,
/// without any downcasting, whether to roll the work unit back (`Fatal`)
/// or route it to `failures` and move on (`NonFatal`).
#[derive(Debug, Error)]
#[error("{classification:?} fetch error: {message}")]
pub struct FetchError {
    pub classification: Classification,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FetchError {
    pub fn fatal(message: impl Into<String>) -> Self {
        FetchError {
            classification: Classification::Fatal,
            message: message.into(),
            source: None,
        }
    }

    pub fn non_fatal(message: impl Into<String>) -> Self {
        FetchError {
            classification: Classification::NonFatal,
            message: message.into(),
            source: None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.classification == Classification::Fatal
    }
}
