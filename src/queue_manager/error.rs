use thiserror::Error;

use crate::registry::FetchError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(#[from] pub ErrorKind);

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("queue store error: {0}")]
    Store(#[from] crate::queue_store::Error),

    #[error("cannot add an empty batch of inputs")]
    EmptyInputBatch,

    #[error("batch_size must be >= 2, got {0}")]
    BatchSizeTooSmall(usize),

    #[error(transparent)]
    Fatal(FetchError),

    /// The fetch succeeded but durably persisting its output failed. Per
    /// §7 ("output writes that themselves fail are treated as Fatal") this
    /// is raised only after the popped input(s) have been restored, same
    /// as `Fatal`.
    #[error("output write failed: {0}")]
    OutputWrite(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<crate::queue_store::Error> for Error {
    fn from(e: crate::queue_store::Error) -> Self {
        Error(ErrorKind::Store(e))
    }
}
