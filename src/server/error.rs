use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(#[from] pub ErrorKind);

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("task {0} not found")]
    NotFound(crate::types::TaskId),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Processor(#[from] crate::processor::ErrorKind),

    #[error(transparent)]
    MetadataStore(#[from] crate::metadata_store::ErrorKind),

    #[error(transparent)]
    QueueManager(#[from] crate::queue_manager::ErrorKind),

    #[error(transparent)]
    Registry(#[from] crate::registry::ErrorKind),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<crate::processor::Error> for Error {
    fn from(e: crate::processor::Error) -> Self {
        Error(ErrorKind::Processor(e.0))
    }
}

impl From<crate::metadata_store::Error> for Error {
    fn from(e: crate::metadata_store::Error) -> Self {
        match e.0 {
            crate::metadata_store::ErrorKind::TaskNotFound(id) => Error(ErrorKind::NotFound(id)),
            other => Error(ErrorKind::MetadataStore(other)),
        }
    }
}

impl From<crate::queue_manager::Error> for Error {
    fn from(e: crate::queue_manager::Error) -> Self {
        Error(ErrorKind::QueueManager(e.0))
    }
}

impl From<crate::registry::Error> for Error {
    fn from(e: crate::registry::Error) -> Self {
        Error(ErrorKind::Registry(e.0))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for Error {
    fn error_response(&self) -> HttpResponse {
        let body = ErrorBody {
            error: self.to_string(),
        };
        match &self.0 {
            ErrorKind::NotFound(_) => HttpResponse::NotFound().json(body),
            ErrorKind::Validation(_) => HttpResponse::BadRequest().json(body),
            ErrorKind::Processor(crate::processor::ErrorKind::IllegalState { .. })
            | ErrorKind::Processor(crate::processor::ErrorKind::AlreadyRunning(_)) => {
                HttpResponse::Conflict().json(body)
            }
            ErrorKind::Processor(crate::processor::ErrorKind::TaskNotFound(_)) => {
                HttpResponse::NotFound().json(body)
            }
            _ => HttpResponse::InternalServerError().json(body),
        }
    }
}
