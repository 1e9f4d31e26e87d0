use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(#[from] pub ErrorKind);

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("io error writing segment: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not serialize output record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("compression failed: {0}")]
    Compression(std::io::Error),

    #[error("upload failed: {0}")]
    Upload(#[from] crate::objectstore::Error),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error(ErrorKind::Io(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error(ErrorKind::Serialize(e))
    }
}

impl From<crate::objectstore::Error> for Error {
    fn from(e: crate::objectstore::Error) -> Self {
        Error(ErrorKind::Upload(e))
    }
}
