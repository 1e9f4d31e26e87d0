use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(#[from] pub ErrorKind);

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("could not serialize task params: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("migration {version} failed: {message}\n{sql}")]
    Migration {
        version: usize,
        message: String,
        sql: String,
    },

    #[error("task {0} not found")]
    TaskNotFound(crate::types::TaskId),

    #[error("unrecognized data source: {0}")]
    InvalidDataSource(String),

    #[error("unrecognized task status: {0}")]
    InvalidTaskStatus(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error(ErrorKind::Sqlite(e))
    }
}

impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Error(ErrorKind::Pool(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error(ErrorKind::Io(e))
    }
}

impl ErrorKind {
    pub fn migration(version: usize, message: impl Into<String>, sql: impl Into<String>) -> Self {
        ErrorKind::Migration {
            version,
            message: message.into(),
            sql: sql.into(),
        }
    }
}
