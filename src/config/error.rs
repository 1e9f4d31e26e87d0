use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(#[from] pub ErrorKind);

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("could not read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write config file {path}: {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file: {0}")]
    Parse(#[from] ini::Error),

    #[error("missing required config key [{section}] {key}")]
    MissingKey { section: String, key: String },

    #[error("invalid value for [{section}] {key}: {message}")]
    InvalidValue {
        section: String,
        key: String,
        message: String,
    },

    #[error("could not determine home directory")]
    NoHomeDir,
}
