// crates/core/src/error.rs
use thiserror::Error;

/// Errors raised by a job registry backend.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry unreachable: {0}")]
    Unavailable(String),

    #[error("registry command failed: {0}")]
    Command(String),

    #[error("unexpected value at key {key}: {message}")]
    WrongType { key: String, message: String },
}

/// Errors raised by an artifact store.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact storage is unavailable")]
    Unavailable,

    #[error("no {format} output stored for '{job}'")]
    NotFound { job: String, format: String },

    #[error("artifact storage failed: {0}")]
    Backend(String),
}

/// Errors surfaced by output retrieval.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("unrecognized output format '{0}'")]
    UnknownFormat(String),

    #[error("no {format} output is available for '{job}'")]
    NotFound { job: String, format: String },

    #[error("output storage is unavailable")]
    Unavailable,

    #[error("output storage failed: {0}")]
    Storage(String),
}

impl From<ArtifactError> for OutputError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::Unavailable => Self::Unavailable,
            ArtifactError::NotFound { job, format } => Self::NotFound { job, format },
            ArtifactError::Backend(message) => Self::Storage(message),
        }
    }
}

/// Rejection of a job or channel name at the boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("no evaluation id was given")]
    Empty,

    #[error("'{0}' is not a valid evaluation name")]
    Invalid(String),
}
