mod from;

use std::{fmt::Display, path::PathBuf, time::Duration};

use humantime::format_duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no usable credential ({0}); run with `--fetch-token` first")]
    AuthRequired(String),

    #[error("authorization failed: {0}")]
    AuthFlowFailed(String),

    #[error("access token expired")]
    AuthExpired,

    #[error("`{0}` does not exist")]
    DirectoryDoesNotExist(PathBuf),

    #[error("`{0}` is not a directory")]
    FileIsNotDirectory(PathBuf),

    #[error("`{0}` already exists")]
    FileAlreadyExists(PathBuf),

    #[error("`{first}` and `{second}` would both be backed up as `{identity}`")]
    DuplicateIdentity {
        identity: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("no folders to back up")]
    NoDirectories,

    #[error("config file `{0}` does not exist")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("interrupted")]
    Interrupted,

    #[error("request timed out after {}", format_duration(*.0))]
    Timeout(Duration),

    #[error("remote returned status {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("uploaded `{name}` has checksum {actual}, expected {expected}")]
    ChecksumMismatch {
        name: String,
        actual: String,
        expected: String,
    },

    #[error(transparent)]
    Other(AnyError),
}

#[derive(Error, Debug)]
pub struct AnyError(anyhow::Error);

impl Display for AnyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error {
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Other(AnyError(error.into()))
    }

    /// Whether the same request may succeed if issued again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Remote { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }

    /// Whether the error means the directory itself is missing or unusable,
    /// as opposed to a failure while reading or writing.
    pub fn is_missing_directory(&self) -> bool {
        matches!(
            self,
            Error::DirectoryDoesNotExist(_) | Error::FileIsNotDirectory(_)
        )
    }
}

pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::Other(AnyError(error))
    }
}
