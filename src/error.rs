use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::hash::ObjectId;

/// error type for skillpush operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no files to deploy")]
    EmptySubmission,

    #[error("duplicate path in submission: {0}")]
    DuplicatePath(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid branch name: {0}")]
    InvalidRef(String),

    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("repository already exists: {0}")]
    NameConflict(String),

    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("branch {branch} already exists")]
    RefAlreadyExists { branch: String },

    #[error("branch {branch} moved since {expected} was read")]
    FastForwardConflict { branch: String, expected: ObjectId },

    #[error("ref mover already used for branch {0}")]
    RefMoverSpent(String),

    #[error("remote error{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("{operation} timed out after {}s", .after.as_secs_f32())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("invalid exclude pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// externally visible failure classes of a deployment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NameConflict,
    RepositoryNotFound,
    FastForwardConflict,
    TransportFailure,
    InvalidInput,
}

impl Error {
    /// classify this error for a deployment result
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NameConflict(_) => ErrorKind::NameConflict,
            Error::RepositoryNotFound(_) => ErrorKind::RepositoryNotFound,
            Error::FastForwardConflict { .. } | Error::RefAlreadyExists { .. } => {
                ErrorKind::FastForwardConflict
            }
            Error::Transport { .. }
            | Error::Timeout { .. }
            | Error::Http(_)
            | Error::Json(_)
            | Error::InvalidObjectId(_) => ErrorKind::TransportFailure,
            Error::EmptySubmission
            | Error::DuplicatePath(_)
            | Error::InvalidPath(_)
            | Error::InvalidName(_)
            | Error::InvalidRef(_)
            | Error::RefMoverSpent(_)
            | Error::Url(_)
            | Error::Config(_)
            | Error::ConfigSerialize(_)
            | Error::Pattern(_)
            | Error::Io { .. } => ErrorKind::InvalidInput,
        }
    }

    /// HTTP status reported by the remote, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => *status,
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
