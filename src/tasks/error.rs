// src/tasks/error.rs

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::engine::interpolate::InterpolationError;
use crate::model::CryptoKeyError;
use crate::store::StoreError;

/// Outcome of a failed task validation or run.
///
/// [`TaskError::Warning`] is the only recoverable variant: the chain records
/// it and moves on. Everything else halts the chain.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("bad task arguments: {0}")]
    BadArguments(String),

    #[error("unknown task type {0:?}")]
    UnknownTaskType(String),

    #[error("{0}")]
    Warning(String),

    #[error("cryptographic key {0:?} not found")]
    KeyNotFound(String),

    #[error("cryptographic key {name:?} cannot be used as a {expected} key")]
    WrongKeyType { name: String, expected: String },

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("{0} is not supported")]
    NotSupported(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("{0} was cancelled")]
    Cancelled(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("unknown charset {0:?}")]
    InvalidCharset(String),

    #[error("the source and destination charsets are identical")]
    IdenticalCharsets,

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    pub fn bad_args(msg: impl Into<String>) -> Self {
        TaskError::BadArguments(msg.into())
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, TaskError::Warning(_))
    }

    /// Map a primitive failure, naming the interrupted operation.
    pub fn from_crypto(err: CryptoError, operation: &str) -> Self {
        match err {
            CryptoError::Cancelled => TaskError::Cancelled(operation.to_string()),
            CryptoError::VerificationFailed(msg) => TaskError::VerificationFailed(msg),
            CryptoError::Io(e) => TaskError::Io(e),
            other => TaskError::Other(anyhow::anyhow!("{} failed: {}", operation, other)),
        }
    }

    /// Map a store lookup for the named key.
    pub fn from_key_lookup(err: StoreError, name: &str) -> Self {
        if err.is_not_found() {
            TaskError::KeyNotFound(name.to_string())
        } else {
            TaskError::Store(err)
        }
    }

    /// Map a lookup of any other named resource.
    pub fn from_lookup(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, key } => TaskError::NotFound(format!("{} {:?}", kind, key)),
            other => TaskError::Store(other),
        }
    }

    pub(crate) fn join(err: tokio::task::JoinError) -> Self {
        TaskError::Other(anyhow::anyhow!("blocking task failed: {}", err))
    }
}

impl From<CryptoKeyError> for TaskError {
    fn from(err: CryptoKeyError) -> Self {
        match err {
            CryptoKeyError::WrongType { name, expected, .. } => TaskError::WrongKeyType {
                name,
                expected: expected.to_string(),
            },
            other => TaskError::BadArguments(other.to_string()),
        }
    }
}
