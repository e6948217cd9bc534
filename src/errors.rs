//! Error types for the object store collaborator and the file-system layer.
//!
//! `StoreError` is what a backend reports. `FsError` is what callers of the
//! file-system and registry surfaces see: the few cases this layer decides
//! itself (not found, already exists, bad argument, unsupported, copy
//! outcome) plus everything else from the store passed through untouched.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("container `{0}` not found")]
    ContainerNotFound(String),
    #[error("object `{key}` not found in container `{container}`")]
    ObjectNotFound { container: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("object store backend failure: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("`{0}` already exists")]
    AlreadyExists(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0} is not supported")]
    Unsupported(&'static str),
    #[error("copy from `{from}` to `{to}` failed: {reason}")]
    CopyFailed {
        from: String,
        to: String,
        reason: String,
    },
    #[error("copy to `{to}` still pending after {polls} status polls")]
    CopyTimedOut { to: String, polls: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    /// Shortcut for an invalid-argument error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}
