//! Offline-first reconciliation between the local cache and the remote
//! store.

pub mod reconciler;

pub use reconciler::{CleanupReport, OperationKind, OperationStatus, Reconciler, SyncReport};

use crate::cache::CacheError;
use crate::remote::RemoteError;

/// Tri-state result of a reconciler operation.
///
/// Operations themselves only ever return `Success` or `Error`; `Loading`
/// is what observers see on the state channels while one is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Resource<T> {
    /// An operation is in flight.
    #[default]
    Loading,
    /// The operation finished with a value.
    Success(T),
    /// The operation failed.
    Error(SyncError),
}

impl<T> Resource<T> {
    /// Returns `true` for [`Resource::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the error, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&SyncError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Converts into a `Result`, treating `Loading` as `None`.
    pub fn into_result(self) -> Option<Result<T, SyncError>> {
        match self {
            Self::Loading => None,
            Self::Success(v) => Some(Ok(v)),
            Self::Error(e) => Some(Err(e)),
        }
    }

    /// Maps the success value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resource<U> {
        match self {
            Self::Loading => Resource::Loading,
            Self::Success(v) => Resource::Success(f(v)),
            Self::Error(e) => Resource::Error(e),
        }
    }
}

impl<T> From<Result<T, SyncError>> for Resource<T> {
    fn from(result: Result<T, SyncError>) -> Self {
        match result {
            Ok(v) => Self::Success(v),
            Err(e) => Self::Error(e),
        }
    }
}

/// Why a reconciler operation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// No bearer token is available.
    #[error("not signed in")]
    NotAuthenticated,

    /// No owner id is available.
    #[error("no user id available")]
    UserNotFound,

    /// The request was rejected locally before reaching the remote.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The remote answered with an error.
    #[error("remote rejected the request ({status}): {message}")]
    RemoteRejected {
        /// HTTP status code.
        status: u16,
        /// Server-provided reason.
        message: String,
    },

    /// The remote could not be reached or answered unintelligibly.
    #[error("transport error: {0}")]
    Transport(String),

    /// The local cache failed.
    #[error("local storage error: {0}")]
    Storage(String),
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Rejected { status, message } => Self::RemoteRejected { status, message },
            RemoteError::Transport(msg) | RemoteError::Decode(msg) | RemoteError::Endpoint(msg) => {
                Self::Transport(msg)
            }
        }
    }
}

impl From<CacheError> for SyncError {
    fn from(e: CacheError) -> Self {
        Self::Storage(e.to_string())
    }
}
