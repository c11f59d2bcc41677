//! Remote task store client.
//!
//! [`TaskRemote`] is the seam between the reconciler and the authoritative
//! store. [`http::HttpTaskRemote`] speaks the REST contract over `reqwest`;
//! tests substitute in-process fakes or point it at a mock server.

pub mod http;

pub use http::{HttpTaskRemote, RemoteEndpoints};

use std::future::Future;

use tasksync_proto::task::{Task, TaskId, TaskPatch, TaskRequest};

/// Errors returned by a [`TaskRemote`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The request never produced an HTTP response (connect, TLS, timeout).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server answered with a non-success status, or with an empty
    /// result where a row was expected.
    #[error("rejected by remote ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The configured endpoint could not be turned into a request URL.
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

impl RemoteError {
    /// Returns the HTTP status if the server answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Typed access to an owner's rows in the remote store.
///
/// Every call carries the caller's bearer token. Returned rows are already
/// normalized and flagged `synced`.
pub trait TaskRemote: Send + Sync {
    /// Fetches every row owned by `owner_id`.
    fn list_tasks(
        &self,
        token: &str,
        owner_id: &str,
    ) -> impl Future<Output = Result<Vec<Task>, RemoteError>> + Send;

    /// Inserts a row and returns it as stored.
    ///
    /// Without `request.id` the server assigns the id. With one, the call
    /// is idempotent: repeating it updates the same row.
    fn create_task(
        &self,
        token: &str,
        request: &TaskRequest,
    ) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    /// Applies `patch` to row `id` and returns the updated row.
    fn update_task(
        &self,
        token: &str,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    /// Removes row `id`.
    fn delete_task(
        &self,
        token: &str,
        id: &TaskId,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
