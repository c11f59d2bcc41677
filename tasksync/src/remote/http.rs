//! REST client for the remote task store.
//!
//! Every request carries the project API key. Task requests also carry the
//! user's bearer token. Rows in responses go through
//! [`tasksync_proto::codec::decode_tasks`]; normalized values are logged and
//! never surface to callers.

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use url::Url;

use tasksync_proto::auth::{AuthRequest, AuthResponse};
use tasksync_proto::codec;
use tasksync_proto::rest::{
    API_KEY_HEADER, GRANT_TYPE_PASSWORD, ID_COLUMN, LOGOUT_PATH, MERGE_DUPLICATES, OWNER_COLUMN,
    PREFER_HEADER, RETURN_REPRESENTATION, SIGNUP_PATH, TASKS_PATH, TOKEN_PATH, eq_filter, error_message,
};
use tasksync_proto::task::{Task, TaskId, TaskPatch, TaskRequest};

use super::{RemoteError, TaskRemote};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where and how to reach the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoints {
    /// Base of the auth endpoints, e.g. `https://x.example/auth/v1`.
    pub auth_url: Url,
    /// Base of the task endpoints, e.g. `https://x.example/rest/v1`.
    pub rest_url: Url,
    /// Value of the `apikey` header.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl RemoteEndpoints {
    /// Derives `auth/v1` and `rest/v1` bases from a project URL.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Endpoint`] if `base_url` is not an absolute
    /// URL.
    pub fn from_base(base_url: &str, api_key: impl Into<String>) -> Result<Self, RemoteError> {
        let base = parse_base(base_url)?;
        Ok(Self {
            auth_url: resolve(&base, "auth/v1")?,
            rest_url: resolve(&base, "rest/v1")?,
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        })
    }
}

/// Parses an absolute base URL.
///
/// # Errors
///
/// Returns [`RemoteError::Endpoint`] if the string is not an absolute URL.
pub fn parse_base(raw: &str) -> Result<Url, RemoteError> {
    Url::parse(raw).map_err(|e| RemoteError::Endpoint(format!("{raw}: {e}")))
}

/// Appends `path` to `base`, treating `base` as a directory.
fn resolve(base: &Url, path: &str) -> Result<Url, RemoteError> {
    let mut dir = base.clone();
    if !dir.path().ends_with('/') {
        let with_slash = format!("{}/", dir.path());
        dir.set_path(&with_slash);
    }
    dir.join(path)
        .map_err(|e| RemoteError::Endpoint(format!("{base} + {path}: {e}")))
}

/// `reqwest`-backed [`TaskRemote`] plus the password-grant auth calls.
#[derive(Debug, Clone)]
pub struct HttpTaskRemote {
    client: reqwest::Client,
    endpoints: RemoteEndpoints,
}

impl HttpTaskRemote {
    /// Builds a client with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transport`] if the TLS backend cannot be
    /// initialized.
    pub fn new(endpoints: RemoteEndpoints) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(endpoints.timeout)
            .build()?;
        Ok(Self { client, endpoints })
    }

    /// The endpoints this client talks to.
    #[must_use]
    pub const fn endpoints(&self) -> &RemoteEndpoints {
        &self.endpoints
    }

    /// Creates an account and returns its first session.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] if the request fails or is rejected.
    pub async fn sign_up(&self, request: &AuthRequest) -> Result<AuthResponse, RemoteError> {
        let url = resolve(&self.endpoints.auth_url, SIGNUP_PATH)?;
        let (_, body) = self.send(self.client.post(url).json(request)).await?;
        let resp: AuthResponse =
            codec::decode(&body).map_err(|e| RemoteError::Decode(e.to_string()))?;
        tracing::info!(user_id = %resp.user.id, "signed up");
        Ok(resp)
    }

    /// Exchanges email and password for a session.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] if the request fails or the credentials are
    /// rejected.
    pub async fn sign_in(&self, request: &AuthRequest) -> Result<AuthResponse, RemoteError> {
        let url = resolve(&self.endpoints.auth_url, TOKEN_PATH)?;
        let builder = self
            .client
            .post(url)
            .query(&[("grant_type", GRANT_TYPE_PASSWORD)])
            .json(request);
        let (_, body) = self.send(builder).await?;
        let resp: AuthResponse =
            codec::decode(&body).map_err(|e| RemoteError::Decode(e.to_string()))?;
        tracing::info!(user_id = %resp.user.id, "signed in");
        Ok(resp)
    }

    /// Revokes `token` on the server.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] if the request fails or is rejected.
    pub async fn sign_out(&self, token: &str) -> Result<(), RemoteError> {
        let url = resolve(&self.endpoints.auth_url, LOGOUT_PATH)?;
        self.send(self.client.post(url).bearer_auth(token)).await?;
        Ok(())
    }

    fn tasks_url(&self) -> Result<Url, RemoteError> {
        resolve(&self.endpoints.rest_url, TASKS_PATH)
    }

    /// Attaches the API key, sends, and maps non-success statuses.
    async fn send(&self, builder: RequestBuilder) -> Result<(StatusCode, Vec<u8>), RemoteError> {
        let response = builder
            .header(API_KEY_HEADER, &self.endpoints.api_key)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            let message = error_message(&text).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            });
            tracing::debug!(status = status.as_u16(), %message, "remote rejected request");
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok((status, body))
    }

    /// Decodes a row array, logging every normalized value.
    fn decode_rows(body: &[u8]) -> Result<Vec<Task>, RemoteError> {
        let decoded = codec::decode_tasks(body).map_err(|e| RemoteError::Decode(e.to_string()))?;
        for fallback in &decoded.fallbacks {
            tracing::warn!(%fallback, "normalized unknown value from remote");
        }
        Ok(decoded.tasks)
    }

    /// Decodes a `return=representation` response holding one row.
    fn decode_single(status: StatusCode, body: &[u8]) -> Result<Task, RemoteError> {
        Self::decode_rows(body)?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Rejected {
                status: status.as_u16(),
                message: "remote returned no rows".to_string(),
            })
    }
}

impl TaskRemote for HttpTaskRemote {
    async fn list_tasks(&self, token: &str, owner_id: &str) -> Result<Vec<Task>, RemoteError> {
        let builder = self
            .client
            .get(self.tasks_url()?)
            .bearer_auth(token)
            .query(&[(OWNER_COLUMN, eq_filter(owner_id).as_str()), ("select", "*")]);
        let (_, body) = self.send(builder).await?;
        let tasks = Self::decode_rows(&body)?;
        tracing::debug!(owner_id, count = tasks.len(), "listed remote tasks");
        Ok(tasks)
    }

    async fn create_task(&self, token: &str, request: &TaskRequest) -> Result<Task, RemoteError> {
        // A keyed create may be a replay of one whose response was lost.
        let prefer = if request.id.is_some() {
            format!("{RETURN_REPRESENTATION},{MERGE_DUPLICATES}")
        } else {
            RETURN_REPRESENTATION.to_string()
        };
        let builder = self
            .client
            .post(self.tasks_url()?)
            .bearer_auth(token)
            .header(PREFER_HEADER, prefer)
            .json(request);
        let (status, body) = self.send(builder).await?;
        let task = Self::decode_single(status, &body)?;
        tracing::debug!(task_id = %task.id, "created remote task");
        Ok(task)
    }

    async fn update_task(
        &self,
        token: &str,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<Task, RemoteError> {
        let builder = self
            .client
            .patch(self.tasks_url()?)
            .bearer_auth(token)
            .query(&[(ID_COLUMN, eq_filter(id.as_str()))])
            .header(PREFER_HEADER, RETURN_REPRESENTATION)
            .json(patch);
        let (status, body) = self.send(builder).await?;
        let task = Self::decode_single(status, &body)?;
        tracing::debug!(task_id = %task.id, "updated remote task");
        Ok(task)
    }

    async fn delete_task(&self, token: &str, id: &TaskId) -> Result<(), RemoteError> {
        let builder = self
            .client
            .delete(self.tasks_url()?)
            .bearer_auth(token)
            .query(&[(ID_COLUMN, eq_filter(id.as_str()))]);
        self.send(builder).await?;
        tracing::debug!(task_id = %id, "deleted remote task");
        Ok(())
    }
}
