//! HTTP server core: shared state, routes, and request guards.
//!
//! Serves the auth endpoints under `/auth/v1` and the task collection under
//! `/rest/v1/tasks`. Every request must carry the project `apikey` header;
//! task requests additionally need a bearer token issued by sign-up or
//! sign-in. Rows are filtered with the `column=eq.<value>` convention.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tasksync_proto::auth::{AuthRequest, AuthResponse};
use tasksync_proto::rest::{
    self, API_KEY_HEADER, ErrorBody, GRANT_TYPE_PASSWORD, ID_COLUMN, MERGE_DUPLICATES, OWNER_COLUMN,
    PREFER_HEADER, RETURN_REPRESENTATION,
};
use tasksync_proto::task::{Task, TaskId, TaskPatch, TaskRequest};

use crate::store::{AuthError, BackendStore};

/// Shared server state: the store, the expected api key, and the
/// availability switch.
pub struct BackendState {
    /// Accounts, tokens, and rows.
    pub store: BackendStore,
    api_key: String,
    available: AtomicBool,
}

impl BackendState {
    /// Creates an empty backend accepting `api_key`.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            store: BackendStore::new(),
            api_key: api_key.into(),
            available: AtomicBool::new(true),
        }
    }

    /// While `false`, every request is answered with 503.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        tracing::info!(available, "backend availability changed");
    }

    /// Returns the current availability.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

/// An error answered to the client as `{"message": ...}`.
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                message: self.message,
            }),
        )
            .into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        let status = match e {
            AuthError::EmailTaken => StatusCode::UNPROCESSABLE_ENTITY,
            AuthError::InvalidInput(_) | AuthError::InvalidCredentials => StatusCode::BAD_REQUEST,
        };
        Self::new(status, e.to_string())
    }
}

/// Builds the router over `state`.
#[must_use]
pub fn router(state: Arc<BackendState>) -> Router {
    Router::new()
        .route("/auth/v1/signup", post(sign_up))
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/logout", post(logout))
        .route(
            "/rest/v1/tasks",
            axum::routing::get(list_tasks)
                .post(create_task)
                .patch(update_task)
                .delete(delete_task),
        )
        .layer(middleware::from_fn_with_state(Arc::clone(&state), guard))
        .with_state(state)
}

/// Starts the backend with a fresh state accepting `api_key`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
    api_key: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(BackendState::new(api_key))).await
}

/// Starts the backend over a caller-held [`BackendState`].
///
/// Tests keep the `Arc` to flip availability or inspect rows.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<BackendState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "backend server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Rejects everything while unavailable, then checks the api key.
async fn guard(State(state): State<Arc<BackendState>>, req: Request, next: Next) -> Response {
    if !state.is_available() {
        return ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "service unavailable")
            .into_response();
    }
    let key = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if key != Some(state.api_key.as_str()) {
        tracing::debug!(path = %req.uri().path(), "rejected request without valid api key");
        return ApiError::unauthorized("invalid api key").into_response();
    }
    next.run(req).await
}

async fn sign_up(
    State(state): State<Arc<BackendState>>,
    Json(req): Json<AuthRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let resp = state.store.sign_up(&req).await?;
    tracing::info!(user_id = %resp.user.id, "account created");
    Ok(Json(resp))
}

async fn token(
    State(state): State<Arc<BackendState>>,
    Query(params): Query<HashMap<String, String>>,
    Json(req): Json<AuthRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    if params.get("grant_type").map(String::as_str) != Some(GRANT_TYPE_PASSWORD) {
        return Err(ApiError::bad_request("unsupported grant_type"));
    }
    let resp = state.store.sign_in(&req).await?;
    tracing::info!(user_id = %resp.user.id, "signed in");
    Ok(Json(resp))
}

async fn logout(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers)?;
    if !state.store.revoke(token).await {
        return Err(ApiError::unauthorized("invalid token"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tasks(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let user_id = authenticate(&state, &headers).await?;
    let rows = match params.get(OWNER_COLUMN) {
        Some(filter) => {
            let owner = rest::parse_eq_filter(filter)
                .ok_or_else(|| ApiError::bad_request(format!("unsupported filter {filter:?}")))?;
            if owner == user_id {
                state.store.tasks_for_owner(owner).await
            } else {
                Vec::new()
            }
        }
        None => state.store.tasks_for_owner(&user_id).await,
    };
    tracing::debug!(user_id = %user_id, rows = rows.len(), "listed tasks");
    Ok(Json(rows))
}

async fn create_task(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(mut req): Json<TaskRequest>,
) -> Result<Response, ApiError> {
    let user_id = authenticate(&state, &headers).await?;
    req.title = validate_title(&req.title)?;
    if req.owner_id != user_id {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "new row violates row-level security policy",
        ));
    }
    let task = match req.id.take() {
        Some(id) if id.as_str().trim().is_empty() => {
            return Err(ApiError::bad_request("id must not be empty"));
        }
        Some(id) => state
            .store
            .insert_keyed(id, req, prefers(&headers, MERGE_DUPLICATES))
            .await
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::CONFLICT,
                    "duplicate key value violates unique constraint",
                )
            })?,
        None => state.store.insert(req).await,
    };
    tracing::debug!(task_id = %task.id, user_id = %user_id, "task created");
    Ok(written(StatusCode::CREATED, &headers, task))
}

async fn update_task(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(mut patch): Json<TaskPatch>,
) -> Result<Response, ApiError> {
    let user_id = authenticate(&state, &headers).await?;
    let id = id_filter(&params)?;
    if let Some(title) = &patch.title {
        patch.title = Some(validate_title(title)?);
    }
    let rows: Vec<Task> = state
        .store
        .update(&id, &user_id, &patch)
        .await
        .into_iter()
        .collect();
    tracing::debug!(task_id = %id, matched = rows.len(), "task updated");
    Ok(written_rows(StatusCode::OK, &headers, rows))
}

async fn delete_task(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<StatusCode, ApiError> {
    let user_id = authenticate(&state, &headers).await?;
    let id = id_filter(&params)?;
    let removed = state.store.delete(&id, &user_id).await;
    tracing::debug!(task_id = %id, removed, "task deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Resolves the bearer token to a user id.
async fn authenticate(state: &BackendState, headers: &HeaderMap) -> Result<String, ApiError> {
    let token = bearer_token(headers)?;
    state
        .store
        .user_for_token(token)
        .await
        .ok_or_else(|| ApiError::unauthorized("invalid token"))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))
}

fn id_filter(params: &HashMap<String, String>) -> Result<TaskId, ApiError> {
    params
        .get(ID_COLUMN)
        .and_then(|f| rest::parse_eq_filter(f))
        .map(TaskId::new)
        .ok_or_else(|| ApiError::bad_request("an id=eq.<id> filter is required"))
}

fn validate_title(title: &str) -> Result<String, ApiError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("title must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Whether the `Prefer` header lists `directive`.
fn prefers(headers: &HeaderMap, directive: &str) -> bool {
    headers
        .get(PREFER_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|p| p.trim() == directive))
}

fn written(status: StatusCode, headers: &HeaderMap, task: Task) -> Response {
    written_rows(status, headers, vec![task])
}

/// Echoes written rows when asked to, otherwise answers 204.
fn written_rows(status: StatusCode, headers: &HeaderMap, rows: Vec<Task>) -> Response {
    if prefers(headers, RETURN_REPRESENTATION) {
        (status, Json(rows)).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

/// Starts the backend in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port) and returns the bound address
/// and a [`tokio::task::JoinHandle`] for cleanup.
#[cfg(test)]
pub async fn start_test_server(
    state: Arc<BackendState>,
) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server_with_state("127.0.0.1:0", state)
        .await
        .expect("failed to start test server")
}
