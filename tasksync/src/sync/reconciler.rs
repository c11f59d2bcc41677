//! The sync reconciler.
//!
//! Sole writer of the local cache. Every public operation resolves to a
//! [`Resource`] and never panics or propagates an error past its boundary.
//!
//! Create and update are deliberately asymmetric: a create that cannot
//! reach the remote degrades to a local-only row (`synced = false`) and
//! still reports success, while an update or delete that fails leaves the
//! local row untouched and reports the error.
//!
//! `pull_all` replaces the owner's rows wholesale, so unsynced local rows
//! are lost by an interactive pull. `sync` pushes pending rows first and
//! skips the pull if any push fails.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::watch;

use tasksync_proto::task::{NewTask, Task, TaskId, TaskPatch, TaskRequest};
use tasksync_proto::timestamp::Timestamp;

use super::{Resource, SyncError};
use crate::cache::{LocalCache, TaskStore};
use crate::remote::TaskRemote;
use crate::session::SessionStore;

/// What a completed `sync` or `pull_all` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Offline-created rows confirmed by the remote.
    pub pushed: usize,
    /// Rows now in the cache for the owner.
    pub pulled: usize,
}

/// Outcome of `delete_completed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Rows removed remotely and locally.
    pub deleted: usize,
    /// Rows whose remote delete failed; still cached.
    pub failed: usize,
}

/// Which user-initiated mutation a state update refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// `create`.
    Create,
    /// `update` or `toggle_completion`.
    Update,
    /// `delete`.
    Delete,
    /// `delete_completed`.
    DeleteCompleted,
}

/// Latest mutation and its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    /// The mutation.
    pub kind: OperationKind,
    /// `Loading` while in flight, then its outcome.
    pub state: Resource<()>,
}

/// Reconciles the local cache with the remote store.
pub struct Reconciler<R: TaskRemote, S: TaskStore> {
    remote: R,
    cache: Arc<LocalCache<S>>,
    session: Arc<SessionStore>,
    sync_state: watch::Sender<Option<Resource<SyncReport>>>,
    operation_state: watch::Sender<Option<OperationStatus>>,
}

impl<R: TaskRemote, S: TaskStore> Reconciler<R, S> {
    /// Creates a reconciler over a shared cache handle.
    pub fn new(remote: R, cache: Arc<LocalCache<S>>, session: Arc<SessionStore>) -> Self {
        let (sync_state, _) = watch::channel(None);
        let (operation_state, _) = watch::channel(None);
        Self {
            remote,
            cache,
            session,
            sync_state,
            operation_state,
        }
    }

    /// The cache this reconciler writes to.
    #[must_use]
    pub const fn cache(&self) -> &Arc<LocalCache<S>> {
        &self.cache
    }

    /// The session consulted for token and owner id.
    #[must_use]
    pub const fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// The remote client.
    #[must_use]
    pub const fn remote(&self) -> &R {
        &self.remote
    }

    /// State of the latest `sync` or `pull_all`. `None` until one starts.
    #[must_use]
    pub fn sync_state(&self) -> watch::Receiver<Option<Resource<SyncReport>>> {
        self.sync_state.subscribe()
    }

    /// State of the latest create, update, delete, or cleanup.
    #[must_use]
    pub fn operation_state(&self) -> watch::Receiver<Option<OperationStatus>> {
        self.operation_state.subscribe()
    }

    /// Replaces the owner's cached rows with the remote's.
    ///
    /// On failure the cache is untouched.
    pub async fn pull_all(&self, owner_id: &str) -> Resource<Vec<Task>> {
        self.sync_state.send_replace(Some(Resource::Loading));
        let result = self.try_pull(owner_id).await;
        self.sync_state.send_replace(Some(
            result
                .as_ref()
                .map(|tasks| SyncReport {
                    pushed: 0,
                    pulled: tasks.len(),
                })
                .map_err(Clone::clone)
                .into(),
        ));
        result.into()
    }

    /// Creates a task, falling back to a local-only row when the remote is
    /// unreachable or the user has no token.
    pub async fn create(&self, new_task: NewTask) -> Resource<Task> {
        self.begin(OperationKind::Create);
        let result = self.try_create(new_task).await;
        self.finish(OperationKind::Create, &result);
        result.into()
    }

    /// Applies `patch` remotely, then caches the returned row.
    pub async fn update(&self, task_id: &TaskId, patch: TaskPatch) -> Resource<Task> {
        self.begin(OperationKind::Update);
        let result = self.try_update(task_id, &patch).await;
        self.finish(OperationKind::Update, &result);
        result.into()
    }

    /// Deletes remotely, then locally.
    pub async fn delete(&self, task_id: &TaskId) -> Resource<()> {
        self.begin(OperationKind::Delete);
        let result = self.try_delete(task_id).await;
        self.finish(OperationKind::Delete, &result);
        result.into()
    }

    /// Flips `completed` through [`Reconciler::update`].
    pub async fn toggle_completion(&self, task: &Task) -> Resource<Task> {
        self.update(&task.id, TaskPatch::completed(!task.completed))
            .await
    }

    /// Pushes pending local rows, then pulls.
    ///
    /// The pull is skipped when a push fails so that unconfirmed rows are
    /// never replaced away.
    pub async fn sync(&self) -> Resource<SyncReport> {
        self.sync_state.send_replace(Some(Resource::Loading));
        let result = self.try_sync().await;
        self.sync_state
            .send_replace(Some(result.clone().into()));
        result.into()
    }

    /// Sends every unsynced row of `owner_id` to the remote, oldest first.
    ///
    /// Each push is keyed by the row's local id, so a retry after a lost
    /// reply updates the row the remote already holds instead of adding a
    /// second one. Stops at the first failure; rows confirmed before it stay
    /// confirmed.
    pub async fn push_pending(&self, owner_id: &str) -> Resource<usize> {
        self.try_push_pending(owner_id).await.into()
    }

    /// Deletes every completed task of `owner_id` concurrently.
    pub async fn delete_completed(&self, owner_id: &str) -> Resource<CleanupReport> {
        self.begin(OperationKind::DeleteCompleted);
        let result = self.try_delete_completed(owner_id).await;
        self.finish(OperationKind::DeleteCompleted, &result);
        result.into()
    }

    fn token(&self) -> Result<String, SyncError> {
        self.session
            .access_token()
            .ok_or(SyncError::NotAuthenticated)
    }

    fn owner(&self) -> Result<String, SyncError> {
        self.session
            .owner_id()
            .filter(|id| !id.is_empty())
            .ok_or(SyncError::UserNotFound)
    }

    fn begin(&self, kind: OperationKind) {
        self.operation_state.send_replace(Some(OperationStatus {
            kind,
            state: Resource::Loading,
        }));
    }

    fn finish<T>(&self, kind: OperationKind, result: &Result<T, SyncError>) {
        let state = match result {
            Ok(_) => Resource::Success(()),
            Err(e) => Resource::Error(e.clone()),
        };
        self.operation_state
            .send_replace(Some(OperationStatus { kind, state }));
    }

    async fn try_pull(&self, owner_id: &str) -> Result<Vec<Task>, SyncError> {
        let token = self.token()?;
        if owner_id.is_empty() {
            return Err(SyncError::UserNotFound);
        }
        let tasks = self
            .remote
            .list_tasks(&token, owner_id)
            .await
            .inspect_err(|e| tracing::warn!(owner_id, error = %e, "pull failed"))?;
        self.cache.replace_owner(owner_id, &tasks)?;
        tracing::info!(owner_id, count = tasks.len(), "pulled tasks");
        Ok(tasks)
    }

    async fn try_create(&self, mut new_task: NewTask) -> Result<Task, SyncError> {
        let title = new_task.title.trim();
        if title.is_empty() {
            return Err(SyncError::Validation("title must not be empty".to_string()));
        }
        new_task.title = title.to_string();
        let owner_id = self.owner()?;

        if let Some(token) = self.session.access_token() {
            match self
                .remote
                .create_task(&token, &new_task.to_request(&owner_id))
                .await
            {
                Ok(task) => {
                    self.cache.upsert(&task)?;
                    tracing::info!(task_id = %task.id, "created task");
                    return Ok(task);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "remote create failed, keeping task locally");
                }
            }
        } else {
            tracing::info!("no session token, creating task locally");
        }

        let task = new_task.into_local(&owner_id, TaskId::generate(), Timestamp::now());
        self.cache.upsert(&task)?;
        tracing::info!(task_id = %task.id, "created local-only task");
        Ok(task)
    }

    async fn try_update(&self, task_id: &TaskId, patch: &TaskPatch) -> Result<Task, SyncError> {
        if patch.is_empty() {
            return Err(SyncError::Validation("nothing to update".to_string()));
        }
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(SyncError::Validation("title must not be empty".to_string()));
        }
        let token = self.token()?;
        let task = self
            .remote
            .update_task(&token, task_id, patch)
            .await
            .inspect_err(|e| tracing::warn!(task_id = %task_id, error = %e, "update failed"))?;
        self.cache.upsert(&task)?;
        tracing::info!(task_id = %task.id, "updated task");
        Ok(task)
    }

    async fn try_delete(&self, task_id: &TaskId) -> Result<(), SyncError> {
        let token = self.token()?;
        self.remote
            .delete_task(&token, task_id)
            .await
            .inspect_err(|e| tracing::warn!(task_id = %task_id, error = %e, "delete failed"))?;
        self.cache.delete(task_id)?;
        tracing::info!(task_id = %task_id, "deleted task");
        Ok(())
    }

    async fn try_push_pending(&self, owner_id: &str) -> Result<usize, SyncError> {
        let token = self.token()?;
        let pending = self.cache.unsynced(owner_id)?;
        let mut pushed = 0;
        for local in &pending {
            let server = match self
                .remote
                .create_task(&token, &TaskRequest::from(local))
                .await
            {
                Ok(task) => task,
                Err(e) => {
                    tracing::warn!(
                        task_id = %local.id,
                        pushed,
                        remaining = pending.len() - pushed,
                        error = %e,
                        "push of pending task failed"
                    );
                    return Err(e.into());
                }
            };
            self.cache.promote(&local.id, &server)?;
            tracing::debug!(local_id = %local.id, task_id = %server.id, "confirmed pending task");
            pushed += 1;
        }
        if pushed > 0 {
            tracing::info!(owner_id, pushed, "pushed pending tasks");
        }
        Ok(pushed)
    }

    async fn try_sync(&self) -> Result<SyncReport, SyncError> {
        let owner_id = self.owner()?;
        let pushed = self.try_push_pending(&owner_id).await?;
        let pulled = self.try_pull(&owner_id).await?.len();
        Ok(SyncReport { pushed, pulled })
    }

    async fn try_delete_completed(&self, owner_id: &str) -> Result<CleanupReport, SyncError> {
        self.token()?;
        let completed: Vec<TaskId> = self
            .cache
            .tasks_for_owner(owner_id)?
            .into_iter()
            .filter(|t| t.completed)
            .map(|t| t.id)
            .collect();
        let results = join_all(completed.iter().map(|id| self.try_delete(id))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        let report = CleanupReport {
            deleted: results.len() - failed,
            failed,
        };
        tracing::info!(owner_id, deleted = report.deleted, failed, "cleared completed tasks");
        Ok(report)
    }
}
