//! Integration tests for reconciliation against the in-process backend.
//!
//! Drives the full client stack (HTTP remote, SQLite cache, persisted
//! session) through [`App`] and validates:
//! - Pull replaces the owner's cached rows and is idempotent
//! - Online create, update, toggle, and delete keep cache and remote equal
//! - Failed updates and deletes leave the cache unchanged
//! - Session persistence across reopen and sign-out

use std::path::Path;
use std::sync::Arc;

use tasksync::app::{App, AppError};
use tasksync::config::ClientConfig;
use tasksync::remote::RemoteError;
use tasksync::sync::{Resource, SyncError};
use tasksync_backend::server::{self, BackendState};
use tasksync_proto::task::{NewTask, TaskCategory, TaskId, TaskPatch, TaskPriority, TaskRequest};

const API_KEY: &str = "integration-key";
const PASSWORD: &str = "correct-horse";

/// Start the backend in-process and return its state and base URL.
async fn start_backend() -> (Arc<BackendState>, String) {
    let state = Arc::new(BackendState::new(API_KEY));
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start backend");
    (state, format!("http://{addr}"))
}

fn open_app(base_url: &str, data_dir: &Path) -> App {
    App::open(ClientConfig {
        base_url: Some(base_url.to_string()),
        api_key: API_KEY.to_string(),
        data_dir: data_dir.to_path_buf(),
        ..ClientConfig::default()
    })
    .expect("failed to open app")
}

fn remote_row(owner_id: &str, title: &str) -> TaskRequest {
    TaskRequest {
        id: None,
        owner_id: owner_id.to_string(),
        title: title.to_string(),
        description: Some(format!("{title} details")),
        completed: false,
        priority: TaskPriority::High,
        category: TaskCategory::Home,
        due_date: None,
    }
}

#[tokio::test]
async fn pull_replaces_cache_with_remote_rows() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path());
    let session = app.sign_up("u1@example.com", PASSWORD).await.unwrap();
    let owner = session.user_id;

    let first = state.store.insert(remote_row(&owner, "Water plants")).await;
    let second = state.store.insert(remote_row(&owner, "Fix sink")).await;

    let pulled = app.reconciler().pull_all(&owner).await;
    assert!(pulled.is_success());

    let cache = app.reconciler().cache();
    let cached = cache.tasks_for_owner(&owner).unwrap();
    assert_eq!(cached.len(), 2);
    assert!(cached.iter().all(|t| t.synced));
    let mut ids: Vec<_> = cached.iter().map(|t| t.id.clone()).collect();
    ids.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(ids, expected);
    assert!(cached.iter().all(|t| t.priority == TaskPriority::High));
    assert!(cached.iter().all(|t| t.category == TaskCategory::Home));

    // Pulling again with unchanged remote data yields the same cache.
    assert!(app.reconciler().pull_all(&owner).await.is_success());
    assert_eq!(cache.tasks_for_owner(&owner).unwrap(), cached);
}

#[tokio::test]
async fn pull_drops_rows_deleted_remotely() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path());
    let owner = app.sign_up("u1@example.com", PASSWORD).await.unwrap().user_id;

    let keep = state.store.insert(remote_row(&owner, "keep")).await;
    let gone = state.store.insert(remote_row(&owner, "gone")).await;
    assert!(app.reconciler().pull_all(&owner).await.is_success());

    assert!(state.store.delete(&gone.id, &owner).await);
    assert!(app.reconciler().pull_all(&owner).await.is_success());

    let cached = app.reconciler().cache().tasks_for_owner(&owner).unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, keep.id);
}

#[tokio::test]
async fn online_create_caches_server_row() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path());
    let owner = app.sign_up("u1@example.com", PASSWORD).await.unwrap().user_id;

    let created = app
        .reconciler()
        .create(
            NewTask::new("  Buy milk  ")
                .with_priority(TaskPriority::Low)
                .with_category(TaskCategory::Shopping),
        )
        .await;
    let Resource::Success(task) = created else {
        panic!("create failed: {created:?}");
    };

    assert!(task.synced);
    assert_eq!(task.title, "Buy milk");
    assert_eq!(task.owner_id, owner);

    let remote = state.store.tasks_for_owner(&owner).await;
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].id, task.id);
    assert_eq!(remote[0].priority, TaskPriority::Low);
    assert_eq!(
        app.reconciler().cache().get(&task.id).unwrap(),
        Some(task.clone())
    );
}

#[tokio::test]
async fn update_and_toggle_replace_local_row() {
    let (_state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path());
    app.sign_up("u1@example.com", PASSWORD).await.unwrap();
    let reconciler = app.reconciler();

    let Resource::Success(task) = reconciler.create(NewTask::new("draft")).await else {
        panic!("create failed");
    };

    let patch = TaskPatch {
        title: Some("final".to_string()),
        priority: Some(TaskPriority::High),
        ..TaskPatch::default()
    };
    let Resource::Success(updated) = reconciler.update(&task.id, patch).await else {
        panic!("update failed");
    };
    assert_eq!(updated.title, "final");
    assert_eq!(updated.priority, TaskPriority::High);
    assert!(!updated.completed);

    let Resource::Success(toggled) = reconciler.toggle_completion(&updated).await else {
        panic!("toggle failed");
    };
    assert!(toggled.completed);

    let cached = reconciler.cache().get(&task.id).unwrap().unwrap();
    assert_eq!(cached.title, "final");
    assert!(cached.completed);
    assert!(cached.synced);
}

#[tokio::test]
async fn failed_update_leaves_local_row_unchanged() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path());
    app.sign_up("u1@example.com", PASSWORD).await.unwrap();
    let reconciler = app.reconciler();

    let Resource::Success(task) = reconciler.create(NewTask::new("walk dog")).await else {
        panic!("create failed");
    };

    state.set_available(false);
    let result = reconciler
        .update(&task.id, TaskPatch::completed(true))
        .await;

    assert!(matches!(
        result,
        Resource::Error(SyncError::RemoteRejected { status: 503, .. })
    ));
    let cached = reconciler.cache().get(&task.id).unwrap().unwrap();
    assert!(!cached.completed);
    assert_eq!(cached, task);
}

#[tokio::test]
async fn update_of_unknown_row_is_rejected() {
    let (_state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path());
    app.sign_up("u1@example.com", PASSWORD).await.unwrap();

    let result = app
        .reconciler()
        .update(&TaskId::new("missing"), TaskPatch::completed(true))
        .await;
    assert!(matches!(
        result,
        Resource::Error(SyncError::RemoteRejected { .. })
    ));
}

#[tokio::test]
async fn delete_removes_exactly_one_row() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path());
    let owner = app.sign_up("u1@example.com", PASSWORD).await.unwrap().user_id;
    let reconciler = app.reconciler();

    let Resource::Success(doomed) = reconciler.create(NewTask::new("doomed")).await else {
        panic!("create failed");
    };
    let Resource::Success(_) = reconciler.create(NewTask::new("survivor")).await else {
        panic!("create failed");
    };
    let before = reconciler.cache().tasks_for_owner(&owner).unwrap().len();

    assert!(reconciler.delete(&doomed.id).await.is_success());

    let after = reconciler.cache().tasks_for_owner(&owner).unwrap();
    assert_eq!(after.len(), before - 1);
    assert!(after.iter().all(|t| t.id != doomed.id));
    assert_eq!(state.store.tasks_for_owner(&owner).await.len(), 1);
}

#[tokio::test]
async fn failed_delete_keeps_local_row() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path());
    app.sign_up("u1@example.com", PASSWORD).await.unwrap();
    let reconciler = app.reconciler();

    let Resource::Success(task) = reconciler.create(NewTask::new("sticky")).await else {
        panic!("create failed");
    };

    state.set_available(false);
    let result = reconciler.delete(&task.id).await;
    assert!(result.error().is_some());
    assert!(reconciler.cache().get(&task.id).unwrap().is_some());
}

#[tokio::test]
async fn delete_completed_clears_only_completed() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path());
    let owner = app.sign_up("u1@example.com", PASSWORD).await.unwrap().user_id;
    let reconciler = app.reconciler();

    for title in ["a", "b", "c"] {
        let Resource::Success(task) = reconciler.create(NewTask::new(title)).await else {
            panic!("create failed");
        };
        if title != "c" {
            assert!(reconciler.toggle_completion(&task).await.is_success());
        }
    }

    let Resource::Success(report) = reconciler.delete_completed(&owner).await else {
        panic!("cleanup failed");
    };
    assert_eq!(report.deleted, 2);
    assert_eq!(report.failed, 0);

    let cached = reconciler.cache().tasks_for_owner(&owner).unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].title, "c");
    assert_eq!(state.store.tasks_for_owner(&owner).await.len(), 1);
}

#[tokio::test]
async fn session_and_cache_survive_reopen() {
    let (_state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();

    let (owner, task_id) = {
        let app = open_app(&base, dir.path());
        let owner = app.sign_up("u1@example.com", PASSWORD).await.unwrap().user_id;
        let Resource::Success(task) = app.reconciler().create(NewTask::new("persist")).await
        else {
            panic!("create failed");
        };
        (owner, task.id)
    };

    let reopened = open_app(&base, dir.path());
    assert_eq!(reopened.owner_id().unwrap(), owner);
    let cached = reopened.reconciler().cache().get(&task_id).unwrap();
    assert_eq!(cached.map(|t| t.title), Some("persist".to_string()));

    // The persisted token still works against the backend.
    assert!(reopened.reconciler().pull_all(&owner).await.is_success());
}

#[tokio::test]
async fn sign_out_forgets_session_but_keeps_cache() {
    let (_state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path());
    let owner = app.sign_up("u1@example.com", PASSWORD).await.unwrap().user_id;
    let Resource::Success(task) = app.reconciler().create(NewTask::new("kept")).await else {
        panic!("create failed");
    };

    app.sign_out().await.unwrap();

    assert!(matches!(app.owner_id(), Err(AppError::NotSignedIn)));
    assert!(app.reconciler().cache().get(&task.id).unwrap().is_some());
    assert!(matches!(
        app.reconciler().pull_all(&owner).await,
        Resource::Error(SyncError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn sign_in_with_wrong_password_is_rejected() {
    let (_state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path());
    app.sign_up("u1@example.com", PASSWORD).await.unwrap();
    app.sign_out().await.unwrap();

    let err = app.sign_in("u1@example.com", "wrong-pass").await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Remote(RemoteError::Rejected { status: 400, .. })
    ));

    let session = app.sign_in("U1@example.com", PASSWORD).await.unwrap();
    assert_eq!(app.owner_id().unwrap(), session.user_id);
}
