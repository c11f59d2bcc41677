//! Integration tests for offline creation and later reconciliation.
//!
//! Validates:
//! - Create without a token or with the backend down keeps a local-only row
//! - `sync` confirms pending rows exactly once under their local ids
//! - A failed push keeps pending rows and skips the pull
//! - The projector reflects every stage through the live cache feed

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tasksync::app::App;
use tasksync::cache::{InMemoryTaskStore, LocalCache};
use tasksync::config::ClientConfig;
use tasksync::remote::{HttpTaskRemote, RemoteEndpoints, TaskRemote};
use tasksync::session::{Session, SessionStore};
use tasksync::sync::{Reconciler, Resource, SyncError, SyncReport};
use tasksync::view::ViewProjector;
use tasksync_backend::server::{self, BackendState};
use tasksync_proto::task::{NewTask, TaskRequest};

const API_KEY: &str = "integration-key";
const PASSWORD: &str = "correct-horse";

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

#[tokio::test]
async fn create_without_token_keeps_local_row() {
    let (state, base) = start_backend().await;
    let remote = HttpTaskRemote::new(RemoteEndpoints::from_base(&base, API_KEY).unwrap()).unwrap();
    let cache = Arc::new(LocalCache::new(InMemoryTaskStore::new()));
    // Owner known, token expired.
    let session = Arc::new(SessionStore::with_session(Session {
        access_token: String::new(),
        user_id: "u1".to_string(),
        email: "u1@example.com".to_string(),
    }));
    let reconciler = Reconciler::new(remote, Arc::clone(&cache), session);

    let result = reconciler.create(NewTask::new("Buy milk")).await;

    let Resource::Success(task) = result else {
        panic!("create should succeed locally: {result:?}");
    };
    assert_eq!(task.title, "Buy milk");
    assert!(!task.synced);
    let rows = cache.tasks_for_owner("u1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0], task);
    assert_eq!(state.store.task_count().await, 0);
}

#[tokio::test]
async fn create_with_backend_down_falls_back_then_sync_confirms() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path());
    let owner = app.sign_up("u1@example.com", PASSWORD).await.unwrap().user_id;
    let reconciler = app.reconciler();

    state.set_available(false);
    let mut local_ids = Vec::new();
    for title in ["first offline", "second offline"] {
        let Resource::Success(task) = reconciler.create(NewTask::new(title)).await else {
            panic!("offline create should succeed");
        };
        assert!(!task.synced);
        local_ids.push(task.id);
    }
    assert_eq!(reconciler.cache().unsynced(&owner).unwrap().len(), 2);

    state.set_available(true);
    let result = reconciler.sync().await;
    assert_eq!(result, Resource::Success(SyncReport { pushed: 2, pulled: 2 }));

    let cached = reconciler.cache().tasks_for_owner(&owner).unwrap();
    assert_eq!(cached.len(), 2);
    assert!(cached.iter().all(|t| t.synced));
    assert!(cached.iter().all(|t| local_ids.contains(&t.id)));
    assert_eq!(state.store.tasks_for_owner(&owner).await.len(), 2);

    // Replaying a confirmed push merges into the same row.
    let replay = cached[0].clone();
    let remote = HttpTaskRemote::new(RemoteEndpoints::from_base(&base, API_KEY).unwrap()).unwrap();
    let token = reconciler.session().access_token().unwrap();
    let echoed = remote
        .create_task(&token, &TaskRequest::from(&replay))
        .await
        .unwrap();
    assert_eq!(echoed.id, replay.id);
    assert_eq!(state.store.task_count().await, 2);

    // A second sync has nothing left to push and creates no duplicates.
    let again = reconciler.sync().await;
    assert_eq!(again, Resource::Success(SyncReport { pushed: 0, pulled: 2 }));
    assert_eq!(state.store.task_count().await, 2);
}

#[tokio::test]
async fn failed_push_keeps_pending_rows() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path());
    let owner = app.sign_up("u1@example.com", PASSWORD).await.unwrap().user_id;
    let reconciler = app.reconciler();

    state.set_available(false);
    let Resource::Success(pending) = reconciler.create(NewTask::new("pending")).await else {
        panic!("offline create should succeed");
    };

    let result = reconciler.sync().await;
    assert!(matches!(
        result,
        Resource::Error(SyncError::RemoteRejected { status: 503, .. })
    ));
    let cached = reconciler.cache().tasks_for_owner(&owner).unwrap();
    assert_eq!(cached, vec![pending]);
}

#[tokio::test]
async fn sync_preserves_offline_rows_that_pull_would_drop() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path());
    let owner = app.sign_up("u1@example.com", PASSWORD).await.unwrap().user_id;
    let reconciler = app.reconciler();

    state.set_available(false);
    reconciler.create(NewTask::new("offline note")).await;
    state.set_available(true);

    // A bare pull is a full replace and discards the unconfirmed row.
    assert!(reconciler.pull_all(&owner).await.is_success());
    assert!(reconciler.cache().tasks_for_owner(&owner).unwrap().is_empty());

    state.set_available(false);
    reconciler.create(NewTask::new("offline note")).await;
    state.set_available(true);

    // `sync` pushes first, so the row survives.
    assert!(reconciler.sync().await.is_success());
    let cached = reconciler.cache().tasks_for_owner(&owner).unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].title, "offline note");
    assert!(cached[0].synced);
}

#[tokio::test]
async fn wrong_api_key_degrades_create_and_fails_update() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let owner = open_app(&base, dir.path())
        .sign_up("u1@example.com", PASSWORD)
        .await
        .unwrap()
        .user_id;

    let app = App::open(ClientConfig {
        base_url: Some(base.clone()),
        api_key: "stale-key".to_string(),
        data_dir: dir.path().to_path_buf(),
        ..ClientConfig::default()
    })
    .unwrap();
    let reconciler = app.reconciler();

    let Resource::Success(task) = reconciler.create(NewTask::new("keyless")).await else {
        panic!("create should fall back locally");
    };
    assert!(!task.synced);
    assert_eq!(task.owner_id, owner);

    let toggled = reconciler.toggle_completion(&task).await;
    assert!(matches!(
        toggled,
        Resource::Error(SyncError::RemoteRejected { status: 401, .. })
    ));
    assert_eq!(state.store.task_count().await, 0);
}

#[tokio::test]
async fn projector_follows_offline_and_confirmed_states() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path());
    app.sign_up("u1@example.com", PASSWORD).await.unwrap();
    let projector: ViewProjector = app.projector().unwrap();
    let mut view = projector.state();

    state.set_available(false);
    app.reconciler().create(NewTask::new("watch me")).await;
    let stats = wait_for(&mut view, |v| v.stats.total == 1).await;
    assert_eq!(stats.unsynced, 1);

    state.set_available(true);
    assert!(app.reconciler().sync().await.is_success());
    let stats = wait_for(&mut view, |v| v.stats.total == 1 && v.stats.unsynced == 0).await;
    assert_eq!(stats.active, 1);
}

async fn wait_for(
    view: &mut tokio::sync::watch::Receiver<tasksync::view::ViewState>,
    done: impl Fn(&tasksync::view::ViewState) -> bool,
) -> tasksync::view::TaskStats {
    tokio::time::timeout(Duration::from_secs(5), view.wait_for(|v| done(v)))
        .await
        .expect("view did not update in time")
        .expect("projector stopped")
        .stats
}
