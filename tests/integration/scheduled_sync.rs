//! Integration tests for background sync against the in-process backend.
//!
//! Validates:
//! - An automatic scheduler runs at start and confirms offline rows
//! - An unavailable backend moves the scheduler into backoff until it recovers
//! - The schedule ledger records outcomes in the data directory
//! - A closed device gate holds runs until it opens
//! - Manual mode only runs on trigger

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tasksync::app::App;
use tasksync::config::ClientConfig;
use tasksync::scheduler::{
    BackoffPolicy, ReportedConditions, RunOutcome, ScheduleLedger, SchedulerConfig,
    SchedulerState,
};
use tasksync::sync::{Resource, SyncReport};
use tasksync_backend::server::{self, BackendState};
use tasksync_proto::task::NewTask;
use tokio::sync::watch;

const API_KEY: &str = "integration-key";
const PASSWORD: &str = "correct-horse";

async fn start_backend() -> (Arc<BackendState>, String) {
    let state = Arc::new(BackendState::new(API_KEY));
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start backend");
    (state, format!("http://{addr}"))
}

fn fast_schedule(manual: bool) -> SchedulerConfig {
    SchedulerConfig {
        interval: Duration::from_secs(60),
        manual,
        require_network: true,
        require_battery_not_low: true,
        backoff: BackoffPolicy {
            base: Duration::from_millis(50),
            multiplier: 2.0,
            max: Duration::from_millis(400),
        },
        constraint_poll: Duration::from_millis(20),
    }
}

fn open_app(base_url: &str, data_dir: &Path, manual: bool) -> App {
    App::open(ClientConfig {
        base_url: Some(base_url.to_string()),
        api_key: API_KEY.to_string(),
        data_dir: data_dir.to_path_buf(),
        scheduler: fast_schedule(manual),
        ..ClientConfig::default()
    })
    .expect("failed to open app")
}

/// Waits until `rx` holds a value matching `done`.
async fn wait_until<T: Clone>(rx: &mut watch::Receiver<T>, done: impl Fn(&T) -> bool) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| done(v)))
        .await
        .expect("state did not change in time")
        .expect("sender dropped")
        .clone()
}

#[tokio::test]
async fn automatic_run_confirms_offline_rows() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path(), false);
    let owner = app.sign_up("u1@example.com", PASSWORD).await.unwrap().user_id;

    state.set_available(false);
    app.reconciler().create(NewTask::new("offline")).await;
    state.set_available(true);

    let mut sync_state = app.reconciler().sync_state();
    let scheduler = app.start_scheduler();

    let outcome = wait_until(&mut sync_state, |s| {
        matches!(s, Some(Resource::Success(_) | Resource::Error(_)))
    })
    .await;
    assert_eq!(
        outcome,
        Some(Resource::Success(SyncReport {
            pushed: 1,
            pulled: 1
        }))
    );
    assert!(app.reconciler().cache().unsynced(&owner).unwrap().is_empty());
    assert_eq!(state.store.tasks_for_owner(&owner).await.len(), 1);

    let mut sched_state = scheduler.state();
    wait_until(&mut sched_state, |s| *s == SchedulerState::Idle).await;
    scheduler.shutdown().await;

    let entry = ScheduleLedger::in_dir(dir.path()).load().unwrap();
    assert_eq!(entry.attempt, 0);
    assert!(matches!(entry.last_outcome, Some(RunOutcome::Success { .. })));
    assert!(entry.next_run_at.is_some());
}

#[tokio::test]
async fn unavailable_backend_backs_off_then_recovers() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path(), false);
    let owner = app.sign_up("u1@example.com", PASSWORD).await.unwrap().user_id;

    state.set_available(false);
    app.reconciler().create(NewTask::new("queued")).await;

    let scheduler = app.start_scheduler();
    let mut sched_state = scheduler.state();

    let backoff = wait_until(&mut sched_state, |s| {
        matches!(s, SchedulerState::BackoffWait { .. })
    })
    .await;
    let SchedulerState::BackoffWait { attempt, delay } = backoff else {
        unreachable!();
    };
    assert!(attempt >= 1);
    assert!(delay <= Duration::from_millis(400));
    assert_eq!(app.reconciler().cache().unsynced(&owner).unwrap().len(), 1);

    let failed = ScheduleLedger::in_dir(dir.path()).load().unwrap();
    assert!(matches!(failed.last_outcome, Some(RunOutcome::Failure { .. })));

    state.set_available(true);
    let mut sync_state = app.reconciler().sync_state();
    wait_until(&mut sync_state, |s| matches!(s, Some(Resource::Success(_)))).await;
    assert!(app.reconciler().cache().unsynced(&owner).unwrap().is_empty());

    scheduler.shutdown().await;
}

#[tokio::test]
async fn closed_gate_holds_runs() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path(), false);
    let owner = app.sign_up("u1@example.com", PASSWORD).await.unwrap().user_id;
    state.store.insert(tasksync_proto::task::TaskRequest {
        id: None,
        owner_id: owner.clone(),
        title: "from another device".to_string(),
        description: None,
        completed: false,
        priority: tasksync_proto::task::TaskPriority::Medium,
        category: tasksync_proto::task::TaskCategory::Other,
        due_date: None,
    })
    .await;

    let conditions = Arc::new(ReportedConditions::new());
    conditions.set_network_available(false);
    let scheduler = app.start_scheduler_with(Arc::clone(&conditions));
    let mut sched_state = scheduler.state();

    wait_until(&mut sched_state, |s| *s == SchedulerState::Scheduled).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*sched_state.borrow(), SchedulerState::Scheduled);
    assert!(app.reconciler().cache().tasks_for_owner(&owner).unwrap().is_empty());

    conditions.set_network_available(true);
    let mut sync_state = app.reconciler().sync_state();
    wait_until(&mut sync_state, |s| matches!(s, Some(Resource::Success(_)))).await;
    assert_eq!(app.reconciler().cache().tasks_for_owner(&owner).unwrap().len(), 1);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn manual_mode_runs_only_on_trigger() {
    let (state, base) = start_backend().await;
    let dir = tempfile::TempDir::new().unwrap();
    let app = open_app(&base, dir.path(), true);
    let owner = app.sign_up("u1@example.com", PASSWORD).await.unwrap().user_id;

    state.set_available(false);
    app.reconciler().create(NewTask::new("manual")).await;
    state.set_available(true);

    let scheduler = app.start_scheduler();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*scheduler.state().borrow(), SchedulerState::Idle);
    assert_eq!(app.reconciler().cache().unsynced(&owner).unwrap().len(), 1);

    let mut sync_state = app.reconciler().sync_state();
    scheduler.trigger_now();
    wait_until(&mut sync_state, |s| matches!(s, Some(Resource::Success(_)))).await;
    assert!(app.reconciler().cache().unsynced(&owner).unwrap().is_empty());

    scheduler.shutdown().await;
}
