//! Periodic background reconciliation.
//!
//! A [`Scheduler`] drives a [`SyncJob`] through the state machine
//!
//! ```text
//! Idle ──tick/trigger──▶ Scheduled ──gate open──▶ Running ──ok──▶ Idle
//!                           ▲                        │
//!                           └──── BackoffWait ◀──err─┘
//! ```
//!
//! Runs only start while the [`DeviceConditions`] gate is open. Failures
//! retry after an exponential backoff. The next due time is written to a
//! [`ScheduleLedger`] so that a restart catches up on a missed run.

pub mod ledger;

pub use ledger::{LedgerEntry, RunOutcome, ScheduleLedger};

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use tasksync_proto::timestamp::Timestamp;

use crate::cache::TaskStore;
use crate::remote::TaskRemote;
use crate::sync::{Reconciler, Resource, SyncError};

/// One reconciliation pass, as seen by the scheduler.
pub trait SyncJob: Send + Sync + 'static {
    /// Runs the pass once.
    fn run(&self) -> impl Future<Output = Result<(), SyncError>> + Send;
}

impl<R, S> SyncJob for Reconciler<R, S>
where
    R: TaskRemote + 'static,
    S: TaskStore + 'static,
{
    async fn run(&self) -> Result<(), SyncError> {
        match self.sync().await {
            Resource::Error(e) => Err(e),
            Resource::Success(_) | Resource::Loading => Ok(()),
        }
    }
}

/// Device state consulted before each run.
pub trait DeviceConditions: Send + Sync + 'static {
    /// Whether the network is reachable.
    fn network_available(&self) -> bool;

    /// Whether the battery is low.
    fn battery_low(&self) -> bool;
}

/// Conditions that never block a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAvailable;

impl DeviceConditions for AlwaysAvailable {
    fn network_available(&self) -> bool {
        true
    }

    fn battery_low(&self) -> bool {
        false
    }
}

/// Conditions pushed in by the host platform.
#[derive(Debug)]
pub struct ReportedConditions {
    network: AtomicBool,
    battery_low: AtomicBool,
}

impl ReportedConditions {
    /// Starts with the network up and the battery fine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            network: AtomicBool::new(true),
            battery_low: AtomicBool::new(false),
        }
    }

    /// Records network reachability.
    pub fn set_network_available(&self, available: bool) {
        self.network.store(available, Ordering::SeqCst);
    }

    /// Records battery state.
    pub fn set_battery_low(&self, low: bool) {
        self.battery_low.store(low, Ordering::SeqCst);
    }
}

impl Default for ReportedConditions {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceConditions for ReportedConditions {
    fn network_available(&self) -> bool {
        self.network.load(Ordering::SeqCst)
    }

    fn battery_low(&self) -> bool {
        self.battery_low.load(Ordering::SeqCst)
    }
}

/// Exponential retry delay: `min(base * multiplier^(attempt - 1), max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Growth factor per attempt; values below 1.0 are treated as 1.0.
    pub multiplier: f64,
    /// Upper bound.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(10),
            multiplier: 2.0,
            max: Duration::from_secs(5 * 60 * 60),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based; 0 is treated as 1).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Time between successful runs.
    pub interval: Duration,
    /// Disables automatic ticks; only [`Scheduler::trigger_now`] and
    /// retries start runs.
    pub manual: bool,
    /// Hold runs while the network is unreachable.
    pub require_network: bool,
    /// Hold runs while the battery is low.
    pub require_battery_not_low: bool,
    /// Retry delays.
    pub backoff: BackoffPolicy,
    /// How often a closed gate is re-checked.
    pub constraint_poll: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            manual: false,
            require_network: true,
            require_battery_not_low: true,
            backoff: BackoffPolicy::default(),
            constraint_poll: Duration::from_secs(30),
        }
    }
}

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing due until the next tick or trigger.
    Idle,
    /// A run is due and waits for the device gate.
    Scheduled,
    /// A run is in progress.
    Running,
    /// The last run failed; waiting to retry.
    BackoffWait {
        /// Consecutive failures so far.
        attempt: u32,
        /// Delay before the retry.
        delay: Duration,
    },
}

/// Handle to a running scheduler loop.
///
/// Dropping the handle stops the loop.
pub struct Scheduler {
    state: Arc<watch::Sender<SchedulerState>>,
    trigger: Arc<Notify>,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns the scheduler loop on the current runtime.
    pub fn start<J, C>(
        job: Arc<J>,
        conditions: Arc<C>,
        config: SchedulerConfig,
        ledger: ScheduleLedger,
    ) -> Self
    where
        J: SyncJob,
        C: DeviceConditions,
    {
        let state = Arc::new(watch::channel(SchedulerState::Idle).0);
        let trigger = Arc::new(Notify::new());
        let (stop, stop_rx) = watch::channel(false);
        let worker = Worker {
            job,
            conditions,
            config,
            ledger,
            state: Arc::clone(&state),
            trigger: Arc::clone(&trigger),
            stop_rx,
        };
        let task = tokio::spawn(worker.run());
        Self {
            state,
            trigger,
            stop,
            task: Some(task),
        }
    }

    /// Subscribes to state transitions.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Requests a run as soon as the device gate allows, regardless of the
    /// interval or manual mode.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    /// Stops the loop and moves to [`SchedulerState::Idle`] immediately.
    ///
    /// A run already in flight completes in the background; its result is
    /// not recorded.
    pub fn stop(&self) {
        self.stop.send_replace(true);
        self.state.send_replace(SchedulerState::Idle);
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "scheduler task ended abnormally");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

/// What ended a wait.
enum Wake {
    Due,
    Triggered,
    Stopped,
}

/// Where the loop parks between runs.
struct Pending {
    deadline: Option<Instant>,
    state: SchedulerState,
}

struct Worker<J, C> {
    job: Arc<J>,
    conditions: Arc<C>,
    config: SchedulerConfig,
    ledger: ScheduleLedger,
    state: Arc<watch::Sender<SchedulerState>>,
    trigger: Arc<Notify>,
    stop_rx: watch::Receiver<bool>,
}

impl<J: SyncJob, C: DeviceConditions> Worker<J, C> {
    async fn run(mut self) {
        let mut entry = self.ledger.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring unreadable schedule ledger");
            ledger::LedgerEntry::default()
        });
        let mut pending = self.initial(&entry);
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            manual = self.config.manual,
            "scheduler started"
        );

        loop {
            self.set_state(pending.state);
            match self.wait(pending.deadline).await {
                Wake::Stopped => break,
                Wake::Due | Wake::Triggered => {}
            }
            if !self.wait_for_gate().await {
                break;
            }

            self.set_state(SchedulerState::Running);
            entry.next_run_at = Some(Timestamp::now());
            self.record(&entry);

            let Some(result) = self.execute().await else {
                break;
            };
            pending = self.after_run(&mut entry, result);
            self.record(&entry);
        }
        tracing::info!("scheduler stopped");
    }

    /// First wait, honouring an overdue run or a pending retry from the
    /// ledger. In manual mode a future interval tick is dropped.
    fn initial(&self, entry: &LedgerEntry) -> Pending {
        if let Some(next) = entry.next_run_at {
            let delay = (*next.as_datetime() - chrono::Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            let deadline = Some(Instant::now() + delay);
            if delay.is_zero() {
                tracing::info!(due = %next, "schedule ledger shows an overdue run");
            }
            if entry.attempt > 0 {
                return Pending {
                    deadline,
                    state: SchedulerState::BackoffWait {
                        attempt: entry.attempt,
                        delay,
                    },
                };
            }
            if delay.is_zero() || !self.config.manual {
                return Pending {
                    deadline,
                    state: SchedulerState::Scheduled,
                };
            }
            tracing::debug!(due = %next, "manual mode, ignoring stored interval tick");
        }
        if self.config.manual {
            Pending {
                deadline: None,
                state: SchedulerState::Idle,
            }
        } else {
            Pending {
                deadline: Some(Instant::now()),
                state: SchedulerState::Scheduled,
            }
        }
    }

    /// Folds a run result into the ledger entry and picks the next wait.
    fn after_run(&self, entry: &mut LedgerEntry, result: Result<(), SyncError>) -> Pending {
        let now = Instant::now();
        match result {
            Ok(()) => {
                tracing::info!("scheduled sync succeeded");
                entry.attempt = 0;
                entry.last_outcome = Some(RunOutcome::Success {
                    at: Timestamp::now(),
                });
                let deadline = (!self.config.manual).then(|| now + self.config.interval);
                entry.next_run_at = deadline.map(|_| wall_clock_after(self.config.interval));
                Pending {
                    deadline,
                    state: SchedulerState::Idle,
                }
            }
            Err(e) => {
                entry.attempt = entry.attempt.saturating_add(1);
                let delay = self.config.backoff.delay(entry.attempt);
                tracing::warn!(
                    attempt = entry.attempt,
                    retry_in_secs = delay.as_secs(),
                    error = %e,
                    "scheduled sync failed"
                );
                entry.last_outcome = Some(RunOutcome::Failure {
                    at: Timestamp::now(),
                    error: e.to_string(),
                });
                entry.next_run_at = Some(wall_clock_after(delay));
                Pending {
                    deadline: Some(now + delay),
                    state: SchedulerState::BackoffWait {
                        attempt: entry.attempt,
                        delay,
                    },
                }
            }
        }
    }

    /// Runs the job on its own task. Returns `None` if stopped meanwhile.
    async fn execute(&mut self) -> Option<Result<(), SyncError>> {
        let job = Arc::clone(&self.job);
        let mut handle = tokio::spawn(async move { job.run().await });
        tokio::select! {
            joined = &mut handle => match joined {
                Ok(result) => Some(result),
                Err(e) => Some(Err(SyncError::Storage(format!("sync task aborted: {e}")))),
            },
            _ = self.stop_rx.changed() => {
                tracing::info!("scheduler stopped during a run; its result will be discarded");
                None
            }
        }
    }

    /// Waits until the device gate opens. Returns `false` if stopped.
    async fn wait_for_gate(&mut self) -> bool {
        while !self.gate_open() {
            self.set_state(SchedulerState::Scheduled);
            tracing::debug!("sync constraints not met, re-checking later");
            let recheck = Instant::now() + self.config.constraint_poll;
            if matches!(self.wait(Some(recheck)).await, Wake::Stopped) {
                return false;
            }
        }
        !self.is_stopped()
    }

    fn gate_open(&self) -> bool {
        (!self.config.require_network || self.conditions.network_available())
            && (!self.config.require_battery_not_low || !self.conditions.battery_low())
    }

    async fn wait(&mut self, deadline: Option<Instant>) -> Wake {
        if self.is_stopped() {
            return Wake::Stopped;
        }
        let sleep = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            () = sleep => Wake::Due,
            () = self.trigger.notified() => Wake::Triggered,
            _ = self.stop_rx.changed() => Wake::Stopped,
        }
    }

    fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    fn set_state(&self, state: SchedulerState) {
        if self.is_stopped() {
            return;
        }
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(?previous, ?state, "scheduler state changed");
        }
    }

    fn record(&self, entry: &LedgerEntry) {
        if self.is_stopped() {
            return;
        }
        if let Err(e) = self.ledger.store(entry) {
            tracing::warn!(error = %e, "failed to write schedule ledger");
        }
    }
}

fn wall_clock_after(delay: Duration) -> Timestamp {
    let delta = chrono::TimeDelta::from_std(delay).unwrap_or(chrono::TimeDelta::MAX);
    let at = chrono::Utc::now()
        .checked_add_signed(delta)
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
    Timestamp::from_datetime(at)
}
