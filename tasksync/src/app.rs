//! Wiring of the sync layer for one process.
//!
//! [`App`] opens the SQLite cache and the session file in the data
//! directory, builds the HTTP remote from configuration, and hands out the
//! reconciler, scheduler, and projector built on them.

use std::sync::Arc;

use tasksync_proto::auth::AuthRequest;

use crate::cache::{CacheError, LocalCache, SqliteTaskStore};
use crate::config::{ClientConfig, ConfigError};
use crate::remote::{HttpTaskRemote, RemoteError};
use crate::scheduler::{AlwaysAvailable, DeviceConditions, ScheduleLedger, Scheduler};
use crate::session::{Session, SessionError, SessionStore};
use crate::sync::Reconciler;
use crate::view::ViewProjector;

/// The reconciler used by the binary.
pub type TaskReconciler = Reconciler<HttpTaskRemote, SqliteTaskStore>;

/// Errors raised while opening the app or managing the session.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration is incomplete or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The cache database could not be opened.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The session file could not be read or written.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// An auth call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The command needs a signed-in user.
    #[error("not signed in; run `tasksync login` first")]
    NotSignedIn,
}

/// All long-lived components of the client.
pub struct App {
    config: ClientConfig,
    reconciler: Arc<TaskReconciler>,
}

impl App {
    /// Opens the cache and session in `config.data_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] if the remote is not configured or local state
    /// cannot be opened.
    pub fn open(config: ClientConfig) -> Result<Self, AppError> {
        let remote = HttpTaskRemote::new(config.remote_endpoints()?)?;
        let cache = Arc::new(LocalCache::new(SqliteTaskStore::open(&config.data_dir)?));
        let session = Arc::new(SessionStore::open(&config.data_dir)?);
        tracing::debug!(data_dir = %config.data_dir.display(), "opened local state");
        Ok(Self {
            config,
            reconciler: Arc::new(Reconciler::new(remote, cache, session)),
        })
    }

    /// The resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The shared reconciler.
    #[must_use]
    pub const fn reconciler(&self) -> &Arc<TaskReconciler> {
        &self.reconciler
    }

    /// Owner id of the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotSignedIn`] without a session.
    pub fn owner_id(&self) -> Result<String, AppError> {
        self.reconciler
            .session()
            .owner_id()
            .ok_or(AppError::NotSignedIn)
    }

    /// Creates an account and stores its session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] if sign-up is rejected or the session cannot be
    /// saved.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AppError> {
        let resp = self
            .reconciler
            .remote()
            .sign_up(&credentials(email, password))
            .await?;
        self.store_session(resp.into())
    }

    /// Signs in and stores the session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] if sign-in is rejected or the session cannot be
    /// saved.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AppError> {
        let resp = self
            .reconciler
            .remote()
            .sign_in(&credentials(email, password))
            .await?;
        self.store_session(resp.into())
    }

    /// Revokes the token remotely (best effort) and forgets the session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`] if the session file cannot be removed.
    pub async fn sign_out(&self) -> Result<(), AppError> {
        let session = self.reconciler.session();
        if let Some(token) = session.access_token()
            && let Err(e) = self.reconciler.remote().sign_out(&token).await
        {
            tracing::warn!(error = %e, "remote sign-out failed, clearing session anyway");
        }
        session.clear()?;
        Ok(())
    }

    /// Starts background sync with the configured schedule.
    #[must_use]
    pub fn start_scheduler(&self) -> Scheduler {
        self.start_scheduler_with(Arc::new(AlwaysAvailable))
    }

    /// Starts background sync gated on `conditions`.
    #[must_use]
    pub fn start_scheduler_with<C: DeviceConditions>(&self, conditions: Arc<C>) -> Scheduler {
        Scheduler::start(
            Arc::clone(&self.reconciler),
            conditions,
            self.config.scheduler.clone(),
            ScheduleLedger::in_dir(&self.config.data_dir),
        )
    }

    /// Projects the signed-in user's live task list.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] without a session or if the cache cannot be
    /// read.
    pub fn projector(&self) -> Result<ViewProjector, AppError> {
        let owner_id = self.owner_id()?;
        let source = self.reconciler.cache().observe(&owner_id)?;
        Ok(ViewProjector::spawn(source))
    }

    fn store_session(&self, session: Session) -> Result<Session, AppError> {
        self.reconciler.session().save(session.clone())?;
        tracing::info!(user_id = %session.user_id, "session stored");
        Ok(session)
    }
}

fn credentials(email: &str, password: &str) -> AuthRequest {
    AuthRequest {
        email: email.trim().to_string(),
        password: password.to_string(),
    }
}
