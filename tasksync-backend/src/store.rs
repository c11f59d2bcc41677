//! In-memory accounts, tokens, and task rows.
//!
//! The [`BackendStore`] is the whole state of the development backend.
//! Rows are scoped to their owner: a caller only ever sees, changes, or
//! removes rows whose `owner_id` is its own user id.

use std::collections::HashMap;

use tasksync_proto::auth::{AuthRequest, AuthResponse, User};
use tasksync_proto::task::{Task, TaskId, TaskPatch, TaskRequest};
use tasksync_proto::timestamp::Timestamp;
use tokio::sync::RwLock;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Why an auth request was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Sign-up with an email that already has an account.
    #[error("user already registered")]
    EmailTaken,

    /// Malformed email or too-short password.
    #[error("{0}")]
    InvalidInput(String),

    /// Unknown email or wrong password.
    #[error("invalid login credentials")]
    InvalidCredentials,
}

#[derive(Debug, Clone)]
struct Account {
    id: String,
    email: String,
    // Development backend only; passwords never leave process memory.
    password: String,
}

/// Accounts, issued tokens, and task rows.
#[derive(Default)]
pub struct BackendStore {
    /// Accounts keyed by lowercase email.
    accounts: RwLock<HashMap<String, Account>>,
    /// Issued bearer tokens mapped to user ids.
    tokens: RwLock<HashMap<String, String>>,
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl BackendStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account and issues a token for it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::EmailTaken`] for a known email and
    /// [`AuthError::InvalidInput`] for a malformed email or short password.
    pub async fn sign_up(&self, req: &AuthRequest) -> Result<AuthResponse, AuthError> {
        let email = req.email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(AuthError::InvalidInput(format!(
                "unable to validate email address: {email:?}"
            )));
        }
        if req.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidInput(format!(
                "password should be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let account = {
            let mut accounts = self.accounts.write().await;
            if accounts.contains_key(&email) {
                return Err(AuthError::EmailTaken);
            }
            let account = Account {
                id: uuid::Uuid::new_v4().to_string(),
                email: email.clone(),
                password: req.password.clone(),
            };
            accounts.insert(email, account.clone());
            account
        };
        Ok(self.issue_token(&account).await)
    }

    /// Checks credentials and issues a fresh token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] if the email is unknown or
    /// the password does not match.
    pub async fn sign_in(&self, req: &AuthRequest) -> Result<AuthResponse, AuthError> {
        let email = req.email.trim().to_lowercase();
        let account = self
            .accounts
            .read()
            .await
            .get(&email)
            .filter(|a| a.password == req.password)
            .cloned()
            .ok_or(AuthError::InvalidCredentials)?;
        Ok(self.issue_token(&account).await)
    }

    /// Revokes a token. Returns `true` if it was live.
    pub async fn revoke(&self, token: &str) -> bool {
        self.tokens.write().await.remove(token).is_some()
    }

    /// Resolves a bearer token to its user id.
    pub async fn user_for_token(&self, token: &str) -> Option<String> {
        self.tokens.read().await.get(token).cloned()
    }

    /// All rows owned by `owner_id`, oldest first.
    pub async fn tasks_for_owner(&self, owner_id: &str) -> Vec<Task> {
        let mut rows: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        rows
    }

    /// Inserts a row built from `req` with a fresh id and creation time.
    /// A client-chosen `req.id` is ignored; see [`Self::insert_keyed`].
    pub async fn insert(&self, req: TaskRequest) -> Task {
        let task = row_from(TaskId::generate(), req, Timestamp::now());
        self.put(task.clone()).await;
        task
    }

    /// Inserts `req` under the client-chosen `id`.
    ///
    /// When `id` already exists and `merge` is set, the stored row takes the
    /// request's fields and keeps its creation time. Returns `None` if the id
    /// exists without `merge`, or belongs to another owner.
    pub async fn insert_keyed(&self, id: TaskId, req: TaskRequest, merge: bool) -> Option<Task> {
        let mut tasks = self.tasks.write().await;
        let created_at = match tasks.get(&id) {
            Some(existing) if merge && existing.owner_id == req.owner_id => existing.created_at,
            Some(_) => return None,
            None => Timestamp::now(),
        };
        let task = row_from(id.clone(), req, created_at);
        tasks.insert(id, task.clone());
        Some(task)
    }

    /// Inserts or replaces a row verbatim.
    pub async fn put(&self, task: Task) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    /// Applies `patch` to the row `id` if `owner_id` owns it.
    pub async fn update(&self, id: &TaskId, owner_id: &str, patch: &TaskPatch) -> Option<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).filter(|t| t.owner_id == owner_id)?;
        patch.apply_to(task);
        Some(task.clone())
    }

    /// Removes the row `id` if `owner_id` owns it. Returns `true` if a row
    /// was removed.
    pub async fn delete(&self, id: &TaskId, owner_id: &str) -> bool {
        let mut tasks = self.tasks.write().await;
        if tasks.get(id).is_some_and(|t| t.owner_id == owner_id) {
            tasks.remove(id);
            true
        } else {
            false
        }
    }

    /// Total number of rows across all owners.
    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    async fn issue_token(&self, account: &Account) -> AuthResponse {
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.tokens
            .write()
            .await
            .insert(token.clone(), account.id.clone());
        AuthResponse {
            access_token: token,
            user: User {
                id: account.id.clone(),
                email: account.email.clone(),
            },
        }
    }
}

fn row_from(id: TaskId, req: TaskRequest, created_at: Timestamp) -> Task {
    Task {
        id,
        owner_id: req.owner_id,
        title: req.title,
        description: req.description,
        completed: req.completed,
        created_at,
        priority: req.priority,
        category: req.category,
        due_date: req.due_date,
        synced: true,
    }
}
