//! Local task cache.
//!
//! [`TaskStore`] is the persistence seam: a durable table of task rows
//! keyed by id with upsert semantics. [`LocalCache`] wraps one store
//! instance, constructed once per process, and turns it into a live
//! source: every write republishes the affected owner's full task list on
//! a [`tokio::sync::watch`] channel obtained from [`LocalCache::observe`].
//!
//! Only the reconciler writes through `LocalCache`; its mutating methods
//! are crate-private. Observers must tolerate seeing a snapshot that
//! predates a mutation they just requested.

pub mod memory;
pub mod schema;
pub mod sqlite;

pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;

use tasksync_proto::task::{Task, TaskId};

/// Errors raised by a [`TaskStore`].
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The SQLite layer failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database file or its directory could not be prepared.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be decoded.
    #[error("corrupt row {id}: {reason}")]
    Corrupt {
        /// Id of the offending row.
        id: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Durable, queryable storage of task rows keyed by id.
///
/// Reads for an owner are ordered by `created_at` descending. Writes are
/// upserts: storing a row whose id is already present replaces it.
pub trait TaskStore: Send + Sync {
    /// All rows of `owner_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the rows cannot be read.
    fn tasks_for_owner(&self, owner_id: &str) -> Result<Vec<Task>, CacheError>;

    /// A single row by id.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the row cannot be read.
    fn get(&self, id: &TaskId) -> Result<Option<Task>, CacheError>;

    /// Rows of `owner_id` with `synced = false`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the rows cannot be read.
    fn unsynced(&self, owner_id: &str) -> Result<Vec<Task>, CacheError>;

    /// Inserts or replaces one row.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the write fails.
    fn upsert(&self, task: &Task) -> Result<(), CacheError>;

    /// Removes a row, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the write fails.
    fn delete(&self, id: &TaskId) -> Result<bool, CacheError>;

    /// Atomically replaces every row of `owner_id` with `tasks`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the write fails; the owner's previous rows
    /// are then left untouched.
    fn replace_owner(&self, owner_id: &str, tasks: &[Task]) -> Result<(), CacheError>;
}

/// The process-wide cache handle.
///
/// Wraps a [`TaskStore`] and publishes per-owner snapshots after every
/// write.
pub struct LocalCache<S: TaskStore> {
    store: S,
    feeds: Mutex<HashMap<String, watch::Sender<Vec<Task>>>>,
}

impl<S: TaskStore> LocalCache<S> {
    /// Takes ownership of `store`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes to the live task list of `owner_id`.
    ///
    /// The receiver starts with the current rows and is updated after
    /// every write that touches the owner.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the initial snapshot cannot be read.
    pub fn observe(&self, owner_id: &str) -> Result<watch::Receiver<Vec<Task>>, CacheError> {
        let mut feeds = self.feeds.lock();
        if let Some(tx) = feeds.get(owner_id) {
            return Ok(tx.subscribe());
        }
        let snapshot = self.store.tasks_for_owner(owner_id)?;
        let (tx, rx) = watch::channel(snapshot);
        feeds.insert(owner_id.to_string(), tx);
        drop(feeds);
        Ok(rx)
    }

    /// All rows of `owner_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the rows cannot be read.
    pub fn tasks_for_owner(&self, owner_id: &str) -> Result<Vec<Task>, CacheError> {
        self.store.tasks_for_owner(owner_id)
    }

    /// A single row by id.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the row cannot be read.
    pub fn get(&self, id: &TaskId) -> Result<Option<Task>, CacheError> {
        self.store.get(id)
    }

    /// Unconfirmed rows of `owner_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the rows cannot be read.
    pub fn unsynced(&self, owner_id: &str) -> Result<Vec<Task>, CacheError> {
        self.store.unsynced(owner_id)
    }

    pub(crate) fn upsert(&self, task: &Task) -> Result<(), CacheError> {
        self.store.upsert(task)?;
        self.publish(&task.owner_id);
        Ok(())
    }

    pub(crate) fn delete(&self, id: &TaskId) -> Result<bool, CacheError> {
        let owner = self.store.get(id)?.map(|t| t.owner_id);
        let existed = self.store.delete(id)?;
        if let Some(owner) = owner {
            self.publish(&owner);
        }
        Ok(existed)
    }

    /// Swaps a local placeholder row for its server-confirmed counterpart,
    /// publishing once.
    pub(crate) fn promote(&self, placeholder: &TaskId, confirmed: &Task) -> Result<(), CacheError> {
        self.store.delete(placeholder)?;
        self.store.upsert(confirmed)?;
        self.publish(&confirmed.owner_id);
        Ok(())
    }

    pub(crate) fn replace_owner(&self, owner_id: &str, tasks: &[Task]) -> Result<(), CacheError> {
        self.store.replace_owner(owner_id, tasks)?;
        self.publish(owner_id);
        Ok(())
    }

    /// Pushes a fresh snapshot to the owner's observers, dropping the feed
    /// once nobody listens.
    fn publish(&self, owner_id: &str) {
        let mut feeds = self.feeds.lock();
        let Some(tx) = feeds.get(owner_id) else {
            return;
        };
        if tx.receiver_count() == 0 {
            feeds.remove(owner_id);
            return;
        }
        match self.store.tasks_for_owner(owner_id) {
            Ok(snapshot) => {
                tx.send_replace(snapshot);
            }
            Err(e) => {
                tracing::warn!(owner_id, error = %e, "failed to reload cache snapshot");
            }
        }
    }
}
