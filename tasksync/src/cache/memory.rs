//! In-memory implementation of [`TaskStore`].
//!
//! Same semantics as the SQLite store, without durability.

use std::collections::HashMap;

use parking_lot::Mutex;

use tasksync_proto::task::{Task, TaskId};

use super::{CacheError, TaskStore};

/// Rows keyed by id behind a mutex.
#[derive(Default)]
pub struct InMemoryTaskStore {
    rows: Mutex<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rows across all owners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Returns `true` if the store holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn tasks_for_owner(&self, owner_id: &str) -> Result<Vec<Task>, CacheError> {
        let mut tasks: Vec<Task> = self
            .rows
            .lock()
            .values()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(tasks)
    }

    fn get(&self, id: &TaskId) -> Result<Option<Task>, CacheError> {
        Ok(self.rows.lock().get(id).cloned())
    }

    fn unsynced(&self, owner_id: &str) -> Result<Vec<Task>, CacheError> {
        let mut tasks: Vec<Task> = self
            .rows
            .lock()
            .values()
            .filter(|t| t.owner_id == owner_id && !t.synced)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(tasks)
    }

    fn upsert(&self, task: &Task) -> Result<(), CacheError> {
        self.rows.lock().insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn delete(&self, id: &TaskId) -> Result<bool, CacheError> {
        Ok(self.rows.lock().remove(id).is_some())
    }

    fn replace_owner(&self, owner_id: &str, tasks: &[Task]) -> Result<(), CacheError> {
        let mut rows = self.rows.lock();
        rows.retain(|_, t| t.owner_id != owner_id);
        for task in tasks {
            rows.insert(task.id.clone(), task.clone());
        }
        drop(rows);
        Ok(())
    }
}
