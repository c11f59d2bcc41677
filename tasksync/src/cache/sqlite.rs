//! SQLite-backed [`TaskStore`].
//!
//! One database file at `{data_dir}/tasks.db`. Access is serialized
//! through a single connection behind a mutex.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use tasksync_proto::task::{Task, TaskCategory, TaskId, TaskPriority};
use tasksync_proto::timestamp::Timestamp;

use super::schema::apply_schema;
use super::{CacheError, TaskStore};

/// Database filename within the data directory.
pub const DB_FILENAME: &str = "tasks.db";

const SELECT_COLUMNS: &str = "SELECT id, owner_id, title, description, completed, created_at, \
     priority, category, due_date, synced FROM tasks";

/// Durable task store.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Opens (or creates) `{data_dir}/tasks.db` and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the directory cannot be created or the
    /// database cannot be opened.
    pub fn open(data_dir: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(data_dir)?;
        let conn = Connection::open(data_dir.join(DB_FILENAME))?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if SQLite cannot be initialized.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Task>, CacheError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, StoredRow::from_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?.into_task()?);
        }
        Ok(tasks)
    }
}

/// A row exactly as stored, before timestamp parsing.
struct StoredRow {
    id: String,
    owner_id: String,
    title: String,
    description: Option<String>,
    completed: bool,
    created_at: String,
    priority: i64,
    category: String,
    due_date: Option<String>,
    synced: bool,
}

impl StoredRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            completed: row.get(4)?,
            created_at: row.get(5)?,
            priority: row.get(6)?,
            category: row.get(7)?,
            due_date: row.get(8)?,
            synced: row.get(9)?,
        })
    }

    fn into_task(self) -> Result<Task, CacheError> {
        let corrupt = |reason: String| CacheError::Corrupt {
            id: self.id.clone(),
            reason,
        };
        let created_at = Timestamp::parse(&self.created_at).map_err(|e| corrupt(e.to_string()))?;
        let due_date = self
            .due_date
            .as_deref()
            .map(Timestamp::parse)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;
        Ok(Task {
            id: TaskId::new(self.id),
            owner_id: self.owner_id,
            title: self.title,
            description: self.description,
            completed: self.completed,
            created_at,
            priority: TaskPriority::from_value(self.priority),
            category: TaskCategory::from_value(&self.category),
            due_date,
            synced: self.synced,
        })
    }
}

fn insert_row(conn: &Connection, task: &Task) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR REPLACE INTO tasks \
         (id, owner_id, title, description, completed, created_at, priority, category, due_date, synced) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            task.id.as_str(),
            task.owner_id,
            task.title,
            task.description,
            task.completed,
            task.created_at.to_rfc3339(),
            task.priority.value(),
            task.category.as_str(),
            task.due_date.map(|d| d.to_rfc3339()),
            task.synced,
        ],
    )
}

impl TaskStore for SqliteTaskStore {
    fn tasks_for_owner(&self, owner_id: &str) -> Result<Vec<Task>, CacheError> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE owner_id = ?1 ORDER BY created_at DESC, id ASC"),
            params![owner_id],
        )
    }

    fn get(&self, id: &TaskId) -> Result<Option<Task>, CacheError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.as_str()],
                StoredRow::from_row,
            )
            .optional()?;
        drop(conn);
        row.map(StoredRow::into_task).transpose()
    }

    fn unsynced(&self, owner_id: &str) -> Result<Vec<Task>, CacheError> {
        self.query(
            &format!(
                "{SELECT_COLUMNS} WHERE owner_id = ?1 AND synced = 0 ORDER BY created_at ASC, id ASC"
            ),
            params![owner_id],
        )
    }

    fn upsert(&self, task: &Task) -> Result<(), CacheError> {
        insert_row(&self.conn.lock(), task)?;
        Ok(())
    }

    fn delete(&self, id: &TaskId) -> Result<bool, CacheError> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM tasks WHERE id = ?1", params![id.as_str()])?;
        Ok(removed > 0)
    }

    fn replace_owner(&self, owner_id: &str, tasks: &[Task]) -> Result<(), CacheError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM tasks WHERE owner_id = ?1", params![owner_id])?;
        for task in tasks {
            insert_row(&tx, task)?;
        }
        tx.commit()?;
        Ok(())
    }
}
