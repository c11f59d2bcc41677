//! Task model shared by the client, the local cache, and the backend.
//!
//! [`Task`] serializes to the remote store's JSON row layout. The local-only
//! `synced` flag never leaves the process. Priority and category are closed
//! enums whose decoding is total: unknown raw values map to a default
//! through [`TaskPriority::from_value`] and [`TaskCategory::from_value`].

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::timestamp::Timestamp;

/// Stable task identifier.
///
/// Server-assigned ids are opaque strings. Ids minted locally for
/// offline creates are random UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh identifier for a task created without the remote.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Task priority. Encoded on the wire as `1`, `2`, `3`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskPriority {
    /// Wire value `1`.
    Low,
    /// Wire value `2`.
    #[default]
    Medium,
    /// Wire value `3`.
    High,
}

impl TaskPriority {
    /// All priorities, lowest first.
    pub const ALL: [Self; 3] = [Self::Low, Self::Medium, Self::High];

    /// Returns the wire value.
    #[must_use]
    pub const fn value(self) -> i64 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }

    /// Maps a raw wire value to a priority. Unknown values yield
    /// [`TaskPriority::Medium`].
    #[must_use]
    pub const fn from_value(raw: i64) -> Self {
        match raw {
            1 => Self::Low,
            3 => Self::High,
            _ => Self::Medium,
        }
    }

    /// Returns `true` if `raw` names a priority exactly.
    #[must_use]
    pub const fn is_known(raw: i64) -> bool {
        matches!(raw, 1..=3)
    }

    /// Parses a user-facing name (`low`, `medium`, `high`), case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.to_string().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl Serialize for TaskPriority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.value())
    }
}

impl<'de> Deserialize<'de> for TaskPriority {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(raw.as_i64().map_or(Self::Medium, Self::from_value))
    }
}

/// Task category. Encoded on the wire as a lowercase tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TaskCategory {
    /// `work`
    Work,
    /// `personal`
    Personal,
    /// `shopping`
    Shopping,
    /// `health`
    Health,
    /// `study`
    Study,
    /// `home`
    Home,
    /// `other`, the fallback for unrecognized tags.
    #[default]
    Other,
}

impl TaskCategory {
    /// All categories in display order.
    pub const ALL: [Self; 7] = [
        Self::Work,
        Self::Personal,
        Self::Shopping,
        Self::Health,
        Self::Study,
        Self::Home,
        Self::Other,
    ];

    /// Returns the wire tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Personal => "personal",
            Self::Shopping => "shopping",
            Self::Health => "health",
            Self::Study => "study",
            Self::Home => "home",
            Self::Other => "other",
        }
    }

    /// Maps a raw wire tag to a category. Unknown tags yield
    /// [`TaskCategory::Other`].
    #[must_use]
    pub fn from_value(raw: &str) -> Self {
        Self::lookup(raw).unwrap_or_default()
    }

    /// Returns the category whose tag equals `raw`, if any.
    #[must_use]
    pub fn lookup(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskCategory {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(raw.as_str().map_or(Self::Other, Self::from_value))
    }
}

/// A task row.
///
/// Deserializing through serde normalizes silently. Use
/// [`crate::codec::decode_tasks`] at a trust boundary to also learn which
/// values were normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireTask")]
pub struct Task {
    /// Unique identifier.
    pub id: TaskId,
    /// Owning user; the cache partition key.
    pub owner_id: String,
    /// Non-empty title.
    pub title: String,
    /// Optional free text.
    pub description: Option<String>,
    /// Whether the task is done.
    pub completed: bool,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Priority, always normalized.
    pub priority: TaskPriority,
    /// Category, always normalized.
    pub category: TaskCategory,
    /// Optional due instant.
    pub due_date: Option<Timestamp>,
    /// `true` when this row matches the last known remote state.
    #[serde(skip_serializing)]
    pub synced: bool,
}

impl Task {
    /// Returns `true` if the task is not completed.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.completed
    }

    /// Case-insensitive substring match over title and description.
    ///
    /// A blank query matches every task.
    #[must_use]
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(&needle)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle))
    }

    /// Returns a copy flagged with the given sync state.
    #[must_use]
    pub fn with_synced(mut self, synced: bool) -> Self {
        self.synced = synced;
        self
    }
}

/// Raw row as received from the remote store.
///
/// Priority and category are kept as untyped JSON so that the decoder can
/// tell a normalized value from a well-formed one.
#[derive(Debug, Clone, Deserialize)]
pub struct WireTask {
    /// Identifier.
    pub id: TaskId,
    /// Owner.
    pub owner_id: String,
    /// Title.
    pub title: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Completion flag.
    #[serde(default)]
    pub completed: bool,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Raw priority.
    #[serde(default)]
    pub priority: serde_json::Value,
    /// Raw category.
    #[serde(default)]
    pub category: serde_json::Value,
    /// Due instant.
    #[serde(default)]
    pub due_date: Option<Timestamp>,
}

/// A value that was replaced by its default while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// Unrecognized priority, decoded as [`TaskPriority::Medium`].
    Priority {
        /// Task the value belonged to.
        task_id: TaskId,
        /// The raw JSON text.
        raw: String,
    },
    /// Unrecognized category, decoded as [`TaskCategory::Other`].
    Category {
        /// Task the value belonged to.
        task_id: TaskId,
        /// The raw JSON text.
        raw: String,
    },
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Priority { task_id, raw } => {
                write!(f, "task {task_id}: unknown priority {raw}, using medium")
            }
            Self::Category { task_id, raw } => {
                write!(f, "task {task_id}: unknown category {raw}, using other")
            }
        }
    }
}

impl WireTask {
    /// Converts into a normalized [`Task`] (flagged `synced`), pushing a
    /// [`Fallback`] for every value that had to be defaulted.
    ///
    /// Absent or `null` priority and category are the documented defaults
    /// and are not reported.
    pub fn normalize(self, fallbacks: &mut Vec<Fallback>) -> Task {
        let priority = match &self.priority {
            serde_json::Value::Null => TaskPriority::default(),
            serde_json::Value::Number(n) if n.as_i64().is_some_and(TaskPriority::is_known) => {
                n.as_i64().map_or_else(TaskPriority::default, TaskPriority::from_value)
            }
            other => {
                fallbacks.push(Fallback::Priority {
                    task_id: self.id.clone(),
                    raw: other.to_string(),
                });
                TaskPriority::default()
            }
        };
        let category = match &self.category {
            serde_json::Value::Null => TaskCategory::default(),
            serde_json::Value::String(s) if TaskCategory::lookup(s).is_some() => {
                TaskCategory::from_value(s)
            }
            other => {
                fallbacks.push(Fallback::Category {
                    task_id: self.id.clone(),
                    raw: other.to_string(),
                });
                TaskCategory::default()
            }
        };
        Task {
            id: self.id,
            owner_id: self.owner_id,
            title: self.title,
            description: self.description,
            completed: self.completed,
            created_at: self.created_at,
            priority,
            category,
            due_date: self.due_date,
            synced: true,
        }
    }
}

impl From<WireTask> for Task {
    fn from(wire: WireTask) -> Self {
        wire.normalize(&mut Vec::new())
    }
}

/// Fields the user supplies when creating a task.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewTask {
    /// Title; must be non-empty after trimming.
    pub title: String,
    /// Optional description.
    pub description: Option<String>,
    /// Priority.
    pub priority: TaskPriority,
    /// Category.
    pub category: TaskCategory,
    /// Optional due instant.
    pub due_date: Option<Timestamp>,
}

impl NewTask {
    /// Starts a new task with default priority and category.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the category.
    #[must_use]
    pub const fn with_category(mut self, category: TaskCategory) -> Self {
        self.category = category;
        self
    }

    /// Sets the due date.
    #[must_use]
    pub const fn with_due_date(mut self, due_date: Option<Timestamp>) -> Self {
        self.due_date = due_date;
        self
    }

    /// Builds the remote create body for `owner_id`.
    #[must_use]
    pub fn to_request(&self, owner_id: &str) -> TaskRequest {
        TaskRequest {
            id: None,
            owner_id: owner_id.to_string(),
            title: self.title.clone(),
            description: self.description.clone(),
            completed: false,
            priority: self.priority,
            category: self.category,
            due_date: self.due_date,
        }
    }

    /// Materializes an unsynced local row.
    #[must_use]
    pub fn into_local(self, owner_id: &str, id: TaskId, created_at: Timestamp) -> Task {
        Task {
            id,
            owner_id: owner_id.to_string(),
            title: self.title,
            description: self.description,
            completed: false,
            created_at,
            priority: self.priority,
            category: self.category,
            due_date: self.due_date,
            synced: false,
        }
    }
}

/// Body of `POST /tasks`.
///
/// A create that carries its own `id` is keyed: replaying it names the same
/// row instead of adding another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Client-chosen id; `None` lets the server assign one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,
    /// Owner.
    pub owner_id: String,
    /// Title.
    pub title: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Completion flag.
    #[serde(default)]
    pub completed: bool,
    /// Priority.
    #[serde(default)]
    pub priority: TaskPriority,
    /// Category.
    #[serde(default)]
    pub category: TaskCategory,
    /// Due instant.
    #[serde(default)]
    pub due_date: Option<Timestamp>,
}

/// Keyed by the task's own id.
impl From<&Task> for TaskRequest {
    fn from(task: &Task) -> Self {
        Self {
            id: Some(task.id.clone()),
            owner_id: task.owner_id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            completed: task.completed,
            priority: task.priority,
            category: task.category,
            due_date: task.due_date,
        }
    }
}

/// Partial update; only `Some` fields are sent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New completion flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    /// New priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    /// New category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<TaskCategory>,
    /// New due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Timestamp>,
}

impl TaskPatch {
    /// A patch that only sets `completed`.
    #[must_use]
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    /// Returns `true` if no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.completed.is_none()
            && self.priority.is_none()
            && self.category.is_none()
            && self.due_date.is_none()
    }

    /// Applies every set field to `task`.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            task.description = Some(description.clone());
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(category) = self.category {
            task.category = category;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = Some(due_date);
        }
    }
}
