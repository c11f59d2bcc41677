//! Read-only projections of the cached task list.
//!
//! [`project`] and [`TaskStats::from_tasks`] are pure. [`ViewProjector`]
//! re-runs them whenever the cache publishes a snapshot or the query
//! changes, and publishes the result on a `watch` channel.

use std::cmp::Ordering;
use std::fmt;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use tasksync_proto::task::Task;

/// Which tasks to show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskFilter {
    /// Every task.
    #[default]
    All,
    /// Tasks not yet completed.
    Active,
    /// Completed tasks.
    Completed,
}

impl TaskFilter {
    /// Whether `task` passes the filter.
    #[must_use]
    pub const fn matches(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Active => !task.completed,
            Self::Completed => task.completed,
        }
    }

    /// Parses `all`, `active`, or `completed`, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "active" => Some(Self::Active),
            "completed" | "done" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Display order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOption {
    /// Newest first.
    #[default]
    DateCreated,
    /// Title A to Z.
    TitleAsc,
    /// Title Z to A.
    TitleDesc,
    /// High priority first.
    PriorityHigh,
    /// Low priority first.
    PriorityLow,
}

impl SortOption {
    /// Parses a sort name. Unknown names fall back to
    /// [`SortOption::DateCreated`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let normalized: String = name
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "titleasc" | "title" => Self::TitleAsc,
            "titledesc" => Self::TitleDesc,
            "priorityhigh" | "priority" => Self::PriorityHigh,
            "prioritylow" => Self::PriorityLow,
            _ => Self::DateCreated,
        }
    }

    fn compare(self, a: &Task, b: &Task) -> Ordering {
        let newest_first = || {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        };
        match self {
            Self::DateCreated => newest_first(),
            Self::TitleAsc => title_key(a).cmp(&title_key(b)).then_with(newest_first),
            Self::TitleDesc => title_key(b).cmp(&title_key(a)).then_with(newest_first),
            Self::PriorityHigh => b.priority.cmp(&a.priority).then_with(newest_first),
            Self::PriorityLow => a.priority.cmp(&b.priority).then_with(newest_first),
        }
    }
}

impl fmt::Display for SortOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DateCreated => write!(f, "date-created"),
            Self::TitleAsc => write!(f, "title-asc"),
            Self::TitleDesc => write!(f, "title-desc"),
            Self::PriorityHigh => write!(f, "priority-high"),
            Self::PriorityLow => write!(f, "priority-low"),
        }
    }
}

fn title_key(task: &Task) -> String {
    task.title.to_lowercase()
}

/// Everything that shapes the visible list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    /// Completion filter.
    pub filter: TaskFilter,
    /// Substring search; blank matches everything.
    pub search: String,
    /// Display order.
    pub sort: SortOption,
}

/// Aggregate counts over the owner's full task list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// All tasks.
    pub total: usize,
    /// Not completed.
    pub active: usize,
    /// Completed.
    pub completed: usize,
    /// Not yet confirmed by the remote.
    pub unsynced: usize,
}

impl TaskStats {
    /// Counts `tasks`.
    #[must_use]
    pub fn from_tasks(tasks: &[Task]) -> Self {
        tasks.iter().fold(Self::default(), |mut stats, task| {
            stats.total += 1;
            if task.completed {
                stats.completed += 1;
            } else {
                stats.active += 1;
            }
            if !task.synced {
                stats.unsynced += 1;
            }
            stats
        })
    }
}

/// Filters, searches, and sorts `tasks`.
#[must_use]
pub fn project(tasks: &[Task], query: &TaskQuery) -> Vec<Task> {
    let mut visible: Vec<Task> = tasks
        .iter()
        .filter(|t| query.filter.matches(t) && t.matches_query(&query.search))
        .cloned()
        .collect();
    visible.sort_by(|a, b| query.sort.compare(a, b));
    visible
}

/// One rendered view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    /// Visible tasks in display order.
    pub tasks: Vec<Task>,
    /// Counts over all tasks, ignoring filter and search.
    pub stats: TaskStats,
    /// Active filter.
    pub filter: TaskFilter,
}

impl ViewState {
    /// Computes the view of `tasks` under `query`.
    #[must_use]
    pub fn compute(tasks: &[Task], query: &TaskQuery) -> Self {
        Self {
            tasks: project(tasks, query),
            stats: TaskStats::from_tasks(tasks),
            filter: query.filter,
        }
    }
}

/// Keeps a [`ViewState`] current for one owner's live task list.
///
/// Dropping the projector stops its background task.
pub struct ViewProjector {
    query: watch::Sender<TaskQuery>,
    state: watch::Receiver<ViewState>,
    task: JoinHandle<()>,
}

impl ViewProjector {
    /// Starts projecting `source`, typically from
    /// [`crate::cache::LocalCache::observe`].
    #[must_use]
    pub fn spawn(mut source: watch::Receiver<Vec<Task>>) -> Self {
        let (query_tx, mut query_rx) = watch::channel(TaskQuery::default());
        let initial = ViewState::compute(&source.borrow_and_update(), &query_rx.borrow());
        let (state_tx, state_rx) = watch::channel(initial);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = source.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    changed = query_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let view = {
                    let tasks = source.borrow_and_update();
                    let query = query_rx.borrow_and_update();
                    ViewState::compute(&tasks, &query)
                };
                if state_tx.send(view).is_err() {
                    break;
                }
            }
            tracing::debug!("view projector finished");
        });

        Self {
            query: query_tx,
            state: state_rx,
            task,
        }
    }

    /// Subscribes to rendered views.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ViewState> {
        self.state.clone()
    }

    /// The latest view.
    #[must_use]
    pub fn current(&self) -> ViewState {
        self.state.borrow().clone()
    }

    /// Sets the completion filter.
    pub fn set_filter(&self, filter: TaskFilter) {
        self.query.send_if_modified(|q| replace_if_changed(&mut q.filter, filter));
    }

    /// Sets the search text.
    pub fn set_search(&self, search: impl Into<String>) {
        let search = search.into();
        self.query.send_if_modified(|q| replace_if_changed(&mut q.search, search));
    }

    /// Sets the display order.
    pub fn set_sort(&self, sort: SortOption) {
        self.query.send_if_modified(|q| replace_if_changed(&mut q.sort, sort));
    }

    /// The query currently applied.
    #[must_use]
    pub fn query(&self) -> TaskQuery {
        self.query.borrow().clone()
    }
}

impl Drop for ViewProjector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}
