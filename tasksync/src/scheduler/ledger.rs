//! Durable record of the scheduler's next due run.
//!
//! Written before and after every run so that a process restart picks up
//! an overdue run immediately.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tasksync_proto::timestamp::Timestamp;

/// Ledger file name within the data directory.
pub const LEDGER_FILENAME: &str = "schedule.json";

/// Errors raised while reading or writing the ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The file could not be read or written.
    #[error("schedule ledger {path}: {source}")]
    Io {
        /// Ledger path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not a valid ledger.
    #[error("schedule ledger is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// How the last recorded run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The run succeeded.
    Success {
        /// When it finished.
        at: Timestamp,
    },
    /// The run failed.
    Failure {
        /// When it finished.
        at: Timestamp,
        /// Error message.
        error: String,
    },
}

/// Persisted scheduler state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Wall-clock time the next run is due. `None` means no run pending.
    #[serde(default)]
    pub next_run_at: Option<Timestamp>,
    /// Consecutive failed attempts.
    #[serde(default)]
    pub attempt: u32,
    /// Outcome of the last recorded run.
    #[serde(default)]
    pub last_outcome: Option<RunOutcome>,
}

/// Loads and stores [`LedgerEntry`] values.
#[derive(Debug, Clone, Default)]
pub struct ScheduleLedger {
    path: Option<PathBuf>,
}

impl ScheduleLedger {
    /// A ledger backed by `{data_dir}/schedule.json`.
    #[must_use]
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            path: Some(data_dir.join(LEDGER_FILENAME)),
        }
    }

    /// A ledger that persists nothing.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { path: None }
    }

    /// Reads the stored entry. A missing file yields the default entry.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the file exists but cannot be read or
    /// parsed.
    pub fn load(&self) -> Result<LedgerEntry, LedgerError> {
        let Some(path) = &self.path else {
            return Ok(LedgerEntry::default());
        };
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LedgerEntry::default()),
            Err(source) => Err(LedgerError::Io {
                path: path.clone(),
                source,
            }),
        }
    }

    /// Overwrites the stored entry.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the file cannot be written.
    pub fn store(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(entry)?;
        let io_err = |source| LedgerError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, json).map_err(io_err)
    }
}
