//! Configuration system for the `tasksync` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/tasksync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use tasksync_proto::task::{TaskCategory, TaskPriority};
use tasksync_proto::timestamp::Timestamp;

use crate::remote::{RemoteEndpoints, RemoteError};
use crate::remote::http::{DEFAULT_TIMEOUT, parse_base};
use crate::scheduler::{BackoffPolicy, SchedulerConfig};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// No remote endpoint was configured.
    #[error("no remote configured (set --base-url, TASKSYNC_URL, or [remote] base_url)")]
    MissingRemote,

    /// A configured URL is invalid.
    #[error("invalid remote URL: {0}")]
    InvalidUrl(#[from] RemoteError),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    remote: RemoteFileConfig,
    sync: SyncFileConfig,
    storage: StorageFileConfig,
}

/// `[remote]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RemoteFileConfig {
    base_url: Option<String>,
    auth_url: Option<String>,
    rest_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    interval_mins: Option<u64>,
    manual: Option<bool>,
    require_network: Option<bool>,
    require_battery_not_low: Option<bool>,
    backoff_base_secs: Option<u64>,
    backoff_multiplier: Option<f64>,
    backoff_max_secs: Option<u64>,
    constraint_poll_secs: Option<u64>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    data_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Remote --
    /// Project URL; `auth/v1` and `rest/v1` are derived from it.
    pub base_url: Option<String>,
    /// Explicit auth base, overriding the derived one.
    pub auth_url: Option<String>,
    /// Explicit REST base, overriding the derived one.
    pub rest_url: Option<String>,
    /// Value of the `apikey` header.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,

    // -- Sync --
    /// Background scheduler settings.
    pub scheduler: SchedulerConfig,

    // -- Storage --
    /// Directory holding the cache database, session, and schedule ledger.
    pub data_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            auth_url: None,
            rest_url: None,
            api_key: String::new(),
            timeout: DEFAULT_TIMEOUT,
            scheduler: SchedulerConfig::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. If no `--config` is given, the default path
    /// (`~/.config/tasksync/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. This is separated from `load()` to
    /// enable unit testing without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let backoff_defaults = defaults.scheduler.backoff;
        let sync = &file.sync;
        let backoff_base = at_least(
            "backoff_base_secs",
            sync.backoff_base_secs
                .map_or(backoff_defaults.base, Duration::from_secs),
            MIN_RETRY_DELAY,
        );

        Self {
            base_url: cli
                .base_url
                .clone()
                .or_else(|| file.remote.base_url.clone()),
            auth_url: file.remote.auth_url.clone(),
            rest_url: file.remote.rest_url.clone(),
            api_key: cli
                .api_key
                .clone()
                .or_else(|| file.remote.api_key.clone())
                .unwrap_or(defaults.api_key),
            timeout: file
                .remote
                .timeout_secs
                .map_or(defaults.timeout, Duration::from_secs),
            scheduler: SchedulerConfig {
                interval: at_least(
                    "interval_mins",
                    cli.interval_mins
                        .or(sync.interval_mins)
                        .map_or(defaults.scheduler.interval, |m| {
                            Duration::from_secs(m.saturating_mul(60))
                        }),
                    MIN_INTERVAL,
                ),
                manual: cli.manual || sync.manual.unwrap_or(defaults.scheduler.manual),
                require_network: sync
                    .require_network
                    .unwrap_or(defaults.scheduler.require_network),
                require_battery_not_low: sync
                    .require_battery_not_low
                    .unwrap_or(defaults.scheduler.require_battery_not_low),
                backoff: BackoffPolicy {
                    base: backoff_base,
                    multiplier: sync
                        .backoff_multiplier
                        .unwrap_or(backoff_defaults.multiplier),
                    max: at_least(
                        "backoff_max_secs",
                        sync.backoff_max_secs
                            .map_or(backoff_defaults.max, Duration::from_secs),
                        backoff_base,
                    ),
                },
                constraint_poll: at_least(
                    "constraint_poll_secs",
                    sync.constraint_poll_secs
                        .map_or(defaults.scheduler.constraint_poll, Duration::from_secs),
                    MIN_RETRY_DELAY,
                ),
            },
            data_dir: cli
                .data_dir
                .clone()
                .or_else(|| file.storage.data_dir.clone())
                .unwrap_or(defaults.data_dir),
        }
    }

    /// Build the [`RemoteEndpoints`] for this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRemote`] if neither a base URL nor both
    /// explicit service URLs are set, or [`ConfigError::InvalidUrl`] if a
    /// URL does not parse.
    pub fn remote_endpoints(&self) -> Result<RemoteEndpoints, ConfigError> {
        let mut endpoints = match (&self.base_url, &self.auth_url, &self.rest_url) {
            (Some(base), _, _) => RemoteEndpoints::from_base(base, self.api_key.clone())?,
            (None, Some(auth), Some(rest)) => RemoteEndpoints {
                auth_url: parse_base(auth)?,
                rest_url: parse_base(rest)?,
                api_key: self.api_key.clone(),
                timeout: self.timeout,
            },
            _ => return Err(ConfigError::MissingRemote),
        };
        if let Some(auth) = &self.auth_url {
            endpoints.auth_url = parse_base(auth)?;
        }
        if let Some(rest) = &self.rest_url {
            endpoints.rest_url = parse_base(rest)?;
        }
        endpoints.timeout = self.timeout;
        Ok(endpoints)
    }
}

/// Shortest accepted time between scheduled runs.
pub const MIN_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest accepted backoff base and gate re-check period.
pub const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Raises `value` to `floor`, logging the clamp.
fn at_least(key: &str, value: Duration, floor: Duration) -> Duration {
    if value >= floor {
        return value;
    }
    tracing::warn!(key, configured = ?value, minimum = ?floor, "config value below minimum, clamped");
    floor
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Offline-first task list with background sync")]
pub struct CliArgs {
    /// Project URL of the remote store.
    #[arg(long, global = true, env = "TASKSYNC_URL")]
    pub base_url: Option<String>,

    /// API key sent with every request.
    #[arg(long, global = true, env = "TASKSYNC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Directory for the cache database and session.
    #[arg(long, global = true, env = "TASKSYNC_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Path to config file (default: `~/.config/tasksync/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Minutes between background syncs.
    #[arg(long, global = true)]
    pub interval_mins: Option<u64>,

    /// Only sync on demand.
    #[arg(long, global = true)]
    pub manual: bool,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info", env = "TASKSYNC_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/tasksync.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// What to do.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands of the `tasksync` binary.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create an account and sign in.
    Signup(Credentials),
    /// Sign in with email and password.
    Login(Credentials),
    /// Sign out and forget the session.
    Logout,
    /// Replace the local list with the remote one.
    Pull,
    /// Push offline changes, then pull.
    Sync,
    /// Add a task.
    Add {
        /// Task title.
        title: String,
        /// Longer description.
        #[arg(short, long)]
        description: Option<String>,
        /// low, medium, or high.
        #[arg(short, long, value_parser = parse_priority)]
        priority: Option<TaskPriority>,
        /// work, personal, shopping, health, study, home, or other.
        #[arg(long, value_parser = parse_category)]
        category: Option<TaskCategory>,
        /// Due date (`YYYY-MM-DD` or RFC 3339).
        #[arg(long, value_parser = parse_due)]
        due: Option<Timestamp>,
    },
    /// Change fields of a task.
    Edit {
        /// Task id.
        id: String,
        /// New title.
        #[arg(short, long)]
        title: Option<String>,
        /// New description.
        #[arg(short, long)]
        description: Option<String>,
        /// New priority.
        #[arg(short, long, value_parser = parse_priority)]
        priority: Option<TaskPriority>,
        /// New category.
        #[arg(long, value_parser = parse_category)]
        category: Option<TaskCategory>,
        /// New due date.
        #[arg(long, value_parser = parse_due)]
        due: Option<Timestamp>,
    },
    /// Flip a task between active and completed.
    Toggle {
        /// Task id.
        id: String,
    },
    /// Delete a task.
    Rm {
        /// Task id.
        id: String,
    },
    /// Delete every completed task.
    ClearCompleted,
    /// List cached tasks.
    Ls {
        /// all, active, or completed.
        #[arg(short, long, default_value = "all")]
        filter: String,
        /// Case-insensitive text to look for.
        #[arg(short, long, default_value = "")]
        search: String,
        /// date-created, title-asc, title-desc, priority-high, or priority-low.
        #[arg(long, default_value = "date-created")]
        sort: String,
    },
    /// Show task counts.
    Stats,
    /// Run the background scheduler until interrupted.
    Watch,
}

/// Email and password for sign-up and sign-in.
#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account email.
    pub email: String,
    /// Account password.
    #[arg(long, env = "TASKSYNC_PASSWORD", hide_env_values = true)]
    pub password: String,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn parse_priority(raw: &str) -> Result<TaskPriority, String> {
    TaskPriority::from_name(raw).ok_or_else(|| format!("unknown priority {raw:?}"))
}

fn parse_category(raw: &str) -> Result<TaskCategory, String> {
    TaskCategory::lookup(&raw.trim().to_ascii_lowercase())
        .ok_or_else(|| format!("unknown category {raw:?}"))
}

fn parse_due(raw: &str) -> Result<Timestamp, String> {
    let trimmed = raw.trim();
    let expanded = if trimmed.len() == 10 {
        format!("{trimmed}T00:00:00")
    } else {
        trimmed.to_string()
    };
    Timestamp::parse(&expanded).map_err(|e| e.to_string())
}

/// `~/.local/share/tasksync` or platform equivalent, else `./.tasksync`.
fn default_data_dir() -> PathBuf {
    dirs::data_dir().map_or_else(|| PathBuf::from(".tasksync"), |d| d.join("tasksync"))
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("tasksync").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
