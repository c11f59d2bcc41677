//! The signed-in user's credentials.
//!
//! The reconciler only needs to know whether a bearer token and an owner id
//! are available. [`SessionStore`] answers that, optionally backed by a JSON
//! file so that the CLI stays signed in between invocations.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use tasksync_proto::auth::AuthResponse;

/// Session file name within the data directory.
pub const SESSION_FILENAME: &str = "session.json";

/// Errors raised while persisting the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session file could not be read or written.
    #[error("session file {path}: {source}")]
    Io {
        /// File that was accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The session file is not valid JSON.
    #[error("session file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Credentials of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token for task requests.
    pub access_token: String,
    /// Owner id used to partition the cache.
    pub user_id: String,
    /// Email the user signed in with.
    #[serde(default)]
    pub email: String,
}

impl From<AuthResponse> for Session {
    fn from(resp: AuthResponse) -> Self {
        Self {
            access_token: resp.access_token,
            user_id: resp.user.id,
            email: resp.user.email,
        }
    }
}

/// Holds the current [`Session`], if any.
pub struct SessionStore {
    current: RwLock<Option<Session>>,
    path: Option<PathBuf>,
}

impl SessionStore {
    /// A store that forgets everything when dropped.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            current: RwLock::new(None),
            path: None,
        }
    }

    /// A store seeded with `session`, not persisted.
    #[must_use]
    pub fn with_session(session: Session) -> Self {
        Self {
            current: RwLock::new(Some(session)),
            path: None,
        }
    }

    /// Opens `{data_dir}/session.json`. A missing file means signed out.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the file exists but cannot be read or
    /// parsed.
    pub fn open(data_dir: &Path) -> Result<Self, SessionError> {
        let path = data_dir.join(SESSION_FILENAME);
        let current = match std::fs::read_to_string(&path) {
            Ok(contents) => Some(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => return Err(SessionError::Io { path, source }),
        };
        Ok(Self {
            current: RwLock::new(current),
            path: Some(path),
        })
    }

    /// Returns a copy of the current session.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.current.read().clone()
    }

    /// The bearer token, if signed in. An empty token counts as none.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.current
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
            .filter(|t| !t.is_empty())
    }

    /// The owner id, if signed in.
    #[must_use]
    pub fn owner_id(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.user_id.clone())
    }

    /// Replaces the current session and persists it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the session file cannot be written. The
    /// in-memory session is updated regardless.
    pub fn save(&self, session: Session) -> Result<(), SessionError> {
        let json = serde_json::to_string_pretty(&session)?;
        *self.current.write() = Some(session);
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| SessionError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            std::fs::write(path, json).map_err(|source| SessionError::Io {
                path: path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Forgets the current session and removes the file.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<(), SessionError> {
        *self.current.write() = None;
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(SessionError::Io {
                        path: path.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
