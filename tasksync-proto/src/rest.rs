//! Paths, headers, and filter syntax of the remote REST contract.
//!
//! Task endpoints live under the REST base (`<base>/rest/v1`), auth
//! endpoints under the auth base (`<base>/auth/v1`). Row filters use the
//! `column=eq.<value>` query convention.

/// Task collection path, relative to the REST base.
pub const TASKS_PATH: &str = "tasks";

/// Sign-up path, relative to the auth base.
pub const SIGNUP_PATH: &str = "signup";

/// Token path, relative to the auth base.
pub const TOKEN_PATH: &str = "token";

/// Sign-out path, relative to the auth base.
pub const LOGOUT_PATH: &str = "logout";

/// `grant_type` query value for email/password sign-in.
pub const GRANT_TYPE_PASSWORD: &str = "password";

/// Header carrying the fixed project API key on every request.
pub const API_KEY_HEADER: &str = "apikey";

/// Header asking the server to echo written rows.
pub const PREFER_HEADER: &str = "Prefer";

/// Value of [`PREFER_HEADER`] for create and update.
pub const RETURN_REPRESENTATION: &str = "return=representation";

/// [`PREFER_HEADER`] directive that turns a create whose id already exists
/// into an update of that row.
pub const MERGE_DUPLICATES: &str = "resolution=merge-duplicates";

/// Query column used to select an owner's rows.
pub const OWNER_COLUMN: &str = "owner_id";

/// Query column used to select a single row.
pub const ID_COLUMN: &str = "id";

/// Builds an equality filter value, e.g. `eq.u1`.
#[must_use]
pub fn eq_filter(value: &str) -> String {
    format!("eq.{value}")
}

/// Extracts the operand of an equality filter.
///
/// Returns `None` for other operators or an empty operand.
#[must_use]
pub fn parse_eq_filter(filter: &str) -> Option<&str> {
    filter.strip_prefix("eq.").filter(|v| !v.is_empty())
}

/// Error body returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub message: String,
}

/// Pulls a human-readable message out of an error response body.
///
/// Looks at the `message`, `msg`, `error_description`, and `error` keys in
/// that order, falling back to the trimmed raw text. Returns `None` for an
/// empty body.
#[must_use]
pub fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(trimmed)
        && let Some(msg) = ["message", "msg", "error_description", "error"]
            .iter()
            .find_map(|key| map.get(*key).and_then(serde_json::Value::as_str))
    {
        return Some(msg.to_string());
    }
    Some(trimmed.to_string())
}
