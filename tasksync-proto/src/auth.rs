//! Password-grant authentication payloads.

use serde::{Deserialize, Serialize};

/// Body of `POST /signup` and `POST /token?grant_type=password`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Account email.
    pub email: String,
    /// Plaintext password; only ever sent over the wire.
    pub password: String,
}

/// An authenticated account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Account id; doubles as the task owner id.
    pub id: String,
    /// Account email.
    #[serde(default)]
    pub email: String,
}

/// Response to a successful sign-up or sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Bearer token for task requests.
    #[serde(alias = "accessToken")]
    pub access_token: String,
    /// The signed-in user.
    pub user: User,
}
