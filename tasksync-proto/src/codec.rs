//! JSON decoding for the REST wire format.
//!
//! [`decode_tasks`] is the trust boundary for rows coming from the remote
//! store: it normalizes priority and category and reports every fallback
//! so the caller can log it.

use serde::de::DeserializeOwned;

use crate::task::{Fallback, Task, WireTask};

/// Error type for codec decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload is not valid JSON for the expected shape.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Rows decoded from a response, with the fallbacks applied to them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedTasks {
    /// Normalized rows, all flagged `synced`.
    pub tasks: Vec<Task>,
    /// Values that were replaced by their default.
    pub fallbacks: Vec<Fallback>,
}

/// Decodes a JSON payload into `T`.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if the bytes do not describe a `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Decodes a JSON array of task rows.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if the payload is not an array of rows,
/// or a row is missing a required field or carries an unparseable
/// timestamp. Unknown priority and category values are not errors.
pub fn decode_tasks(bytes: &[u8]) -> Result<DecodedTasks, CodecError> {
    let rows: Vec<WireTask> = decode(bytes)?;
    let mut fallbacks = Vec::new();
    let tasks = rows
        .into_iter()
        .map(|row| row.normalize(&mut fallbacks))
        .collect();
    Ok(DecodedTasks { tasks, fallbacks })
}
