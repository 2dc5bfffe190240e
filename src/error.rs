//! Error types for talking to the backend.

use thiserror::Error;

/// Errors raised while fetching or receiving telemetry.
///
/// None of these are fatal to a session: a failed poll keeps the last-known
/// state, and a dropped push connection is retried with backoff.
#[derive(Debug, Error)]
pub enum SyncError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The backend answered with a non-success status.
    #[error("Backend returned status {status} for {url}")]
    Status { status: u16, url: String },

    /// Failed to parse a response body or push message.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Timeout waiting for response.
    #[error("Request timed out")]
    Timeout,

    /// Local I/O failed (file source).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session or stream has shut down.
    #[error("Session closed")]
    Closed,

    /// The backend rejected an algorithm change.
    #[error("Algorithm change rejected: {0}")]
    Rejected(String),

    /// An algorithm name outside the known catalogue.
    #[error(transparent)]
    InvalidAlgorithm(#[from] fleetwatch_types::UnknownAlgorithm),
}

impl SyncError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Http(_)
                | SyncError::Status { .. }
                | SyncError::Connection(_)
                | SyncError::Timeout
                | SyncError::Io(_)
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout
        } else if err.is_connect() {
            SyncError::Connection(err.to_string())
        } else if err.is_decode() {
            SyncError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::Status {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            SyncError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}
