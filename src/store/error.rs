use std::time::Duration;

use thiserror::Error;

/// Errors from the analytical store client.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("statement rejected by the store: {0}")]
    Statement(String),

    #[error("unexpected response from the store: {0}")]
    Protocol(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Map a reqwest transport error onto the store taxonomy.
    pub fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            StoreError::Timeout(timeout)
        } else {
            StoreError::Connection(err.to_string())
        }
    }
}

/// Whether an error message names a permanent condition.
///
/// ClickHouse reports statement errors over HTTP 500, so status alone cannot
/// separate a syntax error from a genuinely transient server failure; the
/// message text has to be consulted.
pub fn is_permanent_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("syntax error")
        || lower.contains("unknown identifier")
        || lower.contains("unknown table")
        || lower.contains("unknown database")
        || lower.contains("unknown function")
        || lower.contains("authentication failed")
        || lower.contains("access_denied")
        || lower.contains("access denied")
        || lower.contains("not enough privileges")
        || lower.contains("cannot parse")
}

/// Whether an error message describes a condition worth retrying.
///
/// Syntax errors, unknown identifiers, and access failures are permanent;
/// connection drops, timeouts, and overload conditions are not.
pub fn is_transient_message(message: &str) -> bool {
    if is_permanent_message(message) {
        return false;
    }

    let lower = message.to_lowercase();
    lower.contains("connection")
        || lower.contains("connect")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("broken pipe")
        || lower.contains("reset by peer")
        || lower.contains("too many simultaneous queries")
        || lower.contains("memory limit")
        || lower.contains("service unavailable")
        || lower.contains("bad gateway")
        || lower.contains("gateway timeout")
        || lower.contains("temporarily unavailable")
        || lower.contains("overloaded")
}
