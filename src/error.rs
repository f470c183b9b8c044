use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures raised by a page session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("page did not answer within {0:?}")]
    Timeout(Duration),

    #[error("session transport error: {0}")]
    Transport(String),

    #[error("session API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("capture error: {0}")]
    Capture(String),
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SessionError::Transport(format!("timed out: {}", err))
        } else {
            SessionError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is not a valid state file: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

/// Errors that abort a whole cycle. Per-target failures never show up here.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("target list unavailable: {0}")]
    SourceList(String),

    #[error(transparent)]
    Persistence(#[from] StoreError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("job {name} failed after {attempts} attempt(s): {reason}")]
    Exhausted {
        name: String,
        attempts: u32,
        reason: String,
    },

    #[error("queue dropped job {0} before it finished")]
    Dropped(String),
}
