//! Error types for plowtrack.
//!
//! Permission and transition errors are surfaced to the caller and never
//! retried. Transient store I/O is retried with bounded backoff inside the
//! Postgres store; exhausting the retries surfaces `FetchFailed` or
//! `WriteFailed` with the last underlying error attached.

use thiserror::Error;

use crate::model::{Status, StreetId, UserId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("user {user} may not {action}: role is read-only")]
    PermissionDenied { user: UserId, action: &'static str },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("fetch failed after {attempts} attempts: {op}")]
    FetchFailed {
        op: &'static str,
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("write failed after {attempts} attempts: {op}")]
    WriteFailed {
        op: &'static str,
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    /// The server-side batch work-log procedure is not deployed. Callers
    /// fall back to a single entry for the acting user.
    #[error("batch work-log procedure unavailable")]
    BatchLogUnavailable,

    /// One or more entities of a batch failed; successes are not undone.
    #[error("batch partially failed: {} succeeded, {} failed", succeeded.len(), failed.len())]
    PartialBatch {
        succeeded: Vec<StreetId>,
        failed: Vec<StreetId>,
    },

    #[error("unknown status: {0}")]
    UnknownStatus(String),

    #[error("invalid clock time (expected HH:MM): {0}")]
    InvalidClockTime(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
