//! Database connection pool, migrations, and retrying store calls.
//!
//! `Db` wraps the shared Postgres pool and implements [`ClearanceStore`]
//! on top of it. Every store call runs under a per-operation timeout and
//! a bounded retry loop with linear backoff; only transient connection
//! errors are retried. Exhausted reads surface as [`Error::FetchFailed`],
//! exhausted writes as [`Error::WriteFailed`], each carrying the last
//! underlying error.

pub mod feed;
pub mod status;
pub mod worklog;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use opentelemetry::KeyValue;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::feed::Subscription;
use crate::model::{
    ClockTime, RoundEntry, Roster, StatusKey, StatusRecord, StreetId, TimeWindow, UserId,
    WorkLogEntry,
};
use crate::store::ClearanceStore;
use crate::telemetry::metrics;

/// Retry posture for store calls.
///
/// `attempts` counts total tries, not re-tries. Backoff is linear:
/// the n-th wait is `backoff * n`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    pub op_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(400),
            op_timeout: Duration::from_secs(3),
        }
    }
}

/// Whether a statement failure is worth another attempt. Constraint
/// violations, decode errors and the like are deterministic, so only
/// connection-level failures qualify.
fn transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_)
    )
}

enum OpKind {
    Read,
    Write,
}

/// Database handle. Owns the connection pool shared across all modules.
pub struct Db {
    pool: PgPool,
    retry: RetryPolicy,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self {
            pool,
            retry: RetryPolicy::default(),
        })
    }

    /// Override the default retry posture.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        debug!("database health check passed");
        Ok(())
    }

    /// Get a reference to the connection pool (for submodules).
    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) async fn read_op<T, F, Fut>(&self, op: &'static str, make: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = sqlx::Result<T>>,
    {
        self.run_op(op, OpKind::Read, make).await
    }

    pub(crate) async fn write_op<T, F, Fut>(&self, op: &'static str, make: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = sqlx::Result<T>>,
    {
        self.run_op(op, OpKind::Write, make).await
    }

    /// Drive one store call to completion under the retry policy.
    /// `make` builds a fresh future per attempt.
    async fn run_op<T, F, Fut>(&self, op: &'static str, kind: OpKind, make: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = sqlx::Result<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let err = match tokio::time::timeout(self.retry.op_timeout, make()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if transient(&e) => e,
                Ok(Err(e)) => return Err(Error::Storage(e)),
                Err(_) => sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "statement timed out",
                )),
            };

            if attempt >= self.retry.attempts {
                warn!(op, attempt, error = %err, "store operation failed, giving up");
                return Err(match kind {
                    OpKind::Read => Error::FetchFailed {
                        op,
                        attempts: attempt,
                        source: err,
                    },
                    OpKind::Write => Error::WriteFailed {
                        op,
                        attempts: attempt,
                        source: err,
                    },
                });
            }

            let delay = self.retry.backoff * attempt;
            warn!(
                op,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient store error, retrying"
            );
            metrics::store_retries().add(1, &[KeyValue::new("op", op)]);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl ClearanceStore for Db {
    async fn fetch_status(&self, key: StatusKey) -> Result<Option<StatusRecord>> {
        self.get_status(key).await
    }

    async fn upsert_current(&self, record: &StatusRecord, round: &RoundEntry) -> Result<()> {
        self.save_current(record, round).await
    }

    async fn delete_status(&self, key: StatusKey) -> Result<()> {
        self.purge_status(key).await
    }

    async fn list_rounds(&self, key: StatusKey) -> Result<Vec<RoundEntry>> {
        self.rounds_for(key).await
    }

    async fn insert_work_log(&self, entry: &WorkLogEntry) -> Result<()> {
        self.add_work_log(entry).await
    }

    async fn log_work_batch(
        &self,
        street: StreetId,
        date: NaiveDate,
        window: TimeWindow,
        roster: &Roster,
        notes: Option<&str>,
    ) -> Result<u64> {
        self.call_log_batch(street, date, window, roster, notes)
            .await
    }

    async fn delete_work_logs(&self, street: StreetId, date: NaiveDate) -> Result<u64> {
        self.remove_work_logs(street, date).await
    }

    async fn list_work_logs_for_user(
        &self,
        user: UserId,
        date: NaiveDate,
    ) -> Result<Vec<WorkLogEntry>> {
        self.work_logs_for_user(user, date).await
    }

    async fn last_work_end(&self, user: UserId, date: NaiveDate) -> Result<Option<ClockTime>> {
        self.latest_work_end(user, date).await
    }

    async fn subscribe(&self, street: StreetId) -> Result<Subscription> {
        self.subscribe_street(street).await
    }
}
