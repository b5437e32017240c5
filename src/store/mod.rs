//! Storage seam for clearance state.
//!
//! The engine talks to persistence through [`ClearanceStore`]: get/upsert
//! by (street, date) key, append-style round and work-log writes, and a
//! street-scoped change-feed subscription. Two implementations exist:
//! [`crate::db::Db`] over Postgres and [`memory::MemStore`] for tests and
//! local demos.

pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::feed::Subscription;
use crate::model::{
    ClockTime, RoundEntry, Roster, StatusKey, StatusRecord, StreetId, TimeWindow, UserId,
    WorkLogEntry,
};

/// Persistent store for status records, the round ledger, and work logs.
///
/// Concurrency model: upsert-by-primary-key makes concurrent writers
/// commute to last-write-wins on the full row; no locks are taken and no
/// transaction ever spans more than one street. Implementations must be
/// usable across task boundaries.
#[async_trait]
pub trait ClearanceStore: Send + Sync + 'static {
    /// Get the live record for a key, if one exists.
    async fn fetch_status(&self, key: StatusKey) -> Result<Option<StatusRecord>>;

    /// Write the live record and its current-round ledger mirror as one
    /// logical operation: both land or neither does. Publishes an
    /// upsert feed event on success.
    async fn upsert_current(&self, record: &StatusRecord, round: &RoundEntry) -> Result<()>;

    /// Remove the record and its round ledger (external retention hook;
    /// the engine itself never deletes). Publishes a delete feed event.
    async fn delete_status(&self, key: StatusKey) -> Result<()>;

    /// All ledger entries for a key, ascending by round number.
    async fn list_rounds(&self, key: StatusKey) -> Result<Vec<RoundEntry>>;

    /// Append one work-log entry. Idempotent on the entry id, so a
    /// retried write cannot double-bill.
    async fn insert_work_log(&self, entry: &WorkLogEntry) -> Result<()>;

    /// Server-side batch write: one work-log entry per user in one round
    /// trip. Returns the number of entries written. Errors with
    /// [`crate::error::Error::BatchLogUnavailable`] where the procedure
    /// is not deployed; callers then fall back to a single entry for the
    /// acting user.
    async fn log_work_batch(
        &self,
        street: StreetId,
        date: NaiveDate,
        window: TimeWindow,
        users: &Roster,
        notes: Option<&str>,
    ) -> Result<u64>;

    /// Delete all work-log entries for a (street, date) pair. Returns
    /// how many were removed.
    async fn delete_work_logs(&self, street: StreetId, date: NaiveDate) -> Result<u64>;

    /// A user's work-log entries for one day, ascending by start time.
    async fn list_work_logs_for_user(&self, user: UserId, date: NaiveDate)
    -> Result<Vec<WorkLogEntry>>;

    /// The user's most recent known "work ended" clock time on the date:
    /// the max of their latest work-log end and the latest finished_at
    /// of any status row whose roster includes them. Feeds the smart
    /// continuation heuristic.
    async fn last_work_end(&self, user: UserId, date: NaiveDate) -> Result<Option<ClockTime>>;

    /// Subscribe to change events for one street (all dates; consumers
    /// filter by displayed date).
    async fn subscribe(&self, street: StreetId) -> Result<Subscription>;
}
