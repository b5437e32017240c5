//! Work-log operations: billing entries derived from completed rounds.
//!
//! The preferred write path is the `log_work_batch` server-side function,
//! which fans one time window out to every rostered user in a single
//! statement. Databases without the function surface
//! [`Error::BatchLogUnavailable`] and callers fall back to plain inserts.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{ClockTime, Roster, StreetId, TimeWindow, UserId, WorkLogEntry};

impl super::Db {
    /// Insert one work-log entry. Retrying the same entry is a no-op
    /// because the id is client-generated.
    pub(crate) async fn add_work_log(&self, entry: &WorkLogEntry) -> Result<()> {
        self.write_op("insert_work_log", || {
            let pool = self.pool().clone();
            let entry = entry.clone();
            async move {
                sqlx::query(
                    "INSERT INTO work_logs (id, user_id, street_id, work_date, start_time, end_time, notes, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     ON CONFLICT (id) DO NOTHING",
                )
                .bind(entry.id)
                .bind(entry.user_id.0)
                .bind(entry.street_id.map(|s| s.0))
                .bind(entry.date)
                .bind(entry.start_time.to_naive())
                .bind(entry.end_time.to_naive())
                .bind(&entry.notes)
                .bind(entry.created_at)
                .execute(&pool)
                .await?;
                Ok(())
            }
        })
        .await
    }

    /// Write one entry per rostered user through the `log_work_batch`
    /// server function. Returns the number of rows written. Row ids are
    /// client-generated, so a retried call cannot write a row twice.
    pub(crate) async fn call_log_batch(
        &self,
        street: StreetId,
        date: NaiveDate,
        window: TimeWindow,
        roster: &Roster,
        notes: Option<&str>,
    ) -> Result<u64> {
        let users: Vec<Uuid> = roster.iter().map(|u| u.0).collect();
        // Minted once, outside the retry loop: a retried statement must
        // replay the same rows, not insert fresh ones.
        let ids: Vec<Uuid> = users.iter().map(|_| Uuid::new_v4()).collect();

        let result = self
            .write_op("log_work_batch", || {
                let pool = self.pool().clone();
                let ids = ids.clone();
                let users = users.clone();
                let notes = notes.map(str::to_string);
                async move {
                    let count: i32 =
                        sqlx::query_scalar("SELECT log_work_batch($1, $2, $3, $4, $5, $6, $7)")
                            .bind(street.0)
                            .bind(date)
                            .bind(window.start.to_naive())
                            .bind(window.end.to_naive())
                            .bind(&ids)
                            .bind(&users)
                            .bind(notes)
                            .fetch_one(&pool)
                            .await?;
                    Ok(count)
                }
            })
            .await;

        match result {
            Ok(count) => Ok(count as u64),
            // 42883: undefined function. The migration that creates it is
            // optional, so report it as a capability gap, not a failure.
            Err(Error::Storage(sqlx::Error::Database(ref db)))
                if db.code().as_deref() == Some("42883") =>
            {
                Err(Error::BatchLogUnavailable)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete every work-log entry for one street/day. Returns the number
    /// of rows removed.
    pub(crate) async fn remove_work_logs(&self, street: StreetId, date: NaiveDate) -> Result<u64> {
        self.write_op("delete_work_logs", || {
            let pool = self.pool().clone();
            async move {
                let done = sqlx::query(
                    "DELETE FROM work_logs WHERE street_id = $1 AND work_date = $2",
                )
                .bind(street.0)
                .bind(date)
                .execute(&pool)
                .await?;
                Ok(done.rows_affected())
            }
        })
        .await
    }

    /// All of one user's entries for a day, ascending by start time.
    pub(crate) async fn work_logs_for_user(
        &self,
        user: UserId,
        date: NaiveDate,
    ) -> Result<Vec<WorkLogEntry>> {
        let rows: Vec<WorkLogRow> = self
            .read_op("list_work_logs", || {
                let pool = self.pool().clone();
                async move {
                    sqlx::query_as(
                        "SELECT id, user_id, street_id, work_date, start_time, end_time, notes, created_at
                         FROM work_logs
                         WHERE user_id = $1 AND work_date = $2
                         ORDER BY start_time ASC",
                    )
                    .bind(user.0)
                    .bind(date)
                    .fetch_all(&pool)
                    .await
                }
            })
            .await?;

        Ok(rows.into_iter().map(WorkLogRow::into_entry).collect())
    }

    /// The user's latest end-of-work signal on a day, from their work
    /// logs and from finish timestamps of rounds they were rostered on.
    pub(crate) async fn latest_work_end(
        &self,
        user: UserId,
        date: NaiveDate,
    ) -> Result<Option<ClockTime>> {
        let (log_end, status_end) = self
            .read_op("last_work_end", || {
                let pool = self.pool().clone();
                async move {
                    let log_end: Option<NaiveTime> = sqlx::query_scalar(
                        "SELECT max(end_time) FROM work_logs WHERE user_id = $1 AND work_date = $2",
                    )
                    .bind(user.0)
                    .bind(date)
                    .fetch_one(&pool)
                    .await?;

                    let status_end: Option<NaiveDateTime> = sqlx::query_scalar(
                        "SELECT max(finished_at) FROM street_status
                         WHERE service_date = $1 AND $2 = ANY(assigned_users)",
                    )
                    .bind(date)
                    .bind(user.0)
                    .fetch_one(&pool)
                    .await?;

                    Ok((log_end, status_end))
                }
            })
            .await?;

        let ends = log_end
            .map(ClockTime::from)
            .into_iter()
            .chain(status_end.map(|t| ClockTime::from(t.time())));
        Ok(ends.max())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkLogRow {
    id: Uuid,
    user_id: Uuid,
    street_id: Option<Uuid>,
    work_date: chrono::NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    notes: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl WorkLogRow {
    fn into_entry(self) -> WorkLogEntry {
        WorkLogEntry {
            id: self.id,
            user_id: UserId(self.user_id),
            street_id: self.street_id.map(StreetId),
            date: self.work_date,
            start_time: ClockTime::from(self.start_time),
            end_time: ClockTime::from(self.end_time),
            notes: self.notes,
            created_at: self.created_at,
        }
    }
}
