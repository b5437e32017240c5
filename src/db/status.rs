//! Status record operations: fetch, dual-write upsert, delete, rounds.
//!
//! Every mutation writes the live `street_status` row and the matching
//! `street_status_rounds` ledger row in one transaction, then notifies
//! the change feed from inside that same transaction.

use sqlx::PgPool;
use uuid::Uuid;

use super::feed;
use crate::error::Result;
use crate::feed::FeedEvent;
use crate::model::{RoundEntry, Roster, StatusKey, StatusRecord, StreetId, UserId};

impl super::Db {
    /// Fetch the live status record for one street/day, if present.
    pub(crate) async fn get_status(&self, key: StatusKey) -> Result<Option<StatusRecord>> {
        let row: Option<StatusRow> = self
            .read_op("fetch_status", || {
                let pool = self.pool().clone();
                async move {
                    sqlx::query_as(
                        "SELECT street_id, service_date, status, current_round, total_rounds, started_at, finished_at, assigned_users, changed_by, updated_at
                         FROM street_status
                         WHERE street_id = $1 AND service_date = $2",
                    )
                    .bind(key.street.0)
                    .bind(key.date)
                    .fetch_optional(&pool)
                    .await
                }
            })
            .await?;

        row.map(StatusRow::try_into_record).transpose()
    }

    /// Upsert the live record and its current-round ledger entry, and
    /// notify the feed. All three happen in one transaction.
    pub(crate) async fn save_current(
        &self,
        record: &StatusRecord,
        round: &RoundEntry,
    ) -> Result<()> {
        let payload = feed::encode(&FeedEvent::Upsert(record.clone()))?;

        self.write_op("upsert_current", || {
            let pool = self.pool().clone();
            let record = record.clone();
            let round = round.clone();
            let payload = payload.clone();
            async move { write_current(&pool, &record, &round, &payload).await }
        })
        .await
    }

    /// Remove the live record and its round ledger, and notify the feed.
    /// Deleting an absent key is a no-op that still notifies.
    pub(crate) async fn purge_status(&self, key: StatusKey) -> Result<()> {
        let payload = feed::encode(&FeedEvent::Delete(key))?;

        self.write_op("delete_status", || {
            let pool = self.pool().clone();
            let payload = payload.clone();
            async move {
                let mut tx = pool.begin().await?;

                sqlx::query(
                    "DELETE FROM street_status_rounds WHERE street_id = $1 AND service_date = $2",
                )
                .bind(key.street.0)
                .bind(key.date)
                .execute(&mut *tx)
                .await?;

                sqlx::query("DELETE FROM street_status WHERE street_id = $1 AND service_date = $2")
                    .bind(key.street.0)
                    .bind(key.date)
                    .execute(&mut *tx)
                    .await?;

                sqlx::query("SELECT pg_notify($1, $2)")
                    .bind(feed::FEED_CHANNEL)
                    .bind(&payload)
                    .execute(&mut *tx)
                    .await?;

                tx.commit().await
            }
        })
        .await
    }

    /// All ledger entries for one street/day, ascending round order.
    pub(crate) async fn rounds_for(&self, key: StatusKey) -> Result<Vec<RoundEntry>> {
        let rows: Vec<RoundRow> = self
            .read_op("list_rounds", || {
                let pool = self.pool().clone();
                async move {
                    sqlx::query_as(
                        "SELECT street_id, service_date, round_number, status, started_at, finished_at, assigned_users, changed_by, updated_at
                         FROM street_status_rounds
                         WHERE street_id = $1 AND service_date = $2
                         ORDER BY round_number ASC",
                    )
                    .bind(key.street.0)
                    .bind(key.date)
                    .fetch_all(&pool)
                    .await
                }
            })
            .await?;

        rows.into_iter().map(RoundRow::try_into_entry).collect()
    }
}

async fn write_current(
    pool: &PgPool,
    record: &StatusRecord,
    round: &RoundEntry,
    payload: &str,
) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO street_status (street_id, service_date, status, current_round, total_rounds, started_at, finished_at, assigned_users, changed_by, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         ON CONFLICT (street_id, service_date) DO UPDATE SET
            status = EXCLUDED.status,
            current_round = EXCLUDED.current_round,
            total_rounds = EXCLUDED.total_rounds,
            started_at = EXCLUDED.started_at,
            finished_at = EXCLUDED.finished_at,
            assigned_users = EXCLUDED.assigned_users,
            changed_by = EXCLUDED.changed_by,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(record.street_id.0)
    .bind(record.date)
    .bind(record.status.to_string())
    .bind(record.current_round as i32)
    .bind(record.total_rounds as i32)
    .bind(record.started_at)
    .bind(record.finished_at)
    .bind(roster_to_vec(&record.assigned_users))
    .bind(record.changed_by.map(|u| u.0))
    .bind(record.updated_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO street_status_rounds (street_id, service_date, round_number, status, started_at, finished_at, assigned_users, changed_by, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (street_id, service_date, round_number) DO UPDATE SET
            status = EXCLUDED.status,
            started_at = EXCLUDED.started_at,
            finished_at = EXCLUDED.finished_at,
            assigned_users = EXCLUDED.assigned_users,
            changed_by = EXCLUDED.changed_by,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(round.street_id.0)
    .bind(round.date)
    .bind(round.round_number as i32)
    .bind(round.status.to_string())
    .bind(round.started_at)
    .bind(round.finished_at)
    .bind(roster_to_vec(&round.assigned_users))
    .bind(round.changed_by.map(|u| u.0))
    .bind(round.updated_at)
    .execute(&mut *tx)
    .await?;

    // NOTIFY is transactional: it only fires on commit
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(feed::FEED_CHANNEL)
        .bind(payload)
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

fn roster_to_vec(roster: &Roster) -> Vec<Uuid> {
    roster.iter().map(|u| u.0).collect()
}

fn roster_from_vec(users: Vec<Uuid>) -> Roster {
    users.into_iter().map(UserId).collect()
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct StatusRow {
    street_id: Uuid,
    service_date: chrono::NaiveDate,
    status: String,
    current_round: i32,
    total_rounds: i32,
    started_at: Option<chrono::NaiveDateTime>,
    finished_at: Option<chrono::NaiveDateTime>,
    assigned_users: Vec<Uuid>,
    changed_by: Option<Uuid>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl StatusRow {
    fn try_into_record(self) -> Result<StatusRecord> {
        Ok(StatusRecord {
            street_id: StreetId(self.street_id),
            date: self.service_date,
            status: self.status.parse()?,
            current_round: self.current_round as u32,
            total_rounds: self.total_rounds as u32,
            started_at: self.started_at,
            finished_at: self.finished_at,
            assigned_users: roster_from_vec(self.assigned_users),
            changed_by: self.changed_by.map(UserId),
            updated_at: self.updated_at,
        })
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct RoundRow {
    street_id: Uuid,
    service_date: chrono::NaiveDate,
    round_number: i32,
    status: String,
    started_at: Option<chrono::NaiveDateTime>,
    finished_at: Option<chrono::NaiveDateTime>,
    assigned_users: Vec<Uuid>,
    changed_by: Option<Uuid>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl RoundRow {
    fn try_into_entry(self) -> Result<RoundEntry> {
        Ok(RoundEntry {
            street_id: StreetId(self.street_id),
            date: self.service_date,
            round_number: self.round_number as u32,
            status: self.status.parse()?,
            started_at: self.started_at,
            finished_at: self.finished_at,
            assigned_users: roster_from_vec(self.assigned_users),
            changed_by: self.changed_by.map(UserId),
            updated_at: self.updated_at,
        })
    }
}
