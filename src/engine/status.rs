//! Status transitions: start, complete, reset, roster changes, rounds.
//!
//! Each mutation loads the live record (creating it lazily when absent),
//! validates the transition, rewrites the record together with its
//! current-round ledger entry, then performs any follow-on work-log
//! writes. Concurrent writers race under last-write-wins; there is no
//! server-side version check.

use chrono::{Local, NaiveDate, Utc};
use opentelemetry::KeyValue;
use tracing::info;

use super::{Engine, StatusView};
use crate::error::{Error, Result};
use crate::model::{
    Actor, Role, Roster, Status, StatusKey, StatusRecord, StreetId, TimeWindow, UserId,
    WorkLogEntry, window_timestamps,
};
use crate::store::ClearanceStore;
use crate::telemetry::metrics;

/// Validate a status transition, returning an error if disallowed.
fn validate_transition(from: Status, to: Status) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}

impl<S: ClearanceStore> Engine<S> {
    /// Current record plus completed-round history for one street/day.
    ///
    /// The first read of an untouched street/day creates its Open record
    /// (and the round-1 ledger entry) as a side effect.
    pub async fn status(&self, street: StreetId, date: NaiveDate) -> Result<StatusView> {
        let record = self.load_or_create(StatusKey::new(street, date)).await?;
        let completed_rounds = self.completed_rounds(record.key()).await?;
        Ok(StatusView {
            record,
            completed_rounds,
        })
    }

    /// The Done entries of the round ledger, ascending round order.
    pub async fn completed_rounds(&self, key: StatusKey) -> Result<Vec<crate::model::RoundEntry>> {
        Ok(self
            .store()
            .list_rounds(key)
            .await?
            .into_iter()
            .filter(|r| r.status == Status::Done)
            .collect())
    }

    async fn load_or_create(&self, key: StatusKey) -> Result<StatusRecord> {
        if let Some(existing) = self.store().fetch_status(key).await? {
            return Ok(existing);
        }
        let fresh = StatusRecord::fresh(key);
        self.store()
            .upsert_current(&fresh, &fresh.round_entry())
            .await?;
        info!(key = %key, "status record created");
        Ok(fresh)
    }

    /// Mark a crew en route. Only valid from Open. The start timestamp is
    /// stamped once; re-running after a reset stamps it again.
    pub async fn start(&self, street: StreetId, date: NaiveDate, actor: Actor) -> Result<StatusRecord> {
        actor.require_write("start clearance")?;

        let mut record = self.load_or_create(StatusKey::new(street, date)).await?;
        validate_transition(record.status, Status::EnRoute)?;

        let from = record.status;
        record.status = Status::EnRoute;
        if record.started_at.is_none() {
            record.started_at = Some(Local::now().naive_local());
        }
        self.commit(&mut record, actor, from).await?;
        Ok(record)
    }

    /// Complete the current round over the given work window.
    ///
    /// Valid from Open or EnRoute. Writes one work-log entry per rostered
    /// user; completing straight from Open without a roster credits the
    /// acting user.
    pub async fn complete(
        &self,
        street: StreetId,
        date: NaiveDate,
        actor: Actor,
        window: TimeWindow,
        notes: Option<&str>,
    ) -> Result<StatusRecord> {
        self.complete_with(street, date, actor, window, None, notes)
            .await
    }

    /// [`Engine::complete`] with a roster override, applied atomically
    /// with the completion. Batch completion uses this so a shared roster
    /// lands on streets that never went EnRoute.
    pub async fn complete_with(
        &self,
        street: StreetId,
        date: NaiveDate,
        actor: Actor,
        window: TimeWindow,
        roster: Option<&Roster>,
        notes: Option<&str>,
    ) -> Result<StatusRecord> {
        actor.require_write("complete clearance")?;

        let mut record = self.load_or_create(StatusKey::new(street, date)).await?;
        validate_transition(record.status, Status::Done)?;

        let from = record.status;
        match roster {
            Some(users) => record.assigned_users = users.clone(),
            // Direct completion without a prior start: whoever completes
            // did the work.
            None if from == Status::Open => {
                record.assigned_users.insert(actor.user);
            }
            None => {}
        }

        let (started_at, finished_at) = window_timestamps(date, window);
        record.status = Status::Done;
        record.started_at = Some(started_at);
        record.finished_at = Some(finished_at);
        self.commit(&mut record, actor, from).await?;

        self.write_shift_logs(&record, actor, window, notes).await?;
        Ok(record)
    }

    /// Undo the current round back to Open: clears times and roster and
    /// removes this street/day's billing entries.
    pub async fn reset(&self, street: StreetId, date: NaiveDate, actor: Actor) -> Result<StatusRecord> {
        actor.require_write("reset clearance")?;

        let mut record = self.load_or_create(StatusKey::new(street, date)).await?;
        validate_transition(record.status, Status::Open)?;

        let from = record.status;
        record.status = Status::Open;
        record.started_at = None;
        record.finished_at = None;
        record.assigned_users.clear();
        self.commit(&mut record, actor, from).await?;

        // Compensating delete, not a cascade: the round ledger keeps its
        // history but the billing rows for this street/day go away.
        let removed = self.store().delete_work_logs(street, date).await?;
        if removed > 0 {
            info!(key = %record.key(), removed, "work logs removed on reset");
        }
        Ok(record)
    }

    /// Replace the assigned roster. Only meaningful once a round is
    /// underway or done; an Open round has nobody to credit.
    pub async fn set_roster(
        &self,
        street: StreetId,
        date: NaiveDate,
        actor: Actor,
        users: Roster,
    ) -> Result<StatusRecord> {
        actor.require_write("change roster")?;

        let mut record = self.load_or_create(StatusKey::new(street, date)).await?;
        if record.status == Status::Open {
            return Err(Error::InvalidTransition {
                from: Status::Open,
                to: Status::Open,
            });
        }

        let from = record.status;
        record.assigned_users = users;
        self.commit(&mut record, actor, from).await?;
        Ok(record)
    }

    /// Roll a Done street over to the next round: bump the counters and
    /// present a fresh Open state. The finished round's ledger entry is
    /// untouched, so its history survives.
    pub async fn start_new_round(
        &self,
        street: StreetId,
        date: NaiveDate,
        actor: Actor,
    ) -> Result<StatusRecord> {
        actor.require_write("start new round")?;

        let mut record = self.load_or_create(StatusKey::new(street, date)).await?;
        if record.status != Status::Done {
            return Err(Error::InvalidTransition {
                from: record.status,
                to: Status::Open,
            });
        }

        let from = record.status;
        record.current_round += 1;
        record.total_rounds = record.current_round;
        record.status = Status::Open;
        record.started_at = None;
        record.finished_at = None;
        record.assigned_users.clear();
        self.commit(&mut record, actor, from).await?;

        metrics::rounds_started().add(1, &[]);
        info!(key = %record.key(), round = record.current_round, "new clearance round");
        Ok(record)
    }

    /// Remove a street/day record entirely, round ledger included. The
    /// next read recreates it fresh; subscribers see a delete event.
    pub async fn purge(&self, street: StreetId, date: NaiveDate, actor: Actor) -> Result<()> {
        if actor.role != Role::Admin {
            return Err(Error::PermissionDenied {
                user: actor.user,
                action: "purge status",
            });
        }
        self.store().delete_status(StatusKey::new(street, date)).await
    }

    /// Record a manual work-log entry on behalf of a user.
    pub async fn record_work(
        &self,
        actor: Actor,
        user: UserId,
        street: Option<StreetId>,
        date: NaiveDate,
        window: TimeWindow,
        notes: Option<&str>,
    ) -> Result<WorkLogEntry> {
        actor.require_write("record work")?;
        let entry = WorkLogEntry::for_shift(user, street, date, window, notes);
        self.store().insert_work_log(&entry).await?;
        metrics::work_logs_written().add(1, &[KeyValue::new("mode", "manual")]);
        Ok(entry)
    }

    /// Stamp provenance and write the record with its current-round
    /// mirror in one store call.
    async fn commit(&self, record: &mut StatusRecord, actor: Actor, from: Status) -> Result<()> {
        record.changed_by = Some(actor.user);
        record.updated_at = Utc::now();
        self.store()
            .upsert_current(record, &record.round_entry())
            .await?;

        if from != record.status {
            metrics::status_transitions().add(
                1,
                &[
                    KeyValue::new("from", from.to_string()),
                    KeyValue::new("to", record.status.to_string()),
                ],
            );
        }
        info!(
            key = %record.key(),
            from = %from,
            to = %record.status,
            round = record.current_round,
            by = %actor.user,
            "status updated"
        );
        Ok(())
    }

    /// Write the round's billing entries: the batch function when the
    /// database has it, otherwise a single entry for the acting user.
    async fn write_shift_logs(
        &self,
        record: &StatusRecord,
        actor: Actor,
        window: TimeWindow,
        notes: Option<&str>,
    ) -> Result<()> {
        if record.assigned_users.is_empty() {
            return Ok(());
        }

        match self
            .store()
            .log_work_batch(
                record.street_id,
                record.date,
                window,
                &record.assigned_users,
                notes,
            )
            .await
        {
            Ok(count) => {
                metrics::work_logs_written().add(count, &[KeyValue::new("mode", "batch")]);
                Ok(())
            }
            Err(Error::BatchLogUnavailable) => {
                let entry = WorkLogEntry::for_shift(
                    actor.user,
                    Some(record.street_id),
                    record.date,
                    window,
                    notes,
                );
                self.store().insert_work_log(&entry).await?;
                metrics::work_logs_written().add(1, &[KeyValue::new("mode", "fallback")]);
                info!(key = %record.key(), "batch log unavailable, single entry written");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
