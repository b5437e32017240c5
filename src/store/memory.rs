//! In-memory store: HashMap tables plus a broadcast feed.
//!
//! Mirrors the Postgres store's observable behavior (feed events on
//! every write included) without I/O. Used by the test suite and the
//! local demo paths; the batch work-log procedure can be switched off to
//! exercise the single-entry fallback.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{Notify, broadcast, mpsc};
use tracing::warn;

use crate::error::{Error, Result};
use crate::feed::{FeedEvent, Subscription};
use crate::model::{
    ClockTime, RoundEntry, Roster, StatusKey, StatusRecord, StreetId, TimeWindow, UserId,
    WorkLogEntry,
};
use crate::store::ClearanceStore;

#[derive(Default)]
struct Inner {
    status: HashMap<StatusKey, StatusRecord>,
    rounds: BTreeMap<(StreetId, NaiveDate, u32), RoundEntry>,
    work_logs: Vec<WorkLogEntry>,
}

/// In-memory [`ClearanceStore`].
pub struct MemStore {
    inner: Mutex<Inner>,
    feed: broadcast::Sender<FeedEvent>,
    batch_rpc: bool,
}

impl MemStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(Inner::default()),
            feed,
            batch_rpc: true,
        }
    }

    /// Toggle the simulated server-side batch procedure. With it off,
    /// `log_work_batch` reports `BatchLogUnavailable` like a database
    /// where the function was never deployed.
    pub fn with_batch_rpc(mut self, enabled: bool) -> Self {
        self.batch_rpc = enabled;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock still holds consistent data for this store's
        // access pattern (no partial writes inside a critical section).
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, event: FeedEvent) {
        // No subscribers is fine; the feed is fire-and-forget.
        let _ = self.feed.send(event);
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClearanceStore for MemStore {
    async fn fetch_status(&self, key: StatusKey) -> Result<Option<StatusRecord>> {
        Ok(self.lock().status.get(&key).cloned())
    }

    async fn upsert_current(&self, record: &StatusRecord, round: &RoundEntry) -> Result<()> {
        {
            let mut inner = self.lock();
            inner.status.insert(record.key(), record.clone());
            inner.rounds.insert(
                (round.street_id, round.date, round.round_number),
                round.clone(),
            );
        }
        self.publish(FeedEvent::Upsert(record.clone()));
        Ok(())
    }

    async fn delete_status(&self, key: StatusKey) -> Result<()> {
        {
            let mut inner = self.lock();
            inner.status.remove(&key);
            let doomed: Vec<_> = inner
                .rounds
                .range((key.street, key.date, 0)..=(key.street, key.date, u32::MAX))
                .map(|(k, _)| *k)
                .collect();
            for k in doomed {
                inner.rounds.remove(&k);
            }
        }
        self.publish(FeedEvent::Delete(key));
        Ok(())
    }

    async fn list_rounds(&self, key: StatusKey) -> Result<Vec<RoundEntry>> {
        let inner = self.lock();
        Ok(inner
            .rounds
            .range((key.street, key.date, 0)..=(key.street, key.date, u32::MAX))
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn insert_work_log(&self, entry: &WorkLogEntry) -> Result<()> {
        let mut inner = self.lock();
        if !inner.work_logs.iter().any(|l| l.id == entry.id) {
            inner.work_logs.push(entry.clone());
        }
        Ok(())
    }

    async fn log_work_batch(
        &self,
        street: StreetId,
        date: NaiveDate,
        window: TimeWindow,
        users: &Roster,
        notes: Option<&str>,
    ) -> Result<u64> {
        if !self.batch_rpc {
            return Err(Error::BatchLogUnavailable);
        }
        let mut inner = self.lock();
        for user in users {
            inner.work_logs.push(WorkLogEntry::for_shift(
                *user,
                Some(street),
                date,
                window,
                notes,
            ));
        }
        Ok(users.len() as u64)
    }

    async fn delete_work_logs(&self, street: StreetId, date: NaiveDate) -> Result<u64> {
        let mut inner = self.lock();
        let before = inner.work_logs.len();
        inner
            .work_logs
            .retain(|l| !(l.street_id == Some(street) && l.date == date));
        Ok((before - inner.work_logs.len()) as u64)
    }

    async fn list_work_logs_for_user(
        &self,
        user: UserId,
        date: NaiveDate,
    ) -> Result<Vec<WorkLogEntry>> {
        let inner = self.lock();
        let mut logs: Vec<_> = inner
            .work_logs
            .iter()
            .filter(|l| l.user_id == user && l.date == date)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.start_time);
        Ok(logs)
    }

    async fn last_work_end(&self, user: UserId, date: NaiveDate) -> Result<Option<ClockTime>> {
        let inner = self.lock();
        let from_logs = inner
            .work_logs
            .iter()
            .filter(|l| l.user_id == user && l.date == date)
            .map(|l| l.end_time)
            .max();
        let from_status = inner
            .status
            .values()
            .filter(|r| r.date == date && r.assigned_users.contains(&user))
            .filter_map(|r| r.finished_at)
            .map(|t| ClockTime::from(t.time()))
            .max();
        Ok(from_logs.into_iter().chain(from_status).max())
    }

    async fn subscribe(&self, street: StreetId) -> Result<Subscription> {
        let mut feed_rx = self.feed.subscribe();
        let (tx, rx) = mpsc::channel(32);
        let stop = Arc::new(Notify::new());
        let stop_task = Arc::clone(&stop);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_task.notified() => break,
                    event = feed_rx.recv() => match event {
                        Ok(event) if event.street() == street => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // At-least-once feed: missed events are
                            // recovered by the client's periodic refresh.
                            warn!(missed, %street, "feed subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(Subscription::new(rx, stop))
    }
}
