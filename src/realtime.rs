//! Realtime reconciliation of one street/day view against the store.
//!
//! A [`Reconciler`] holds the projection a client is looking at and
//! keeps it aligned with the store: feed events are applied as they
//! arrive (last write wins, no merging) and a periodic full refresh
//! bounds staleness across missed deliveries. Applying an event is
//! idempotent, so at-least-once delivery needs no dedup.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use opentelemetry::KeyValue;
use tokio::sync::{Notify, watch};
use tracing::{info, warn};

use crate::engine::StatusView;
use crate::error::Result;
use crate::feed::{FeedEvent, Subscription};
use crate::model::{Status, StatusKey, StatusRecord, StreetId};
use crate::store::ClearanceStore;
use crate::telemetry::metrics;

/// What applying one feed event did to the local projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Record replaced wholesale. `rounds_changed` flags that the round
    /// counters or status moved, so the ledger view needs a refetch.
    Replaced { rounds_changed: bool },
    /// Event was for a different street or day; nothing changed.
    Ignored,
    /// Row deleted upstream; projection reset to a fresh Open record.
    Reset,
}

/// Apply one feed event to the projection shown for `displayed`.
///
/// Pure and idempotent: replaying an event leaves the record as it was.
/// Upserts for another date are dropped rather than merged; a delete
/// resets regardless of the event's date, since the row is simply gone.
pub fn apply_event(current: &mut StatusRecord, displayed: StatusKey, event: &FeedEvent) -> Applied {
    match event {
        FeedEvent::Upsert(row) => {
            if row.street_id != displayed.street || row.date != displayed.date {
                return Applied::Ignored;
            }
            let rounds_changed = row.current_round != current.current_round
                || row.total_rounds != current.total_rounds
                || row.status != current.status;
            *current = row.clone();
            Applied::Replaced { rounds_changed }
        }
        FeedEvent::Delete(_) => {
            *current = StatusRecord::fresh(displayed);
            Applied::Reset
        }
    }
}

/// How often the reconciler refetches the full view regardless of feed
/// activity.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Keeps one street/day projection aligned with the store.
pub struct Reconciler<S> {
    store: Arc<S>,
    key: StatusKey,
    sub: Subscription,
    view: StatusView,
    tx: watch::Sender<StatusView>,
    shutdown: Arc<Notify>,
    refresh_interval: Duration,
}

/// Clonable handle that stops a running reconciler.
#[derive(Clone)]
pub struct ReconcilerStop {
    shutdown: Arc<Notify>,
}

impl ReconcilerStop {
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }
}

impl<S: ClearanceStore> Reconciler<S> {
    /// Fetch the initial view and subscribe to the street's feed.
    ///
    /// Unlike the engine's read path this never creates a record: a
    /// missing row is shown as a fresh Open default without writing.
    pub async fn attach(store: Arc<S>, street: StreetId, date: NaiveDate) -> Result<Self> {
        let key = StatusKey::new(street, date);
        let view = fetch_view(store.as_ref(), key).await?;
        let sub = store.subscribe(street).await?;
        let (tx, _) = watch::channel(view.clone());
        Ok(Self {
            store,
            key,
            sub,
            view,
            tx,
            shutdown: Arc::new(Notify::new()),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        })
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// The latest view; updated on every applied event and refresh.
    pub fn watch(&self) -> watch::Receiver<StatusView> {
        self.tx.subscribe()
    }

    pub fn stopper(&self) -> ReconcilerStop {
        ReconcilerStop {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    pub fn view(&self) -> &StatusView {
        &self.view
    }

    pub fn key(&self) -> StatusKey {
        self.key
    }

    /// Point the reconciler at a different street/day: close the old
    /// subscription, fetch the new view, subscribe to the new street.
    pub async fn retarget(&mut self, street: StreetId, date: NaiveDate) -> Result<()> {
        self.sub.close();

        let key = StatusKey::new(street, date);
        let view = fetch_view(self.store.as_ref(), key).await?;
        self.sub = self.store.subscribe(street).await?;
        self.key = key;
        self.publish(view);
        Ok(())
    }

    /// Refetch the full view from the store and publish it.
    pub async fn refresh(&mut self) -> Result<()> {
        let view = fetch_view(self.store.as_ref(), self.key).await?;
        self.publish(view);
        Ok(())
    }

    /// Run until stopped: apply feed events as they arrive, with a full
    /// refresh on a timer as the catch-all for missed events.
    pub async fn run(&mut self) {
        info!(key = %self.key, "reconciler running");
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(key = %self.key, "reconciler stopped");
                    return;
                }
                _ = tokio::time::sleep(self.refresh_interval) => {
                    if let Err(e) = self.refresh().await {
                        warn!(key = %self.key, error = %e, "periodic refresh failed");
                    }
                }
                event = self.sub.recv() => {
                    match event {
                        Some(event) => self.handle(event).await,
                        None => {
                            info!(key = %self.key, "feed closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle(&mut self, event: FeedEvent) {
        let kind = match &event {
            FeedEvent::Upsert(_) => "upsert",
            FeedEvent::Delete(_) => "delete",
        };
        let applied = apply_event(&mut self.view.record, self.key, &event);
        let outcome = match applied {
            Applied::Replaced { .. } => "applied",
            Applied::Ignored => "ignored",
            Applied::Reset => "reset",
        };
        metrics::feed_events().add(
            1,
            &[KeyValue::new("kind", kind), KeyValue::new("outcome", outcome)],
        );

        match applied {
            Applied::Ignored => {}
            Applied::Replaced { rounds_changed } => {
                if rounds_changed {
                    match self.store.list_rounds(self.key).await {
                        Ok(rounds) => {
                            self.view.completed_rounds = rounds
                                .into_iter()
                                .filter(|r| r.status == Status::Done)
                                .collect();
                        }
                        Err(e) => warn!(key = %self.key, error = %e, "round refetch failed"),
                    }
                }
                self.tx.send_replace(self.view.clone());
            }
            Applied::Reset => {
                self.view.completed_rounds.clear();
                self.tx.send_replace(self.view.clone());
            }
        }
    }

    fn publish(&mut self, view: StatusView) {
        self.view = view;
        self.tx.send_replace(self.view.clone());
    }
}

async fn fetch_view<S: ClearanceStore>(store: &S, key: StatusKey) -> Result<StatusView> {
    let record = store
        .fetch_status(key)
        .await?
        .unwrap_or_else(|| StatusRecord::fresh(key));
    let completed_rounds = store
        .list_rounds(key)
        .await?
        .into_iter()
        .filter(|r| r.status == Status::Done)
        .collect();
    Ok(StatusView {
        record,
        completed_rounds,
    })
}
