//! Change-feed events and subscription handles.
//!
//! Every status write publishes a [`FeedEvent`] so connected clients can
//! reconcile their local projections without polling. Delivery is
//! at-least-once and ordered only per row key; consumers must apply
//! events idempotently (the reconciler overwrites wholesale, so a
//! duplicate is a no-op).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};

use crate::model::{StatusKey, StatusRecord, StreetId};

/// A change notification for one status row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// The row was created or replaced. Carries the full row; later
    /// events replace it wholesale, never merged field by field.
    Upsert(StatusRecord),
    /// The row is gone entirely.
    Delete(StatusKey),
}

impl FeedEvent {
    pub fn street(&self) -> StreetId {
        match self {
            FeedEvent::Upsert(row) => row.street_id,
            FeedEvent::Delete(key) => key.street,
        }
    }
}

/// A live, street-scoped feed subscription.
///
/// Backed by a forwarding task inside the store; the task stops when the
/// subscription is closed or dropped, so no events are delivered to a
/// discarded view.
pub struct Subscription {
    rx: mpsc::Receiver<FeedEvent>,
    stop: Arc<Notify>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<FeedEvent>, stop: Arc<Notify>) -> Self {
        Self { rx, stop }
    }

    /// Next event, or `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.rx.recv().await
    }

    /// Stop the forwarding task. Buffered events may still be drained
    /// from the channel; nothing new arrives after this.
    pub fn close(&self) {
        self.stop.notify_one();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop.notify_one();
    }
}
