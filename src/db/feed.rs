//! Change-feed plumbing over Postgres LISTEN/NOTIFY.
//!
//! Status writes call `pg_notify` inside their transaction, so a
//! notification is delivered exactly when the commit lands. Each
//! subscription runs its own `PgListener` task that decodes payloads
//! and forwards events for the subscribed street.

use std::sync::Arc;

use sqlx::postgres::PgListener;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::feed::{FeedEvent, Subscription};
use crate::model::StreetId;

/// NOTIFY channel carrying serialized [`FeedEvent`]s.
pub(crate) const FEED_CHANNEL: &str = "street_status";

/// Channel capacity per subscription. A slow consumer backpressures the
/// listener task rather than dropping events.
const SUBSCRIPTION_BUFFER: usize = 32;

pub(crate) fn encode(event: &FeedEvent) -> Result<String> {
    serde_json::to_string(event).map_err(|e| Error::Other(format!("encode feed event: {e}")))
}

impl super::Db {
    /// Subscribe to status changes for one street. The listener task
    /// runs until the subscription is closed or dropped.
    pub(crate) async fn subscribe_street(&self, street: StreetId) -> Result<Subscription> {
        let mut listener = PgListener::connect_with(self.pool()).await?;
        listener.listen(FEED_CHANNEL).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let stop = Arc::new(Notify::new());
        let stop_task = Arc::clone(&stop);

        tokio::spawn(async move {
            debug!(street = %street, "feed listener started");
            loop {
                tokio::select! {
                    _ = stop_task.notified() => break,
                    notif = listener.recv() => match notif {
                        Ok(n) => match serde_json::from_str::<FeedEvent>(n.payload()) {
                            Ok(event) if event.street() == street => {
                                if tx.send(event).await.is_err() {
                                    break; // receiver gone
                                }
                            }
                            Ok(_) => {} // another street
                            Err(e) => {
                                warn!("undecodable feed payload dropped: {e}");
                            }
                        },
                        Err(e) => {
                            // PgListener reconnects on the next recv call.
                            warn!("PgListener error: {e}, retrying");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    },
                }
            }
            debug!(street = %street, "feed listener stopped");
        });

        Ok(Subscription::new(rx, stop))
    }
}
