//! Background subscribers started by each binary.

use std::sync::Arc;
use std::time::Duration;

use alaska_db::DbPool;
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::delivery::webhook::{WebhookError, WebhookRelay};
use crate::persistence::{record_events, PgEventLog};

/// How long shutdown waits for each subscriber to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handles of the persistence and webhook subscribers.
pub struct EventServices {
    handles: Vec<JoinHandle<()>>,
}

impl EventServices {
    /// Subscribe persistence, and the webhook relay when `webhook_url` is
    /// set, to `bus`.
    pub fn start(
        pool: DbPool,
        bus: &EventBus,
        webhook_url: Option<String>,
    ) -> Result<Self, WebhookError> {
        let log = PgEventLog::new(pool);
        let recorder = record_events(log, bus.subscribe());
        let mut handles = vec![tokio::spawn(async move {
            recorder.await;
        })];
        if let Some(url) = webhook_url {
            tracing::info!(url = %url, "Webhook relay enabled");
            let relay = WebhookRelay::new(url)?;
            handles.push(tokio::spawn(relay.run(bus.subscribe())));
        }
        Ok(Self { handles })
    }

    /// Drop the last reference to the bus and wait for subscribers to exit.
    ///
    /// Subscribers only stop once every clone of the bus is gone, so callers
    /// must drop their other references first.
    pub async fn shutdown(self, bus: Arc<EventBus>) {
        drop(bus);
        for handle in self.handles {
            if tokio::time::timeout(DRAIN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Event subscriber did not stop in time");
            }
        }
        tracing::info!("Event services shut down");
    }
}
