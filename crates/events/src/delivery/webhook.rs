//! Relays bus events to `NOTIFY_WEBHOOK_URL`.
//!
//! Each event is POSTed as its JSON form. A failed attempt (transport error
//! or non-2xx answer) is retried after each backoff step; once the steps run
//! out the event is logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};

use crate::bus::PlatformEvent;

/// Waits between attempts: four tries in all.
const BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Per-attempt HTTP timeout.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

pub struct WebhookRelay {
    client: reqwest::Client,
    url: String,
    backoff: Vec<Duration>,
}

impl WebhookRelay {
    pub fn new(url: impl Into<String>) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(ATTEMPT_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
            backoff: BACKOFF.to_vec(),
        })
    }

    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// POST `event`, retrying through the backoff schedule.
    pub async fn deliver(&self, event: &PlatformEvent) -> Result<(), WebhookError> {
        let mut waits = self.backoff.iter();
        let mut attempt = 1;
        loop {
            let err = match self.post(event).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            let Some(wait) = waits.next() else {
                tracing::error!(
                    url = %self.url,
                    event_type = %event.event_type,
                    attempts = attempt,
                    error = %err,
                    "Giving up on webhook delivery"
                );
                return Err(err);
            };
            tracing::warn!(url = %self.url, attempt, error = %err, "Webhook attempt failed");
            tokio::time::sleep(*wait).await;
            attempt += 1;
        }
    }

    async fn post(&self, event: &PlatformEvent) -> Result<(), WebhookError> {
        let status = self.client.post(&self.url).json(event).send().await?.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WebhookError::HttpStatus(status.as_u16()))
        }
    }

    /// Forward events until the bus is dropped. Deliveries run in their own
    /// tasks so a slow endpoint only delays itself.
    pub async fn run(self, mut receiver: broadcast::Receiver<PlatformEvent>) {
        let relay = Arc::new(self);
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let relay = Arc::clone(&relay);
                    tokio::spawn(async move {
                        let _ = relay.deliver(&event).await;
                    });
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(dropped = n, "Webhook relay fell behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::info!(url = %relay.url, "Webhook relay stopped");
    }
}
