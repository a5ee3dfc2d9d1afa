//! Event log writer.
//!
//! Every event published on the bus is appended to the `events` table so a
//! job's or project's history can be reconstructed after the fact. A failed
//! insert is logged and skipped; the log is best effort and never blocks the
//! publisher.

use alaska_core::types::DbId;
use alaska_db::repositories::EventRepo;
use alaska_db::DbPool;
use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::bus::PlatformEvent;

/// Where recorded events end up.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: &PlatformEvent) -> Result<DbId, sqlx::Error>;
}

/// The Postgres `events` table.
pub struct PgEventLog {
    pool: DbPool,
}

impl PgEventLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn append(&self, event: &PlatformEvent) -> Result<DbId, sqlx::Error> {
        EventRepo::insert(
            &self.pool,
            &event.event_type,
            event.source_entity_type.as_deref(),
            event.source_entity_id,
            &event.payload,
        )
        .await
    }
}

/// Counts reported when the recorder exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecorderStats {
    pub written: u64,
    pub failed: u64,
    pub missed: u64,
}

/// Append events from `receiver` to `log` until the bus goes away.
pub async fn record_events<L: EventLog>(
    log: L,
    mut receiver: broadcast::Receiver<PlatformEvent>,
) -> RecorderStats {
    let mut stats = RecorderStats::default();
    loop {
        let event = match receiver.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                stats.missed += n;
                tracing::warn!(missed = n, "Event log fell behind the bus");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match log.append(&event).await {
            Ok(_) => stats.written += 1,
            Err(e) => {
                stats.failed += 1;
                tracing::error!(
                    error = %e,
                    event_type = %event.event_type,
                    source_id = ?event.source_entity_id,
                    "Failed to record event"
                );
            }
        }
    }
    tracing::info!(
        written = stats.written,
        failed = stats.failed,
        missed = stats.missed,
        "Event log stopped"
    );
    stats
}
