//! Centralized retry with backoff for registry operations.
//!
//! Every [`PgRegistry`](crate::PgRegistry) call goes through
//! [`RetryPolicy::run`] or [`RetryPolicy::run_unrepeatable`], so transient
//! database failures are retried in one place instead of at each call site.
//!
//! A dropped connection does not say whether the statement committed.
//! Writes that must not apply twice (claiming a job, appending a command,
//! creating a job, a conditional checkpoint move) use `run_unrepeatable`,
//! which only retries failures that happen before the statement is sent.

use std::future::Future;
use std::time::Duration;

use crate::error::RegistryError;

/// Delays between attempts (exponential backoff: 100 ms, 400 ms, 1.6 s).
const DEFAULT_DELAYS_MS: [u64; 3] = [100, 400, 1600];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    /// Run `op`, retrying transient failures after each configured delay.
    ///
    /// Non-transient errors and the error of the final attempt are returned
    /// as-is.
    pub async fn run<T, F, Fut>(&self, name: &'static str, op: F) -> Result<T, RegistryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RegistryError>>,
    {
        self.attempt(name, op, RegistryError::is_transient).await
    }

    /// Like [`run`](Self::run), but only retries errors raised before the
    /// statement reached the server.
    pub async fn run_unrepeatable<T, F, Fut>(
        &self,
        name: &'static str,
        op: F,
    ) -> Result<T, RegistryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RegistryError>>,
    {
        self.attempt(name, op, RegistryError::never_sent).await
    }

    async fn attempt<T, F, Fut>(
        &self,
        name: &'static str,
        mut op: F,
        retryable: fn(&RegistryError) -> bool,
    ) -> Result<T, RegistryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RegistryError>>,
    {
        for (attempt, delay) in self.delays.iter().enumerate() {
            match op().await {
                Err(e) if retryable(&e) => {
                    tracing::warn!(
                        operation = name,
                        attempt = attempt + 1,
                        error = %e,
                        "Registry operation failed, retrying"
                    );
                    tokio::time::sleep(*delay).await;
                }
                other => return other,
            }
        }
        op().await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: DEFAULT_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = &AtomicUsize::new(0);
        let result = RetryPolicy::default()
            .run("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RegistryError::Database(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = &AtomicUsize::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RegistryError::NotFound { entity: "Job", id: 1 })
            })
            .await;
        assert_matches!(result, Err(RegistryError::NotFound { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_last_delay() {
        let calls = &AtomicUsize::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RegistryError::Database(sqlx::Error::PoolTimedOut))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), DEFAULT_DELAYS_MS.len() + 1);
    }

    fn connection_reset() -> RegistryError {
        RegistryError::Database(sqlx::Error::Io(std::io::Error::from(
            std::io::ErrorKind::ConnectionReset,
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn unrepeatable_write_is_not_resent_after_connection_loss() {
        let calls = &AtomicUsize::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run_unrepeatable("append_job_command", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(connection_reset())
            })
            .await;
        assert_matches!(result, Err(RegistryError::Database(sqlx::Error::Io(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepeatable_write_retries_pool_exhaustion() {
        let calls = &AtomicUsize::new(0);
        let result = RetryPolicy::default()
            .run_unrepeatable("claim_next_job", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RegistryError::Database(sqlx::Error::PoolTimedOut))
                } else {
                    Ok("claimed")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "claimed");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idempotent_read_retries_connection_loss() {
        let calls = &AtomicUsize::new(0);
        let result = RetryPolicy::default()
            .run("get_job", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(connection_reset())
                } else {
                    Ok(1)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn none_policy_tries_once() {
        let calls = &AtomicUsize::new(0);
        let _: Result<(), _> = RetryPolicy::none()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RegistryError::Database(sqlx::Error::PoolTimedOut))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
