use std::time::Duration;

use alaska_core::config::{env_parse, env_required, ConfigError};

const WORKER_ID: &str = "WORKER_ID";

/// Worker configuration loaded from environment variables.
///
/// | Env Var                     | Default                      |
/// |-----------------------------|------------------------------|
/// | `DATABASE_URL`              | required                     |
/// | `WORKER_ID`                 | required                     |
/// | `WORKER_POLL_INTERVAL_SECS` | `10`                         |
/// | `INDEX_IMAGE`               | unset                        |
/// | `LOG_TAIL_LINES`            | `50`                         |
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Recorded on every claimed job; startup reconciliation only touches
    /// jobs claimed under this id. It must survive container recreation,
    /// so it is never derived from the host name.
    pub worker_id: String,
    pub poll_interval: Duration,
    /// Reference-index image that must be present besides the analysis
    /// images.
    pub index_image: Option<String>,
    /// Output lines kept for the failure diagnostic.
    pub tail_lines: usize,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: env_required("DATABASE_URL")?,
            worker_id: worker_id(std::env::var(WORKER_ID).ok())?,
            poll_interval: Duration::from_secs(env_parse("WORKER_POLL_INTERVAL_SECS", 10)?),
            index_image: std::env::var("INDEX_IMAGE").ok().filter(|s| !s.is_empty()),
            tail_lines: env_parse("LOG_TAIL_LINES", 50)?,
        })
    }
}

/// Validate the configured worker id: it must be present and non-blank.
fn worker_id(raw: Option<String>) -> Result<String, ConfigError> {
    let raw = raw.ok_or(ConfigError::Missing(WORKER_ID))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid {
            name: WORKER_ID,
            value: raw.clone(),
            reason: "must not be blank".into(),
        });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn worker_id_is_required() {
        assert_matches!(worker_id(None), Err(ConfigError::Missing("WORKER_ID")));
    }

    #[test]
    fn blank_worker_id_is_rejected() {
        assert_matches!(
            worker_id(Some("  ".into())),
            Err(ConfigError::Invalid { name: "WORKER_ID", .. })
        );
    }

    #[test]
    fn worker_id_is_trimmed() {
        assert_eq!(worker_id(Some(" worker-a \n".into())).unwrap(), "worker-a");
    }
}
