use alaska_core::error::CoreError;
use alaska_core::types::DbId;

/// Failure of a work-registry operation.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    /// A stored value could not be interpreted (e.g. an unknown progress
    /// checkpoint).
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The record exists but is in a state that forbids the operation.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl RegistryError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Connection-level failures, pool exhaustion and serialization
    /// conflicts are transient; everything else is reported immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Io(_)) | Self::Database(sqlx::Error::PoolTimedOut) => true,
            Self::Database(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        }
    }
}

impl RegistryError {
    /// Whether the failure happened before the statement was sent, so the
    /// operation certainly did not apply. Only pool acquisition qualifies.
    pub fn never_sent(&self) -> bool {
        matches!(self, Self::Database(sqlx::Error::PoolTimedOut))
    }
}

impl From<CoreError> for RegistryError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Corrupt(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_transient() {
        assert!(RegistryError::Database(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn dropped_connection_is_transient_but_may_have_committed() {
        let err = RegistryError::Database(sqlx::Error::Io(std::io::Error::from(
            std::io::ErrorKind::UnexpectedEof,
        )));
        assert!(err.is_transient());
        assert!(!err.never_sent());
        assert!(RegistryError::Database(sqlx::Error::PoolTimedOut).never_sent());
    }

    #[test]
    fn missing_row_is_not_transient() {
        assert!(!RegistryError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!RegistryError::NotFound { entity: "Job", id: 1 }.is_transient());
    }

    #[test]
    fn not_found_display_names_entity() {
        let err = RegistryError::NotFound { entity: "Project", id: 9 };
        assert_eq!(err.to_string(), "Project with id 9 not found");
    }
}
