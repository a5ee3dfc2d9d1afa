/// Failure of a sandbox operation.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The engine rejected or failed a request.
    #[error("{operation} failed: {source}")]
    Engine {
        operation: &'static str,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("Sandbox '{0}' not found")]
    NotFound(String),

    #[error("Sandbox '{0}' is already stopped")]
    AlreadyStopped(String),

    /// Another sandbox with the same name exists.
    #[error("Sandbox name '{0}' is already in use")]
    NameInUse(String),

    /// Someone else is removing the sandbox; it still exists.
    #[error("Removal of sandbox '{0}' is already in progress")]
    RemovalInProgress(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// The sandbox no longer exists or is no longer running.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::AlreadyStopped(_))
    }
}
