use alaska_core::error::CoreError;
use alaska_core::types::DbId;
use alaska_db::RegistryError;
use alaska_sandbox::SandboxError;

/// Why a claimed job did not complete successfully.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sandbox {sandbox} exited with code {code}\n{tail}")]
    NonZeroExit {
        sandbox: String,
        code: i64,
        tail: String,
    },

    /// Another owner is driving the project's checkpoint; the job is put
    /// back rather than failed.
    #[error("Project {project_id} is busy")]
    ProjectBusy { project_id: DbId },

    #[error(transparent)]
    Core(#[from] CoreError),
}
