//! Supervised background tasks.
//!
//! A task is a long-running operation on one project (compiling its
//! submission archive, uploading it, serving an interactive session) that
//! the HTTP layer starts without waiting for. The [`TaskSupervisor`] keeps
//! at most one live task per (project, kind) and owns the project
//! checkpoint while the task runs; a [`TaskBody`] does the actual work.
//! Reference index builds are not tied to a project and run under their own
//! single-flight [`ReferenceBuilder`].

pub mod bodies;
pub mod recovery;
pub mod references;
pub mod supervisor;

use std::fmt;
use std::str::FromStr;

use alaska_core::error::CoreError;
use alaska_core::progress::ProjectProgress;
use alaska_core::types::DbId;
use alaska_db::models::project::Project;
use alaska_db::RegistryError;
use alaska_sandbox::SandboxError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use references::{BuildStart, ReferenceBuilder};
pub use supervisor::TaskSupervisor;

/// The kinds of supervised task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Compile,
    Upload,
    Session,
}

/// Checkpoints a task kind moves its project through.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoints {
    /// Checkpoints the task may start from.
    pub from: &'static [ProjectProgress],
    /// Held while the task runs.
    pub running: ProjectProgress,
    /// Entered when the task body succeeds.
    pub done: ProjectProgress,
}

const UPLOAD_ORIGINS: [ProjectProgress; 2] = [ProjectProgress::Compiled, ProjectProgress::Uploaded];

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::Upload => "upload",
            Self::Session => "session",
        }
    }

    /// `None` for kinds that leave the project checkpoint alone.
    pub fn checkpoints(self) -> Option<Checkpoints> {
        match self {
            Self::Compile => Some(Checkpoints {
                from: &ProjectProgress::DURABLE,
                running: ProjectProgress::Compiling,
                done: ProjectProgress::Compiled,
            }),
            Self::Upload => Some(Checkpoints {
                from: &UPLOAD_ORIGINS,
                running: ProjectProgress::Uploading,
                done: ProjectProgress::Uploaded,
            }),
            Self::Session => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compile" => Ok(Self::Compile),
            "upload" => Ok(Self::Upload),
            "session" => Ok(Self::Session),
            other => Err(CoreError::Validation(format!("unknown task kind '{other}'"))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// A live task of the same kind already owns the project.
    #[error("A {kind} task is already running for project {project_id}")]
    AlreadyRunning { project_id: DbId, kind: TaskKind },

    /// The project is not at a checkpoint the task may start from.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Task failed: {0}")]
    Failed(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task cancelled")]
    Cancelled,
}

/// The work a supervised task performs.
///
/// Runs on its own tokio task. Implementations must return promptly with
/// [`TaskError::Cancelled`] once `cancel` fires, releasing anything they
/// started.
#[async_trait]
pub trait TaskBody: Send + Sync {
    async fn run(&self, project: &Project, cancel: CancellationToken) -> Result<(), TaskError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
