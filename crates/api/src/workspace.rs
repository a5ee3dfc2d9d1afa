//! Project working directories on disk.
//!
//! A project owns `<project_root>/<id>/` and a `reads/` directory inside it
//! for raw read uploads. Both are recorded in the project's `paths` map when
//! the directories are created.

use std::path::{Path, PathBuf};

use alaska_core::paths::PathKey;
use alaska_core::types::DbId;
use alaska_db::models::project::Project;
use alaska_db::{RegistryError, WorkRegistry};

/// Name of the raw read directory inside a project root.
pub const READS_DIR: &str = "reads";

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Project directory {} already exists", .0.display())]
    RootExists(PathBuf),

    /// The project is at a transient checkpoint.
    #[error("project {0} is busy and cannot be deleted")]
    Busy(DbId),
}

/// Create a project's root and read directories and record them.
///
/// Fails with [`WorkspaceError::RootExists`] without touching anything if
/// the root directory is already on disk.
pub async fn initialize_project(
    registry: &dyn WorkRegistry,
    project_id: DbId,
    project_root: &Path,
) -> Result<Project, WorkspaceError> {
    registry.get_project(project_id).await?;

    let root = project_root.join(project_id.to_string());
    if tokio::fs::try_exists(&root).await? {
        return Err(WorkspaceError::RootExists(root));
    }
    let reads = root.join(READS_DIR);
    tokio::fs::create_dir_all(&reads).await?;

    registry
        .set_project_path(project_id, &PathKey::Root, &root.to_string_lossy())
        .await?;
    registry
        .set_project_path(project_id, &PathKey::Read, &reads.to_string_lossy())
        .await?;
    tracing::info!(project_id, root = %root.display(), "Project initialized");
    Ok(registry.get_project(project_id).await?)
}

/// Remove a project's root directory.
///
/// Refused while a task or analysis holds the project. A project whose
/// directory is already gone deletes cleanly. Returns the removed path, if
/// there was one.
pub async fn delete_project(
    registry: &dyn WorkRegistry,
    project_id: DbId,
    project_root: &Path,
) -> Result<Option<PathBuf>, WorkspaceError> {
    let project = registry.get_project(project_id).await?;
    if project.progress().is_ok_and(|p| p.is_transient()) {
        return Err(WorkspaceError::Busy(project_id));
    }

    let root = project
        .paths
        .root()
        .unwrap_or_else(|_| project_root.join(project_id.to_string()));
    if !tokio::fs::try_exists(&root).await? {
        tracing::info!(project_id, "Project has no directory to delete");
        return Ok(None);
    }
    tokio::fs::remove_dir_all(&root).await?;
    tracing::info!(project_id, root = %root.display(), "Project directory removed");
    Ok(Some(root))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
