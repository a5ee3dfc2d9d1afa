//! Startup repair for checkpoints left by tasks of a previous process.

use alaska_core::progress::ProjectProgress;
use alaska_core::types::DbId;
use alaska_db::{RegistryError, WorkRegistry};

use super::TaskKind;

/// Roll back every project left at a task's running checkpoint.
///
/// Must run before the server accepts requests: at that point no task of
/// this process can own a checkpoint, so every one found is orphaned.
/// Idempotent: a second call finds nothing to do.
pub async fn rollback_orphaned(registry: &dyn WorkRegistry) -> Result<Vec<DbId>, RegistryError> {
    let running: Vec<ProjectProgress> = [TaskKind::Compile, TaskKind::Upload, TaskKind::Session]
        .into_iter()
        .filter_map(TaskKind::checkpoints)
        .map(|c| c.running)
        .collect();

    let mut rolled_back = Vec::new();
    for project in registry.list_projects_in(&running).await? {
        let from = project.progress()?;
        if let Some(updated) = registry.rollback_progress(project.id, from).await? {
            tracing::warn!(
                project_id = project.id,
                from = %from,
                to = %updated.progress,
                "Rolled back orphaned task checkpoint"
            );
            rolled_back.push(project.id);
        }
    }
    Ok(rolled_back)
}
