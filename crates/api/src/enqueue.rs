//! Putting a project's analysis pipeline on the job queue.

use std::path::Path;

use alaska_core::paths::PathKey;
use alaska_core::progress::ProjectProgress;
use alaska_core::types::DbId;
use alaska_db::models::job::Job;
use alaska_db::models::status::JobStatus;
use alaska_db::{RegistryError, WorkRegistry};

/// Queue every unfinished analysis step of a project.
///
/// Steps run in `step` order. Each active analysis reuses the project's
/// existing job or gets a new one; jobs that already succeeded are left
/// alone, so restarting a failed project only re-runs what did not finish.
/// The last queued job carries the archive flag. The project moves to
/// `finalized` first, which fails with a conflict while any task or
/// analysis owns it.
pub async fn start_project(
    registry: &dyn WorkRegistry,
    project_id: DbId,
    project_root: &Path,
) -> Result<Vec<Job>, RegistryError> {
    let project = registry.get_project(project_id).await?;
    if !project.paths.contains(&PathKey::Root) {
        let root = project_root.join(project_id.to_string());
        registry
            .set_project_path(project_id, &PathKey::Root, &root.to_string_lossy())
            .await?;
    }

    let existing = registry.list_project_jobs(project_id).await?;
    let mut pending = Vec::new();
    for analysis in registry.list_active_analyses().await? {
        let job = match existing.iter().find(|j| j.analysis_id == analysis.id) {
            Some(job) => job.clone(),
            None => registry.create_job(project_id, analysis.id).await?,
        };
        if job.status() != Some(JobStatus::Success) {
            pending.push(job);
        }
    }
    if pending.is_empty() {
        tracing::info!(project_id, "Every analysis already succeeded, nothing to queue");
        return Ok(Vec::new());
    }

    registry
        .transition_progress(project_id, &ProjectProgress::DURABLE, ProjectProgress::Finalized)
        .await?
        .ok_or_else(|| {
            RegistryError::Conflict(format!("project {project_id} is busy and cannot be started"))
        })?;

    let last = pending.len() - 1;
    let mut queued = Vec::with_capacity(pending.len());
    for (i, job) in pending.iter().enumerate() {
        queued.push(registry.enqueue_job(job.id, i == last).await?);
    }
    tracing::info!(project_id, jobs = queued.len(), "Project queued");
    Ok(queued)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
