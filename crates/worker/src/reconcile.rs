//! Crash-safety for in-flight work.
//!
//! [`shutdown`] runs after a termination signal and settles the run left in
//! the [`ActiveSlot`]. [`startup`] runs before the loop and repairs state
//! left behind by a process that died without reaching [`shutdown`].
//! Neither fires the job success or failure hooks: an interrupted job goes
//! back to the queue at the position it was claimed from.

use alaska_core::analysis::sandbox_name;
use alaska_core::progress::ProjectProgress;
use alaska_core::types::DbId;
use alaska_db::models::job::Job;
use alaska_db::models::status::JobStatus;
use alaska_db::{RegistryError, WorkRegistry};
use alaska_sandbox::{stop_and_remove, Sandbox, SandboxHandle};

use crate::slot::{ActiveRun, ActiveSlot};

/// Stop the active sandbox, if any, and return its job to the queue.
///
/// Returns the run that was interrupted.
pub async fn shutdown(
    slot: &ActiveSlot,
    registry: &dyn WorkRegistry,
    sandbox: &dyn Sandbox,
) -> Result<Option<ActiveRun>, RegistryError> {
    let Some(run) = slot.take() else {
        tracing::info!("No active job at shutdown");
        return Ok(None);
    };

    if let Some(handle) = &run.sandbox {
        match sandbox.stop(handle).await {
            Ok(()) => {}
            Err(e) if e.is_gone() => {
                tracing::debug!(sandbox = %handle.name, "Sandbox already stopped");
            }
            Err(e) => {
                tracing::warn!(sandbox = %handle.name, error = %e, "Failed to stop sandbox");
            }
        }
        match sandbox.remove(handle, true).await {
            Ok(()) => {}
            Err(e) if e.is_gone() => {}
            Err(e) => {
                tracing::warn!(sandbox = %handle.name, error = %e, "Failed to remove sandbox");
            }
        }
    }

    let requeued = registry.requeue_job(run.job_id).await?;
    let rolled_back = registry
        .rollback_progress(run.project_id, ProjectProgress::Analyzing)
        .await?;
    tracing::info!(
        job_id = run.job_id,
        project_id = run.project_id,
        requeued,
        progress = rolled_back.as_ref().map(|p| p.progress.as_str()),
        "Interrupted job settled"
    );
    Ok(Some(run))
}

/// What [`startup`] repaired.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub requeued_jobs: Vec<DbId>,
    pub rolled_back_projects: Vec<DbId>,
}

impl StartupReport {
    pub fn is_empty(&self) -> bool {
        self.requeued_jobs.is_empty() && self.rolled_back_projects.is_empty()
    }
}

/// Requeue jobs still marked running under `worker_id` and roll back any
/// project left at `analyzing` with no running job.
///
/// The sandbox each orphaned job was running under is stopped and removed
/// first, so the rerun does not collide with its name.
///
/// Idempotent: a second call with no intervening change finds nothing to do.
pub async fn startup(
    registry: &dyn WorkRegistry,
    sandbox: &dyn Sandbox,
    worker_id: &str,
) -> Result<StartupReport, RegistryError> {
    let mut report = StartupReport::default();

    for job in registry.list_running_jobs(worker_id).await? {
        remove_leftover_sandbox(registry, sandbox, &job).await?;
        if registry.requeue_job(job.id).await? {
            tracing::warn!(job_id = job.id, "Requeued job orphaned by an earlier run");
            report.requeued_jobs.push(job.id);
        }
    }

    for project in registry
        .list_projects_in(&[ProjectProgress::Analyzing])
        .await?
    {
        let jobs = registry.list_project_jobs(project.id).await?;
        let owned = jobs
            .iter()
            .any(|j| j.status() == Some(JobStatus::Running));
        if owned {
            continue;
        }
        if registry
            .rollback_progress(project.id, ProjectProgress::Analyzing)
            .await?
            .is_some()
        {
            tracing::warn!(project_id = project.id, "Rolled back orphaned analysis checkpoint");
            report.rolled_back_projects.push(project.id);
        }
    }

    if report.is_empty() {
        tracing::info!("Startup reconciliation found nothing to repair");
    }
    Ok(report)
}

async fn remove_leftover_sandbox(
    registry: &dyn WorkRegistry,
    sandbox: &dyn Sandbox,
    job: &Job,
) -> Result<(), RegistryError> {
    let analysis = registry.get_analysis(job.analysis_id).await?;
    let handle = SandboxHandle::new(sandbox_name(&analysis.code, job.project_id));
    match stop_and_remove(sandbox, &handle).await {
        Ok(()) => tracing::info!(job_id = job.id, sandbox = %handle.name, "Removed leftover sandbox"),
        Err(e) => {
            tracing::warn!(job_id = job.id, sandbox = %handle.name, error = %e, "Failed to remove leftover sandbox");
        }
    }
    Ok(())
}
