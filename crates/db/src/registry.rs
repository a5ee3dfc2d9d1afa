//! The work-registry client interface.
//!
//! One method per remote operation the worker and API server rely on. Every
//! method returns a typed result or a [`RegistryError`]; retry policy lives
//! inside the implementations, never at call sites.

use async_trait::async_trait;
use alaska_core::paths::PathKey;
use alaska_core::progress::ProjectProgress;
use alaska_core::types::DbId;

use crate::error::RegistryError;
use crate::models::analysis::Analysis;
use crate::models::job::Job;
use crate::models::project::Project;
use crate::models::reference::Reference;
use crate::models::sample::Sample;

#[async_trait]
pub trait WorkRegistry: Send + Sync {
    // ---- jobs -------------------------------------------------------------

    /// Atomically claim the pending job with the lowest queue position.
    ///
    /// In a single indivisible step the job leaves the pending set
    /// (`queue_position` cleared, remembered in `claimed_position`), becomes
    /// `running`, records `worker_id` as its owner and gets `started_at`.
    /// Jobs whose project is at a transient checkpoint are skipped and stay
    /// queued. Returns `None` when no job is claimable. Concurrent callers
    /// never receive the same job.
    async fn claim_next_job(&self, worker_id: &str) -> Result<Option<Job>, RegistryError>;

    async fn get_job(&self, id: DbId) -> Result<Job, RegistryError>;

    async fn list_project_jobs(&self, project_id: DbId) -> Result<Vec<Job>, RegistryError>;

    /// Jobs still `running` under the given owner.
    async fn list_running_jobs(&self, worker_id: &str) -> Result<Vec<Job>, RegistryError>;

    async fn create_job(&self, project_id: DbId, analysis_id: DbId) -> Result<Job, RegistryError>;

    /// Put a job at the tail of the queue with status `queued`.
    async fn enqueue_job(&self, id: DbId, archive: bool) -> Result<Job, RegistryError>;

    async fn set_job_output_path(&self, id: DbId, path: &str) -> Result<(), RegistryError>;

    /// Append one observed control line to the job's `commands`.
    async fn append_job_command(&self, id: DbId, command: &str) -> Result<(), RegistryError>;

    /// Record a successful run.
    async fn complete_job(&self, id: DbId, runtime_secs: f64) -> Result<(), RegistryError>;

    /// Record a failed run with its diagnostic.
    async fn fail_job(&self, id: DbId, error: &str) -> Result<(), RegistryError>;

    /// Return a `running` job to the queue at its claimed position.
    ///
    /// Returns `false` (and changes nothing) if the job is not running.
    async fn requeue_job(&self, id: DbId) -> Result<bool, RegistryError>;

    /// Remove a project's still-queued jobs from the queue. Returns how many
    /// jobs were removed.
    async fn dequeue_project_jobs(&self, project_id: DbId) -> Result<u64, RegistryError>;

    // ---- analyses ---------------------------------------------------------

    async fn get_analysis(&self, id: DbId) -> Result<Analysis, RegistryError>;

    /// Active analyses ordered by pipeline step.
    async fn list_active_analyses(&self) -> Result<Vec<Analysis>, RegistryError>;

    // ---- projects and samples ---------------------------------------------

    async fn get_project(&self, id: DbId) -> Result<Project, RegistryError>;

    async fn list_projects_in(
        &self,
        progress: &[ProjectProgress],
    ) -> Result<Vec<Project>, RegistryError>;

    async fn set_project_path(
        &self,
        id: DbId,
        key: &PathKey,
        path: &str,
    ) -> Result<(), RegistryError>;

    async fn list_samples(&self, project_id: DbId) -> Result<Vec<Sample>, RegistryError>;

    async fn set_sample_path(
        &self,
        id: DbId,
        key: &PathKey,
        path: &str,
    ) -> Result<(), RegistryError>;

    /// Conditionally move a project's checkpoint to `to`.
    ///
    /// Applies only if the current checkpoint is one of `from`. Entering a
    /// transient checkpoint saves the current value in `old_progress`;
    /// entering a durable one clears it. Returns the updated project, or
    /// `None` if the precondition did not hold.
    async fn transition_progress(
        &self,
        id: DbId,
        from: &[ProjectProgress],
        to: ProjectProgress,
    ) -> Result<Option<Project>, RegistryError>;

    /// Revert a project stuck at transient checkpoint `from` to its
    /// rollback target (see [`ProjectProgress::rollback_target`]).
    ///
    /// A no-op returning `None` if the project is no longer at `from`, so
    /// repeated calls are harmless.
    async fn rollback_progress(
        &self,
        id: DbId,
        from: ProjectProgress,
    ) -> Result<Option<Project>, RegistryError>;

    // ---- references -------------------------------------------------------

    /// References whose indexes are not built yet, oldest first.
    async fn list_unbuilt_references(&self) -> Result<Vec<Reference>, RegistryError>;

    async fn mark_reference_ready(&self, id: DbId) -> Result<(), RegistryError>;
}
