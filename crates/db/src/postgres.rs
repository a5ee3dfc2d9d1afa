//! Postgres-backed [`WorkRegistry`].

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
use crate::registry::WorkRegistry;
use crate::repositories::{AnalysisRepo, JobRepo, ProjectRepo, ReferenceRepo, SampleRepo};
use crate::retry::RetryPolicy;
use crate::DbPool;

/// Registry client over a shared connection pool. Cheap to clone.
#[derive(Clone)]
pub struct PgRegistry {
    pool: DbPool,
    retry: RetryPolicy,
}

impl PgRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn progress_values(progress: &[ProjectProgress]) -> Vec<String> {
    progress.iter().map(|p| p.as_str().to_string()).collect()
}

fn found<T>(row: Option<T>, entity: &'static str, id: DbId) -> Result<T, RegistryError> {
    row.ok_or(RegistryError::NotFound { entity, id })
}

fn affected(updated: bool, entity: &'static str, id: DbId) -> Result<(), RegistryError> {
    if updated {
        Ok(())
    } else {
        Err(RegistryError::NotFound { entity, id })
    }
}

#[async_trait]
impl WorkRegistry for PgRegistry {
    async fn claim_next_job(&self, worker_id: &str) -> Result<Option<Job>, RegistryError> {
        let pool = &self.pool;
        let busy = &progress_values(&ProjectProgress::TRANSIENT);
        self.retry
            .run_unrepeatable("claim_next_job", move || async move {
                Ok(JobRepo::claim_next(pool, worker_id, busy).await?)
            })
            .await
    }

    async fn get_job(&self, id: DbId) -> Result<Job, RegistryError> {
        let pool = &self.pool;
        let row = self
            .retry
            .run("get_job", move || async move {
                Ok(JobRepo::find_by_id(pool, id).await?)
            })
            .await?;
        found(row, "Job", id)
    }

    async fn list_project_jobs(&self, project_id: DbId) -> Result<Vec<Job>, RegistryError> {
        let pool = &self.pool;
        self.retry
            .run("list_project_jobs", move || async move {
                Ok(JobRepo::list_by_project(pool, project_id).await?)
            })
            .await
    }

    async fn list_running_jobs(&self, worker_id: &str) -> Result<Vec<Job>, RegistryError> {
        let pool = &self.pool;
        self.retry
            .run("list_running_jobs", move || async move {
                Ok(JobRepo::list_running_by_worker(pool, worker_id).await?)
            })
            .await
    }

    async fn create_job(&self, project_id: DbId, analysis_id: DbId) -> Result<Job, RegistryError> {
        let pool = &self.pool;
        self.retry
            .run_unrepeatable("create_job", move || async move {
                Ok(JobRepo::create(pool, project_id, analysis_id).await?)
            })
            .await
    }

    async fn enqueue_job(&self, id: DbId, archive: bool) -> Result<Job, RegistryError> {
        let pool = &self.pool;
        let row = self
            .retry
            .run("enqueue_job", move || async move {
                Ok(JobRepo::enqueue(pool, id, archive).await?)
            })
            .await?;
        match row {
            Some(job) => Ok(job),
            None => {
                // Distinguish a missing job from one that is mid-run.
                let job = self.get_job(id).await?;
                Err(RegistryError::Conflict(format!(
                    "job {} is {} and cannot be queued",
                    job.id,
                    job.status().map(|s| s.name()).unwrap_or("in an unknown state")
                )))
            }
        }
    }

    async fn set_job_output_path(&self, id: DbId, path: &str) -> Result<(), RegistryError> {
        let pool = &self.pool;
        let updated = self
            .retry
            .run("set_job_output_path", move || async move {
                Ok(JobRepo::set_output_path(pool, id, path).await?)
            })
            .await?;
        affected(updated, "Job", id)
    }

    async fn append_job_command(&self, id: DbId, command: &str) -> Result<(), RegistryError> {
        let pool = &self.pool;
        let updated = self
            .retry
            .run_unrepeatable("append_job_command", move || async move {
                Ok(JobRepo::append_command(pool, id, command).await?)
            })
            .await?;
        affected(updated, "Job", id)
    }

    async fn complete_job(&self, id: DbId, runtime_secs: f64) -> Result<(), RegistryError> {
        let pool = &self.pool;
        let updated = self
            .retry
            .run("complete_job", move || async move {
                Ok(JobRepo::complete(pool, id, runtime_secs).await?)
            })
            .await?;
        affected(updated, "Job", id)
    }

    async fn fail_job(&self, id: DbId, error: &str) -> Result<(), RegistryError> {
        let pool = &self.pool;
        let updated = self
            .retry
            .run("fail_job", move || async move {
                Ok(JobRepo::fail(pool, id, error).await?)
            })
            .await?;
        affected(updated, "Job", id)
    }

    async fn requeue_job(&self, id: DbId) -> Result<bool, RegistryError> {
        let pool = &self.pool;
        self.retry
            .run("requeue_job", move || async move {
                Ok(JobRepo::requeue(pool, id).await?)
            })
            .await
    }

    async fn dequeue_project_jobs(&self, project_id: DbId) -> Result<u64, RegistryError> {
        let pool = &self.pool;
        self.retry
            .run("dequeue_project_jobs", move || async move {
                Ok(JobRepo::dequeue_project(pool, project_id).await?)
            })
            .await
    }

    async fn get_analysis(&self, id: DbId) -> Result<Analysis, RegistryError> {
        let pool = &self.pool;
        let row = self
            .retry
            .run("get_analysis", move || async move {
                Ok(AnalysisRepo::find_by_id(pool, id).await?)
            })
            .await?;
        found(row, "Analysis", id)
    }

    async fn list_active_analyses(&self) -> Result<Vec<Analysis>, RegistryError> {
        let pool = &self.pool;
        self.retry
            .run("list_active_analyses", move || async move {
                Ok(AnalysisRepo::list_active(pool).await?)
            })
            .await
    }

    async fn get_project(&self, id: DbId) -> Result<Project, RegistryError> {
        let pool = &self.pool;
        let row = self
            .retry
            .run("get_project", move || async move {
                Ok(ProjectRepo::find_by_id(pool, id).await?)
            })
            .await?;
        found(row, "Project", id)
    }

    async fn list_projects_in(
        &self,
        progress: &[ProjectProgress],
    ) -> Result<Vec<Project>, RegistryError> {
        let pool = &self.pool;
        let values = &progress_values(progress);
        self.retry
            .run("list_projects_in", move || async move {
                Ok(ProjectRepo::list_by_progress(pool, values).await?)
            })
            .await
    }

    async fn set_project_path(
        &self,
        id: DbId,
        key: &PathKey,
        path: &str,
    ) -> Result<(), RegistryError> {
        let pool = &self.pool;
        let key = key.as_str();
        let updated = self
            .retry
            .run("set_project_path", move || async move {
                Ok(ProjectRepo::set_path(pool, id, key, path).await?)
            })
            .await?;
        affected(updated, "Project", id)
    }

    async fn list_samples(&self, project_id: DbId) -> Result<Vec<Sample>, RegistryError> {
        let pool = &self.pool;
        self.retry
            .run("list_samples", move || async move {
                Ok(SampleRepo::list_by_project(pool, project_id).await?)
            })
            .await
    }

    async fn set_sample_path(
        &self,
        id: DbId,
        key: &PathKey,
        path: &str,
    ) -> Result<(), RegistryError> {
        let pool = &self.pool;
        let key = key.as_str();
        let updated = self
            .retry
            .run("set_sample_path", move || async move {
                Ok(SampleRepo::set_path(pool, id, key, path).await?)
            })
            .await?;
        affected(updated, "Sample", id)
    }

    async fn transition_progress(
        &self,
        id: DbId,
        from: &[ProjectProgress],
        to: ProjectProgress,
    ) -> Result<Option<Project>, RegistryError> {
        let pool = &self.pool;
        let from = &progress_values(from);
        let save_old = to.is_transient();
        self.retry
            .run_unrepeatable("transition_progress", move || async move {
                Ok(ProjectRepo::transition(pool, id, from, to.as_str(), save_old).await?)
            })
            .await
    }

    async fn rollback_progress(
        &self,
        id: DbId,
        from: ProjectProgress,
    ) -> Result<Option<Project>, RegistryError> {
        let project = self.get_project(id).await?;
        if project.progress()? != from {
            return Ok(None);
        }
        let Some(target) = from.rollback_target(project.saved_progress()) else {
            return Ok(None);
        };
        tracing::info!(
            project_id = id,
            from = %from,
            to = %target,
            "Rolling back project progress"
        );
        self.transition_progress(id, &[from], target).await
    }

    async fn list_unbuilt_references(&self) -> Result<Vec<Reference>, RegistryError> {
        let pool = &self.pool;
        self.retry
            .run("list_unbuilt_references", move || async move {
                Ok(ReferenceRepo::list_unbuilt(pool).await?)
            })
            .await
    }

    async fn mark_reference_ready(&self, id: DbId) -> Result<(), RegistryError> {
        let pool = &self.pool;
        let updated = self
            .retry
            .run("mark_reference_ready", move || async move {
                Ok(ReferenceRepo::mark_ready(pool, id).await?)
            })
            .await?;
        affected(updated, "Reference", id)
    }
}
