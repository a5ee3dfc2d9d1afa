//! In-process [`WorkRegistry`] for tests and local runs.
//!
//! Every operation takes a single lock over the whole state, which gives
//! the same atomicity the Postgres implementation gets from row locks: a
//! claim is one critical section, so concurrent callers never observe the
//! same pending job.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use alaska_core::paths::{PathKey, ResourceFiles, ResourcePaths};
use alaska_core::progress::ProjectProgress;
use alaska_core::types::DbId;

use crate::error::RegistryError;
use crate::models::analysis::{Analysis, CreateAnalysis};
use crate::models::job::Job;
use crate::models::project::{CreateProject, Project};
use crate::models::reference::{CreateReference, Reference};
use crate::models::sample::Sample;
use crate::models::status::JobStatus;
use crate::registry::WorkRegistry;

#[derive(Default)]
struct State {
    next_id: DbId,
    analyses: BTreeMap<DbId, Analysis>,
    projects: BTreeMap<DbId, Project>,
    samples: BTreeMap<DbId, Sample>,
    jobs: BTreeMap<DbId, Job>,
    references: BTreeMap<DbId, Reference>,
}

impl State {
    fn allocate_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn next_position(&self) -> i32 {
        self.jobs
            .values()
            .filter_map(|j| j.queue_position)
            .max()
            .map_or(0, |p| p + 1)
    }

    fn job_mut(&mut self, id: DbId) -> Result<&mut Job, RegistryError> {
        self.jobs
            .get_mut(&id)
            .ok_or(RegistryError::NotFound { entity: "Job", id })
    }

    fn project_busy(&self, id: DbId) -> bool {
        self.projects
            .get(&id)
            .and_then(|p| p.progress().ok())
            .is_some_and(ProjectProgress::is_transient)
    }

    fn project_mut(&mut self, id: DbId) -> Result<&mut Project, RegistryError> {
        self.projects
            .get_mut(&id)
            .ok_or(RegistryError::NotFound { entity: "Project", id })
    }
}

#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_analysis(&self, input: CreateAnalysis) -> Analysis {
        let mut state = self.lock();
        let now = Utc::now();
        let analysis = Analysis {
            id: state.allocate_id(),
            code: input.code,
            kind: input.kind.as_str().to_string(),
            image: input.image,
            script: input.script,
            requires_id: input.requires_id,
            step: input.step,
            active: input.active,
            created_at: now,
            updated_at: now,
        };
        state.analyses.insert(analysis.id, analysis.clone());
        analysis
    }

    /// Insert a project at `initialized`.
    pub fn insert_project(&self, input: CreateProject) -> Project {
        let mut state = self.lock();
        let now = Utc::now();
        let project = Project {
            id: state.allocate_id(),
            progress: ProjectProgress::Initialized.as_str().to_string(),
            old_progress: None,
            paths: Json(input.paths),
            files: Json(ResourceFiles::default()),
            owner_email: input.owner_email,
            created_at: now,
            updated_at: now,
        };
        state.projects.insert(project.id, project.clone());
        project
    }

    pub fn insert_sample(&self, project_id: DbId, name: &str, paths: ResourcePaths) -> Sample {
        let mut state = self.lock();
        let now = Utc::now();
        let sample = Sample {
            id: state.allocate_id(),
            project_id,
            name: name.to_string(),
            paths: Json(paths),
            files: Json(ResourceFiles::default()),
            created_at: now,
            updated_at: now,
        };
        state.samples.insert(sample.id, sample.clone());
        sample
    }

    /// Insert a reference whose index is not built.
    pub fn insert_reference(&self, input: CreateReference) -> Reference {
        let mut state = self.lock();
        let now = Utc::now();
        let reference = Reference {
            id: state.allocate_id(),
            organism: input.organism,
            version: input.version,
            ready: false,
            created_at: now,
            updated_at: now,
        };
        state.references.insert(reference.id, reference.clone());
        reference
    }

    /// Overwrite a project's checkpoint and saved checkpoint directly,
    /// bypassing the transition rules.
    pub fn force_progress(
        &self,
        id: DbId,
        progress: ProjectProgress,
        old_progress: Option<ProjectProgress>,
    ) -> Result<(), RegistryError> {
        let mut state = self.lock();
        let project = state.project_mut(id)?;
        project.progress = progress.as_str().to_string();
        project.old_progress = old_progress.map(|p| p.as_str().to_string());
        project.updated_at = Utc::now();
        Ok(())
    }

    /// Record an artifact in a project's `files` map.
    pub fn set_project_file(
        &self,
        id: DbId,
        code: &str,
        name: &str,
        path: &str,
    ) -> Result<(), RegistryError> {
        let mut state = self.lock();
        let project = state.project_mut(id)?;
        project.files.0.insert(code, name, path);
        Ok(())
    }
}

#[async_trait]
impl WorkRegistry for MemoryRegistry {
    async fn claim_next_job(&self, worker_id: &str) -> Result<Option<Job>, RegistryError> {
        let mut state = self.lock();
        let next = state
            .jobs
            .values()
            .filter(|j| !state.project_busy(j.project_id))
            .filter_map(|j| j.queue_position.map(|pos| (pos, j.id)))
            .min();
        let Some((_, id)) = next else {
            return Ok(None);
        };
        let job = state.job_mut(id)?;
        job.claimed_position = job.queue_position.take();
        job.status_id = JobStatus::Running.id();
        job.claimed_by = Some(worker_id.to_string());
        job.started_at = Some(Utc::now());
        job.finished_at = None;
        Ok(Some(job.clone()))
    }

    async fn get_job(&self, id: DbId) -> Result<Job, RegistryError> {
        let mut state = self.lock();
        state.job_mut(id).map(|j| j.clone())
    }

    async fn list_project_jobs(&self, project_id: DbId) -> Result<Vec<Job>, RegistryError> {
        let state = self.lock();
        Ok(state
            .jobs
            .values()
            .filter(|j| j.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn list_running_jobs(&self, worker_id: &str) -> Result<Vec<Job>, RegistryError> {
        let state = self.lock();
        Ok(state
            .jobs
            .values()
            .filter(|j| {
                j.status() == Some(JobStatus::Running)
                    && j.claimed_by.as_deref() == Some(worker_id)
            })
            .cloned()
            .collect())
    }

    async fn create_job(&self, project_id: DbId, analysis_id: DbId) -> Result<Job, RegistryError> {
        let mut state = self.lock();
        if !state.projects.contains_key(&project_id) {
            return Err(RegistryError::NotFound { entity: "Project", id: project_id });
        }
        if !state.analyses.contains_key(&analysis_id) {
            return Err(RegistryError::NotFound { entity: "Analysis", id: analysis_id });
        }
        let now = Utc::now();
        let job = Job {
            id: state.allocate_id(),
            project_id,
            analysis_id,
            status_id: JobStatus::Queued.id(),
            queue_position: None,
            claimed_position: None,
            claimed_by: None,
            commands: Vec::new(),
            output_path: None,
            archive: false,
            runtime_secs: None,
            error_message: None,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn enqueue_job(&self, id: DbId, archive: bool) -> Result<Job, RegistryError> {
        let mut state = self.lock();
        let position = state.next_position();
        let job = state.job_mut(id)?;
        if job.status() == Some(JobStatus::Running) {
            return Err(RegistryError::Conflict(format!(
                "job {id} is running and cannot be queued"
            )));
        }
        job.status_id = JobStatus::Queued.id();
        job.archive = archive;
        job.queue_position = Some(position);
        job.claimed_position = None;
        job.claimed_by = None;
        job.error_message = None;
        job.finished_at = None;
        Ok(job.clone())
    }

    async fn set_job_output_path(&self, id: DbId, path: &str) -> Result<(), RegistryError> {
        let mut state = self.lock();
        state.job_mut(id)?.output_path = Some(path.to_string());
        Ok(())
    }

    async fn append_job_command(&self, id: DbId, command: &str) -> Result<(), RegistryError> {
        let mut state = self.lock();
        state.job_mut(id)?.commands.push(command.to_string());
        Ok(())
    }

    async fn complete_job(&self, id: DbId, runtime_secs: f64) -> Result<(), RegistryError> {
        let mut state = self.lock();
        let job = state.job_mut(id)?;
        job.status_id = JobStatus::Success.id();
        job.runtime_secs = Some(runtime_secs);
        job.queue_position = None;
        job.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn fail_job(&self, id: DbId, error: &str) -> Result<(), RegistryError> {
        let mut state = self.lock();
        let job = state.job_mut(id)?;
        job.status_id = JobStatus::Error.id();
        job.error_message = Some(error.to_string());
        job.queue_position = None;
        job.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn requeue_job(&self, id: DbId) -> Result<bool, RegistryError> {
        let mut state = self.lock();
        let fallback = state.next_position();
        let job = state.job_mut(id)?;
        if job.status() != Some(JobStatus::Running) {
            return Ok(false);
        }
        job.status_id = JobStatus::Queued.id();
        job.queue_position = Some(job.claimed_position.take().unwrap_or(fallback));
        job.claimed_by = None;
        job.started_at = None;
        Ok(true)
    }

    async fn dequeue_project_jobs(&self, project_id: DbId) -> Result<u64, RegistryError> {
        let mut state = self.lock();
        let mut removed = 0;
        for job in state.jobs.values_mut() {
            if job.project_id == project_id
                && job.status() == Some(JobStatus::Queued)
                && job.queue_position.take().is_some()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn get_analysis(&self, id: DbId) -> Result<Analysis, RegistryError> {
        let state = self.lock();
        state
            .analyses
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound { entity: "Analysis", id })
    }

    async fn list_active_analyses(&self) -> Result<Vec<Analysis>, RegistryError> {
        let state = self.lock();
        let mut active: Vec<Analysis> =
            state.analyses.values().filter(|a| a.active).cloned().collect();
        active.sort_by_key(|a| (a.step, a.id));
        Ok(active)
    }

    async fn get_project(&self, id: DbId) -> Result<Project, RegistryError> {
        let mut state = self.lock();
        state.project_mut(id).map(|p| p.clone())
    }

    async fn list_projects_in(
        &self,
        progress: &[ProjectProgress],
    ) -> Result<Vec<Project>, RegistryError> {
        let state = self.lock();
        Ok(state
            .projects
            .values()
            .filter(|p| progress.iter().any(|want| want.as_str() == p.progress))
            .cloned()
            .collect())
    }

    async fn set_project_path(
        &self,
        id: DbId,
        key: &PathKey,
        path: &str,
    ) -> Result<(), RegistryError> {
        let mut state = self.lock();
        state.project_mut(id)?.paths.0.insert(key.clone(), path);
        Ok(())
    }

    async fn list_samples(&self, project_id: DbId) -> Result<Vec<Sample>, RegistryError> {
        let state = self.lock();
        let mut samples: Vec<Sample> = state
            .samples
            .values()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect();
        samples.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(samples)
    }

    async fn set_sample_path(
        &self,
        id: DbId,
        key: &PathKey,
        path: &str,
    ) -> Result<(), RegistryError> {
        let mut state = self.lock();
        let sample = state
            .samples
            .get_mut(&id)
            .ok_or(RegistryError::NotFound { entity: "Sample", id })?;
        sample.paths.0.insert(key.clone(), path);
        Ok(())
    }

    async fn transition_progress(
        &self,
        id: DbId,
        from: &[ProjectProgress],
        to: ProjectProgress,
    ) -> Result<Option<Project>, RegistryError> {
        let mut state = self.lock();
        let project = state.project_mut(id)?;
        if !from.iter().any(|p| p.as_str() == project.progress) {
            return Ok(None);
        }
        project.old_progress = to.is_transient().then(|| project.progress.clone());
        project.progress = to.as_str().to_string();
        project.updated_at = Utc::now();
        Ok(Some(project.clone()))
    }

    async fn rollback_progress(
        &self,
        id: DbId,
        from: ProjectProgress,
    ) -> Result<Option<Project>, RegistryError> {
        let mut state = self.lock();
        let project = state.project_mut(id)?;
        if project.progress != from.as_str() {
            return Ok(None);
        }
        let Some(target) = from.rollback_target(project.saved_progress()) else {
            return Ok(None);
        };
        project.progress = target.as_str().to_string();
        project.old_progress = None;
        project.updated_at = Utc::now();
        Ok(Some(project.clone()))
    }

    async fn list_unbuilt_references(&self) -> Result<Vec<Reference>, RegistryError> {
        let state = self.lock();
        Ok(state
            .references
            .values()
            .filter(|r| !r.ready)
            .cloned()
            .collect())
    }

    async fn mark_reference_ready(&self, id: DbId) -> Result<(), RegistryError> {
        let mut state = self.lock();
        let reference = state
            .references
            .get_mut(&id)
            .ok_or(RegistryError::NotFound { entity: "Reference", id })?;
        reference.ready = true;
        reference.updated_at = Utc::now();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
