//! The job dispatch loop.
//!
//! One iteration claims the next job, prepares its working directories,
//! runs its sandbox while capturing output, and fires exactly one of the
//! success or failure hooks. Per-job errors never escape an iteration.
//!
//! A hook that fails leaves its settlement pending. The next iteration
//! retries it before claiming anything else, and the job keeps its slot
//! until it lands, so shutdown reconciliation can still requeue it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use alaska_core::analysis::{job_command, output_file_name, sandbox_name, AnalysisKind};
use alaska_core::paths::PathKey;
use alaska_core::progress::ProjectProgress;
use alaska_core::types::DbId;
use alaska_db::models::analysis::Analysis;
use alaska_db::models::job::Job;
use alaska_db::models::project::Project;
use alaska_db::{RegistryError, WorkRegistry};
use alaska_sandbox::{stop_and_remove, Sandbox, SandboxSettings};
use tokio_util::sync::CancellationToken;

use crate::capture::capture_output;
use crate::error::DispatchError;
use crate::hooks::JobHooks;
use crate::slot::{ActiveRun, ActiveSlot};

/// Loop parameters.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub tail_lines: usize,
}

/// Result of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The queue was empty.
    Idle,
    Succeeded(DbId),
    Failed(DbId),
    /// The job was claimed but put back because its project became busy
    /// between the claim and the checkpoint move.
    Released(DbId),
    /// The job ran but its settlement hook failed; it is retried before the
    /// next claim.
    Deferred(DbId),
}

impl Outcome {
    /// Whether the loop should wait before claiming again.
    pub fn should_idle(self) -> bool {
        matches!(self, Self::Idle | Self::Released(_) | Self::Deferred(_))
    }
}

#[derive(Debug, Clone)]
enum Settlement {
    Succeeded { runtime_secs: f64 },
    Failed { detail: String },
}

#[derive(Debug, Clone)]
struct PendingSettle {
    job: Job,
    settlement: Settlement,
}

pub struct Dispatcher {
    registry: Arc<dyn WorkRegistry>,
    sandbox: Arc<dyn Sandbox>,
    hooks: Arc<dyn JobHooks>,
    settings: SandboxSettings,
    config: DispatcherConfig,
    slot: ActiveSlot,
    pending: Mutex<Option<PendingSettle>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn WorkRegistry>,
        sandbox: Arc<dyn Sandbox>,
        hooks: Arc<dyn JobHooks>,
        settings: SandboxSettings,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            sandbox,
            hooks,
            settings,
            config,
            slot: ActiveSlot::new(),
            pending: Mutex::new(None),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingSettle>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared reference to the active-run slot, for the shutdown path.
    pub fn slot(&self) -> ActiveSlot {
        self.slot.clone()
    }

    /// Run until `cancel` fires. An in-flight iteration is abandoned at its
    /// next await point; the slot then still describes it for reconciliation.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(worker_id = %self.config.worker_id, "Dispatcher started");
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.run_once() => outcome,
            };
            let idle = match outcome {
                Ok(outcome) => outcome.should_idle(),
                Err(e) => {
                    tracing::error!(error = %e, "Dispatcher iteration failed");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }
        tracing::info!("Dispatcher stopped");
    }

    /// Claim and drive at most one job.
    ///
    /// A pending settlement is retried first; while it keeps failing the
    /// error is returned and nothing new is claimed.
    pub async fn run_once(&self) -> Result<Outcome, RegistryError> {
        self.settle_pending().await?;

        let Some(job) = self.registry.claim_next_job(&self.config.worker_id).await? else {
            return Ok(Outcome::Idle);
        };
        tracing::info!(job_id = job.id, project_id = job.project_id, "Claimed job");

        self.slot.set(ActiveRun::new(job.id, job.project_id));
        let outcome = self.drive(&job).await;
        if !matches!(outcome, Outcome::Deferred(_)) {
            self.slot.clear();
        }
        Ok(outcome)
    }

    /// Retry a settlement whose hook failed earlier. Succeeds trivially when
    /// nothing is pending.
    pub async fn settle_pending(&self) -> Result<(), RegistryError> {
        let Some(pending) = self.lock_pending().clone() else {
            return Ok(());
        };
        self.settle(&pending.job, &pending.settlement).await?;
        tracing::info!(job_id = pending.job.id, "Deferred settlement recorded");
        self.lock_pending().take();
        self.slot.clear();
        Ok(())
    }

    async fn settle(&self, job: &Job, settlement: &Settlement) -> Result<(), RegistryError> {
        match settlement {
            Settlement::Succeeded { runtime_secs } => {
                self.hooks.job_succeeded(job, *runtime_secs).await
            }
            Settlement::Failed { detail } => self.hooks.job_failed(job, detail).await,
        }
    }

    async fn finish(&self, job: &Job, settlement: Settlement, done: Outcome) -> Outcome {
        match self.settle(job, &settlement).await {
            Ok(()) => done,
            Err(e) => {
                tracing::error!(job_id = job.id, error = %e, "Settlement hook failed, deferring");
                *self.lock_pending() = Some(PendingSettle {
                    job: job.clone(),
                    settlement,
                });
                Outcome::Deferred(job.id)
            }
        }
    }

    async fn drive(&self, job: &Job) -> Outcome {
        match self.execute(job).await {
            Ok(runtime_secs) => {
                tracing::info!(job_id = job.id, runtime_secs, "Job succeeded");
                self.finish(job, Settlement::Succeeded { runtime_secs }, Outcome::Succeeded(job.id))
                    .await
            }
            Err(DispatchError::ProjectBusy { project_id }) => {
                tracing::info!(job_id = job.id, project_id, "Project busy, returning job to queue");
                if let Err(e) = self.registry.requeue_job(job.id).await {
                    tracing::error!(job_id = job.id, error = %e, "Failed to requeue job");
                }
                Outcome::Released(job.id)
            }
            Err(e) => {
                tracing::error!(job_id = job.id, error = %e, "Job failed");
                let detail = e.to_string();
                self.finish(job, Settlement::Failed { detail }, Outcome::Failed(job.id))
                    .await
            }
        }
    }

    /// Run the job's sandbox to completion and return its wall-clock runtime.
    async fn execute(&self, job: &Job) -> Result<f64, DispatchError> {
        let analysis = self.registry.get_analysis(job.analysis_id).await?;
        let requires = match analysis.requires_id {
            Some(id) => Some(self.registry.get_analysis(id).await?.code),
            None => None,
        };
        let kind = analysis.kind()?;

        let project = self
            .registry
            .transition_progress(
                job.project_id,
                &ProjectProgress::DURABLE,
                ProjectProgress::Analyzing,
            )
            .await?
            .ok_or(DispatchError::ProjectBusy {
                project_id: job.project_id,
            })?;

        let work_dir = self.prepare(&project, &analysis, kind).await?;
        let log_path = work_dir.join(output_file_name(&analysis.code));
        self.registry
            .set_job_output_path(job.id, &log_path.to_string_lossy())
            .await?;
        remove_stale_log(&log_path).await?;

        if let Err(e) = self.hooks.job_started(job).await {
            tracing::warn!(job_id = job.id, error = %e, "Start hook failed");
        }

        let command = job_command(
            &analysis.script,
            project.id,
            &analysis.code,
            requires.as_deref(),
            job.archive,
        );
        let mut spec = self.settings.spec(
            sandbox_name(&analysis.code, project.id),
            &analysis.image,
            command,
        );
        spec.cpuset = Some(self.settings.cpus.clone());

        let started = Instant::now();
        let run = self.sandbox.run(&spec).await?;
        self.slot.attach(run.handle.clone());
        tracing::info!(job_id = job.id, sandbox = %run.handle.name, "Sandbox launched");

        let summary = match capture_output(
            run.output,
            &log_path,
            job.id,
            self.registry.as_ref(),
            self.config.tail_lines,
        )
        .await
        {
            Ok(summary) => summary,
            Err(e) => {
                if let Err(stop_err) = stop_and_remove(self.sandbox.as_ref(), &run.handle).await {
                    tracing::warn!(sandbox = %run.handle.name, error = %stop_err, "Failed to stop sandbox");
                }
                return Err(e);
            }
        };

        let code = run.exit.await?;
        let runtime_secs = started.elapsed().as_secs_f64();
        tracing::info!(
            job_id = job.id,
            sandbox = %run.handle.name,
            exit_code = code,
            lines = summary.lines,
            commands = summary.commands,
            "Sandbox exited"
        );

        if code != 0 {
            return Err(DispatchError::NonZeroExit {
                sandbox: run.handle.name,
                code,
                tail: summary.tail,
            });
        }
        Ok(runtime_secs)
    }

    /// Ensure the analysis working directory exists for the project and,
    /// for per-sample analyses, for each of its samples.
    async fn prepare(
        &self,
        project: &Project,
        analysis: &Analysis,
        kind: AnalysisKind,
    ) -> Result<PathBuf, DispatchError> {
        let key = PathKey::analysis(&analysis.code)?;

        let work_dir = match project.paths.get(&key) {
            Some(path) => PathBuf::from(path),
            None => {
                let path = project.paths.root()?.join(&analysis.code);
                self.registry
                    .set_project_path(project.id, &key, &path.to_string_lossy())
                    .await?;
                path
            }
        };
        tokio::fs::create_dir_all(&work_dir).await?;

        if kind == AnalysisKind::Sample {
            for sample in self.registry.list_samples(project.id).await? {
                let sample_dir = match sample.paths.get(&key) {
                    Some(path) => PathBuf::from(path),
                    None => {
                        let path = work_dir.join(&sample.name);
                        self.registry
                            .set_sample_path(sample.id, &key, &path.to_string_lossy())
                            .await?;
                        path
                    }
                };
                tokio::fs::create_dir_all(&sample_dir).await?;
            }
        }
        Ok(work_dir)
    }
}

/// Delete a log left behind by an earlier run of the same job.
async fn remove_stale_log(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
