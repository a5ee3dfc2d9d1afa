//! Job lifecycle hooks fired by the dispatcher.
//!
//! The dispatcher only decides *which* hook fires; [`RegistryJobHooks`]
//! owns the durable consequences (job status, queue membership, project
//! checkpoint) and the side-channel notifications.

use std::sync::Arc;

use alaska_core::progress::ProjectProgress;
use alaska_db::models::job::Job;
use alaska_db::{RegistryError, WorkRegistry};
use alaska_events::bus::event_types;
use alaska_events::delivery::email::escape_html;
use alaska_events::{Notifier, PlatformEvent, ResourceEmail};
use async_trait::async_trait;
use serde_json::json;

#[async_trait]
pub trait JobHooks: Send + Sync {
    /// The job's sandbox is about to launch.
    async fn job_started(&self, job: &Job) -> Result<(), RegistryError>;

    /// The sandbox exited with code 0 after `runtime_secs` of wall-clock time.
    async fn job_succeeded(&self, job: &Job, runtime_secs: f64) -> Result<(), RegistryError>;

    /// The job could not be run to a zero exit.
    async fn job_failed(&self, job: &Job, detail: &str) -> Result<(), RegistryError>;
}

/// Production hooks: registry writes plus bus events and owner email.
pub struct RegistryJobHooks {
    registry: Arc<dyn WorkRegistry>,
    notifier: Notifier,
}

impl RegistryJobHooks {
    pub fn new(registry: Arc<dyn WorkRegistry>, notifier: Notifier) -> Self {
        Self { registry, notifier }
    }

    fn event(event_type: &str, job: &Job) -> PlatformEvent {
        PlatformEvent::job(event_type, job.id)
    }

    async fn email_owner(&self, job: &Job, subject: String, html_body: String) {
        match self.registry.get_project(job.project_id).await {
            Ok(project) => {
                if let Some(owner) = project.owner_email {
                    self.notifier.email(ResourceEmail::new(owner, subject, html_body));
                }
            }
            Err(e) => {
                tracing::warn!(job_id = job.id, error = %e, "Could not look up project owner");
            }
        }
    }
}

#[async_trait]
impl JobHooks for RegistryJobHooks {
    async fn job_started(&self, job: &Job) -> Result<(), RegistryError> {
        self.notifier.publish(Self::event(event_types::JOB_STARTED, job).with_payload(json!({
            "project_id": job.project_id,
            "analysis_id": job.analysis_id,
        })));
        Ok(())
    }

    async fn job_succeeded(&self, job: &Job, runtime_secs: f64) -> Result<(), RegistryError> {
        self.registry.complete_job(job.id, runtime_secs).await?;

        if job.archive {
            self.registry
                .transition_progress(
                    job.project_id,
                    &[ProjectProgress::Analyzing],
                    ProjectProgress::Analyzed,
                )
                .await?;
            self.email_owner(
                job,
                format!("Project {} analysis finished", job.project_id),
                format!(
                    "<p>All analyses for project <b>{}</b> have finished.</p>",
                    job.project_id
                ),
            )
            .await;
        } else {
            self.registry
                .rollback_progress(job.project_id, ProjectProgress::Analyzing)
                .await?;
        }

        self.notifier.publish(Self::event(event_types::JOB_SUCCEEDED, job).with_payload(json!({
            "project_id": job.project_id,
            "analysis_id": job.analysis_id,
            "runtime_secs": runtime_secs,
        })));
        Ok(())
    }

    async fn job_failed(&self, job: &Job, detail: &str) -> Result<(), RegistryError> {
        self.registry.fail_job(job.id, detail).await?;
        let dequeued = self.registry.dequeue_project_jobs(job.project_id).await?;
        self.registry
            .transition_progress(
                job.project_id,
                &[ProjectProgress::Analyzing],
                ProjectProgress::Failed,
            )
            .await?;
        tracing::info!(
            job_id = job.id,
            project_id = job.project_id,
            dequeued,
            "Job failed, remaining project jobs removed from queue"
        );

        self.notifier.publish(Self::event(event_types::JOB_FAILED, job).with_payload(json!({
            "project_id": job.project_id,
            "analysis_id": job.analysis_id,
            "error": detail,
        })));
        self.email_owner(
            job,
            format!("Project {} analysis failed", job.project_id),
            format!(
                "<p>An analysis for project <b>{}</b> failed.</p><pre>{}</pre>",
                job.project_id,
                escape_html(detail)
            ),
        )
        .await;
        Ok(())
    }
}
