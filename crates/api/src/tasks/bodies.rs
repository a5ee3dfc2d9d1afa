//! Task bodies that run a script sandbox against a project.

use std::sync::Arc;

use alaska_core::analysis::sandbox_name;
use alaska_core::output::LineSplitter;
use alaska_db::models::project::Project;
use alaska_sandbox::{stop_and_remove, Sandbox, SandboxRun, SandboxSettings, SandboxSpec};
use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{TaskBody, TaskError};
use crate::config::{GeoFtpConfig, TaskConfig};

/// Sandbox name prefix of interactive sessions.
pub const SESSION_PREFIX: &str = "shiny";

/// Artifact written by the differential-expression step and served by
/// sessions.
const SLEUTH_ARTIFACT: (&str, &str) = ("diff", "sleuth");

/// Archive produced by compilation and sent by upload.
pub const ARCHIVE_ARTIFACT: (&str, &str) = ("compile", "geo");

/// Run a sandbox to exit, tracing its output, and return the exit code.
///
/// If `cancel` fires first the sandbox is stopped and removed and
/// [`TaskError::Cancelled`] is returned.
pub async fn run_sandbox(
    sandbox: &dyn Sandbox,
    spec: &SandboxSpec,
    cancel: &CancellationToken,
) -> Result<i64, TaskError> {
    let SandboxRun {
        handle,
        mut output,
        exit,
    } = sandbox.run(spec).await?;
    let name = handle.name.clone();

    let drain = async move {
        let mut splitter = LineSplitter::new();
        while let Some(chunk) = output.next().await {
            for line in splitter.push(&chunk?) {
                tracing::debug!(target: "sandbox_output", sandbox = %name, "{line}");
            }
        }
        if let Some(line) = splitter.finish() {
            tracing::debug!(target: "sandbox_output", sandbox = %name, "{line}");
        }
        Ok::<_, TaskError>(exit.await?)
    };

    tokio::select! {
        result = drain => result,
        () = cancel.cancelled() => {
            if let Err(e) = stop_and_remove(sandbox, &handle).await {
                tracing::warn!(sandbox = %handle.name, error = %e, "Failed to stop task sandbox");
            }
            Err(TaskError::Cancelled)
        }
    }
}

pub(crate) fn script_command(script: &str, args: impl IntoIterator<Item = String>) -> Vec<String> {
    script
        .split_whitespace()
        .map(str::to_string)
        .chain(args)
        .collect()
}

pub(crate) fn require_success(task: &str, code: i64) -> Result<(), TaskError> {
    if code == 0 {
        Ok(())
    } else {
        Err(TaskError::Failed(format!("{task} exited with code {code}")))
    }
}

// ---------------------------------------------------------------------------
// Compile
// ---------------------------------------------------------------------------

/// Builds the project's submission archive.
pub struct CompileBody {
    sandbox: Arc<dyn Sandbox>,
    settings: SandboxSettings,
    image: String,
    script: String,
}

impl CompileBody {
    pub fn new(sandbox: Arc<dyn Sandbox>, settings: SandboxSettings, tasks: &TaskConfig) -> Self {
        Self {
            sandbox,
            settings,
            image: tasks.script_image.clone(),
            script: tasks.compile_script.clone(),
        }
    }
}

#[async_trait]
impl TaskBody for CompileBody {
    async fn run(&self, project: &Project, cancel: CancellationToken) -> Result<(), TaskError> {
        let spec = self.settings.spec(
            sandbox_name("compile", project.id),
            &self.image,
            script_command(&self.script, [project.id.to_string()]),
        );
        let code = run_sandbox(self.sandbox.as_ref(), &spec, &cancel).await?;
        require_success("compile", code)
    }
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

/// Sends the compiled archive to the submission FTP server.
pub struct UploadBody {
    sandbox: Arc<dyn Sandbox>,
    settings: SandboxSettings,
    image: String,
    script: String,
    ftp: GeoFtpConfig,
    /// Submitter account the archive is filed under.
    geo_username: String,
}

impl UploadBody {
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        settings: SandboxSettings,
        tasks: &TaskConfig,
        ftp: GeoFtpConfig,
        geo_username: String,
    ) -> Self {
        Self {
            sandbox,
            settings,
            image: tasks.script_image.clone(),
            script: tasks.upload_script.clone(),
            ftp,
            geo_username,
        }
    }
}

#[async_trait]
impl TaskBody for UploadBody {
    async fn run(&self, project: &Project, cancel: CancellationToken) -> Result<(), TaskError> {
        let (code, name) = ARCHIVE_ARTIFACT;
        if project.files.artifact(code, name).is_none() {
            return Err(TaskError::Failed(format!(
                "project {} has no compiled archive",
                project.id
            )));
        }

        let mut spec = self.settings.spec(
            sandbox_name("upload", project.id),
            &self.image,
            script_command(
                &self.script,
                [project.id.to_string(), self.geo_username.clone()],
            ),
        );
        spec.env.extend([
            ("GEO_FTP_HOST".to_string(), self.ftp.host.clone()),
            ("GEO_FTP_USER".to_string(), self.ftp.user.clone()),
            ("GEO_FTP_PASSWORD".to_string(), self.ftp.password.clone()),
        ]);
        let code = run_sandbox(self.sandbox.as_ref(), &spec, &cancel).await?;
        require_success("upload", code)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Serves the project's differential-expression results interactively
/// until the session sandbox is closed.
pub struct SessionBody {
    sandbox: Arc<dyn Sandbox>,
    settings: SandboxSettings,
    image: String,
    script: String,
}

impl SessionBody {
    pub fn new(sandbox: Arc<dyn Sandbox>, settings: SandboxSettings, tasks: &TaskConfig) -> Self {
        Self {
            sandbox,
            settings,
            image: tasks.session_image.clone(),
            script: tasks.session_script.clone(),
        }
    }
}

#[async_trait]
impl TaskBody for SessionBody {
    async fn run(&self, project: &Project, cancel: CancellationToken) -> Result<(), TaskError> {
        let (code, name) = SLEUTH_ARTIFACT;
        let so_path = project.files.artifact(code, name).ok_or_else(|| {
            TaskError::Failed(format!("project {} has no sleuth object", project.id))
        })?;

        let spec = self.settings.spec(
            sandbox_name(SESSION_PREFIX, project.id),
            &self.image,
            script_command(&self.script, [so_path.to_string()]),
        );
        // Closing a session stops its sandbox, so any exit code is a normal end.
        let exit_code = run_sandbox(self.sandbox.as_ref(), &spec, &cancel).await?;
        tracing::info!(project_id = project.id, exit_code, "Session ended");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
