//! [`Sandbox`] implementation over the Docker Engine API.
//!
//! A run is create, start, then a followed log stream for output and a
//! wait for the exit code. Containers are not auto-removed: the exit future
//! force-removes its container once the wait resolves, so the log stream is
//! never cut short by the daemon reaping the container.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as EngineError;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::{FutureExt, StreamExt};

use crate::error::SandboxError;
use crate::spec::SandboxSpec;
use crate::{Sandbox, SandboxHandle, SandboxRun};

/// Seconds the daemon waits after SIGTERM before killing.
const STOP_GRACE_SECS: i64 = 10;

/// How often to check whether a container another caller is removing has gone.
const REMOVAL_POLL: Duration = Duration::from_millis(500);

const REMOVAL_CHECKS: usize = 60;

/// Exit code reported when the wait ended without a status.
const UNKNOWN_EXIT_CODE: i64 = -1;

#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect through the local socket, or `DOCKER_HOST` when set.
    pub fn connect() -> Result<Self, SandboxError> {
        Docker::connect_with_local_defaults()
            .map(Self::new)
            .map_err(|source| SandboxError::Engine {
                operation: "connect",
                source,
            })
    }

    /// Container configuration for a spec.
    pub fn container_config(spec: &SandboxSpec) -> Config<String> {
        let binds = spec
            .volumes
            .iter()
            .map(|v| format!("{}:{}:rw", v.source, v.target))
            .collect();
        Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            working_dir: spec.working_dir.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(HostConfig {
                binds: Some(binds),
                cpuset_cpus: spec.cpuset.clone(),
                network_mode: spec.network.clone(),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn exists(&self, name: &str) -> Result<bool, SandboxError> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(_) => Ok(true),
            Err(source) => match classify("inspect", name, source) {
                SandboxError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }
}

/// Map an Engine API failure onto a typed error.
///
/// Decisions follow the HTTP status; the message only tells apart the two
/// kinds of 409 conflict.
fn classify(operation: &'static str, name: &str, source: EngineError) -> SandboxError {
    let response = match &source {
        EngineError::DockerResponseServerError {
            status_code,
            message,
        } => Some((
            *status_code,
            message.contains("already in progress"),
            message.contains("already in use"),
        )),
        _ => None,
    };
    match response {
        Some((404, ..)) => SandboxError::NotFound(name.to_string()),
        Some((304, ..)) => SandboxError::AlreadyStopped(name.to_string()),
        Some((409, true, _)) => SandboxError::RemovalInProgress(name.to_string()),
        Some((409, _, true)) => SandboxError::NameInUse(name.to_string()),
        _ => SandboxError::Engine { operation, source },
    }
}

/// Poll `exists` until it reports the container gone.
async fn wait_until_gone<F, Fut>(
    name: &str,
    mut exists: F,
    interval: Duration,
    checks: usize,
) -> Result<(), SandboxError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, SandboxError>>,
{
    for _ in 0..checks {
        if !exists().await? {
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
    Err(SandboxError::RemovalInProgress(name.to_string()))
}

async fn wait_for_exit(docker: &Docker, name: &str) -> Result<i64, SandboxError> {
    let mut waits = Box::pin(docker.wait_container(name, None::<WaitContainerOptions<String>>));
    match waits.next().await {
        Some(Ok(response)) => Ok(response.status_code),
        // Non-zero exits arrive as an error carrying the code.
        Some(Err(EngineError::DockerContainerWaitError { code, .. })) => Ok(code),
        Some(Err(source)) => Err(classify("wait", name, source)),
        None => {
            let inspected = docker
                .inspect_container(name, None::<InspectContainerOptions>)
                .await
                .map_err(|source| classify("inspect", name, source))?;
            Ok(inspected
                .state
                .and_then(|state| state.exit_code)
                .unwrap_or(UNKNOWN_EXIT_CODE))
        }
    }
}

fn log_chunk(name: &str, item: Result<LogOutput, EngineError>) -> Result<Vec<u8>, SandboxError> {
    match item {
        Ok(
            LogOutput::StdOut { message }
            | LogOutput::StdErr { message }
            | LogOutput::Console { message },
        ) => Ok(message.to_vec()),
        Ok(LogOutput::StdIn { .. }) => Ok(Vec::new()),
        Err(source) => Err(classify("logs", name, source)),
    }
}

#[async_trait]
impl Sandbox for DockerEngine {
    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(source) => match classify("inspect image", image, source) {
                SandboxError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn run(&self, spec: &SandboxSpec) -> Result<SandboxRun, SandboxError> {
        tracing::debug!(sandbox = %spec.name, image = %spec.image, command = ?spec.command, "Launching sandbox");
        let name = spec.name.clone();

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                Self::container_config(spec),
            )
            .await
            .map_err(|source| classify("create", &name, source))?;

        if let Err(source) = self
            .docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
        {
            let err = classify("start", &name, source);
            let cleanup = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = self.docker.remove_container(&name, Some(cleanup)).await {
                tracing::warn!(sandbox = %name, error = %e, "Failed to remove unstarted sandbox");
            }
            return Err(err);
        }

        let logs = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let output = {
            let name = name.clone();
            self.docker
                .logs(&name, Some(logs))
                .map(move |item| log_chunk(&name, item))
                .boxed()
        };

        let exit = {
            let docker = self.docker.clone();
            let name = name.clone();
            async move {
                let code = wait_for_exit(&docker, &name).await;
                let cleanup = RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                };
                match docker.remove_container(&name, Some(cleanup)).await {
                    Ok(()) => tracing::debug!(sandbox = %name, "Sandbox removed after exit"),
                    Err(e) => tracing::debug!(sandbox = %name, error = %e, "Sandbox not removed after exit"),
                }
                code
            }
            .boxed()
        };

        Ok(SandboxRun {
            handle: SandboxHandle::new(name),
            output,
            exit,
        })
    }

    async fn stop(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        self.docker
            .stop_container(&handle.name, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
            .await
            .map_err(|source| classify("stop", &handle.name, source))?;
        tracing::info!(sandbox = %handle.name, "Sandbox stopped");
        Ok(())
    }

    async fn remove(&self, handle: &SandboxHandle, force: bool) -> Result<(), SandboxError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        match self.docker.remove_container(&handle.name, Some(options)).await {
            Ok(()) => {
                tracing::info!(sandbox = %handle.name, "Sandbox removed");
                Ok(())
            }
            Err(source) => match classify("remove", &handle.name, source) {
                SandboxError::RemovalInProgress(_) => {
                    tracing::debug!(sandbox = %handle.name, "Removal already in progress, waiting");
                    wait_until_gone(
                        &handle.name,
                        || self.exists(&handle.name),
                        REMOVAL_POLL,
                        REMOVAL_CHECKS,
                    )
                    .await
                }
                other => Err(other),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
