//! Execution sandbox capability.
//!
//! A [`Sandbox`] runs one named, resource-constrained process from an image
//! and hands back its combined output as a byte stream plus a future that
//! resolves to the exit code. [`DockerEngine`] talks to the Docker Engine
//! API; tests substitute scripted implementations.

pub mod docker;
pub mod error;
pub mod settings;
pub mod spec;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

pub use docker::DockerEngine;
pub use error::SandboxError;
pub use settings::SandboxSettings;
pub use spec::{SandboxSpec, VolumeMount};

/// Combined stdout/stderr as raw chunks in arrival order.
pub type LogStream = BoxStream<'static, Result<Vec<u8>, SandboxError>>;

/// Resolves to the process exit code once the sandbox has ended.
pub type ExitFuture = BoxFuture<'static, Result<i64, SandboxError>>;

/// Identifies a launched sandbox for later stop/remove calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub name: String,
}

impl SandboxHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A running sandbox.
///
/// `output` ends when the process closes its streams; `exit` may be awaited
/// after (or instead of) draining `output`.
pub struct SandboxRun {
    pub handle: SandboxHandle,
    pub output: LogStream,
    pub exit: ExitFuture,
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Whether `image` is available locally.
    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError>;

    /// Launch a sandbox. It is removed once `exit` resolves.
    async fn run(&self, spec: &SandboxSpec) -> Result<SandboxRun, SandboxError>;

    /// Ask a sandbox to stop. Returns [`SandboxError::NotFound`] or
    /// [`SandboxError::AlreadyStopped`] if it is already gone.
    async fn stop(&self, handle: &SandboxHandle) -> Result<(), SandboxError>;

    async fn remove(&self, handle: &SandboxHandle, force: bool) -> Result<(), SandboxError>;
}

/// Stop then force-remove a sandbox, treating "already gone" as success.
pub async fn stop_and_remove(
    sandbox: &dyn Sandbox,
    handle: &SandboxHandle,
) -> Result<(), SandboxError> {
    match sandbox.stop(handle).await {
        Ok(()) => {}
        Err(e) if e.is_gone() => {
            tracing::debug!(sandbox = %handle.name, "Sandbox already stopped");
        }
        Err(e) => return Err(e),
    }
    match sandbox.remove(handle, true).await {
        Err(e) if e.is_gone() => Ok(()),
        other => other,
    }
}
