//! Single-slot holder for the job this process is currently driving.
//!
//! The dispatcher fills the slot when it claims a job and clears it when
//! the job has settled. The shutdown path takes whatever is left, which is
//! exactly the work that was interrupted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alaska_core::types::DbId;
use alaska_sandbox::SandboxHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRun {
    pub job_id: DbId,
    pub project_id: DbId,
    /// Set once the sandbox has launched.
    pub sandbox: Option<SandboxHandle>,
}

impl ActiveRun {
    pub fn new(job_id: DbId, project_id: DbId) -> Self {
        Self {
            job_id,
            project_id,
            sandbox: None,
        }
    }
}

/// Cloneable, thread-safe reference to the active run.
#[derive(Debug, Clone, Default)]
pub struct ActiveSlot {
    inner: Arc<Mutex<Option<ActiveRun>>>,
}

impl ActiveSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, run: ActiveRun) {
        *self.lock() = Some(run);
    }

    /// Record the launched sandbox on the current run.
    pub fn attach(&self, handle: SandboxHandle) {
        if let Some(run) = self.lock().as_mut() {
            run.sandbox = Some(handle);
        }
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    /// Remove and return the current run.
    pub fn take(&self) -> Option<ActiveRun> {
        self.lock().take()
    }

    pub fn current(&self) -> Option<ActiveRun> {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_updates_current_run() {
        let slot = ActiveSlot::new();
        slot.set(ActiveRun::new(1, 2));
        slot.attach(SandboxHandle::new("qc-2"));
        let run = slot.current().unwrap();
        assert_eq!(run.sandbox.unwrap().name, "qc-2");
    }

    #[test]
    fn attach_without_run_is_ignored() {
        let slot = ActiveSlot::new();
        slot.attach(SandboxHandle::new("qc-2"));
        assert!(slot.current().is_none());
    }

    #[test]
    fn take_empties_every_clone() {
        let slot = ActiveSlot::new();
        let shared = slot.clone();
        slot.set(ActiveRun::new(1, 2));
        assert_eq!(shared.take().map(|r| r.job_id), Some(1));
        assert!(slot.current().is_none());
    }
}
