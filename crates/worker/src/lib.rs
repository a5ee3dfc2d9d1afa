//! Alaska analysis worker.
//!
//! A single [`Dispatcher`] per process claims jobs from the work registry
//! one at a time, runs each in a sandbox and records its output. The
//! [`reconcile`] module keeps persisted state consistent across graceful
//! and unclean process exits.

pub mod capture;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hooks;
pub mod preflight;
pub mod reconcile;
pub mod slot;

pub use config::WorkerConfig;
pub use dispatcher::{Dispatcher, Outcome};
pub use error::DispatchError;
pub use hooks::{JobHooks, RegistryJobHooks};
pub use slot::{ActiveRun, ActiveSlot};
