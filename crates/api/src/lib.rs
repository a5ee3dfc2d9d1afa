//! Alaska API server library.
//!
//! Exposes the building blocks (config, state, error handling, routes, task
//! supervision) so integration tests and the binary entrypoint can both
//! access them.

pub mod config;
pub mod enqueue;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod tasks;
pub mod workspace;
