//! Alaska domain logic shared by the worker and the API server.
//!
//! Nothing here touches the database or the filesystem.

pub mod analysis;
pub mod config;
pub mod error;
pub mod output;
pub mod paths;
pub mod progress;
pub mod types;
