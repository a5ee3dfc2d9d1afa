//! Request handlers.
//!
//! Handlers translate HTTP requests into registry calls and task starts and
//! map failures through [`AppError`](crate::error::AppError).

pub mod jobs;
pub mod project;
pub mod reference;
