//! External delivery channels: webhook relay and resource email.

pub mod email;
pub mod webhook;
