//! Command handlers behind the `sysrev` binary
//!
//! Each handler opens the project, calls into the services and persists what
//! they return. Errors are `anyhow` with context for the terminal.

pub mod criteria;
pub mod extraction;
pub mod import;
pub mod projects;
pub mod screening;
pub mod settings;
