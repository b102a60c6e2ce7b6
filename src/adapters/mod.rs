//! Adapters for external services
//!
//! Each adapter wraps one outside dependency behind a small typed API.

pub mod llm;
pub mod pdf;
