//! Storage module for SQLite database operations
//!
//! This module provides:
//! - Database connection management
//! - Schema migrations
//! - Repository pattern implementations for all entities
//!
//! The parsers and the deduplicator never call into this module; the command
//! layer persists their results once they return.

pub mod audit_repo;
pub mod db;
pub mod decision_repo;
pub mod extraction_repo;
pub mod project_repo;
pub mod study_repo;

pub use audit_repo::AuditRepo;
pub use db::{open_database, Database, DatabaseError};
pub use decision_repo::DecisionRepo;
pub use extraction_repo::ExtractionRepo;
pub use project_repo::ProjectRepo;
pub use study_repo::StudyRepo;
