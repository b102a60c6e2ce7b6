//! Database connection management and migrations

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Database error type
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Migration failed: {0}")]
    MigrationFailed(String),
    #[error("Query failed: {0}")]
    QueryFailed(String),
    #[error("JSON parse error: {0}")]
    JsonParseError(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        DatabaseError::QueryFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::JsonParseError(err.to_string())
    }
}

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Wrapper around SQLite connection for one review project
#[derive(Debug)]
pub struct Database {
    pub conn: Connection,
    pub project_dir: PathBuf,
}

impl Database {
    /// Get the database file path for a project directory
    pub fn db_path(project_dir: &Path) -> PathBuf {
        project_dir.join("project.sqlite")
    }

    pub fn exists(project_dir: &Path) -> bool {
        Self::db_path(project_dir).exists()
    }
}

/// Open or create the database for a project directory
pub fn open_database(project_dir: &Path) -> Result<Database, DatabaseError> {
    fs::create_dir_all(project_dir).map_err(|e| {
        DatabaseError::ConnectionFailed(format!("Failed to create {}: {}", project_dir.display(), e))
    })?;

    let db_path = Database::db_path(project_dir);
    info!("Opening database at {:?}", db_path);

    let conn = Connection::open(&db_path)
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

    // Enable foreign keys
    conn.execute("PRAGMA foreign_keys = ON", [])
        .map_err(|e| DatabaseError::MigrationFailed(format!("Failed to enable foreign keys: {}", e)))?;

    run_migrations(&conn)?;

    Ok(Database {
        conn,
        project_dir: project_dir.to_path_buf(),
    })
}

/// Schema version stored in the database, 0 when none
pub fn schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Run database schema migrations
fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = schema_version(conn);
    info!("Current schema version: {}", current_version);

    if current_version > SCHEMA_VERSION {
        return Err(DatabaseError::MigrationFailed(format!(
            "database schema v{} is newer than supported v{}",
            current_version, SCHEMA_VERSION
        )));
    }

    if current_version < 1 {
        info!("Applying migration v1: Initial schema");
        apply_v1_schema(conn)?;
    }

    if current_version < 2 {
        info!("Applying migration v2: Data extraction");
        apply_v2_schema(conn)?;
    }

    Ok(())
}

/// Apply the initial v1 schema
fn apply_v1_schema(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(include_str!("schema.sql"))
        .map_err(|e| DatabaseError::MigrationFailed(format!("Failed to apply v1 schema: {}", e)))?;
    Ok(())
}

/// Add the extractions table
fn apply_v2_schema(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(include_str!("migration_v2.sql"))
        .map_err(|e| DatabaseError::MigrationFailed(format!("Failed to apply v2 schema: {}", e)))?;
    Ok(())
}

/// Parse an RFC 3339 column, falling back to now for legacy or corrupt values
pub(crate) fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
