//! Project directory setup

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::{Project, ReviewCriteria, Settings};
use crate::storage::{open_database, Database, ProjectRepo};

/// Options for `sysrev init`
#[derive(Debug, Clone)]
pub struct InitOptions<'a> {
    pub project_dir: &'a Path,
    pub name: String,
    pub research_question: String,
    pub criteria_path: Option<&'a Path>,
    pub budget_limit: Option<f64>,
}

/// Create the project database and its single project row
pub fn init_project(options: InitOptions<'_>, settings: &Settings) -> Result<Project> {
    let db = open_empty(options.project_dir)?;
    let repo = ProjectRepo::new(&db.conn);

    let criteria = match options.criteria_path {
        Some(path) => load_criteria(path)?,
        None => ReviewCriteria::default(),
    };

    let project = Project::new(options.name, options.research_question)
        .with_criteria(criteria)
        .with_llm(settings.llm.provider, settings.llm.model_name())
        .with_budget(options.budget_limit);
    repo.create(&project)?;

    info!("Created project {} ({}) in {}", project.name, project.id, options.project_dir.display());
    Ok(project)
}

/// Open the database of a directory that must not hold a project yet
pub(crate) fn open_empty(project_dir: &Path) -> Result<Database> {
    let db = open_database(project_dir)
        .with_context(|| format!("Failed to open project at {}", project_dir.display()))?;
    if let Some(existing) = ProjectRepo::new(&db.conn).primary()? {
        bail!(
            "{} already holds project \"{}\"",
            project_dir.display(),
            existing.name
        );
    }
    Ok(db)
}

/// Open an initialised project directory
pub fn open_project(project_dir: &Path) -> Result<(Database, Project)> {
    if !Database::exists(project_dir) {
        bail!(
            "{} is not a sysrev project; run `sysrev init` first",
            project_dir.display()
        );
    }

    let db = open_database(project_dir)
        .with_context(|| format!("Failed to open project at {}", project_dir.display()))?;
    let project = ProjectRepo::new(&db.conn)
        .primary()?
        .with_context(|| format!("{} has no project row", project_dir.display()))?;
    Ok((db, project))
}

/// Relative project paths live under `projects_root` when one is configured
pub fn resolve_project_dir(dir: &Path, settings: &Settings) -> PathBuf {
    match &settings.projects_root {
        Some(root) if dir.is_relative() => root.join(dir),
        _ => dir.to_path_buf(),
    }
}

/// Read PICO criteria from a JSON file
pub fn load_criteria(path: &Path) -> Result<ReviewCriteria> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read criteria from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse criteria in {}", path.display()))
}
