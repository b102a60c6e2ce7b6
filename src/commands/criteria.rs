//! Criteria drafting commands
//!
//! `sysrev init --generate` asks the model for PICO(S) criteria before the
//! project row exists; `sysrev criteria --feedback` revises them later. Both
//! record the call in the project's audit log.

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::projects::{open_empty, open_project, InitOptions};
use super::screening::{client_for, tracker_for};
use crate::adapters::llm::LlmClient;
use crate::models::{Project, ReviewCriteria, Settings};
use crate::services::cost_tracker::CostTracker;
use crate::services::criteria::CriteriaGenerator;
use crate::storage::{AuditRepo, ProjectRepo};

/// Create a project whose criteria are drafted from its research question
pub async fn init_with_generated_criteria(
    options: InitOptions<'_>,
    settings: &Settings,
    client: Option<Arc<dyn LlmClient>>,
) -> Result<Project> {
    if options.criteria_path.is_some() {
        bail!("Criteria are either read from a file or generated, not both");
    }

    let db = open_empty(options.project_dir)?;
    let project = Project::new(options.name, options.research_question)
        .with_llm(settings.llm.provider, settings.llm.model_name())
        .with_budget(options.budget_limit);

    let client = match client {
        Some(client) => client,
        None => client_for(&project, settings)?,
    };
    let mut tracker = CostTracker::new(project.budget_limit);
    let generated = CriteriaGenerator::new(client)
        .with_temperature(settings.llm.temperature)
        .with_project(project.id.clone())
        .generate(&project.research_question, &mut tracker)
        .await?;

    let project = project.with_criteria(generated.criteria);
    ProjectRepo::new(&db.conn).create(&project)?;
    AuditRepo::new(&db.conn).insert(&generated.audit)?;

    info!(
        "Created project {} ({}) with generated criteria in {}",
        project.name,
        project.id,
        options.project_dir.display()
    );
    Ok(project)
}

/// Revise the project's criteria from reviewer feedback and store them
pub async fn refine_criteria(
    project_dir: &Path,
    feedback: &str,
    settings: &Settings,
    client: Option<Arc<dyn LlmClient>>,
) -> Result<ReviewCriteria> {
    if feedback.trim().is_empty() {
        bail!("Feedback is empty; nothing to refine");
    }

    let (db, project) = open_project(project_dir)?;
    let client = match client {
        Some(client) => client,
        None => client_for(&project, settings)?,
    };
    let mut tracker = tracker_for(&db, &project, None)?;
    let refined = CriteriaGenerator::new(client)
        .with_temperature(settings.llm.temperature)
        .with_project(project.id.clone())
        .refine(&project.criteria, feedback, &mut tracker)
        .await?;

    ProjectRepo::new(&db.conn).update_criteria(&project.id, &project.research_question, &refined.criteria)?;
    AuditRepo::new(&db.conn).insert(&refined.audit)?;
    Ok(refined.criteria)
}
