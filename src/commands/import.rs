//! Import and export commands

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use super::projects::open_project;
use crate::models::{ReferenceFormat, Settings, StudyRecord};
use crate::parsers::{write_csv, write_ris};
use crate::services::import::{ImportPipeline, ImportSummary};
use crate::storage::StudyRepo;

/// Options for `sysrev import`
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub files: Vec<PathBuf>,
    pub format: Option<ReferenceFormat>,
    /// Database label for files that do not carry one
    pub database: Option<String>,
    pub project_dir: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
    pub threshold: Option<f64>,
}

#[derive(Debug)]
pub struct ImportResult {
    pub summary: ImportSummary,
    /// Studies added to the project, when one was given
    pub new_studies: Option<usize>,
}

/// Parse, deduplicate and optionally persist
///
/// With a project, the records already stored are deduplicated together with the
/// new files so groups can span imports.
pub fn run_import(options: &ImportOptions, settings: &Settings) -> Result<ImportResult> {
    let mut config = settings.dedup.clone();
    if let Some(threshold) = options.threshold {
        config.threshold = threshold;
    }

    let project = match &options.project_dir {
        Some(dir) => Some(open_project(dir)?),
        None => None,
    };

    let existing = match &project {
        Some((db, project)) => StudyRepo::new(&db.conn).list(&project.id)?,
        None => Vec::new(),
    };

    let mut pipeline = ImportPipeline::new()
        .with_database(options.database.clone())
        .with_existing(existing);
    for path in &options.files {
        pipeline.add_file(path, options.format);
    }
    let summary = pipeline.finish(&config);

    if summary.files.is_empty() {
        let reasons: Vec<String> = summary
            .failed
            .iter()
            .map(|f| format!("{}: {}", f.label, f.error))
            .collect();
        anyhow::bail!("No file could be imported:\n  {}", reasons.join("\n  "));
    }

    if let Some(path) = &options.report_path {
        summary
            .report
            .write_csv(&summary.outcome, path)
            .with_context(|| format!("Failed to write dedup report to {}", path.display()))?;
        info!("Wrote dedup report to {}", path.display());
    }

    let new_studies = match &project {
        Some((db, project)) => {
            let added = StudyRepo::new(&db.conn)
                .save_outcome(&project.id, &summary.outcome)
                .map_err(|e| {
                    error!("Failed to store import in {}: {}", project.name, e);
                    e
                })?;
            info!("Stored {} new studies in project {}", added, project.name);
            Some(added)
        }
        None => None,
    };

    Ok(ImportResult {
        summary,
        new_studies,
    })
}

/// Output format for `sysrev export`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Ris,
}

impl ExportFormat {
    /// RIS for `.ris` files, CSV otherwise
    pub fn for_path(path: &Path) -> Self {
        match ReferenceFormat::from_extension(path) {
            Some(ReferenceFormat::Ris) => ExportFormat::Ris,
            _ => ExportFormat::Csv,
        }
    }
}

/// Write a project's unique studies; returns how many were written
pub fn run_export(project_dir: &Path, out: &Path, format: ExportFormat) -> Result<usize> {
    let (db, project) = open_project(project_dir)?;
    let records = StudyRepo::new(&db.conn).list_unique(&project.id)?;
    write_records(&records, out, format)?;
    info!("Exported {} studies from {} to {}", records.len(), project.name, out.display());
    Ok(records.len())
}

pub fn write_records(records: &[StudyRecord], out: &Path, format: ExportFormat) -> Result<()> {
    match format {
        ExportFormat::Ris => fs::write(out, write_ris(records))
            .with_context(|| format!("Failed to write {}", out.display())),
        ExportFormat::Csv => {
            let file = File::create(out).with_context(|| format!("Failed to create {}", out.display()))?;
            write_csv(records, BufWriter::new(file))
                .with_context(|| format!("Failed to write {}", out.display()))
        }
    }
}
