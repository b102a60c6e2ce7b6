//! Data extraction commands

use anyhow::{bail, Context, Result};
use std::fs;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::projects::open_project;
use super::screening::{client_for, tracker_for};
use crate::adapters::llm::LlmClient;
use crate::adapters::pdf::extract_pdf_file;
use crate::models::{ExtractionField, Settings, StudyExtraction};
use crate::services::extraction::{write_extractions_csv, DataExtractor};
use crate::storage::{AuditRepo, ExtractionRepo, StudyRepo};

/// Read the extraction form from a JSON array of fields
pub fn load_fields(path: &Path) -> Result<Vec<ExtractionField>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read fields from {}", path.display()))?;
    let fields: Vec<ExtractionField> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse fields in {}", path.display()))?;
    if fields.is_empty() {
        bail!("{} defines no fields", path.display());
    }
    Ok(fields)
}

/// Full text from a PDF, or from any other file read as UTF-8 text
pub fn load_fulltext(path: &Path) -> Result<String> {
    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        return fs::read_to_string(path)
            .with_context(|| format!("Failed to read full text from {}", path.display()));
    }

    let pdf = extract_pdf_file(path)
        .with_context(|| format!("Failed to read full text from {}", path.display()))?;
    if pdf.needs_ocr {
        bail!(
            "{} yielded only {} words; run OCR on it before extraction",
            path.display(),
            pdf.word_count
        );
    }
    Ok(pdf.text)
}

/// Extract the form's fields from one study and store the result
pub async fn run_extract(
    project_dir: &Path,
    fields_path: &Path,
    study_id: &str,
    fulltext_path: &Path,
    settings: &Settings,
    client: Option<Arc<dyn LlmClient>>,
) -> Result<StudyExtraction> {
    let fields = load_fields(fields_path)?;
    let (db, project) = open_project(project_dir)?;
    if StudyRepo::new(&db.conn).get(study_id)?.is_none() {
        bail!("No study {} in project {}", study_id, project.name);
    }
    let text = load_fulltext(fulltext_path)?;

    let client = match client {
        Some(client) => client,
        None => client_for(&project, settings)?,
    };
    let mut tracker = tracker_for(&db, &project, None)?;
    let extractor = DataExtractor::new(client, fields).with_project(project.id.clone());

    let extracted = extractor.extract(study_id, &text, &mut tracker).await?;
    ExtractionRepo::new(&db.conn).insert(&project.id, &extracted.extraction)?;
    if let Some(audit) = &extracted.audit {
        AuditRepo::new(&db.conn).insert(audit)?;
    }

    info!(
        "Extracted {} of {} fields for study {}",
        extracted.extraction.values.iter().filter(|v| v.is_reported()).count(),
        extracted.extraction.values.len(),
        study_id
    );
    Ok(extracted.extraction)
}

/// Write the latest extraction of every study as CSV; returns the row count
pub fn export_extractions(project_dir: &Path, fields_path: &Path, out: &Path) -> Result<usize> {
    let fields = load_fields(fields_path)?;
    let (db, project) = open_project(project_dir)?;
    let extractions = ExtractionRepo::new(&db.conn).latest(&project.id)?;

    let file = File::create(out).with_context(|| format!("Failed to create {}", out.display()))?;
    write_extractions_csv(&fields, &extractions, file)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    Ok(extractions.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::import::{run_import, ImportOptions};
    use crate::commands::projects::{init_project, InitOptions};
    use crate::services::screening::tests::ScriptedClient;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    const RIS: &str = "TY  - JOUR\nTI  - Mindfulness for anxiety in adults\nER  - \n";

    const FIELDS: &str = r#"[
        {"name": "sample_size", "description": "Participants randomised", "field_type": "numeric"},
        {"name": "country", "description": "Where the study ran"}
    ]"#;

    fn setup() -> (TempDir, PathBuf, PathBuf, String) {
        let dir = tempdir().unwrap();
        let project_dir = dir.path().join("review");
        init_project(
            InitOptions {
                project_dir: &project_dir,
                name: "Test".into(),
                research_question: "Q".into(),
                criteria_path: None,
                budget_limit: None,
            },
            &Settings::default(),
        )
        .unwrap();

        let ris = dir.path().join("search.ris");
        fs::write(&ris, RIS).unwrap();
        run_import(
            &ImportOptions {
                files: vec![ris],
                project_dir: Some(project_dir.clone()),
                ..Default::default()
            },
            &Settings::default(),
        )
        .unwrap();

        let fields = dir.path().join("fields.json");
        fs::write(&fields, FIELDS).unwrap();

        let (db, project) = open_project(&project_dir).unwrap();
        let study_id = StudyRepo::new(&db.conn).list(&project.id).unwrap().remove(0).id;
        (dir, project_dir, fields, study_id)
    }

    #[tokio::test]
    async fn test_extract_then_export() {
        let (dir, project_dir, fields, study_id) = setup();
        let text = dir.path().join("paper.txt");
        fs::write(&text, "We randomised 120 adults in Canada.").unwrap();
        let client = ScriptedClient::new(vec![Ok(
            r#"{"extractions": {"sample_size": {"value": "120"}, "country": {"value": "NR"}}}"#.into(),
        )]);

        let extraction = run_extract(
            &project_dir,
            &fields,
            &study_id,
            &text,
            &Settings::default(),
            Some(client as Arc<dyn LlmClient>),
        )
        .await
        .unwrap();
        assert!((extraction.completeness - 0.5).abs() < 1e-9);

        let out = dir.path().join("extractions.csv");
        assert_eq!(export_extractions(&project_dir, &fields, &out).unwrap(), 1);
        let csv = fs::read_to_string(&out).unwrap();
        assert!(csv.starts_with("study_id,sample_size,country,sample_size_nr,country_nr\n"));
        assert!(csv.contains(",120,NR,false,true"));

        let (db, project) = open_project(&project_dir).unwrap();
        assert_eq!(AuditRepo::new(&db.conn).list(&project.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_study() {
        let (dir, project_dir, fields, _study_id) = setup();
        let text = dir.path().join("paper.txt");
        fs::write(&text, "Body").unwrap();
        let client = ScriptedClient::new(vec![]);

        let err = run_extract(
            &project_dir,
            &fields,
            "missing",
            &text,
            &Settings::default(),
            Some(client.clone() as Arc<dyn LlmClient>),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("missing"));
        assert_eq!(client.calls(), 0);
    }

    #[test]
    fn test_empty_field_list_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fields.json");
        fs::write(&path, "[]").unwrap();
        assert!(load_fields(&path).is_err());
    }
}
