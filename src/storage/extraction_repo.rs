//! Extraction repository
//!
//! Like decisions, extractions are insert-only; the latest row per study wins.

use rusqlite::{params, Connection, Row};

use super::db::parse_timestamp;
use super::DatabaseError;
use crate::models::StudyExtraction;

const EXTRACTION_COLUMNS: &str = "e.id, e.study_id, e.values_json, e.completeness, e.notes, e.model, e.created_at";

pub struct ExtractionRepo<'a> {
    conn: &'a Connection,
}

impl<'a> ExtractionRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, project_id: &str, extraction: &StudyExtraction) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO extractions (id, project_id, study_id, values_json, completeness, notes,
                                      model, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                extraction.id,
                project_id,
                extraction.study_id,
                serde_json::to_string(&extraction.values)?,
                extraction.completeness,
                extraction.notes,
                extraction.model,
                extraction.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_all<'e>(
        &self,
        project_id: &str,
        extractions: impl IntoIterator<Item = &'e StudyExtraction>,
    ) -> Result<usize, DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;
        for extraction in extractions {
            ExtractionRepo::new(&tx).insert(project_id, extraction)?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    /// Newest extraction per study, in study import order
    pub fn latest(&self, project_id: &str) -> Result<Vec<StudyExtraction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM extractions e
             JOIN studies s ON s.id = e.study_id
             WHERE e.project_id = ?
               AND NOT EXISTS (SELECT 1 FROM extractions n
                               WHERE n.study_id = e.study_id AND n.created_at > e.created_at)
             ORDER BY s.ordinal",
            EXTRACTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([project_id], RawExtraction::from_row)?;

        let mut extractions = Vec::new();
        for row in rows {
            extractions.push(row?.into_extraction()?);
        }
        Ok(extractions)
    }
}

struct RawExtraction {
    id: String,
    study_id: String,
    values_json: String,
    completeness: f64,
    notes: Option<String>,
    model: Option<String>,
    created_at: String,
}

impl RawExtraction {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            study_id: row.get(1)?,
            values_json: row.get(2)?,
            completeness: row.get(3)?,
            notes: row.get(4)?,
            model: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_extraction(self) -> Result<StudyExtraction, DatabaseError> {
        Ok(StudyExtraction {
            id: self.id,
            study_id: self.study_id,
            values: serde_json::from_str(&self.values_json)?,
            completeness: self.completeness,
            notes: self.notes,
            model: self.model,
            created_at: parse_timestamp(&self.created_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractedValue, Project, ReferenceFormat, SourceTag, StudyRecord};
    use crate::services::dedup::{deduplicate, DedupConfig};
    use crate::storage::{open_database, Database, ProjectRepo, StudyRepo};
    use chrono::Duration;
    use tempfile::{tempdir, TempDir};

    fn setup() -> (TempDir, Database, String) {
        let dir = tempdir().unwrap();
        let db = open_database(dir.path()).unwrap();
        let project = Project::new("P".into(), "Q".into());
        ProjectRepo::new(&db.conn).create(&project).unwrap();
        let records = ["Alpha trial", "Beta cohort"]
            .iter()
            .enumerate()
            .map(|(i, t)| {
                StudyRecord::new(format!("s{}", i), t.to_string(), SourceTag::new(ReferenceFormat::Ris))
            })
            .collect();
        let outcome = deduplicate(records, &DedupConfig::default());
        StudyRepo::new(&db.conn).save_outcome(&project.id, &outcome).unwrap();
        (dir, db, project.id)
    }

    fn extraction(study_id: &str, sample_size: Option<&str>) -> StudyExtraction {
        StudyExtraction::new(
            study_id.into(),
            vec![ExtractedValue {
                field_name: "sample_size".into(),
                value: sample_size.map(str::to_string),
                source_quote: Some("n = 120".into()),
                notes: None,
            }],
        )
    }

    #[test]
    fn test_latest_per_study() {
        let (_dir, db, project_id) = setup();
        let repo = ExtractionRepo::new(&db.conn);

        let first = extraction("s1", None);
        let mut rerun = extraction("s1", Some("120"));
        rerun.created_at = first.created_at + Duration::seconds(5);
        let other = extraction("s0", Some("48"));
        repo.insert_all(&project_id, [&first, &rerun, &other]).unwrap();

        let latest = repo.latest(&project_id).unwrap();
        let ids: Vec<&str> = latest.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, [other.id.as_str(), rerun.id.as_str()]);

        let value = latest[1].value("sample_size").unwrap();
        assert_eq!(value.value.as_deref(), Some("120"));
        assert_eq!(value.source_quote.as_deref(), Some("n = 120"));
        assert_eq!(latest[1].completeness, 1.0);
    }

    #[test]
    fn test_unknown_study_is_rejected() {
        let (_dir, db, project_id) = setup();
        let repo = ExtractionRepo::new(&db.conn);
        assert!(repo.insert(&project_id, &extraction("missing", None)).is_err());
    }
}
