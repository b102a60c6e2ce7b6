//! Decision repository
//!
//! Decisions are insert-only. Overrides are new rows pointing at the row they
//! replace through `supersedes`; the current decision is the one nothing supersedes.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::db::parse_timestamp;
use super::DatabaseError;
use crate::models::{ExclusionCategory, ScreeningDecision, ScreeningPhase, Verdict};

const DECISION_COLUMNS: &str = "d.id, d.study_id, d.phase, d.verdict, d.category, d.confidence, \
     d.rationale, d.model, d.created_at, d.supersedes";

pub struct DecisionRepo<'a> {
    conn: &'a Connection,
}

impl<'a> DecisionRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, decision: &ScreeningDecision) -> Result<(), DatabaseError> {
        if let Some(prior_id) = &decision.supersedes {
            let prior = self
                .get(prior_id)?
                .ok_or_else(|| DatabaseError::NotFound(format!("superseded decision {}", prior_id)))?;
            if prior.study_id != decision.study_id {
                return Err(DatabaseError::QueryFailed(format!(
                    "decision {} supersedes {} from a different study",
                    decision.id, prior_id
                )));
            }
        }

        self.conn.execute(
            "INSERT INTO decisions (id, study_id, phase, verdict, category, confidence, rationale,
                                    model, created_at, supersedes)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                decision.id,
                decision.study_id,
                decision.phase.as_str(),
                decision.verdict.as_str(),
                decision.category.as_str(),
                decision.confidence,
                decision.rationale,
                decision.model,
                decision.created_at.to_rfc3339(),
                decision.supersedes,
            ],
        )?;
        Ok(())
    }

    /// Insert several decisions atomically
    pub fn insert_all<'d>(
        &self,
        decisions: impl IntoIterator<Item = &'d ScreeningDecision>,
    ) -> Result<usize, DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;
        for decision in decisions {
            DecisionRepo::new(&tx).insert(decision)?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn get(&self, id: &str) -> Result<Option<ScreeningDecision>, DatabaseError> {
        let sql = format!("SELECT {} FROM decisions d WHERE d.id = ?", DECISION_COLUMNS);
        let raw = self.conn.query_row(&sql, [id], RawDecision::from_row).optional()?;
        raw.map(RawDecision::into_decision).transpose()
    }

    /// Decisions not superseded by any other, in study import order
    pub fn current(
        &self,
        project_id: &str,
        phase: Option<ScreeningPhase>,
    ) -> Result<Vec<ScreeningDecision>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM decisions d
             JOIN studies s ON s.id = d.study_id
             WHERE s.project_id = ?1
               AND (?2 IS NULL OR d.phase = ?2)
               AND NOT EXISTS (SELECT 1 FROM decisions n WHERE n.supersedes = d.id)
             ORDER BY s.ordinal, d.created_at",
            DECISION_COLUMNS
        );
        self.query(&sql, params![project_id, phase.map(|p| p.as_str())])
    }

    /// Every decision, superseded ones included
    pub fn all(&self, project_id: &str) -> Result<Vec<ScreeningDecision>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM decisions d
             JOIN studies s ON s.id = d.study_id
             WHERE s.project_id = ?
             ORDER BY s.ordinal, d.created_at",
            DECISION_COLUMNS
        );
        self.query(&sql, params![project_id])
    }

    /// Current exclusions below `threshold`
    pub fn low_confidence_exclusions(
        &self,
        project_id: &str,
        threshold: f64,
    ) -> Result<Vec<ScreeningDecision>, DatabaseError> {
        Ok(self
            .current(project_id, None)?
            .into_iter()
            .filter(|d| d.is_low_confidence_exclusion(threshold))
            .collect())
    }

    /// All decisions for one study, oldest first
    pub fn history(&self, study_id: &str) -> Result<Vec<ScreeningDecision>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM decisions d WHERE d.study_id = ? ORDER BY d.created_at",
            DECISION_COLUMNS
        );
        self.query(&sql, params![study_id])
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<ScreeningDecision>, DatabaseError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawDecision::from_row)?;

        let mut decisions = Vec::new();
        for row in rows {
            decisions.push(row?.into_decision()?);
        }
        Ok(decisions)
    }
}

struct RawDecision {
    id: String,
    study_id: String,
    phase: String,
    verdict: String,
    category: String,
    confidence: f64,
    rationale: String,
    model: Option<String>,
    created_at: String,
    supersedes: Option<String>,
}

impl RawDecision {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            study_id: row.get(1)?,
            phase: row.get(2)?,
            verdict: row.get(3)?,
            category: row.get(4)?,
            confidence: row.get(5)?,
            rationale: row.get(6)?,
            model: row.get(7)?,
            created_at: row.get(8)?,
            supersedes: row.get(9)?,
        })
    }

    fn into_decision(self) -> Result<ScreeningDecision, DatabaseError> {
        let phase = ScreeningPhase::parse(&self.phase)
            .ok_or_else(|| DatabaseError::QueryFailed(format!("unknown phase {}", self.phase)))?;
        Ok(ScreeningDecision {
            id: self.id,
            study_id: self.study_id,
            phase,
            verdict: Verdict::from_label(&self.verdict),
            category: ExclusionCategory::from_label(&self.category),
            confidence: self.confidence,
            rationale: self.rationale,
            model: self.model,
            created_at: parse_timestamp(&self.created_at),
            supersedes: self.supersedes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Project, ReferenceFormat, SourceTag, StudyRecord};
    use crate::services::dedup::{deduplicate, DedupConfig};
    use crate::storage::{open_database, Database, ProjectRepo, StudyRepo};
    use tempfile::{tempdir, TempDir};

    fn setup() -> (TempDir, Database, String) {
        let dir = tempdir().unwrap();
        let db = open_database(dir.path()).unwrap();
        let project = Project::new("P".into(), "Q".into());
        ProjectRepo::new(&db.conn).create(&project).unwrap();
        let records = ["Alpha trial", "Beta cohort", "Gamma survey"]
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

    fn exclude(study_id: &str, confidence: f64) -> ScreeningDecision {
        ScreeningDecision::new(
            study_id.into(),
            ScreeningPhase::TitleAbstract,
            Verdict::Exclude,
            ExclusionCategory::WrongPopulation,
            confidence,
            "Children only".into(),
        )
        .with_model("gpt-4o-mini")
    }

    #[test]
    fn test_round_trip() {
        let (_dir, db, _project) = setup();
        let repo = DecisionRepo::new(&db.conn);
        let decision = exclude("s0", 0.7);
        repo.insert(&decision).unwrap();

        let loaded = repo.get(&decision.id).unwrap().unwrap();
        assert_eq!(loaded.verdict, Verdict::Exclude);
        assert_eq!(loaded.category, ExclusionCategory::WrongPopulation);
        assert_eq!(loaded.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(loaded.created_at.timestamp(), decision.created_at.timestamp());
    }

    #[test]
    fn test_supersede_keeps_history() {
        let (_dir, db, project_id) = setup();
        let repo = DecisionRepo::new(&db.conn);

        let prior = exclude("s0", 0.6);
        let other = exclude("s1", 0.95);
        repo.insert_all([&prior, &other]).unwrap();
        assert_eq!(repo.low_confidence_exclusions(&project_id, 0.8).unwrap().len(), 1);

        let review = prior.superseded_by(Verdict::Uncertain, ExclusionCategory::Other, 0.5, "maybe".into());
        repo.insert(&review).unwrap();

        let current = repo.current(&project_id, Some(ScreeningPhase::TitleAbstract)).unwrap();
        let ids: Vec<&str> = current.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec![review.id.as_str(), other.id.as_str()]);
        assert!(repo.low_confidence_exclusions(&project_id, 0.8).unwrap().is_empty());

        let history = repo.history("s0").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].verdict, Verdict::Exclude);
        assert_eq!(repo.all(&project_id).unwrap().len(), 3);
    }

    #[test]
    fn test_supersede_rules() {
        let (_dir, db, _project) = setup();
        let repo = DecisionRepo::new(&db.conn);
        let prior = exclude("s0", 0.6);

        let orphan = prior.superseded_by(Verdict::Include, ExclusionCategory::MeetsCriteria, 0.9, String::new());
        assert!(matches!(repo.insert(&orphan), Err(DatabaseError::NotFound(_))));

        repo.insert(&prior).unwrap();
        let mut cross = prior.superseded_by(Verdict::Include, ExclusionCategory::MeetsCriteria, 0.9, String::new());
        cross.study_id = "s1".into();
        assert!(repo.insert(&cross).is_err());

        let first = prior.superseded_by(Verdict::Include, ExclusionCategory::MeetsCriteria, 0.9, String::new());
        let second = prior.superseded_by(Verdict::Exclude, ExclusionCategory::Other, 0.9, String::new());
        repo.insert(&first).unwrap();
        assert!(repo.insert(&second).is_err());
    }

    #[test]
    fn test_unknown_study_is_rejected() {
        let (_dir, db, _project) = setup();
        let repo = DecisionRepo::new(&db.conn);
        assert!(repo.insert(&exclude("missing", 0.5)).is_err());
    }
}
