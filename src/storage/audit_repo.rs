//! Audit log of LLM calls

use rusqlite::{params, Connection, Row};

use super::db::parse_timestamp;
use super::DatabaseError;
use crate::models::{AuditEntry, CostEntry, OperationType};

const AUDIT_COLUMNS: &str = "id, project_id, study_id, operation, prompt, response, verdict, \
     confidence, input_tokens, output_tokens, cost, model, created_at";

pub struct AuditRepo<'a> {
    conn: &'a Connection,
}

impl<'a> AuditRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, entry: &AuditEntry) -> Result<(), DatabaseError> {
        self.conn.execute(
            &format!(
                "INSERT INTO audit_log ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                AUDIT_COLUMNS
            ),
            params![
                entry.id,
                entry.project_id,
                entry.study_id,
                entry.operation.as_str(),
                entry.prompt,
                entry.response,
                entry.verdict,
                entry.confidence,
                entry.input_tokens,
                entry.output_tokens,
                entry.cost,
                entry.model,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_all<'e>(&self, entries: impl IntoIterator<Item = &'e AuditEntry>) -> Result<usize, DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;
        for entry in entries {
            AuditRepo::new(&tx).insert(entry)?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    /// Entries for a project, oldest first
    pub fn list(&self, project_id: &str) -> Result<Vec<AuditEntry>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM audit_log WHERE project_id = ? ORDER BY created_at",
            AUDIT_COLUMNS
        ))?;
        let rows = stmt.query_map([project_id], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Spend recorded for a project, for resuming a cost tracker
    pub fn cost_entries(&self, project_id: &str) -> Result<Vec<CostEntry>, DatabaseError> {
        Ok(self
            .list(project_id)?
            .into_iter()
            .map(|e| CostEntry {
                operation: e.operation,
                input_tokens: e.input_tokens,
                output_tokens: e.output_tokens,
                cost: e.cost,
                model: e.model,
                study_id: e.study_id,
                timestamp: e.created_at,
            })
            .collect())
    }

    pub fn total_cost(&self, project_id: &str) -> Result<f64, DatabaseError> {
        let total: f64 = self.conn.query_row(
            "SELECT COALESCE(SUM(cost), 0.0) FROM audit_log WHERE project_id = ?",
            [project_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}

fn row_to_entry(row: &Row) -> rusqlite::Result<AuditEntry> {
    let operation: String = row.get(3)?;
    let created_at: String = row.get(12)?;
    Ok(AuditEntry {
        id: row.get(0)?,
        project_id: row.get(1)?,
        study_id: row.get(2)?,
        operation: OperationType::parse(&operation),
        prompt: row.get(4)?,
        response: row.get(5)?,
        verdict: row.get(6)?,
        confidence: row.get(7)?,
        input_tokens: row.get(8)?,
        output_tokens: row.get(9)?,
        cost: row.get(10)?,
        model: row.get(11)?,
        created_at: parse_timestamp(&created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::CostTracker;
    use crate::storage::open_database;
    use tempfile::tempdir;

    fn entry(project: &str, operation: OperationType, cost: f64) -> AuditEntry {
        AuditEntry::new(operation, "prompt".into(), "{}".into(), "gpt-4o-mini".into())
            .for_study(Some(project.into()), "s1")
            .with_usage(120, 30, cost)
    }

    #[test]
    fn test_insert_list_and_totals() {
        let dir = tempdir().unwrap();
        let db = open_database(dir.path()).unwrap();
        let repo = AuditRepo::new(&db.conn);

        repo.insert_all([
            &entry("p1", OperationType::TitleAbstractScreening, 0.25),
            &entry("p1", OperationType::FeedbackReview, 0.5),
            &entry("p2", OperationType::Other, 9.0),
        ])
        .unwrap();

        let listed = repo.list("p1").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].input_tokens, 120);
        assert!((repo.total_cost("p1").unwrap() - 0.75).abs() < 1e-9);
        assert_eq!(repo.total_cost("none").unwrap(), 0.0);

        let tracker = CostTracker::new(Some(1.0)).with_entries(repo.cost_entries("p1").unwrap());
        assert!((tracker.remaining_budget().unwrap() - 0.25).abs() < 1e-9);
        assert_eq!(tracker.by_operation().len(), 2);
    }
}
