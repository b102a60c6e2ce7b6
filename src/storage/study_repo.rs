//! Study repository: imported records and their duplicate groups

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;
use crate::models::{DuplicateGroup, MatchReason, ScreeningPhase, SourceTag, StudyRecord};
use crate::services::dedup::DedupOutcome;

const STUDY_COLUMNS: &str = "s.id, s.title, s.abstract, s.authors_json, s.year, s.journal, s.doi, \
     s.pmid, s.source_format, s.source_database, s.duplicate_group, s.raw";

/// Repository for study records
pub struct StudyRepo<'a> {
    conn: &'a Connection,
}

impl<'a> StudyRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Store a deduplicated batch in one transaction
    ///
    /// `outcome` must cover every study of the project in import order. Existing
    /// rows keep their data and only have their group membership refreshed, and
    /// the project's duplicate groups are replaced. Returns how many studies are new.
    pub fn save_outcome(&self, project_id: &str, outcome: &DedupOutcome) -> Result<usize, DatabaseError> {
        let before = self.count(project_id)?;
        let imported_at = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO studies (id, project_id, ordinal, title, abstract, authors_json, year,
                                      journal, doi, pmid, source_format, source_database,
                                      duplicate_group, is_canonical, raw, imported_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     ordinal = excluded.ordinal,
                     duplicate_group = excluded.duplicate_group,
                     is_canonical = excluded.is_canonical",
            )?;
            for (ordinal, record) in outcome.records.iter().enumerate() {
                let canonical = outcome
                    .group_for(&record.id)
                    .map_or(true, |g| g.canonical_id == record.id);
                insert.execute(params![
                    record.id,
                    project_id,
                    ordinal as i64,
                    record.title,
                    record.r#abstract,
                    serde_json::to_string(&record.authors)?,
                    record.year,
                    record.journal,
                    record.doi,
                    record.pmid,
                    record.source.format.as_str(),
                    record.source.database,
                    record.duplicate_group,
                    canonical,
                    record.raw,
                    imported_at,
                ])?;
            }

            tx.execute("DELETE FROM duplicate_groups WHERE project_id = ?", [project_id])?;
            let mut insert_group = tx.prepare(
                "INSERT INTO duplicate_groups (id, project_id, canonical_id, reason, best_score, member_ids_json)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )?;
            for group in &outcome.groups {
                insert_group.execute(params![
                    group.id,
                    project_id,
                    group.canonical_id,
                    group.reason.as_str(),
                    group.best_score,
                    serde_json::to_string(&group.member_ids)?,
                ])?;
            }
        }
        tx.commit()?;

        Ok(self.count(project_id)?.saturating_sub(before))
    }

    pub fn get(&self, id: &str) -> Result<Option<StudyRecord>, DatabaseError> {
        let sql = format!("SELECT {} FROM studies s WHERE s.id = ?", STUDY_COLUMNS);
        let raw = self.conn.query_row(&sql, [id], RawStudy::from_row).optional()?;
        raw.map(RawStudy::into_record).transpose()
    }

    /// Every stored record in import order, duplicates included
    pub fn list(&self, project_id: &str) -> Result<Vec<StudyRecord>, DatabaseError> {
        self.query(
            &format!(
                "SELECT {} FROM studies s WHERE s.project_id = ? ORDER BY s.ordinal",
                STUDY_COLUMNS
            ),
            params![project_id],
        )
    }

    /// One record per study: canonical members and ungrouped records
    pub fn list_unique(&self, project_id: &str) -> Result<Vec<StudyRecord>, DatabaseError> {
        self.query(
            &format!(
                "SELECT {} FROM studies s WHERE s.project_id = ? AND s.is_canonical = 1 ORDER BY s.ordinal",
                STUDY_COLUMNS
            ),
            params![project_id],
        )
    }

    /// Unique studies with no decision yet in `phase`
    pub fn list_unscreened(
        &self,
        project_id: &str,
        phase: ScreeningPhase,
    ) -> Result<Vec<StudyRecord>, DatabaseError> {
        self.query(
            &format!(
                "SELECT {} FROM studies s
                 WHERE s.project_id = ? AND s.is_canonical = 1
                   AND NOT EXISTS (SELECT 1 FROM decisions d WHERE d.study_id = s.id AND d.phase = ?)
                 ORDER BY s.ordinal",
                STUDY_COLUMNS
            ),
            params![project_id, phase.as_str()],
        )
    }

    pub fn count(&self, project_id: &str) -> Result<usize, DatabaseError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM studies WHERE project_id = ?",
            [project_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn groups(&self, project_id: &str) -> Result<Vec<DuplicateGroup>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT g.id, g.canonical_id, g.reason, g.best_score, g.member_ids_json
             FROM duplicate_groups g
             JOIN studies s ON s.id = g.canonical_id
             WHERE g.project_id = ?
             ORDER BY s.ordinal",
        )?;
        let rows = stmt.query_map([project_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut groups = Vec::new();
        for row in rows {
            let (id, canonical_id, reason, best_score, members_json) = row?;
            let reason = MatchReason::parse(&reason)
                .ok_or_else(|| DatabaseError::QueryFailed(format!("unknown match reason {}", reason)))?;
            groups.push(DuplicateGroup {
                id,
                member_ids: serde_json::from_str(&members_json)?,
                canonical_id,
                reason,
                best_score,
            });
        }
        Ok(groups)
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<StudyRecord>, DatabaseError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawStudy::from_row)?;

        let mut studies = Vec::new();
        for row in rows {
            studies.push(row?.into_record()?);
        }
        Ok(studies)
    }
}

struct RawStudy {
    id: String,
    title: String,
    r#abstract: Option<String>,
    authors_json: String,
    year: Option<i32>,
    journal: Option<String>,
    doi: Option<String>,
    pmid: Option<String>,
    source_format: String,
    source_database: Option<String>,
    duplicate_group: Option<String>,
    raw: String,
}

impl RawStudy {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            r#abstract: row.get(2)?,
            authors_json: row.get(3)?,
            year: row.get(4)?,
            journal: row.get(5)?,
            doi: row.get(6)?,
            pmid: row.get(7)?,
            source_format: row.get(8)?,
            source_database: row.get(9)?,
            duplicate_group: row.get(10)?,
            raw: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<StudyRecord, DatabaseError> {
        let format = self.source_format.parse().map_err(DatabaseError::QueryFailed)?;
        let mut record = StudyRecord::new(
            self.id,
            self.title,
            SourceTag::new(format).with_database(self.source_database),
        );
        record.r#abstract = self.r#abstract;
        record.authors = serde_json::from_str(&self.authors_json)?;
        record.year = self.year;
        record.journal = self.journal;
        record.doi = self.doi;
        record.pmid = self.pmid;
        record.duplicate_group = self.duplicate_group;
        record.raw = self.raw;
        Ok(record)
    }
}
