//! Project repository

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::db::parse_timestamp;
use super::DatabaseError;
use crate::models::{LlmProvider, Project, ReviewCriteria};

const PROJECT_COLUMNS: &str = "p.id, p.name, p.research_question, p.criteria_json, p.provider,
     p.model, p.budget_limit, p.created_at, p.updated_at,
     (SELECT COUNT(*) FROM studies s WHERE s.project_id = p.id) AS study_count";

/// Repository for review projects
pub struct ProjectRepo<'a> {
    conn: &'a Connection,
}

impl<'a> ProjectRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn create(&self, project: &Project) -> Result<(), DatabaseError> {
        let criteria_json = serde_json::to_string(&project.criteria)?;
        self.conn.execute(
            "INSERT INTO projects (id, name, research_question, criteria_json, provider, model,
                                   budget_limit, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                project.id,
                project.name,
                project.research_question,
                criteria_json,
                project.provider.as_str(),
                project.model,
                project.budget_limit,
                project.created_at.to_rfc3339(),
                project.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a project by ID
    pub fn get(&self, id: &str) -> Result<Option<Project>, DatabaseError> {
        let sql = format!("SELECT {} FROM projects p WHERE p.id = ?", PROJECT_COLUMNS);
        let raw = self
            .conn
            .query_row(&sql, [id], RawProject::from_row)
            .optional()?;
        raw.map(RawProject::into_project).transpose()
    }

    /// All projects, oldest first
    pub fn list(&self) -> Result<Vec<Project>, DatabaseError> {
        let sql = format!("SELECT {} FROM projects p ORDER BY p.created_at", PROJECT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], RawProject::from_row)?;

        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?.into_project()?);
        }
        Ok(projects)
    }

    /// The project a directory was initialised with
    pub fn primary(&self) -> Result<Option<Project>, DatabaseError> {
        Ok(self.list()?.into_iter().next())
    }

    pub fn update_criteria(
        &self,
        id: &str,
        research_question: &str,
        criteria: &ReviewCriteria,
    ) -> Result<(), DatabaseError> {
        let changed = self.conn.execute(
            "UPDATE projects SET research_question = ?, criteria_json = ?, updated_at = ? WHERE id = ?",
            params![
                research_question,
                serde_json::to_string(criteria)?,
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound(format!("project {}", id)));
        }
        Ok(())
    }

    pub fn update_budget(&self, id: &str, budget_limit: Option<f64>) -> Result<(), DatabaseError> {
        let changed = self.conn.execute(
            "UPDATE projects SET budget_limit = ?, updated_at = ? WHERE id = ?",
            params![budget_limit, Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound(format!("project {}", id)));
        }
        Ok(())
    }
}

/// Row as stored, before JSON and enum columns are decoded
struct RawProject {
    id: String,
    name: String,
    research_question: String,
    criteria_json: String,
    provider: String,
    model: String,
    budget_limit: Option<f64>,
    created_at: String,
    updated_at: String,
    study_count: i32,
}

impl RawProject {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            research_question: row.get(2)?,
            criteria_json: row.get(3)?,
            provider: row.get(4)?,
            model: row.get(5)?,
            budget_limit: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            study_count: row.get(9)?,
        })
    }

    fn into_project(self) -> Result<Project, DatabaseError> {
        let criteria: ReviewCriteria = serde_json::from_str(&self.criteria_json)?;
        let provider: LlmProvider = self.provider.parse().map_err(DatabaseError::QueryFailed)?;
        Ok(Project {
            id: self.id,
            name: self.name,
            research_question: self.research_question,
            criteria,
            provider,
            model: self.model,
            budget_limit: self.budget_limit,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
            study_count: self.study_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InclusionCriteria;
    use crate::storage::open_database;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_get() {
        let dir = tempdir().unwrap();
        let db = open_database(dir.path()).unwrap();
        let repo = ProjectRepo::new(&db.conn);

        let criteria = ReviewCriteria {
            inclusion: InclusionCriteria {
                population: "Adults".into(),
                ..Default::default()
            },
            exclusion: vec!["Animal studies".into()],
            ..Default::default()
        };
        let project = Project::new("Anxiety".into(), "Does it help?".into())
            .with_criteria(criteria.clone())
            .with_llm(LlmProvider::Anthropic, "claude-3-haiku-20240307".into())
            .with_budget(Some(5.0));
        repo.create(&project).unwrap();

        let loaded = repo.get(&project.id).unwrap().unwrap();
        assert_eq!(loaded.criteria, criteria);
        assert_eq!(loaded.provider, LlmProvider::Anthropic);
        assert_eq!(loaded.budget_limit, Some(5.0));
        assert_eq!(loaded.study_count, 0);
        assert!(repo.get("missing").unwrap().is_none());
        assert_eq!(repo.primary().unwrap().unwrap().id, project.id);
    }

    #[test]
    fn test_updates() {
        let dir = tempdir().unwrap();
        let db = open_database(dir.path()).unwrap();
        let repo = ProjectRepo::new(&db.conn);
        let project = Project::new("P".into(), "Q".into());
        repo.create(&project).unwrap();

        repo.update_criteria(&project.id, "New question", &ReviewCriteria::default()).unwrap();
        repo.update_budget(&project.id, Some(1.5)).unwrap();
        let loaded = repo.get(&project.id).unwrap().unwrap();
        assert_eq!(loaded.research_question, "New question");
        assert_eq!(loaded.budget_limit, Some(1.5));

        assert!(matches!(
            repo.update_budget("nope", None),
            Err(DatabaseError::NotFound(_))
        ));
    }
}
