use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::criteria::ReviewCriteria;
use super::settings::LlmProvider;

/// A systematic review: one research question screened against one set of criteria
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub research_question: String,
    #[serde(default)]
    pub criteria: ReviewCriteria,
    pub provider: LlmProvider,
    pub model: String,
    pub budget_limit: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub study_count: i32,
}

impl Project {
    pub fn new(name: String, research_question: String) -> Self {
        let now = Utc::now();
        let provider = LlmProvider::default();
        Self {
            id: Uuid::new_v4().to_string()[..16].to_string(),
            name,
            research_question,
            criteria: ReviewCriteria::default(),
            model: provider.default_model().to_string(),
            provider,
            budget_limit: None,
            created_at: now,
            updated_at: now,
            study_count: 0,
        }
    }

    pub fn with_criteria(mut self, criteria: ReviewCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_llm(mut self, provider: LlmProvider, model: String) -> Self {
        self.provider = provider;
        self.model = model;
        self
    }

    pub fn with_budget(mut self, budget_limit: Option<f64>) -> Self {
        self.budget_limit = budget_limit;
        self
    }
}
