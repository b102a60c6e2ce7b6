use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Kind of LLM operation, used for cost accounting and the audit trail
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    TitleAbstractScreening,
    FulltextScreening,
    FeedbackReview,
    CriteriaGeneration,
    DataExtraction,
    Other,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::TitleAbstractScreening => "title_abstract_screening",
            OperationType::FulltextScreening => "fulltext_screening",
            OperationType::FeedbackReview => "feedback_review",
            OperationType::CriteriaGeneration => "criteria_generation",
            OperationType::DataExtraction => "data_extraction",
            OperationType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "title_abstract_screening" => OperationType::TitleAbstractScreening,
            "fulltext_screening" => OperationType::FulltextScreening,
            "feedback_review" => OperationType::FeedbackReview,
            "criteria_generation" => OperationType::CriteriaGeneration,
            "data_extraction" => OperationType::DataExtraction,
            _ => OperationType::Other,
        }
    }
}

/// Record of a single LLM call: what was asked, what came back, what it cost
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub project_id: Option<String>,
    pub study_id: Option<String>,
    pub operation: OperationType,
    pub prompt: String,
    pub response: String,
    pub verdict: Option<String>,
    pub confidence: Option<f64>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: f64,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(operation: OperationType, prompt: String, response: String, model: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: None,
            study_id: None,
            operation,
            prompt,
            response,
            verdict: None,
            confidence: None,
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            model,
            created_at: Utc::now(),
        }
    }

    pub fn for_study(mut self, project_id: Option<String>, study_id: &str) -> Self {
        self.project_id = project_id;
        self.study_id = Some(study_id.to_string());
        self
    }

    /// Entry for a call about the project as a whole
    pub fn for_project(mut self, project_id: Option<String>) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32, cost: f64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self.cost = cost;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostEntry {
    pub operation: OperationType,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: f64,
    pub model: String,
    pub study_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}
