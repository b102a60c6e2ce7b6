//! Second look at low-confidence exclusions
//!
//! Each review writes a new decision that supersedes the exclusion it looked at.
//! A reconsidered study becomes `uncertain` so it goes to human review rather
//! than straight into the included set.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use super::cost_tracker::CostTracker;
use super::prompts;
use super::screening::{audit_entry, confidence_value, ScreeningError};
use crate::adapters::llm::{ChatMessage, ChatRequest, LlmClient};
use crate::models::{
    AuditEntry, ExclusionCategory, OperationType, ReviewCriteria, ScreeningDecision, StudyRecord,
    Verdict,
};
use crate::utils::text::extract_json;

const FEEDBACK_MAX_TOKENS: u32 = 300;

#[derive(Debug, Deserialize, Default)]
struct FeedbackReply {
    #[serde(default)]
    reconsider: Option<serde_json::Value>,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    new_confidence: Option<serde_json::Value>,
}

impl FeedbackReply {
    fn reconsider(&self) -> bool {
        match &self.reconsider {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => {
                matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes")
            }
            _ => false,
        }
    }
}

/// Outcome of reviewing one exclusion
#[derive(Debug, Clone)]
pub struct Reviewed {
    /// Supersedes the reviewed exclusion
    pub decision: ScreeningDecision,
    pub audit: Option<AuditEntry>,
    pub reconsidered: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackOutcome {
    pub reviewed: Vec<Reviewed>,
    pub reconsidered: usize,
    pub maintained: usize,
    /// Set when the budget ran out before every candidate was reviewed
    pub budget_exhausted: bool,
}

impl FeedbackOutcome {
    pub fn decisions(&self) -> impl Iterator<Item = &ScreeningDecision> {
        self.reviewed.iter().map(|r| &r.decision)
    }

    pub fn audits(&self) -> impl Iterator<Item = &AuditEntry> {
        self.reviewed.iter().filter_map(|r| r.audit.as_ref())
    }
}

/// Current exclusions below `threshold` that no later decision has replaced
pub fn select_for_review(decisions: &[ScreeningDecision], threshold: f64) -> Vec<&ScreeningDecision> {
    let superseded: HashSet<&str> = decisions
        .iter()
        .filter_map(|d| d.supersedes.as_deref())
        .collect();

    decisions
        .iter()
        .filter(|d| !superseded.contains(d.id.as_str()))
        .filter(|d| d.is_low_confidence_exclusion(threshold))
        .collect()
}

pub struct FeedbackReviewer {
    client: Arc<dyn LlmClient>,
    criteria: ReviewCriteria,
    research_question: String,
    temperature: f32,
    project_id: Option<String>,
}

impl FeedbackReviewer {
    pub fn new(client: Arc<dyn LlmClient>, criteria: ReviewCriteria, research_question: String) -> Self {
        Self {
            client,
            criteria,
            research_question,
            temperature: 0.3,
            project_id: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Review one exclusion
    ///
    /// When the call fails or the reply cannot be read, the exclusion is kept and
    /// `Ok(None)` is returned so nothing new is written.
    pub async fn review(
        &self,
        decision: &ScreeningDecision,
        study: &StudyRecord,
        tracker: &mut CostTracker,
    ) -> Result<Option<Reviewed>, ScreeningError> {
        tracker.check_budget(OperationType::FeedbackReview)?;

        let prompt = prompts::feedback_prompt(&self.research_question, &self.criteria, study, decision);
        let request = ChatRequest::new(vec![
            ChatMessage::system(prompts::FEEDBACK_SYSTEM),
            ChatMessage::user(prompt),
        ])
        .with_temperature(self.temperature)
        .with_max_tokens(FEEDBACK_MAX_TOKENS)
        .json();
        let prompt_text = request.prompt_text();

        let response = match self.client.chat(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Feedback call failed for study {}: {}; keeping exclusion", study.id, e);
                return Ok(None);
            }
        };

        tracker.add_cost(
            OperationType::FeedbackReview,
            response.input_tokens,
            response.output_tokens,
            response.cost,
            &response.model,
            Some(&study.id),
        );

        let reply: FeedbackReply = match serde_json::from_str(&extract_json(&response.content)) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Unreadable feedback reply for study {}: {}; keeping exclusion", study.id, e);
                return Ok(None);
            }
        };

        let reconsidered = reply.reconsider();
        let confidence =
            confidence_value(reply.new_confidence.as_ref()).unwrap_or(decision.confidence);
        let rationale = reply.rationale.unwrap_or_default();

        let next = if reconsidered {
            decision.superseded_by(Verdict::Uncertain, ExclusionCategory::Other, confidence, rationale)
        } else {
            decision.superseded_by(Verdict::Exclude, decision.category, confidence, rationale)
        }
        .with_model(response.model.clone());

        let audit = audit_entry(
            OperationType::FeedbackReview,
            prompt_text,
            &response,
            self.project_id.clone(),
            study,
            Some(&next),
        );

        Ok(Some(Reviewed {
            decision: next,
            audit: Some(audit),
            reconsidered,
        }))
    }

    /// Review every low-confidence exclusion in `decisions`
    ///
    /// Stops early, keeping what was done, once the budget runs out.
    pub async fn review_batch(
        &self,
        decisions: &[ScreeningDecision],
        studies: &[StudyRecord],
        threshold: f64,
        tracker: &mut CostTracker,
    ) -> FeedbackOutcome {
        let by_id: HashMap<&str, &StudyRecord> = studies.iter().map(|s| (s.id.as_str(), s)).collect();
        let candidates = select_for_review(decisions, threshold);
        let mut outcome = FeedbackOutcome::default();

        info!(
            "Reviewing {} exclusions below confidence {:.2}",
            candidates.len(),
            threshold
        );

        for decision in candidates {
            let Some(study) = by_id.get(decision.study_id.as_str()) else {
                warn!("No study {} for decision {}; skipping", decision.study_id, decision.id);
                continue;
            };

            match self.review(decision, study, tracker).await {
                Ok(Some(reviewed)) => {
                    if reviewed.reconsidered {
                        outcome.reconsidered += 1;
                    } else {
                        outcome.maintained += 1;
                    }
                    outcome.reviewed.push(reviewed);
                }
                Ok(None) => outcome.maintained += 1,
                Err(ScreeningError::Budget(e)) => {
                    warn!("Stopping feedback review: {}", e);
                    outcome.budget_exhausted = true;
                    break;
                }
            }
        }

        info!(
            "Feedback review: {} reconsidered, {} maintained",
            outcome.reconsidered, outcome.maintained
        );
        outcome
    }
}
