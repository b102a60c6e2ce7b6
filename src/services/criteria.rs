//! Drafting and refining review criteria with an LLM
//!
//! The generator turns a research question into PICO(S) [`ReviewCriteria`], or
//! revises existing criteria from reviewer feedback. Unlike screening there is no
//! fallback verdict: a failed call or unreadable reply is an error the reviewer
//! has to see. Spend is recorded whenever the provider answered.

use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::cost_tracker::{BudgetExceeded, CostTracker};
use super::prompts;
use crate::adapters::llm::{ChatMessage, ChatRequest, LlmClient, LlmError, LlmResponse};
use crate::models::{AuditEntry, InclusionCriteria, OperationType, ReviewCriteria};
use crate::utils::text::{extract_json, truncate_text};

const CRITERIA_MAX_TOKENS: u32 = 1000;

/// Comparison text when the model leaves it out of a fresh draft
const NO_COMPARISON: &str = "Not applicable";

#[derive(Debug, Error)]
pub enum CriteriaError {
    #[error(transparent)]
    Budget(#[from] BudgetExceeded),
    #[error("Criteria generation failed: {0}")]
    Llm(#[from] LlmError),
    #[error("Unreadable criteria reply: {0}")]
    Unreadable(String),
}

#[derive(Debug, Deserialize, Default)]
struct CriteriaReply {
    #[serde(default)]
    inclusion_criteria: InclusionReply,
    #[serde(default)]
    exclusion_criteria: Option<Vec<String>>,
    #[serde(default)]
    suggested_exclusion_reasons: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct InclusionReply {
    population: Option<String>,
    intervention: Option<String>,
    comparison: Option<String>,
    outcome: Option<String>,
    study_design: Option<String>,
}

impl CriteriaReply {
    /// Merge onto `base`, keeping its values for anything the model left out
    fn into_criteria(self, base: &ReviewCriteria) -> ReviewCriteria {
        let pico = self.inclusion_criteria;
        let keep = |value: Option<String>, current: &str| value.unwrap_or_else(|| current.to_string());

        ReviewCriteria {
            inclusion: InclusionCriteria {
                population: keep(pico.population, &base.inclusion.population),
                intervention: keep(pico.intervention, &base.inclusion.intervention),
                comparison: keep(pico.comparison, &base.inclusion.comparison),
                outcome: keep(pico.outcome, &base.inclusion.outcome),
                study_design: keep(pico.study_design, &base.inclusion.study_design),
            },
            exclusion: self.exclusion_criteria.unwrap_or_else(|| base.exclusion.clone()),
            suggested_exclusion_reasons: self
                .suggested_exclusion_reasons
                .unwrap_or_else(|| base.suggested_exclusion_reasons.clone()),
        }
    }
}

/// Criteria from one model call, with the audit entry to persist
#[derive(Debug, Clone)]
pub struct GeneratedCriteria {
    pub criteria: ReviewCriteria,
    pub audit: AuditEntry,
}

pub struct CriteriaGenerator {
    client: Arc<dyn LlmClient>,
    temperature: f32,
    project_id: Option<String>,
}

impl CriteriaGenerator {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
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

    /// Draft criteria for a research question
    pub async fn generate(
        &self,
        research_question: &str,
        tracker: &mut CostTracker,
    ) -> Result<GeneratedCriteria, CriteriaError> {
        let base = ReviewCriteria {
            inclusion: InclusionCriteria {
                comparison: NO_COMPARISON.to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let prompt = prompts::criteria_prompt(research_question);
        let generated = self.run(prompt, &base, tracker).await?;
        info!(
            "Generated criteria with {} exclusion rules",
            generated.criteria.exclusion.len()
        );
        Ok(generated)
    }

    /// Revise `current` according to reviewer feedback
    pub async fn refine(
        &self,
        current: &ReviewCriteria,
        feedback: &str,
        tracker: &mut CostTracker,
    ) -> Result<GeneratedCriteria, CriteriaError> {
        let prompt = prompts::refine_criteria_prompt(current, feedback);
        self.run(prompt, current, tracker).await
    }

    async fn run(
        &self,
        prompt: String,
        base: &ReviewCriteria,
        tracker: &mut CostTracker,
    ) -> Result<GeneratedCriteria, CriteriaError> {
        tracker.check_budget(OperationType::CriteriaGeneration)?;

        let request = ChatRequest::new(vec![
            ChatMessage::system(prompts::CRITERIA_SYSTEM),
            ChatMessage::user(prompt),
        ])
        .with_temperature(self.temperature)
        .with_max_tokens(CRITERIA_MAX_TOKENS)
        .json();
        let prompt_text = request.prompt_text();

        let response = self.client.chat(request).await?;
        tracker.add_cost(
            OperationType::CriteriaGeneration,
            response.input_tokens,
            response.output_tokens,
            response.cost,
            &response.model,
            None,
        );

        let reply: CriteriaReply = serde_json::from_str(&extract_json(&response.content)).map_err(|e| {
            warn!(
                "Unreadable criteria reply: {}",
                truncate_text(&response.content, 200)
            );
            CriteriaError::Unreadable(e.to_string())
        })?;

        Ok(GeneratedCriteria {
            criteria: reply.into_criteria(base),
            audit: self.audit_entry(prompt_text, &response),
        })
    }

    fn audit_entry(&self, prompt: String, response: &LlmResponse) -> AuditEntry {
        AuditEntry::new(
            OperationType::CriteriaGeneration,
            prompt,
            response.content.clone(),
            response.model.clone(),
        )
        .for_project(self.project_id.clone())
        .with_usage(response.input_tokens, response.output_tokens, response.cost)
    }
}
