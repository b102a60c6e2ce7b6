//! LLM screening of deduplicated studies
//!
//! The screener turns one study into one [`ScreeningDecision`]. Model failures
//! never abort a batch: a failed call or unreadable reply becomes an `uncertain`
//! decision with zero confidence so a human picks it up. Only the budget can stop
//! screening early, along with the caller's progress callback.
//!
//! Nothing here touches storage. Decisions and audit entries are returned for the
//! caller to persist.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cost_tracker::{BudgetExceeded, CostTracker};
use super::prompts;
use crate::adapters::llm::{ChatMessage, ChatRequest, LlmClient, LlmResponse};
use crate::models::{
    AuditEntry, ExclusionCategory, OperationType, ReviewCriteria, ScreeningDecision,
    ScreeningPhase, ScreeningSettings, StudyRecord, Verdict,
};
use crate::utils::text::{extract_json, truncate_text};

/// Used when the model leaves out its confidence
const DEFAULT_CONFIDENCE: f64 = 0.8;

const TITLE_ABSTRACT_MAX_TOKENS: u32 = 200;
const FULLTEXT_MAX_TOKENS: u32 = 500;

#[derive(Debug, Error)]
pub enum ScreeningError {
    #[error(transparent)]
    Budget(#[from] BudgetExceeded),
}

/// Reply shape requested from the model; every field is optional in practice
#[derive(Debug, Deserialize, Default)]
pub(crate) struct ScreeningReply {
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub reason_category: Option<String>,
    #[serde(default)]
    pub confidence: Option<serde_json::Value>,
}

/// Read a confidence given as a number or a numeric string
pub(crate) fn confidence_value(value: Option<&serde_json::Value>) -> Option<f64> {
    match value? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Decisions already made this session, keyed by title and abstract
///
/// Two records with the same title and abstract get the same verdict without a
/// second model call.
#[derive(Debug, Default, Clone)]
pub struct ScreeningCache {
    entries: HashMap<String, ScreeningDecision>,
}

impl ScreeningCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_for(study: &StudyRecord) -> String {
        let mut hasher = Sha256::new();
        hasher.update(study.title.as_bytes());
        hasher.update(b"|");
        hasher.update(study.r#abstract.as_deref().unwrap_or("").as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Cached verdict re-issued for `study`
    pub fn lookup(&self, study: &StudyRecord) -> Option<ScreeningDecision> {
        self.entries.get(&Self::key_for(study)).map(|cached| {
            let mut decision = cached.clone();
            decision.id = Uuid::new_v4().to_string();
            decision.study_id = study.id.clone();
            decision
        })
    }

    pub fn insert(&mut self, study: &StudyRecord, decision: &ScreeningDecision) {
        self.entries.insert(Self::key_for(study), decision.clone());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns how many entries were dropped
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

/// One screened study
#[derive(Debug, Clone)]
pub struct Screened {
    pub decision: ScreeningDecision,
    /// Present when a model call was made
    pub audit: Option<AuditEntry>,
    pub from_cache: bool,
    /// The model call failed or its reply was unusable
    pub fallback: bool,
}

/// Progress report handed to the batch callback before each study
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    pub index: usize,
    pub total: usize,
    pub study: &'a StudyRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Budget,
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub decisions: Vec<ScreeningDecision>,
    pub audits: Vec<AuditEntry>,
    pub cached: usize,
    pub fallbacks: usize,
    /// `None` when every study was screened
    pub stopped: Option<StopReason>,
}

impl BatchOutcome {
    pub fn completed(&self) -> bool {
        self.stopped.is_none()
    }
}

/// Screens studies against one review's criteria
pub struct Screener {
    client: Arc<dyn LlmClient>,
    criteria: ReviewCriteria,
    research_question: String,
    settings: ScreeningSettings,
    temperature: f32,
    project_id: Option<String>,
}

impl Screener {
    pub fn new(client: Arc<dyn LlmClient>, criteria: ReviewCriteria, research_question: String) -> Self {
        Self {
            client,
            criteria,
            research_question,
            settings: ScreeningSettings::default(),
            temperature: 0.3,
            project_id: None,
        }
    }

    pub fn with_settings(mut self, settings: ScreeningSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Title/abstract screening of one study
    pub async fn screen(
        &self,
        study: &StudyRecord,
        cache: &mut ScreeningCache,
        tracker: &mut CostTracker,
    ) -> Result<Screened, ScreeningError> {
        if let Some(decision) = cache.lookup(study) {
            debug!("Cache hit for study {}", study.id);
            return Ok(Screened {
                decision,
                audit: None,
                from_cache: true,
                fallback: false,
            });
        }

        let prompt = prompts::title_abstract_prompt(
            &self.research_question,
            &self.criteria,
            study,
            self.settings.max_title_chars,
            self.settings.max_abstract_chars,
        );
        let screened = self
            .run(
                study,
                ScreeningPhase::TitleAbstract,
                OperationType::TitleAbstractScreening,
                prompts::TITLE_ABSTRACT_SYSTEM,
                prompt,
                TITLE_ABSTRACT_MAX_TOKENS,
                tracker,
            )
            .await?;

        if !screened.fallback {
            cache.insert(study, &screened.decision);
        }
        Ok(screened)
    }

    /// Full-text screening of one study; `fulltext` is truncated to the configured limit
    pub async fn screen_fulltext(
        &self,
        study: &StudyRecord,
        fulltext: &str,
        tracker: &mut CostTracker,
    ) -> Result<Screened, ScreeningError> {
        if fulltext.trim().is_empty() {
            warn!("No full text for study {}; recording uncertain", study.id);
            return Ok(Screened {
                decision: ScreeningDecision::fallback(
                    study.id.clone(),
                    ScreeningPhase::FullText,
                    "no full text available",
                ),
                audit: None,
                from_cache: false,
                fallback: true,
            });
        }

        let text = truncate_text(fulltext, self.settings.max_fulltext_chars);
        let prompt = prompts::fulltext_prompt(&self.research_question, &self.criteria, &text);
        self.run(
            study,
            ScreeningPhase::FullText,
            OperationType::FulltextScreening,
            prompts::FULLTEXT_SYSTEM,
            prompt,
            FULLTEXT_MAX_TOKENS,
            tracker,
        )
        .await
    }

    /// Screen studies one after another
    ///
    /// `on_progress` runs before each study; returning `ControlFlow::Break` stops
    /// the batch there. Reaching the budget also stops it. Decisions made before
    /// the stop are kept.
    pub async fn screen_batch<F>(
        &self,
        studies: &[StudyRecord],
        cache: &mut ScreeningCache,
        tracker: &mut CostTracker,
        mut on_progress: F,
    ) -> BatchOutcome
    where
        F: FnMut(Progress<'_>) -> ControlFlow<()>,
    {
        let mut outcome = BatchOutcome::default();
        let total = studies.len();

        for (index, study) in studies.iter().enumerate() {
            if on_progress(Progress { index, total, study }).is_break() {
                info!("Screening cancelled after {} of {} studies", index, total);
                outcome.stopped = Some(StopReason::Cancelled);
                break;
            }

            match self.screen(study, cache, tracker).await {
                Ok(screened) => {
                    if screened.from_cache {
                        outcome.cached += 1;
                    }
                    if screened.fallback {
                        outcome.fallbacks += 1;
                    }
                    if let Some(audit) = screened.audit {
                        outcome.audits.push(audit);
                    }
                    outcome.decisions.push(screened.decision);
                }
                Err(ScreeningError::Budget(e)) => {
                    warn!("Stopping screening: {}", e);
                    outcome.stopped = Some(StopReason::Budget);
                    break;
                }
            }
        }

        info!(
            "Screened {} of {} studies ({} cached, {} fallbacks, ${:.4} spent)",
            outcome.decisions.len(),
            total,
            outcome.cached,
            outcome.fallbacks,
            tracker.total_cost()
        );
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        study: &StudyRecord,
        phase: ScreeningPhase,
        operation: OperationType,
        system: &str,
        prompt: String,
        max_tokens: u32,
        tracker: &mut CostTracker,
    ) -> Result<Screened, ScreeningError> {
        tracker.check_budget(operation)?;

        let request = ChatRequest::new(vec![ChatMessage::system(system), ChatMessage::user(prompt)])
            .with_temperature(self.temperature)
            .with_max_tokens(max_tokens)
            .json();
        let prompt_text = request.prompt_text();

        let response = match self.client.chat(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("LLM call failed for study {}: {}", study.id, e);
                return Ok(Screened {
                    decision: ScreeningDecision::fallback(study.id.clone(), phase, &e.to_string())
                        .with_model(self.client.model()),
                    audit: None,
                    from_cache: false,
                    fallback: true,
                });
            }
        };

        tracker.add_cost(
            operation,
            response.input_tokens,
            response.output_tokens,
            response.cost,
            &response.model,
            Some(&study.id),
        );

        let (decision, fallback) = match parse_reply(&response.content) {
            Some(reply) => (decision_from_reply(study, phase, reply), false),
            None => {
                warn!(
                    "Unreadable screening reply for study {}: {}",
                    study.id,
                    truncate_text(&response.content, 200)
                );
                let decision =
                    ScreeningDecision::fallback(study.id.clone(), phase, "unreadable model reply");
                (decision, true)
            }
        };
        let decision = decision.with_model(response.model.clone());

        let audit = audit_entry(
            operation,
            prompt_text,
            &response,
            self.project_id.clone(),
            study,
            (!fallback).then_some(&decision),
        );

        Ok(Screened {
            decision,
            audit: Some(audit),
            from_cache: false,
            fallback,
        })
    }
}

fn parse_reply(content: &str) -> Option<ScreeningReply> {
    serde_json::from_str(&extract_json(content)).ok()
}

fn decision_from_reply(
    study: &StudyRecord,
    phase: ScreeningPhase,
    reply: ScreeningReply,
) -> ScreeningDecision {
    let verdict = reply
        .decision
        .as_deref()
        .map(Verdict::from_label)
        .unwrap_or(Verdict::Uncertain);
    let category = reply
        .reason_category
        .as_deref()
        .map(ExclusionCategory::from_label)
        .unwrap_or(ExclusionCategory::Other);
    let confidence = confidence_value(reply.confidence.as_ref()).unwrap_or(DEFAULT_CONFIDENCE);

    ScreeningDecision::new(
        study.id.clone(),
        phase,
        verdict,
        category,
        confidence,
        reply.reason.unwrap_or_default(),
    )
}

pub(crate) fn audit_entry(
    operation: OperationType,
    prompt: String,
    response: &LlmResponse,
    project_id: Option<String>,
    study: &StudyRecord,
    decision: Option<&ScreeningDecision>,
) -> AuditEntry {
    let mut entry = AuditEntry::new(
        operation,
        prompt,
        response.content.clone(),
        response.model.clone(),
    )
    .for_study(project_id, &study.id)
    .with_usage(response.input_tokens, response.output_tokens, response.cost);

    if let Some(decision) = decision {
        entry.verdict = Some(decision.verdict.as_str().to_string());
        entry.confidence = Some(decision.confidence);
    }
    entry
}
