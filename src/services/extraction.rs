//! Structured data extraction from full texts
//!
//! Each study gets one call that asks for every field on the extraction form.
//! Anything the model leaves out, or marks as not reported, becomes an `NR`
//! value. Like screening, a failed or unreadable reply never aborts a batch: the
//! study comes back with every field `NR` and a note saying why, and only the
//! budget stops a batch early.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::cost_tracker::{BudgetExceeded, CostTracker};
use super::prompts;
use crate::adapters::llm::{ChatMessage, ChatRequest, LlmClient};
use crate::models::{
    AuditEntry, ExtractedValue, ExtractionField, OperationType, StudyExtraction, NOT_REPORTED,
};
use crate::utils::text::{extract_json, truncate_middle, truncate_text};

/// Full text kept for the prompt; longer texts lose their middle
pub const MAX_EXTRACTION_CHARS: usize = 50_000;

const EXTRACTION_MAX_TOKENS: u32 = 2000;

/// Audit prompts are capped; the full text is already on disk
const MAX_AUDIT_PROMPT_CHARS: usize = 5000;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Budget(#[from] BudgetExceeded),
}

#[derive(Debug, Deserialize, Default)]
struct ExtractionReply {
    #[serde(default)]
    extractions: HashMap<String, Value>,
    #[serde(default)]
    extraction_quality: Option<QualityReply>,
}

#[derive(Debug, Deserialize, Default)]
struct QualityReply {
    #[serde(default)]
    completeness: Option<f64>,
    #[serde(default)]
    notes: Option<String>,
}

/// `None` for the spellings models use for a missing value
fn reported_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    match text.to_ascii_uppercase().as_str() {
        "" | "NR" | "NOT REPORTED" | "N/A" => None,
        _ => Some(text),
    }
}

fn optional_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Read one field from the reply; either `{"value": ..}` or a bare value
fn field_value(field: &ExtractionField, raw: Option<&Value>) -> ExtractedValue {
    let Some(raw) = raw else {
        return ExtractedValue::not_reported(&field.name, None);
    };
    match raw {
        Value::Object(map) => ExtractedValue {
            field_name: field.name.clone(),
            value: map.get("value").and_then(reported_value),
            source_quote: optional_text(map.get("source_quote")),
            notes: optional_text(map.get("notes")),
        },
        scalar => ExtractedValue {
            field_name: field.name.clone(),
            value: reported_value(scalar),
            source_quote: None,
            notes: None,
        },
    }
}

/// One study's extraction, with the audit entry when a call was made
#[derive(Debug, Clone)]
pub struct Extracted {
    pub extraction: StudyExtraction,
    pub audit: Option<AuditEntry>,
    /// The model call failed or its reply was unusable
    pub fallback: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionBatch {
    pub extractions: Vec<StudyExtraction>,
    pub audits: Vec<AuditEntry>,
    pub fallbacks: usize,
    pub budget_exhausted: bool,
}

pub struct DataExtractor {
    client: Arc<dyn LlmClient>,
    fields: Vec<ExtractionField>,
    temperature: f32,
    max_chars: usize,
    project_id: Option<String>,
}

impl DataExtractor {
    pub fn new(client: Arc<dyn LlmClient>, fields: Vec<ExtractionField>) -> Self {
        Self {
            client,
            fields,
            temperature: 0.2,
            max_chars: MAX_EXTRACTION_CHARS,
            project_id: None,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn fields(&self) -> &[ExtractionField] {
        &self.fields
    }

    fn all_not_reported(&self, study_id: &str, reason: &str) -> StudyExtraction {
        let values = self
            .fields
            .iter()
            .map(|f| ExtractedValue::not_reported(&f.name, Some(reason.to_string())))
            .collect();
        let mut extraction = StudyExtraction::new(study_id.to_string(), values);
        extraction.notes = Some(reason.to_string());
        extraction
    }

    /// Extract every field from one study's full text
    pub async fn extract(
        &self,
        study_id: &str,
        fulltext: &str,
        tracker: &mut CostTracker,
    ) -> Result<Extracted, ExtractionError> {
        if fulltext.trim().is_empty() {
            warn!("No full text for study {}; every field is NR", study_id);
            return Ok(Extracted {
                extraction: self.all_not_reported(study_id, "Full text not available"),
                audit: None,
                fallback: true,
            });
        }

        tracker.check_budget(OperationType::DataExtraction)?;

        let text = truncate_middle(fulltext, self.max_chars);
        let request = ChatRequest::new(vec![
            ChatMessage::system(prompts::EXTRACTION_SYSTEM),
            ChatMessage::user(prompts::extraction_prompt(&self.fields, &text)),
        ])
        .with_temperature(self.temperature)
        .with_max_tokens(EXTRACTION_MAX_TOKENS)
        .json();
        let prompt_text = truncate_text(&request.prompt_text(), MAX_AUDIT_PROMPT_CHARS);

        let response = match self.client.chat(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Extraction call failed for study {}: {}", study_id, e);
                let mut extraction = self.all_not_reported(study_id, &format!("LLM error: {}", e));
                extraction.model = Some(self.client.model().to_string());
                return Ok(Extracted {
                    extraction,
                    audit: None,
                    fallback: true,
                });
            }
        };

        tracker.add_cost(
            OperationType::DataExtraction,
            response.input_tokens,
            response.output_tokens,
            response.cost,
            &response.model,
            Some(study_id),
        );

        let reply: Option<ExtractionReply> = serde_json::from_str(&extract_json(&response.content)).ok();
        let fallback = reply.is_none();
        let mut extraction = match reply {
            Some(reply) => {
                let values = self
                    .fields
                    .iter()
                    .map(|f| field_value(f, reply.extractions.get(&f.name)))
                    .collect();
                let mut extraction = StudyExtraction::new(study_id.to_string(), values);
                if let Some(quality) = reply.extraction_quality {
                    if let Some(completeness) = quality.completeness {
                        extraction.completeness = completeness.clamp(0.0, 1.0);
                    }
                    extraction.notes = quality.notes.filter(|n| !n.trim().is_empty());
                }
                extraction
            }
            None => {
                warn!(
                    "Unreadable extraction reply for study {}: {}",
                    study_id,
                    truncate_text(&response.content, 200)
                );
                self.all_not_reported(study_id, "unreadable model reply")
            }
        };
        extraction.model = Some(response.model.clone());

        let audit = AuditEntry::new(
            OperationType::DataExtraction,
            prompt_text,
            response.content.clone(),
            response.model.clone(),
        )
        .for_study(self.project_id.clone(), study_id)
        .with_usage(response.input_tokens, response.output_tokens, response.cost);

        Ok(Extracted {
            extraction,
            audit: Some(audit),
            fallback,
        })
    }

    /// Extract from `(study_id, fulltext)` pairs until done or out of budget
    pub async fn extract_batch(
        &self,
        texts: &[(String, String)],
        tracker: &mut CostTracker,
    ) -> ExtractionBatch {
        let mut batch = ExtractionBatch::default();

        for (study_id, text) in texts {
            match self.extract(study_id, text, tracker).await {
                Ok(extracted) => {
                    if extracted.fallback {
                        batch.fallbacks += 1;
                    }
                    batch.audits.extend(extracted.audit);
                    batch.extractions.push(extracted.extraction);
                }
                Err(ExtractionError::Budget(e)) => {
                    warn!("Stopping extraction: {}", e);
                    batch.budget_exhausted = true;
                    break;
                }
            }
        }

        info!(
            "Extracted {} of {} studies ({} fallbacks)",
            batch.extractions.len(),
            texts.len(),
            batch.fallbacks
        );
        batch
    }
}

/// One row per study: each field's value, then a `<field>_nr` flag per field
pub fn write_extractions_csv<W: Write>(
    fields: &[ExtractionField],
    extractions: &[StudyExtraction],
    out: W,
) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(out);

    let mut header = vec!["study_id".to_string()];
    header.extend(fields.iter().map(|f| f.name.clone()));
    header.extend(fields.iter().map(|f| format!("{}_nr", f.name)));
    writer.write_record(&header)?;

    for extraction in extractions {
        let values: Vec<Option<&ExtractedValue>> =
            fields.iter().map(|f| extraction.value(&f.name)).collect();

        let mut row = vec![extraction.study_id.clone()];
        row.extend(
            values
                .iter()
                .map(|v| v.map(|v| v.display()).unwrap_or(NOT_REPORTED).to_string()),
        );
        row.extend(
            values
                .iter()
                .map(|v| (!v.is_some_and(|v| v.is_reported())).to_string()),
        );
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}
