use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningPhase {
    TitleAbstract,
    FullText,
}

impl ScreeningPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreeningPhase::TitleAbstract => "title_abstract",
            ScreeningPhase::FullText => "full_text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "title_abstract" => Some(ScreeningPhase::TitleAbstract),
            "full_text" => Some(ScreeningPhase::FullText),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Include,
    Exclude,
    Uncertain,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Include => "include",
            Verdict::Exclude => "exclude",
            Verdict::Uncertain => "uncertain",
        }
    }

    /// Lenient parse of a model's verdict ("included", "Exclude", "maybe", ...)
    ///
    /// Anything unrecognised becomes `Uncertain`.
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "include" | "included" | "yes" => Verdict::Include,
            "exclude" | "excluded" | "no" => Verdict::Exclude,
            _ => Verdict::Uncertain,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionCategory {
    WrongPopulation,
    WrongIntervention,
    WrongComparator,
    WrongOutcome,
    WrongStudyDesign,
    NotAccessible,
    Duplicate,
    Other,
    MeetsCriteria,
}

impl ExclusionCategory {
    pub const ALL: [ExclusionCategory; 9] = [
        ExclusionCategory::WrongPopulation,
        ExclusionCategory::WrongIntervention,
        ExclusionCategory::WrongComparator,
        ExclusionCategory::WrongOutcome,
        ExclusionCategory::WrongStudyDesign,
        ExclusionCategory::NotAccessible,
        ExclusionCategory::Duplicate,
        ExclusionCategory::Other,
        ExclusionCategory::MeetsCriteria,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionCategory::WrongPopulation => "wrong_population",
            ExclusionCategory::WrongIntervention => "wrong_intervention",
            ExclusionCategory::WrongComparator => "wrong_comparator",
            ExclusionCategory::WrongOutcome => "wrong_outcome",
            ExclusionCategory::WrongStudyDesign => "wrong_study_design",
            ExclusionCategory::NotAccessible => "not_accessible",
            ExclusionCategory::Duplicate => "duplicate",
            ExclusionCategory::Other => "other",
            ExclusionCategory::MeetsCriteria => "meets_criteria",
        }
    }

    /// Unknown labels map to `Other`
    pub fn from_label(s: &str) -> Self {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .unwrap_or(ExclusionCategory::Other)
    }
}

/// One screening judgement about one study
///
/// Decisions are never edited after they are written. A later review creates a
/// new decision whose `supersedes` points at the one it replaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreeningDecision {
    pub id: String,
    pub study_id: String,
    pub phase: ScreeningPhase,
    pub verdict: Verdict,
    pub category: ExclusionCategory,
    pub confidence: f64,
    pub rationale: String,
    pub model: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub supersedes: Option<String>,
}

impl ScreeningDecision {
    pub fn new(
        study_id: String,
        phase: ScreeningPhase,
        verdict: Verdict,
        category: ExclusionCategory,
        confidence: f64,
        rationale: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            study_id,
            phase,
            verdict,
            category,
            confidence: clamp_confidence(confidence),
            rationale,
            model: None,
            created_at: Utc::now(),
            supersedes: None,
        }
    }

    /// Decision recorded when the model call or its output could not be used
    pub fn fallback(study_id: String, phase: ScreeningPhase, reason: &str) -> Self {
        Self::new(
            study_id,
            phase,
            Verdict::Uncertain,
            ExclusionCategory::Other,
            0.0,
            format!("Automatic screening failed: {}", reason),
        )
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Build a new decision for the same study and phase that replaces this one
    pub fn superseded_by(
        &self,
        verdict: Verdict,
        category: ExclusionCategory,
        confidence: f64,
        rationale: String,
    ) -> Self {
        let mut next = Self::new(
            self.study_id.clone(),
            self.phase,
            verdict,
            category,
            confidence,
            rationale,
        );
        next.supersedes = Some(self.id.clone());
        next
    }

    pub fn is_low_confidence_exclusion(&self, threshold: f64) -> bool {
        self.verdict == Verdict::Exclude && self.confidence < threshold
    }
}

/// NaN collapses to 0.0
fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
