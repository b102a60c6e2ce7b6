use serde::{Deserialize, Serialize};

/// PICO(S) inclusion criteria
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InclusionCriteria {
    #[serde(default)]
    pub population: String,
    #[serde(default)]
    pub intervention: String,
    #[serde(default)]
    pub comparison: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub study_design: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ReviewCriteria {
    #[serde(default)]
    pub inclusion: InclusionCriteria,
    #[serde(default)]
    pub exclusion: Vec<String>,
    /// Exclusion reasons screeners are likely to need for this topic
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_exclusion_reasons: Vec<String>,
}

impl ReviewCriteria {
    /// Exclusion criteria as a single line for compact prompts
    pub fn exclusion_inline(&self) -> String {
        if self.exclusion.is_empty() {
            "None specified".to_string()
        } else {
            self.exclusion.join("; ")
        }
    }

    /// PICO(S) criteria as a bulleted list
    pub fn inclusion_bullets(&self) -> String {
        let pico = &self.inclusion;
        format!(
            "- Population: {}\n- Intervention: {}\n- Comparison: {}\n- Outcome: {}\n- Study Design: {}",
            pico.population, pico.intervention, pico.comparison, pico.outcome, pico.study_design
        )
    }

    /// Exclusion criteria as a bulleted list
    pub fn exclusion_bullets(&self) -> String {
        if self.exclusion.is_empty() {
            return "- None specified".to_string();
        }
        self.exclusion
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
