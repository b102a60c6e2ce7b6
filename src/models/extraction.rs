use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Marker for a field the study does not report
pub const NOT_REPORTED: &str = "NR";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Text,
    Numeric,
    Categorical,
    Date,
    Boolean,
}

/// One column of the extraction form
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionField {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub field_type: FieldType,
    /// Allowed values for categorical fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl ExtractionField {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            field_type: FieldType::Text,
            options: Vec::new(),
        }
    }

    pub fn numeric(mut self) -> Self {
        self.field_type = FieldType::Numeric;
        self
    }

    pub fn categorical(mut self, options: Vec<String>) -> Self {
        self.field_type = FieldType::Categorical;
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedValue {
    pub field_name: String,
    /// `None` when the study does not report it
    pub value: Option<String>,
    #[serde(default)]
    pub source_quote: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ExtractedValue {
    pub fn not_reported(field_name: &str, notes: Option<String>) -> Self {
        Self {
            field_name: field_name.to_string(),
            value: None,
            source_quote: None,
            notes,
        }
    }

    pub fn is_reported(&self) -> bool {
        self.value.is_some()
    }

    /// Value for export, `NR` when missing
    pub fn display(&self) -> &str {
        self.value.as_deref().unwrap_or(NOT_REPORTED)
    }
}

/// Everything extracted from one study in one pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyExtraction {
    pub id: String,
    pub study_id: String,
    pub values: Vec<ExtractedValue>,
    /// Share of fields reported, 0.0 to 1.0
    pub completeness: f64,
    pub notes: Option<String>,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StudyExtraction {
    pub fn new(study_id: String, values: Vec<ExtractedValue>) -> Self {
        let completeness = reported_share(&values);
        Self {
            id: Uuid::new_v4().to_string(),
            study_id,
            values,
            completeness,
            notes: None,
            model: None,
            created_at: Utc::now(),
        }
    }

    pub fn value(&self, field_name: &str) -> Option<&ExtractedValue> {
        self.values.iter().find(|v| v.field_name == field_name)
    }

    pub fn not_reported(&self) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .filter(|v| !v.is_reported())
            .map(|v| v.field_name.as_str())
    }
}

fn reported_share(values: &[ExtractedValue]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|v| v.is_reported()).count() as f64 / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completeness_counts_reported_fields() {
        let extraction = StudyExtraction::new(
            "s1".into(),
            vec![
                ExtractedValue {
                    field_name: "sample_size".into(),
                    value: Some("120".into()),
                    source_quote: None,
                    notes: None,
                },
                ExtractedValue::not_reported("country", None),
            ],
        );
        assert!((extraction.completeness - 0.5).abs() < 1e-9);
        assert_eq!(extraction.not_reported().collect::<Vec<_>>(), ["country"]);
        assert_eq!(extraction.value("country").unwrap().display(), "NR");
    }

    #[test]
    fn test_field_definitions_from_json() {
        let fields: Vec<ExtractionField> = serde_json::from_str(
            r#"[
                {"name": "sample_size", "description": "Participants randomised", "field_type": "numeric"},
                {"name": "setting", "description": "Care setting", "field_type": "categorical", "options": ["primary", "hospital"]},
                {"name": "country", "description": "Where it ran"}
            ]"#,
        )
        .unwrap();
        assert_eq!(fields[0].field_type, FieldType::Numeric);
        assert_eq!(fields[1].options, ["primary", "hospital"]);
        assert_eq!(fields[2].field_type, FieldType::Text);
    }
}
