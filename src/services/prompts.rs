//! Prompt templates for screening, feedback review, criteria and extraction

use crate::models::{ExtractionField, FieldType, ReviewCriteria, ScreeningDecision, StudyRecord};
use crate::utils::text::truncate_text;

pub const TITLE_ABSTRACT_SYSTEM: &str = "You are a systematic review screener. Evaluate studies against PICO criteria. Be thorough but inclusive - when uncertain, include for full-text review. Respond only in JSON.";

pub const FULLTEXT_SYSTEM: &str = "You are an expert systematic review screener conducting full-text screening. Your task is to carefully evaluate the complete manuscript against the inclusion criteria. Be thorough and provide detailed reasoning.";

pub const FEEDBACK_SYSTEM: &str = "You are an expert systematic review methodologist reviewing previously excluded studies. Your task is to reconsider exclusion decisions with an inclusive mindset, looking for any legitimate reasons a study might still be relevant.";

pub const CRITERIA_SYSTEM: &str = "You are an expert systematic review methodologist. Your task is to help researchers develop clear, specific inclusion and exclusion criteria for their systematic reviews following PICO(S) framework guidelines.";

pub const EXTRACTION_SYSTEM: &str = "You are an expert systematic review data extractor. Your task is to accurately extract specific data fields from research manuscripts. If information is not reported, indicate 'NR' (Not Reported).";

const CRITERIA_REPLY_SHAPE: &str = r#"{"inclusion_criteria":{"population":"...","intervention":"...","comparison":"... or 'Not applicable'","outcome":"...","study_design":"..."},"exclusion_criteria":["..."],"suggested_exclusion_reasons":["..."]}"#;

const NO_ABSTRACT: &str = "Abstract not available";

const CATEGORY_CHOICES: &str = "wrong_population/wrong_intervention/wrong_comparator/wrong_outcome/wrong_study_design/not_accessible/duplicate/other/meets_criteria";

/// Caps for the criteria fields in the compact prompt
const MAX_QUESTION_CHARS: usize = 500;
const MAX_PICO_CHARS: usize = 200;
const MAX_SHORT_PICO_CHARS: usize = 150;
const MAX_EXCLUSION_CHARS: usize = 300;

/// Compact title/abstract prompt
pub fn title_abstract_prompt(
    research_question: &str,
    criteria: &ReviewCriteria,
    study: &StudyRecord,
    max_title_chars: usize,
    max_abstract_chars: usize,
) -> String {
    let pico = &criteria.inclusion;
    let abstract_text = study.r#abstract.as_deref().unwrap_or(NO_ABSTRACT);

    format!(
        "Evaluate this study for inclusion.\n\
         Research Question: {question}\n\
         PICO Criteria:\n\
         P: {p}\n\
         I: {i}\n\
         C: {c}\n\
         O: {o}\n\
         Design: {design}\n\
         Exclusion criteria: {exclusion}\n\
         Study:\n\
         Title: {title}\n\
         Abstract: {abstract_text}\n\
         Respond in JSON:\n\
         {{\"decision\":\"included\"/\"excluded\",\"reason\":\"brief explanation\",\"reason_category\":\"{categories}\",\"confidence\":0.0-1.0}}",
        question = truncate_text(research_question, MAX_QUESTION_CHARS),
        p = truncate_text(&pico.population, MAX_PICO_CHARS),
        i = truncate_text(&pico.intervention, MAX_PICO_CHARS),
        c = truncate_text(&pico.comparison, MAX_SHORT_PICO_CHARS),
        o = truncate_text(&pico.outcome, MAX_PICO_CHARS),
        design = truncate_text(&pico.study_design, MAX_SHORT_PICO_CHARS),
        exclusion = truncate_text(&criteria.exclusion_inline(), MAX_EXCLUSION_CHARS),
        title = truncate_text(&study.title, max_title_chars),
        abstract_text = truncate_text(abstract_text, max_abstract_chars),
        categories = CATEGORY_CHOICES,
    )
}

/// Full-text prompt; `fulltext` should already be truncated
pub fn fulltext_prompt(research_question: &str, criteria: &ReviewCriteria, fulltext: &str) -> String {
    let pico = &criteria.inclusion;

    format!(
        "Evaluate this full-text manuscript for final inclusion in a systematic review.\n\n\
         Research Question: {question}\n\n\
         Inclusion Criteria:\n\
         - Population: {p}\n\
         - Intervention: {i}\n\
         - Comparison: {c}\n\
         - Outcome: {o}\n\
         - Study Design: {design}\n\n\
         Additional Exclusion Criteria:\n{exclusion}\n\n\
         Full-Text Content:\n{fulltext}\n\n\
         Carefully evaluate whether this study meets ALL inclusion criteria.\n\
         Check each criterion systematically.\n\n\
         Respond in JSON:\n\
         {{\"decision\":\"included\"/\"excluded\",\"reason\":\"detailed explanation\",\"reason_category\":\"{categories}\",\"confidence\":0.0-1.0}}",
        question = research_question,
        p = pico.population,
        i = pico.intervention,
        c = pico.comparison,
        o = pico.outcome,
        design = pico.study_design,
        exclusion = criteria.exclusion_bullets(),
        fulltext = fulltext,
        categories = CATEGORY_CHOICES,
    )
}

/// Ask the model to reconsider a low-confidence exclusion
pub fn feedback_prompt(
    research_question: &str,
    criteria: &ReviewCriteria,
    study: &StudyRecord,
    decision: &ScreeningDecision,
) -> String {
    let pico = &criteria.inclusion;

    format!(
        "This study was excluded from a systematic review with the following details:\n\n\
         Original Decision: Excluded\n\
         Original Exclusion Reason: {reason}\n\
         Original Confidence: {confidence:.2}\n\n\
         Research Question: {question}\n\n\
         Inclusion Criteria:\n\
         - Population: {p}\n\
         - Intervention: {i}\n\
         - Comparison: {c}\n\
         - Outcome: {o}\n\
         - Study Design: {design}\n\n\
         Study Information:\n\
         Title: {title}\n\
         Abstract: {abstract_text}\n\n\
         Please reconsider this exclusion decision. Consider:\n\
         - Could secondary outcomes be relevant?\n\
         - Are there subgroup analyses that might apply?\n\
         - Could this study provide methodological insights?\n\
         - Would this study be valuable for reference mining?\n\
         - Is there any legitimate reason this study COULD be relevant?\n\n\
         Respond in JSON:\n\
         {{\"reconsider\":true/false,\"rationale\":\"why you recommend reconsidering or maintaining the exclusion\",\"new_confidence\":0.0-1.0}}",
        reason = decision.rationale,
        confidence = decision.confidence,
        question = research_question,
        p = pico.population,
        i = pico.intervention,
        c = pico.comparison,
        o = pico.outcome,
        design = pico.study_design,
        title = study.title,
        abstract_text = study.r#abstract.as_deref().unwrap_or(NO_ABSTRACT),
    )
}

/// Draft PICO(S) criteria for a research question
pub fn criteria_prompt(research_question: &str) -> String {
    format!(
        "Given this research question for a systematic review:\n\n\
         {question}\n\n\
         Generate structured inclusion and exclusion criteria following the PICO(S) framework.\n\n\
         Please provide:\n\
         1. Population criteria (who is included - be specific about demographics, conditions, settings)\n\
         2. Intervention/Exposure criteria (what interventions or exposures are relevant)\n\
         3. Comparison criteria (what comparators are acceptable, if applicable)\n\
         4. Outcome criteria (what outcomes must be measured)\n\
         5. Study design criteria (what study designs are acceptable - e.g., RCT, cohort, case-control)\n\n\
         Also suggest common reasons why studies might be excluded for this specific topic.\n\n\
         Respond in JSON:\n{shape}",
        question = research_question,
        shape = CRITERIA_REPLY_SHAPE,
    )
}

/// Revise existing criteria according to reviewer feedback
pub fn refine_criteria_prompt(criteria: &ReviewCriteria, feedback: &str) -> String {
    format!(
        "Current inclusion criteria:\n{inclusion}\n\n\
         Current exclusion criteria:\n{exclusion}\n\n\
         User feedback for refinement:\n{feedback}\n\n\
         Please update the criteria based on this feedback. Return the complete updated criteria.\n\n\
         Respond in JSON:\n{shape}",
        inclusion = criteria.inclusion_bullets(),
        exclusion = criteria.exclusion_bullets(),
        feedback = feedback,
        shape = CRITERIA_REPLY_SHAPE,
    )
}

/// One line per field, with type hints the model can act on
pub fn extraction_fields_description(fields: &[ExtractionField]) -> String {
    fields
        .iter()
        .map(|field| {
            let mut line = format!("- {}: {}", field.name, field.description);
            match field.field_type {
                FieldType::Numeric => line.push_str(" (extract numeric value only)"),
                FieldType::Categorical if !field.options.is_empty() => {
                    line.push_str(&format!(" (options: {})", field.options.join(", ")))
                }
                _ => {}
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract the given fields from a study's text; `text` should already be truncated
pub fn extraction_prompt(fields: &[ExtractionField], text: &str) -> String {
    format!(
        "Extract the following data fields from this study:\n\n\
         Fields to extract:\n{fields}\n\n\
         Study Text:\n{text}\n\n\
         For each field, extract the exact value if found in the text.\n\
         If the information is not reported or cannot be found, respond with \"NR\".\n\
         For numeric fields, extract the numeric value only (no units in the value).\n\
         For text fields, extract the relevant text verbatim or summarize if lengthy.\n\n\
         Respond in JSON:\n\
         {{\"extractions\":{{\"field_name\":{{\"value\":\"extracted value or NR\",\"source_quote\":\"brief quote or null\",\"notes\":\"...\"}}}},\
         \"extraction_quality\":{{\"completeness\":0.0-1.0,\"fields_not_reported\":[\"...\"],\"notes\":\"...\"}}}}",
        fields = extraction_fields_description(fields),
        text = text,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ExclusionCategory, InclusionCriteria, ReferenceFormat, ScreeningPhase, SourceTag, Verdict,
    };

    fn criteria() -> ReviewCriteria {
        ReviewCriteria {
            inclusion: InclusionCriteria {
                population: "Adults with anxiety".into(),
                intervention: "Mindfulness".into(),
                comparison: "Usual care".into(),
                outcome: "Anxiety scores".into(),
                study_design: "RCT".into(),
            },
            exclusion: vec!["Children".into(), "Case reports".into()],
            ..Default::default()
        }
    }

    fn study() -> StudyRecord {
        StudyRecord::new(
            "s1".into(),
            "Mindfulness for anxiety".into(),
            SourceTag::new(ReferenceFormat::Ris),
        )
    }

    #[test]
    fn test_title_abstract_prompt() {
        let prompt = title_abstract_prompt("Does mindfulness help?", &criteria(), &study(), 300, 2000);
        assert!(prompt.contains("P: Adults with anxiety"));
        assert!(prompt.contains("Exclusion criteria: Children; Case reports"));
        assert!(prompt.contains("Abstract: Abstract not available"));
        assert!(prompt.contains(r#""decision":"included"/"excluded""#));
    }

    #[test]
    fn test_long_abstract_is_truncated() {
        let mut s = study();
        s.r#abstract = Some("word ".repeat(1000));
        let prompt = title_abstract_prompt("Q", &criteria(), &s, 300, 100);
        let line = prompt.lines().find(|l| l.starts_with("Abstract: ")).unwrap();
        assert!(line.ends_with("..."));
        assert!(line.len() < 120);
    }

    #[test]
    fn test_feedback_prompt() {
        let decision = ScreeningDecision::new(
            "s1".into(),
            ScreeningPhase::TitleAbstract,
            Verdict::Exclude,
            ExclusionCategory::WrongPopulation,
            0.6,
            "Wrong age group".into(),
        );
        let prompt = feedback_prompt("Q", &criteria(), &study(), &decision);
        assert!(prompt.contains("Original Exclusion Reason: Wrong age group"));
        assert!(prompt.contains("Original Confidence: 0.60"));
        assert!(prompt.contains(r#""reconsider":true/false"#));
    }

    #[test]
    fn test_refine_prompt_carries_current_criteria() {
        let prompt = refine_criteria_prompt(&criteria(), "Include adolescents");
        assert!(prompt.contains("- Population: Adults with anxiety"));
        assert!(prompt.contains("- Children\n- Case reports"));
        assert!(prompt.contains("User feedback for refinement:\nInclude adolescents"));
        assert!(prompt.contains("\"suggested_exclusion_reasons\""));
    }

    #[test]
    fn test_extraction_fields_description() {
        let fields = vec![
            ExtractionField::new("sample_size", "Participants randomised").numeric(),
            ExtractionField::new("setting", "Care setting")
                .categorical(vec!["primary".into(), "hospital".into()]),
            ExtractionField::new("country", "Where it ran"),
        ];
        assert_eq!(
            extraction_fields_description(&fields),
            "- sample_size: Participants randomised (extract numeric value only)\n\
             - setting: Care setting (options: primary, hospital)\n\
             - country: Where it ran"
        );
        assert!(extraction_prompt(&fields, "Body").contains("Study Text:\nBody"));
    }

    #[test]
    fn test_fulltext_prompt_lists_exclusions() {
        let prompt = fulltext_prompt("Q", &criteria(), "Full body");
        assert!(prompt.contains("- Children\n- Case reports"));
        assert!(prompt.contains("Full-Text Content:\nFull body"));
    }
}
