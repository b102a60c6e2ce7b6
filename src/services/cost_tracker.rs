//! Spend tracking and budget limits for LLM calls

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

use crate::adapters::llm::LlmClient;
use crate::models::{CostEntry, OperationType};

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Budget exceeded during {operation}: spent ${spent:.4} of ${limit:.2}")]
pub struct BudgetExceeded {
    pub operation: &'static str,
    pub spent: f64,
    pub limit: f64,
}

/// Predicted spend for a batch of calls
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CostEstimate {
    pub operation: OperationType,
    pub items: usize,
    pub avg_input_tokens: u32,
    pub avg_output_tokens: u32,
    pub estimated_cost: f64,
    pub model: String,
}

/// Per-operation totals
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct OperationTotals {
    pub calls: usize,
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Typical (input, output) token counts per call
fn typical_tokens(operation: OperationType) -> (u32, u32) {
    match operation {
        OperationType::TitleAbstractScreening => (500, 100),
        OperationType::FulltextScreening => (4000, 300),
        OperationType::FeedbackReview => (600, 150),
        OperationType::CriteriaGeneration => (200, 500),
        OperationType::DataExtraction => (5500, 600),
        OperationType::Other => (500, 200),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostTracker {
    pub budget_limit: Option<f64>,
    entries: Vec<CostEntry>,
}

impl CostTracker {
    pub fn new(budget_limit: Option<f64>) -> Self {
        Self {
            budget_limit,
            entries: Vec::new(),
        }
    }

    /// Resume tracking with entries loaded from storage
    pub fn with_entries(mut self, entries: Vec<CostEntry>) -> Self {
        self.entries = entries;
        self
    }

    pub fn entries(&self) -> &[CostEntry] {
        &self.entries
    }

    pub fn total_cost(&self) -> f64 {
        self.entries.iter().map(|e| e.cost).sum()
    }

    pub fn remaining_budget(&self) -> Option<f64> {
        self.budget_limit
            .map(|limit| (limit - self.total_cost()).max(0.0))
    }

    /// Fails once spend has reached the limit; call before each LLM request
    pub fn check_budget(&self, operation: OperationType) -> Result<(), BudgetExceeded> {
        match self.budget_limit {
            Some(limit) if self.total_cost() >= limit => Err(BudgetExceeded {
                operation: operation.as_str(),
                spent: self.total_cost(),
                limit,
            }),
            _ => Ok(()),
        }
    }

    /// Record a completed call; money already spent is always recorded
    pub fn add_cost(
        &mut self,
        operation: OperationType,
        input_tokens: u32,
        output_tokens: u32,
        cost: f64,
        model: &str,
        study_id: Option<&str>,
    ) {
        self.entries.push(CostEntry {
            operation,
            input_tokens,
            output_tokens,
            cost,
            model: model.to_string(),
            study_id: study_id.map(str::to_string),
            timestamp: Utc::now(),
        });

        if let Some(limit) = self.budget_limit {
            let total = self.total_cost();
            if total > limit {
                warn!("Spend ${:.4} is over the ${:.2} budget", total, limit);
            }
        }
    }

    /// Predict the cost of `items` calls of one kind
    pub fn estimate(
        &self,
        client: &dyn LlmClient,
        operation: OperationType,
        items: usize,
    ) -> CostEstimate {
        let (input, output) = typical_tokens(operation);
        let n = u32::try_from(items).unwrap_or(u32::MAX);
        CostEstimate {
            operation,
            items,
            avg_input_tokens: input,
            avg_output_tokens: output,
            estimated_cost: client.estimate_cost(input.saturating_mul(n), output.saturating_mul(n)),
            model: client.model().to_string(),
        }
    }

    pub fn by_operation(&self) -> BTreeMap<OperationType, OperationTotals> {
        let mut totals: BTreeMap<OperationType, OperationTotals> = BTreeMap::new();
        for entry in &self.entries {
            let t = totals.entry(entry.operation).or_default();
            t.calls += 1;
            t.cost += entry.cost;
            t.input_tokens += u64::from(entry.input_tokens);
            t.output_tokens += u64::from(entry.output_tokens);
        }
        totals
    }

    pub fn entries_for_study<'a>(&'a self, study_id: &'a str) -> impl Iterator<Item = &'a CostEntry> {
        self.entries
            .iter()
            .filter(move |e| e.study_id.as_deref() == Some(study_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::llm::{ChatRequest, LlmError, LlmResponse};
    use crate::models::LlmProvider;
    use async_trait::async_trait;

    struct PricedClient;

    #[async_trait]
    impl LlmClient for PricedClient {
        async fn chat(&self, _request: ChatRequest) -> Result<LlmResponse, LlmError> {
            Err(LlmError::InvalidResponse("unused".into()))
        }
        fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
            input_tokens as f64 * 1e-6 + output_tokens as f64 * 2e-6
        }
        fn provider(&self) -> LlmProvider {
            LlmProvider::OpenAi
        }
        fn model(&self) -> &str {
            "priced"
        }
    }

    #[test]
    fn test_budget_check() {
        let mut tracker = CostTracker::new(Some(0.10));
        assert!(tracker.check_budget(OperationType::TitleAbstractScreening).is_ok());

        tracker.add_cost(OperationType::TitleAbstractScreening, 100, 10, 0.06, "m", Some("s1"));
        assert!(tracker.check_budget(OperationType::TitleAbstractScreening).is_ok());
        assert!((tracker.remaining_budget().unwrap() - 0.04).abs() < 1e-9);

        tracker.add_cost(OperationType::FeedbackReview, 100, 10, 0.06, "m", Some("s2"));
        let err = tracker.check_budget(OperationType::FeedbackReview).unwrap_err();
        assert_eq!(err.operation, "feedback_review");
        assert_eq!(tracker.remaining_budget(), Some(0.0));
        assert_eq!(tracker.entries().len(), 2);
    }

    #[test]
    fn test_unlimited() {
        let mut tracker = CostTracker::default();
        tracker.add_cost(OperationType::Other, 1, 1, 1000.0, "m", None);
        assert!(tracker.check_budget(OperationType::Other).is_ok());
        assert_eq!(tracker.remaining_budget(), None);
    }

    #[test]
    fn test_estimate_and_breakdown() {
        let mut tracker = CostTracker::default();
        let estimate = tracker.estimate(&PricedClient, OperationType::TitleAbstractScreening, 10);
        assert_eq!(estimate.avg_input_tokens, 500);
        assert!((estimate.estimated_cost - (5000.0 * 1e-6 + 1000.0 * 2e-6)).abs() < 1e-12);
        assert_eq!(estimate.model, "priced");

        tracker.add_cost(OperationType::TitleAbstractScreening, 10, 5, 0.5, "m", Some("a"));
        tracker.add_cost(OperationType::TitleAbstractScreening, 20, 5, 0.25, "m", Some("b"));
        tracker.add_cost(OperationType::FulltextScreening, 30, 5, 1.0, "m", Some("a"));

        let totals = tracker.by_operation();
        let ta = &totals[&OperationType::TitleAbstractScreening];
        assert_eq!(ta.calls, 2);
        assert_eq!(ta.input_tokens, 30);
        assert!((ta.cost - 0.75).abs() < 1e-12);
        assert_eq!(tracker.entries_for_study("a").count(), 2);
    }
}
