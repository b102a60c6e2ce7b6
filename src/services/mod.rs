//! Services module for business logic
//!
//! Import and deduplication are synchronous and never touch storage. Screening,
//! feedback review, criteria drafting and data extraction talk to an LLM through
//! [`crate::adapters::llm`] and hand back their results and audit entries for the
//! caller to persist.

pub mod cost_tracker;
pub mod criteria;
pub mod dedup;
pub mod extraction;
pub mod feedback;
pub mod import;
pub mod prompts;
pub mod screening;

pub use cost_tracker::{BudgetExceeded, CostTracker};
pub use criteria::{CriteriaError, CriteriaGenerator, GeneratedCriteria};
pub use dedup::{deduplicate, DedupConfig, DedupOutcome, DedupReport};
pub use extraction::{write_extractions_csv, DataExtractor, ExtractionBatch, ExtractionError};
pub use feedback::{select_for_review, FeedbackOutcome, FeedbackReviewer};
pub use import::{import_files, ImportPipeline, ImportSummary};
pub use screening::{BatchOutcome, ScreeningCache, ScreeningError, Screener};
