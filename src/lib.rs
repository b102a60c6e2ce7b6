//! Reference ingestion, deduplication and LLM screening for systematic reviews
//!
//! The ingestion core ([`parsers`], [`services::dedup`]) is synchronous and
//! storage-free. Screening ([`services::screening`], [`services::feedback`]),
//! criteria drafting ([`services::criteria`]) and data extraction
//! ([`services::extraction`]) call an LLM through [`adapters::llm`]; [`storage`] and
//! [`commands`] persist results.

pub mod adapters;
pub mod commands;
pub mod models;
pub mod parsers;
pub mod services;
pub mod storage;
pub mod utils;

pub use models::{DuplicateGroup, ReferenceFormat, ScreeningDecision, StudyRecord};
pub use parsers::{parse_bytes, parse_file, parse_text, ImportError, ParseOptions, RecordStream};
pub use services::dedup::{deduplicate, DedupConfig, DedupOutcome};
