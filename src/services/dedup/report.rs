//! Deduplication summary and CSV report

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use super::DedupOutcome;
use crate::models::{DuplicateGroup, MatchReason};

/// Counts and group listing for one deduplication run
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DedupReport {
    pub total_records: usize,
    pub unique_records: usize,
    pub group_count: usize,
    /// Records dropped as duplicates of a DOI group's canonical record
    pub doi_duplicates: usize,
    /// Records dropped as duplicates of a fuzzy group's canonical record
    pub fuzzy_duplicates: usize,
    /// Records dropped from groups joined by both a DOI and similarity
    pub mixed_duplicates: usize,
    /// Input records per source label
    pub records_per_source: BTreeMap<String, usize>,
    pub groups: Vec<DuplicateGroup>,
}

/// One CSV line: a group member
#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    group_id: &'a str,
    reason: &'static str,
    score: String,
    record_id: &'a str,
    canonical: bool,
    source: String,
    year: Option<i32>,
    doi: &'a str,
    title: &'a str,
}

impl DedupReport {
    pub fn from_outcome(outcome: &DedupOutcome) -> Self {
        let mut records_per_source = BTreeMap::new();
        for record in &outcome.records {
            *records_per_source.entry(record.source.label()).or_insert(0) += 1;
        }

        let dropped = |reason: MatchReason| -> usize {
            outcome
                .groups
                .iter()
                .filter(|g| g.reason == reason)
                .map(|g| g.len() - 1)
                .sum()
        };

        Self {
            total_records: outcome.records.len(),
            unique_records: outcome.unique_count(),
            group_count: outcome.groups.len(),
            doi_duplicates: dropped(MatchReason::Doi),
            fuzzy_duplicates: dropped(MatchReason::Fuzzy),
            mixed_duplicates: dropped(MatchReason::Mixed),
            records_per_source,
            groups: outcome.groups.clone(),
        }
    }

    /// Human-readable multi-line summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Records imported:  {}", self.total_records),
            format!("Unique studies:    {}", self.unique_records),
            format!(
                "Duplicate groups:  {} ({} removed by DOI, {} by similarity, {} by both)",
                self.group_count, self.doi_duplicates, self.fuzzy_duplicates, self.mixed_duplicates
            ),
        ];
        for (source, count) in &self.records_per_source {
            lines.push(format!("  {}: {}", source, count));
        }
        lines.join("\n")
    }

    /// Write one row per group member
    pub fn write_csv_to<W: Write>(&self, outcome: &DedupOutcome, writer: W) -> Result<(), csv::Error> {
        let mut out = csv::Writer::from_writer(writer);

        for group in &self.groups {
            for member_id in &group.member_ids {
                let Some(record) = outcome.records.iter().find(|r| &r.id == member_id) else {
                    continue;
                };
                out.serialize(ReportRow {
                    group_id: &group.id,
                    reason: group.reason.as_str(),
                    score: format!("{:.3}", group.best_score),
                    record_id: &record.id,
                    canonical: record.id == group.canonical_id,
                    source: record.source.label(),
                    year: record.year,
                    doi: record.doi.as_deref().unwrap_or(""),
                    title: &record.title,
                })?;
            }
        }

        out.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, outcome: &DedupOutcome, path: &Path) -> Result<(), csv::Error> {
        let file = std::fs::File::create(path)?;
        self.write_csv_to(outcome, file)
    }
}
