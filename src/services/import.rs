//! Import pipeline: decode, parse and deduplicate several reference files
//!
//! Files are parsed one at a time and their records concatenated in the order
//! the files were added, so import order (and with it canonical record choice)
//! follows the caller's file order. A file that cannot be used at all is recorded
//! as a failure and the rest of the import carries on.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::dedup::{deduplicate, DedupConfig, DedupOutcome, DedupReport};
use crate::models::{ReferenceFormat, StudyRecord};
use crate::parsers::{parse_bytes, parse_file, ImportError, ParseOptions, ParsedBatch};

/// Per-file parse result
#[derive(Debug, Clone)]
pub struct FileSummary {
    pub label: String,
    pub format: ReferenceFormat,
    pub records: usize,
    /// Records whose id was already present, e.g. a file imported twice
    pub already_imported: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
    pub lines_scanned: usize,
}

impl FileSummary {
    fn from_batch(label: String, batch: &ParsedBatch) -> Self {
        Self {
            label,
            format: batch.format,
            records: batch.records.len(),
            already_imported: 0,
            skipped: batch.skipped_count(),
            warnings: batch.warnings.clone(),
            lines_scanned: batch.lines_scanned,
        }
    }
}

#[derive(Debug)]
pub struct FailedFile {
    pub label: String,
    pub error: ImportError,
}

/// Result of a finished import
#[derive(Debug)]
pub struct ImportSummary {
    pub files: Vec<FileSummary>,
    pub failed: Vec<FailedFile>,
    pub outcome: DedupOutcome,
    pub report: DedupReport,
}

impl ImportSummary {
    pub fn total_skipped(&self) -> usize {
        self.files.iter().map(|f| f.skipped).sum()
    }

    pub fn unique_records(&self) -> impl Iterator<Item = &StudyRecord> {
        self.outcome.unique()
    }
}

/// Collects parsed files before deduplicating them together
#[derive(Debug, Default)]
pub struct ImportPipeline {
    database: Option<String>,
    records: Vec<StudyRecord>,
    seen: HashSet<String>,
    files: Vec<FileSummary>,
    failed: Vec<FailedFile>,
}

impl ImportPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database label for files that do not name one
    pub fn with_database(mut self, database: Option<String>) -> Self {
        self.database = database;
        self
    }

    fn options(&self, label: &str) -> ParseOptions {
        ParseOptions::new(label).with_database(self.database.clone())
    }

    /// Records already imported; they keep their place ahead of new files
    pub fn with_existing(mut self, records: Vec<StudyRecord>) -> Self {
        let mut records = records;
        self.seen.extend(records.iter().map(|r| r.id.clone()));
        records.append(&mut self.records);
        self.records = records;
        self
    }

    /// Parse a file from disk; the format is guessed when `None`
    pub fn add_file(&mut self, path: &Path, format: Option<ReferenceFormat>) -> &mut Self {
        let label = file_label(path);
        let result = parse_file(path, format, &self.options(&label));
        self.absorb(label, result)
    }

    /// Parse an in-memory export
    pub fn add_bytes(
        &mut self,
        label: impl Into<String>,
        format: ReferenceFormat,
        bytes: &[u8],
        options: Option<ParseOptions>,
    ) -> &mut Self {
        let label = label.into();
        let options = options.unwrap_or_else(|| self.options(&label));
        let result = parse_bytes(format, bytes, &options);
        self.absorb(label, result)
    }

    fn absorb(&mut self, label: String, result: Result<ParsedBatch, ImportError>) -> &mut Self {
        match result {
            Ok(batch) => {
                let mut summary = FileSummary::from_batch(label, &batch);
                for record in batch.records {
                    if self.seen.insert(record.id.clone()) {
                        self.records.push(record);
                    } else {
                        debug!("Record {} from {} is already imported", record.id, summary.label);
                        summary.already_imported += 1;
                    }
                }
                summary.records -= summary.already_imported;
                self.files.push(summary);
            }
            Err(error) => {
                warn!("Import of {} failed: {}", label, error);
                self.failed.push(FailedFile { label, error });
            }
        }
        self
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Deduplicate everything added so far
    pub fn finish(self, config: &DedupConfig) -> ImportSummary {
        info!(
            "Deduplicating {} records from {} files ({} failed)",
            self.records.len(),
            self.files.len(),
            self.failed.len()
        );

        let outcome = deduplicate(self.records, config);
        let report = outcome.report();
        info!("{}", report.summary());

        ImportSummary {
            files: self.files,
            failed: self.failed,
            outcome,
            report,
        }
    }
}

/// Parse and deduplicate a list of files in one go
pub fn import_files(
    paths: &[PathBuf],
    format: Option<ReferenceFormat>,
    database: Option<String>,
    config: &DedupConfig,
) -> ImportSummary {
    let mut pipeline = ImportPipeline::new().with_database(database);
    for path in paths {
        pipeline.add_file(path, format);
    }
    pipeline.finish(config)
}

/// Record counts per source label
pub fn records_per_file(summary: &ImportSummary) -> BTreeMap<&str, usize> {
    summary
        .files
        .iter()
        .map(|f| (f.label.as_str(), f.records))
        .collect()
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
