//! Reference file parsers
//!
//! Each supported export format gets its own lazy record iterator. They are wrapped
//! in [`RecordStream`] so callers can treat every format the same way:
//! - malformed entries come out as `Err(EntryParseError)` and parsing continues
//! - a file that yields no records at all is rejected with [`ImportError::Format`]
//!
//! Streams borrow the input text, so re-opening the same text restarts the
//! sequence. Record ids are derived from the source label, entry ordinal and raw
//! block, which makes re-parsing deterministic.

pub mod bibtex;
pub mod csv_file;
pub mod nbib;
pub mod ris;

use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{ReferenceFormat, SourceTag, StudyRecord};

pub use bibtex::BibtexRecords;
pub use csv_file::{write_csv, ColumnMapping, CsvRecords};
pub use nbib::NbibRecords;
pub use ris::{write_ris, RisRecords};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Whole-file import failure
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Not a usable {format} file ({lines_scanned} lines scanned): {reason}")]
    Format {
        format: ReferenceFormat,
        lines_scanned: usize,
        reason: String,
    },
    #[error("Input is not valid UTF-8 text (decoding failed after {bytes_scanned} bytes)")]
    Encoding { bytes_scanned: usize },
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A single entry that could not be turned into a record
#[derive(Debug, Clone, Error, PartialEq)]
#[error("entry {ordinal} (line {line}): {reason}")]
pub struct EntryParseError {
    /// 1-based position of the entry in the file
    pub ordinal: usize,
    /// 1-based line where the entry starts
    pub line: usize,
    pub reason: String,
}

impl EntryParseError {
    pub fn new(ordinal: usize, line: usize, reason: impl Into<String>) -> Self {
        Self {
            ordinal,
            line,
            reason: reason.into(),
        }
    }
}

/// Options shared by all parsers
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Distinguishes record ids between input files
    pub source_label: String,
    /// Database label applied when the file does not name one
    pub source_database: Option<String>,
    /// Explicit CSV column mapping; detected from the header when absent
    pub csv_mapping: Option<ColumnMapping>,
}

impl ParseOptions {
    pub fn new(source_label: impl Into<String>) -> Self {
        Self {
            source_label: source_label.into(),
            ..Default::default()
        }
    }

    pub fn with_database(mut self, database: Option<String>) -> Self {
        self.source_database = database;
        self
    }

    pub fn with_csv_mapping(mut self, mapping: ColumnMapping) -> Self {
        self.csv_mapping = Some(mapping);
        self
    }

    pub(crate) fn source_tag(&self, format: ReferenceFormat, database: Option<String>) -> SourceTag {
        SourceTag::new(format).with_database(database.or_else(|| self.source_database.clone()))
    }
}

/// Records from one file in any supported format
pub enum RecordStream<'a> {
    Csv(CsvRecords<'a>),
    Ris(RisRecords<'a>),
    Nbib(NbibRecords<'a>),
    Bibtex(BibtexRecords<'a>),
}

impl<'a> RecordStream<'a> {
    /// Open a stream over already-decoded text
    pub fn open(
        format: ReferenceFormat,
        text: &'a str,
        options: &ParseOptions,
    ) -> Result<Self, ImportError> {
        Ok(match format {
            ReferenceFormat::Csv => RecordStream::Csv(CsvRecords::new(text, options)?),
            ReferenceFormat::Ris => RecordStream::Ris(RisRecords::new(text, options)),
            ReferenceFormat::Nbib => RecordStream::Nbib(NbibRecords::new(text, options)),
            ReferenceFormat::Bibtex => RecordStream::Bibtex(BibtexRecords::new(text, options)),
        })
    }

    pub fn format(&self) -> ReferenceFormat {
        match self {
            RecordStream::Csv(_) => ReferenceFormat::Csv,
            RecordStream::Ris(_) => ReferenceFormat::Ris,
            RecordStream::Nbib(_) => ReferenceFormat::Nbib,
            RecordStream::Bibtex(_) => ReferenceFormat::Bibtex,
        }
    }

    /// Lines consumed so far
    pub fn lines_scanned(&self) -> usize {
        match self {
            RecordStream::Csv(s) => s.lines_scanned(),
            RecordStream::Ris(s) => s.lines_scanned(),
            RecordStream::Nbib(s) => s.lines_scanned(),
            RecordStream::Bibtex(s) => s.lines_scanned(),
        }
    }

    /// Non-fatal notes gathered so far (skipped blank CSV rows, missing columns)
    pub fn warnings(&self) -> &[String] {
        match self {
            RecordStream::Csv(s) => s.warnings(),
            RecordStream::Ris(_) | RecordStream::Nbib(_) | RecordStream::Bibtex(_) => &[],
        }
    }
}

impl Iterator for RecordStream<'_> {
    type Item = Result<StudyRecord, EntryParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            RecordStream::Csv(s) => s.next(),
            RecordStream::Ris(s) => s.next(),
            RecordStream::Nbib(s) => s.next(),
            RecordStream::Bibtex(s) => s.next(),
        }
    }
}

/// Everything extracted from one file
#[derive(Debug, Clone)]
pub struct ParsedBatch {
    pub format: ReferenceFormat,
    pub records: Vec<StudyRecord>,
    pub skipped: Vec<EntryParseError>,
    pub warnings: Vec<String>,
    pub lines_scanned: usize,
}

impl ParsedBatch {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Parse decoded text, collecting records and skipped entries
///
/// # Returns
/// * `Ok(ParsedBatch)` when at least one record was extracted
/// * `Err(ImportError::Format)` when the file yields no records
pub fn parse_text(
    format: ReferenceFormat,
    text: &str,
    options: &ParseOptions,
) -> Result<ParsedBatch, ImportError> {
    let mut stream = RecordStream::open(format, text, options)?;
    let mut records = Vec::new();
    let mut skipped = Vec::new();

    for item in stream.by_ref() {
        match item {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!("Skipping malformed {} {}", format, e);
                skipped.push(e);
            }
        }
    }

    let lines_scanned = stream.lines_scanned();
    let warnings = stream.warnings().to_vec();

    if records.is_empty() {
        let reason = if skipped.is_empty() {
            "no entries found".to_string()
        } else {
            format!("all {} entries were malformed", skipped.len())
        };
        return Err(ImportError::Format {
            format,
            lines_scanned,
            reason,
        });
    }

    info!(
        "Parsed {} {} records ({} skipped, {} warnings) from {} lines",
        records.len(),
        format,
        skipped.len(),
        warnings.len(),
        lines_scanned
    );

    Ok(ParsedBatch {
        format,
        records,
        skipped,
        warnings,
        lines_scanned,
    })
}

/// Decode and parse raw bytes
pub fn parse_bytes(
    format: ReferenceFormat,
    bytes: &[u8],
    options: &ParseOptions,
) -> Result<ParsedBatch, ImportError> {
    let text = decode_text(bytes)?;
    parse_text(format, text, options)
}

/// Read, decode and parse a file, guessing the format when none is given
pub fn parse_file(
    path: &Path,
    format: Option<ReferenceFormat>,
    options: &ParseOptions,
) -> Result<ParsedBatch, ImportError> {
    let bytes = fs::read(path).map_err(|source| ImportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let text = decode_text(&bytes)?;

    let format = match format
        .or_else(|| ReferenceFormat::from_extension(path))
        .or_else(|| sniff_format(text))
    {
        Some(f) => f,
        None => {
            return Err(ImportError::Format {
                format: ReferenceFormat::Csv,
                lines_scanned: 0,
                reason: format!("could not determine the format of {}", path.display()),
            })
        }
    };

    debug!("Parsing {} as {}", path.display(), format);
    parse_text(format, text, options)
}

/// Interpret bytes as UTF-8, dropping a leading byte order mark
pub fn decode_text(bytes: &[u8]) -> Result<&str, ImportError> {
    let (offset, body) = match bytes.strip_prefix(UTF8_BOM) {
        Some(rest) => (UTF8_BOM.len(), rest),
        None => (0, bytes),
    };
    std::str::from_utf8(body).map_err(|e| ImportError::Encoding {
        bytes_scanned: offset + e.valid_up_to(),
    })
}

/// Best-effort format guess from the first meaningful line
///
/// Explicit formats should be preferred; this only looks at surface markers.
pub fn sniff_format(text: &str) -> Option<ReferenceFormat> {
    let first = text.lines().map(str::trim).find(|l| !l.is_empty())?;

    if first.starts_with("TY  -") || first.starts_with("TY -") {
        Some(ReferenceFormat::Ris)
    } else if first.starts_with("PMID-") || first.starts_with("PMID -") {
        Some(ReferenceFormat::Nbib)
    } else if first.starts_with('@') || first.starts_with('%') {
        Some(ReferenceFormat::Bibtex)
    } else if first.contains(',') || first.contains('\t') {
        Some(ReferenceFormat::Csv)
    } else {
        None
    }
}

/// Stable record id for an entry
pub(crate) fn record_id(source_label: &str, ordinal: usize, raw: &str) -> String {
    let key = format!("{}\u{1f}{}\u{1f}{}", source_label, ordinal, raw);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}
