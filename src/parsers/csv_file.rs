//! CSV parser
//!
//! The first row is the header. A [`ColumnMapping`] names the header cells that
//! hold each field; columns it does not name are ignored. Rows whose title cell is
//! empty are skipped with a warning rather than counted as errors.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{record_id, EntryParseError, ImportError, ParseOptions};
use crate::models::{ReferenceFormat, StudyRecord};
use crate::utils::normalize::{
    collapse_whitespace, normalize_database_name, normalize_doi, normalize_pmid, parse_year,
};

const TITLE_PATTERNS: &[&str] = &[
    "title", "article title", "article_title", "document title", "document_title",
    "paper title", "study title", "record title", "ti",
];
const ABSTRACT_PATTERNS: &[&str] = &[
    "abstract", "abstract text", "article abstract", "article_abstract", "summary", "ab",
];
const AUTHOR_PATTERNS: &[&str] = &[
    "authors", "author", "author(s)", "article author", "article_author", "creators", "creator",
    "au",
];
const YEAR_PATTERNS: &[&str] = &[
    "year", "publication year", "pub year", "pub_year", "pubyear", "year published",
    "publication date", "date", "py",
];
const JOURNAL_PATTERNS: &[&str] = &[
    "journal", "journal title", "journal_title", "source title", "publication", "periodical",
    "venue", "source",
];
const DOI_PATTERNS: &[&str] = &["doi", "digital object identifier", "article doi", "doi number"];
const PMID_PATTERNS: &[&str] = &["pmid", "pubmed id", "pubmed_id", "pubmed identifier", "medline id"];
const DATABASE_PATTERNS: &[&str] = &[
    "database", "source database", "source_database", "data source", "db", "provider",
];

/// Header names for each field this importer reads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ColumnMapping {
    pub title: String,
    pub r#abstract: Option<String>,
    pub pmid: Option<String>,
    pub doi: Option<String>,
    pub authors: Option<String>,
    pub year: Option<String>,
    pub journal: Option<String>,
    pub database: Option<String>,
}

impl ColumnMapping {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Best-effort mapping from common export header names
    ///
    /// Exact (case-insensitive) matches win; otherwise a header containing a
    /// pattern of four or more characters is accepted. Returns `None` when no
    /// title column can be found.
    pub fn detect<S: AsRef<str>>(headers: &[S]) -> Option<Self> {
        let lower: Vec<String> = headers
            .iter()
            .map(|h| h.as_ref().trim().to_lowercase())
            .collect();
        let mut taken = vec![false; headers.len()];

        let mut find = |patterns: &[&str]| -> Option<String> {
            let exact = patterns
                .iter()
                .find_map(|p| (0..lower.len()).find(|&i| !taken[i] && lower[i] == *p));
            let idx = exact.or_else(|| {
                // Longest pattern first so "article title" beats a bare "title"
                let mut partial: Vec<&str> =
                    patterns.iter().copied().filter(|p| p.len() >= 4).collect();
                partial.sort_by_key(|p| std::cmp::Reverse(p.len()));
                partial
                    .into_iter()
                    .find_map(|p| (0..lower.len()).find(|&i| !taken[i] && lower[i].contains(p)))
            })?;
            taken[idx] = true;
            Some(headers[idx].as_ref().trim().to_string())
        };

        let title = find(TITLE_PATTERNS)?;
        Some(Self {
            title,
            doi: find(DOI_PATTERNS),
            pmid: find(PMID_PATTERNS),
            r#abstract: find(ABSTRACT_PATTERNS),
            authors: find(AUTHOR_PATTERNS),
            year: find(YEAR_PATTERNS),
            database: find(DATABASE_PATTERNS),
            journal: find(JOURNAL_PATTERNS),
        })
    }
}

/// Column indices resolved against the actual header row
#[derive(Debug, Clone, Default)]
struct ResolvedColumns {
    title: usize,
    r#abstract: Option<usize>,
    pmid: Option<usize>,
    doi: Option<usize>,
    authors: Option<usize>,
    year: Option<usize>,
    journal: Option<usize>,
    database: Option<usize>,
}

/// Lazy iterator over the rows of a CSV export
pub struct CsvRecords<'a> {
    rows: ::csv::StringRecordsIntoIter<&'a [u8]>,
    columns: ResolvedColumns,
    options: ParseOptions,
    warnings: Vec<String>,
    lines_scanned: usize,
    ordinal: usize,
}

impl<'a> CsvRecords<'a> {
    /// Read the header and resolve the column mapping
    ///
    /// Fails with [`ImportError::Format`] when the header cannot be read or the
    /// mapped title column is not in it.
    pub fn new(text: &'a str, options: &ParseOptions) -> Result<Self, ImportError> {
        let mut reader = ::csv::ReaderBuilder::new()
            .flexible(true)
            .trim(::csv::Trim::Headers)
            .from_reader(text.as_bytes());

        let format_error = |lines_scanned: usize, reason: String| ImportError::Format {
            format: ReferenceFormat::Csv,
            lines_scanned,
            reason,
        };

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| format_error(1, format!("unreadable header: {}", e)))?
            .iter()
            .map(str::to_string)
            .collect();

        if headers.iter().all(|h| h.is_empty()) {
            return Err(format_error(1, "empty header row".to_string()));
        }

        let mapping = match &options.csv_mapping {
            Some(mapping) => mapping.clone(),
            None => ColumnMapping::detect(&headers)
                .ok_or_else(|| format_error(1, "no title column found in header".to_string()))?,
        };
        debug!("CSV column mapping: {:?}", mapping);

        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name.trim()))
        };

        let title = position(&mapping.title).ok_or_else(|| {
            format_error(
                1,
                format!("mapped title column '{}' is not in the header", mapping.title),
            )
        })?;

        let mut warnings = Vec::new();
        let mut optional = |label: &str, name: &Option<String>| -> Option<usize> {
            let name = name.as_deref()?;
            let idx = position(name);
            if idx.is_none() {
                warnings.push(format!("mapped {} column '{}' is not in the header", label, name));
            }
            idx
        };

        let columns = ResolvedColumns {
            title,
            r#abstract: optional("abstract", &mapping.r#abstract),
            pmid: optional("pmid", &mapping.pmid),
            doi: optional("doi", &mapping.doi),
            authors: optional("authors", &mapping.authors),
            year: optional("year", &mapping.year),
            journal: optional("journal", &mapping.journal),
            database: optional("database", &mapping.database),
        };

        Ok(Self {
            rows: reader.into_records(),
            columns,
            options: options.clone(),
            warnings,
            lines_scanned: 1,
            ordinal: 0,
        })
    }

    pub fn lines_scanned(&self) -> usize {
        self.lines_scanned
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn build(&self, row: &::csv::StringRecord, line: usize) -> Option<StudyRecord> {
        let cell = |idx: Option<usize>| -> Option<String> {
            idx.and_then(|i| row.get(i))
                .map(collapse_whitespace)
                .filter(|v| !v.is_empty())
        };

        let title = cell(Some(self.columns.title))?;
        let database = cell(self.columns.database).map(|db| normalize_database_name(&db));
        let source = self.options.source_tag(ReferenceFormat::Csv, database);
        let raw = row.iter().collect::<Vec<_>>().join(",");

        let mut record = StudyRecord::new(
            record_id(&self.options.source_label, self.ordinal, &format!("{}:{}", line, raw)),
            title,
            source,
        );
        record.r#abstract = cell(self.columns.r#abstract);
        record.authors = cell(self.columns.authors)
            .map(|a| {
                a.split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        record.year = cell(self.columns.year).and_then(|y| parse_year(&y));
        record.journal = cell(self.columns.journal);
        record.doi = cell(self.columns.doi).and_then(|d| normalize_doi(&d));
        record.pmid = cell(self.columns.pmid).and_then(|p| normalize_pmid(&p));
        record.raw = raw;
        Some(record)
    }
}

impl Iterator for CsvRecords<'_> {
    type Item = Result<StudyRecord, EntryParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let result = self.rows.next()?;
            self.ordinal += 1;
            let ordinal = self.ordinal;

            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    let line = e
                        .position()
                        .map(|p| p.line() as usize)
                        .unwrap_or(self.lines_scanned + 1);
                    self.lines_scanned = self.lines_scanned.max(line);
                    return Some(Err(EntryParseError::new(ordinal, line, e.to_string())));
                }
            };

            let line = row
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(self.lines_scanned + 1);
            self.lines_scanned = self.lines_scanned.max(line);

            match self.build(&row, line) {
                Some(record) => return Some(Ok(record)),
                None => {
                    self.warnings
                        .push(format!("row {} (line {}) has an empty title; skipped", ordinal, line));
                }
            }
        }
    }
}

/// One exported row; header names are picked up again by [`ColumnMapping::detect`]
#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    #[serde(rename = "Title")]
    title: &'a str,
    #[serde(rename = "Abstract")]
    r#abstract: &'a str,
    #[serde(rename = "Authors")]
    authors: String,
    #[serde(rename = "Year")]
    year: Option<i32>,
    #[serde(rename = "Journal")]
    journal: &'a str,
    #[serde(rename = "DOI")]
    doi: &'a str,
    #[serde(rename = "PMID")]
    pmid: &'a str,
    #[serde(rename = "Database")]
    database: &'a str,
    #[serde(rename = "Record ID")]
    id: &'a str,
}

/// Serialize records as CSV, one row per record
pub fn write_csv<'r, W, I>(records: I, writer: W) -> Result<(), ::csv::Error>
where
    W: std::io::Write,
    I: IntoIterator<Item = &'r StudyRecord>,
{
    let mut out = ::csv::Writer::from_writer(writer);
    for record in records {
        out.serialize(ExportRow {
            title: &record.title,
            r#abstract: record.r#abstract.as_deref().unwrap_or(""),
            authors: record.authors_display(),
            year: record.year,
            journal: record.journal.as_deref().unwrap_or(""),
            doi: record.doi.as_deref().unwrap_or(""),
            pmid: record.pmid.as_deref().unwrap_or(""),
            database: record.source.database.as_deref().unwrap_or(""),
            id: &record.id,
        })?;
    }
    out.flush()?;
    Ok(())
}
