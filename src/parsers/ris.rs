//! RIS parser and writer
//!
//! Records run from a `TY  -` line to an `ER  -` line. Tags this importer does not
//! use are ignored; untagged lines continue the previous tag's value.

use once_cell::sync::Lazy;
use regex::Regex;
use std::iter::{Enumerate, Peekable};
use std::str::Lines;

use super::{record_id, EntryParseError, ParseOptions};
use crate::models::{ReferenceFormat, StudyRecord};
use crate::utils::normalize::{
    collapse_whitespace, normalize_database_name, normalize_doi, normalize_pmid, parse_year,
};

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z][A-Z0-9])\s{1,2}-\s*(.*)$").expect("valid RIS tag regex"));

/// Lazy iterator over the records of an RIS file
pub struct RisRecords<'a> {
    lines: Peekable<Enumerate<Lines<'a>>>,
    options: ParseOptions,
    ordinal: usize,
    lines_scanned: usize,
}

impl<'a> RisRecords<'a> {
    pub fn new(text: &'a str, options: &ParseOptions) -> Self {
        Self {
            lines: text.lines().enumerate().peekable(),
            options: options.clone(),
            ordinal: 0,
            lines_scanned: 0,
        }
    }

    pub fn lines_scanned(&self) -> usize {
        self.lines_scanned
    }

    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        let (idx, line) = self.lines.next()?;
        self.lines_scanned = idx + 1;
        Some((idx + 1, line))
    }

    fn peek_is_record_start(&mut self) -> bool {
        matches!(self.lines.peek(), Some((_, line)) if tag_of(line).is_some_and(|(tag, _)| tag == "TY"))
    }
}

impl Iterator for RisRecords<'_> {
    type Item = Result<StudyRecord, EntryParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        // Find the next TY line; anything before it is noise
        let (start_line, ty_line) = loop {
            let (line_no, line) = self.next_line()?;
            if matches!(tag_of(line), Some(("TY", _))) {
                break (line_no, line);
            }
        };

        self.ordinal += 1;
        let ordinal = self.ordinal;
        let mut raw = vec![ty_line];
        let mut fields: Vec<(&str, String)> = Vec::new();

        loop {
            if self.peek_is_record_start() {
                return Some(Err(EntryParseError::new(
                    ordinal,
                    start_line,
                    "missing ER before the next TY",
                )));
            }

            let Some((_, line)) = self.next_line() else {
                return Some(Err(EntryParseError::new(
                    ordinal,
                    start_line,
                    "missing ER before end of file",
                )));
            };
            raw.push(line);

            match tag_of(line) {
                Some(("ER", _)) => break,
                Some((tag, value)) => fields.push((tag, value.trim().to_string())),
                None if line.trim().is_empty() => {}
                None => {
                    if let Some((_, value)) = fields.last_mut() {
                        value.push(' ');
                        value.push_str(line.trim());
                    }
                }
            }
        }

        let raw = raw.join("\n");
        Some(build_record(&fields, raw, ordinal, start_line, &self.options))
    }
}

fn tag_of(line: &str) -> Option<(&str, &str)> {
    let caps = TAG_RE.captures(line.trim_end())?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

fn build_record(
    fields: &[(&str, String)],
    raw: String,
    ordinal: usize,
    line: usize,
    options: &ParseOptions,
) -> Result<StudyRecord, EntryParseError> {
    let first = |tags: &[&str]| -> Option<String> {
        tags.iter().find_map(|want| {
            fields
                .iter()
                .find(|(tag, value)| tag == want && !value.trim().is_empty())
                .map(|(_, value)| collapse_whitespace(value))
        })
    };

    let title = first(&["TI", "T1"])
        .ok_or_else(|| EntryParseError::new(ordinal, line, "record has no title (TI/T1)"))?;

    let database = first(&["DB", "DP"]).map(|db| normalize_database_name(&db));
    let source = options.source_tag(ReferenceFormat::Ris, database);

    let mut record = StudyRecord::new(record_id(&options.source_label, ordinal, &raw), title, source);
    record.r#abstract = first(&["AB", "N2"]);
    record.authors = fields
        .iter()
        .filter(|(tag, value)| (*tag == "AU" || *tag == "A1") && !value.trim().is_empty())
        .map(|(_, value)| collapse_whitespace(value))
        .collect();
    record.year = ["PY", "Y1", "DA"]
        .iter()
        .filter_map(|tag| first(&[*tag]))
        .find_map(|value| parse_year(&value));
    record.journal = first(&["JO", "JF", "JA", "T2"]);
    record.doi = first(&["DO"])
        .and_then(|doi| normalize_doi(&doi))
        .or_else(|| {
            fields
                .iter()
                .filter(|(tag, _)| *tag == "UR")
                .find_map(|(_, url)| url.contains("doi.org/").then(|| normalize_doi(url)).flatten())
        });
    record.pmid = first(&["AN"]).and_then(|an| normalize_pmid(&an));
    record.raw = raw;

    Ok(record)
}

/// Serialize records as RIS
///
/// Output parses back with [`RisRecords`] to the same titles, authors and years.
pub fn write_ris(records: &[StudyRecord]) -> String {
    let mut out = String::new();

    for record in records {
        out.push_str("TY  - JOUR\n");
        out.push_str(&format!("TI  - {}\n", collapse_whitespace(&record.title)));
        for author in &record.authors {
            out.push_str(&format!("AU  - {}\n", collapse_whitespace(author)));
        }
        if let Some(year) = record.year {
            out.push_str(&format!("PY  - {}\n", year));
        }
        if let Some(journal) = &record.journal {
            out.push_str(&format!("JO  - {}\n", collapse_whitespace(journal)));
        }
        if let Some(doi) = &record.doi {
            out.push_str(&format!("DO  - {}\n", doi));
        }
        if let Some(pmid) = &record.pmid {
            out.push_str(&format!("AN  - {}\n", pmid));
        }
        if let Some(abstract_text) = &record.r#abstract {
            out.push_str(&format!("AB  - {}\n", collapse_whitespace(abstract_text)));
        }
        if let Some(db) = &record.source.database {
            out.push_str(&format!("DB  - {}\n", db));
        }
        out.push_str("ER  - \n\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::{parse_text, ImportError};

    const SAMPLE: &str = "\
TY  - JOUR
TI  - Effects of exercise on
      depression in adults
AU  - Smith, John
AU  - Doe, Jane
PY  - 2019///
JO  - Journal of Things
DO  - https://doi.org/10.1000/ABC
AB  - Background text.
DB  - MEDLINE
ER  -

TY  - JOUR
T1  - Second study
A1  - Lee, K
Y1  - 2020/05/01
N2  - Abstract two
ER  -
";

    #[test]
    fn test_parse_sample() {
        let batch = parse_text(ReferenceFormat::Ris, SAMPLE, &ParseOptions::new("s.ris")).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert!(batch.skipped.is_empty());

        let first = &batch.records[0];
        assert_eq!(first.title, "Effects of exercise on depression in adults");
        assert_eq!(first.authors, vec!["Smith, John", "Doe, Jane"]);
        assert_eq!(first.year, Some(2019));
        assert_eq!(first.doi.as_deref(), Some("10.1000/abc"));
        assert_eq!(first.journal.as_deref(), Some("Journal of Things"));
        assert_eq!(first.source.database.as_deref(), Some("PubMed"));

        let second = &batch.records[1];
        assert_eq!(second.title, "Second study");
        assert_eq!(second.r#abstract.as_deref(), Some("Abstract two"));
        assert_eq!(second.year, Some(2020));
    }

    #[test]
    fn test_missing_er_skips_entry_and_keeps_prior() {
        let text = "\
TY  - JOUR
TI  - Kept one
ER  -
TY  - JOUR
TI  - Never terminated
TY  - JOUR
TI  - Kept two
ER  -
";
        let batch = parse_text(ReferenceFormat::Ris, text, &ParseOptions::default()).unwrap();
        assert_eq!(batch.skipped_count(), 1);
        assert_eq!(batch.skipped[0].ordinal, 2);
        assert_eq!(batch.skipped[0].line, 4);
        let titles: Vec<_> = batch.records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Kept one", "Kept two"]);
    }

    #[test]
    fn test_missing_er_at_end_of_file() {
        let text = "TY  - JOUR\nTI  - Complete\nER  -\nTY  - JOUR\nTI  - Truncated\n";
        let batch = parse_text(ReferenceFormat::Ris, text, &ParseOptions::default()).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.skipped_count(), 1);
        assert!(batch.skipped[0].reason.contains("end of file"));
    }

    #[test]
    fn test_only_malformed_entries_is_format_error() {
        let text = "TY  - JOUR\nAU  - Nobody\nER  -\n";
        let err = parse_text(ReferenceFormat::Ris, text, &ParseOptions::default()).unwrap_err();
        assert!(matches!(err, ImportError::Format { lines_scanned: 3, .. }));
    }

    #[test]
    fn test_doi_from_url_when_do_missing() {
        let text = "TY  - JOUR\nTI  - Linked\nUR  - https://doi.org/10.5/Linked\nER  -\n";
        let batch = parse_text(ReferenceFormat::Ris, text, &ParseOptions::default()).unwrap();
        assert_eq!(batch.records[0].doi.as_deref(), Some("10.5/linked"));
    }

    #[test]
    fn test_round_trip() {
        let original = parse_text(ReferenceFormat::Ris, SAMPLE, &ParseOptions::new("a")).unwrap();
        let written = write_ris(&original.records);
        let reparsed = parse_text(ReferenceFormat::Ris, &written, &ParseOptions::new("b")).unwrap();

        assert_eq!(original.records.len(), reparsed.records.len());
        for (a, b) in original.records.iter().zip(&reparsed.records) {
            assert_eq!(a.title, b.title);
            assert_eq!(a.authors, b.authors);
            assert_eq!(a.year, b.year);
            assert_eq!(a.doi, b.doi);
        }
    }
}
