//! PubMed / MEDLINE (`.nbib`) parser
//!
//! Records are separated by blank lines. Each field is `TAG - value` with the tag
//! padded to four columns; indented lines continue the previous field.

use once_cell::sync::Lazy;
use regex::Regex;
use std::iter::Enumerate;
use std::str::Lines;

use super::{record_id, EntryParseError, ParseOptions};
use crate::models::{ReferenceFormat, StudyRecord};
use crate::utils::normalize::{
    collapse_whitespace, normalize_database_name, normalize_doi, normalize_pmid, parse_year,
};

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z]{2,4})\s*-\s?(.*)$").expect("valid NBIB tag regex"));

const DEFAULT_DATABASE: &str = "PubMed";

/// Lazy iterator over the records of a MEDLINE export
pub struct NbibRecords<'a> {
    lines: Enumerate<Lines<'a>>,
    options: ParseOptions,
    ordinal: usize,
    lines_scanned: usize,
}

impl<'a> NbibRecords<'a> {
    pub fn new(text: &'a str, options: &ParseOptions) -> Self {
        Self {
            lines: text.lines().enumerate(),
            options: options.clone(),
            ordinal: 0,
            lines_scanned: 0,
        }
    }

    pub fn lines_scanned(&self) -> usize {
        self.lines_scanned
    }

    /// Next blank-line separated block and the line it starts on
    fn next_block(&mut self) -> Option<(usize, Vec<&'a str>)> {
        let mut block = Vec::new();
        let mut start = 0;

        for (idx, line) in self.lines.by_ref() {
            self.lines_scanned = idx + 1;
            if line.trim().is_empty() {
                if block.is_empty() {
                    continue;
                }
                break;
            }
            if block.is_empty() {
                start = idx + 1;
            }
            block.push(line);
        }

        if block.is_empty() {
            None
        } else {
            Some((start, block))
        }
    }
}

impl Iterator for NbibRecords<'_> {
    type Item = Result<StudyRecord, EntryParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (start_line, block) = self.next_block()?;
        self.ordinal += 1;
        Some(parse_block(&block, self.ordinal, start_line, &self.options))
    }
}

fn parse_block(
    block: &[&str],
    ordinal: usize,
    line: usize,
    options: &ParseOptions,
) -> Result<StudyRecord, EntryParseError> {
    let mut fields: Vec<(String, String)> = Vec::new();

    for raw_line in block {
        let continuation = raw_line.starts_with(char::is_whitespace);
        match TAG_RE.captures(raw_line) {
            Some(caps) if !continuation => {
                fields.push((caps[1].to_string(), caps[2].trim().to_string()));
            }
            _ => match fields.last_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(raw_line.trim());
                }
                None => {
                    return Err(EntryParseError::new(
                        ordinal,
                        line,
                        format!("expected a tagged field, found {:?}", raw_line.trim()),
                    ))
                }
            },
        }
    }

    let first = |tag: &str| -> Option<String> {
        fields
            .iter()
            .find(|(t, v)| t == tag && !v.is_empty())
            .map(|(_, v)| collapse_whitespace(v))
    };
    let all = |tag: &str| -> Vec<String> {
        fields
            .iter()
            .filter(|(t, v)| t == tag && !v.is_empty())
            .map(|(_, v)| collapse_whitespace(v))
            .collect()
    };

    let title = first("TI")
        .or_else(|| first("BTI"))
        .ok_or_else(|| EntryParseError::new(ordinal, line, "record has no title (TI)"))?;

    let database = options
        .source_database
        .as_deref()
        .map(normalize_database_name)
        .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

    let raw = block.join("\n");
    let source = options.source_tag(ReferenceFormat::Nbib, Some(database));
    let mut record = StudyRecord::new(record_id(&options.source_label, ordinal, &raw), title, source);

    record.r#abstract = first("AB");
    record.authors = {
        let full = all("FAU");
        if full.is_empty() {
            all("AU")
        } else {
            full
        }
    };
    record.year = first("DP").and_then(|dp| parse_year(&dp));
    record.journal = first("JT").or_else(|| first("TA"));
    record.doi = ["AID", "LID"]
        .iter()
        .flat_map(|tag| all(*tag))
        .find_map(|value| {
            value
                .strip_suffix("[doi]")
                .and_then(|doi| normalize_doi(doi.trim()))
        });
    record.pmid = first("PMID").and_then(|pmid| normalize_pmid(&pmid));
    record.raw = raw;

    Ok(record)
}
