//! BibTeX parser
//!
//! The file is first split into `@type{...}` chunks by a brace-balancing scanner,
//! so one broken entry cannot take the rest of the file down with it. Each chunk
//! is then parsed on its own with `biblatex`, with every `@string` definition in
//! the file prepended so abbreviations resolve.

use biblatex::{Bibliography, ChunksExt, PermissiveType};
use std::vec::IntoIter;

use super::{record_id, EntryParseError, ParseOptions};
use crate::models::{ReferenceFormat, StudyRecord};
use crate::utils::normalize::{collapse_whitespace, normalize_doi, normalize_pmid, parse_year};

/// A raw `@type{...}` chunk as found by the scanner
#[derive(Debug, Clone, PartialEq)]
struct RawEntry<'a> {
    kind: String,
    line: usize,
    end_line: usize,
    text: &'a str,
    /// False when the closing delimiter was never found
    complete: bool,
}

/// Lazy iterator over the entries of a BibTeX file
pub struct BibtexRecords<'a> {
    entries: IntoIter<RawEntry<'a>>,
    strings: String,
    options: ParseOptions,
    ordinal: usize,
    lines_scanned: usize,
}

impl<'a> BibtexRecords<'a> {
    pub fn new(text: &'a str, options: &ParseOptions) -> Self {
        let mut strings = String::new();
        let mut entries = Vec::new();

        for raw in split_entries(text) {
            match raw.kind.as_str() {
                "comment" | "preamble" => {}
                "string" => {
                    if raw.complete {
                        strings.push_str(raw.text);
                        strings.push('\n');
                    }
                }
                _ => entries.push(raw),
            }
        }

        Self {
            entries: entries.into_iter(),
            strings,
            options: options.clone(),
            ordinal: 0,
            lines_scanned: 0,
        }
    }

    pub fn lines_scanned(&self) -> usize {
        self.lines_scanned
    }

    fn parse_entry(&self, raw: &RawEntry<'_>) -> Result<StudyRecord, EntryParseError> {
        let fail = |reason: String| EntryParseError::new(self.ordinal, raw.line, reason);

        if !raw.complete {
            return Err(fail(format!("unbalanced braces in @{} entry", raw.kind)));
        }

        let source = format!("{}{}", self.strings, raw.text);
        let bibliography =
            Bibliography::parse(&source).map_err(|e| fail(format!("invalid BibTeX: {:?}", e)))?;
        let entry = bibliography
            .iter()
            .next()
            .ok_or_else(|| fail("entry could not be read".to_string()))?;

        let title = entry
            .title()
            .ok()
            .map(format_chunks)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| fail(format!("entry '{}' has no title", entry.key)))?;

        let tag = self.options.source_tag(ReferenceFormat::Bibtex, None);
        let mut record = StudyRecord::new(
            record_id(&self.options.source_label, self.ordinal, raw.text),
            title,
            tag,
        );

        record.authors = entry
            .author()
            .ok()
            .map(|persons| persons.iter().map(format_person).collect())
            .unwrap_or_default();

        record.year = entry
            .date()
            .ok()
            .and_then(|date| extract_year(&date))
            .or_else(|| entry.get("year").and_then(|y| parse_year(&y.format_verbatim())));

        record.journal = entry
            .journal()
            .ok()
            .map(format_chunks)
            .or_else(|| entry.book_title().ok().map(format_chunks))
            .filter(|j| !j.is_empty());

        record.doi = entry.doi().ok().and_then(|doi| normalize_doi(&doi));
        record.r#abstract = entry
            .abstract_()
            .ok()
            .map(format_chunks)
            .filter(|a| !a.is_empty());
        record.pmid = entry
            .get("pmid")
            .and_then(|p| normalize_pmid(&p.format_verbatim()));
        record.raw = raw.text.to_string();

        Ok(record)
    }
}

impl Iterator for BibtexRecords<'_> {
    type Item = Result<StudyRecord, EntryParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.entries.next()?;
        self.ordinal += 1;
        self.lines_scanned = raw.end_line;
        Some(self.parse_entry(&raw))
    }
}

/// Split BibTeX source into `@type{...}` chunks
///
/// An entry whose closing brace is missing ends where the next line starting
/// with `@type{` begins, or at end of input, and is marked incomplete.
fn split_entries(text: &str) -> Vec<RawEntry<'_>> {
    let bytes = text.as_bytes();
    let mut entries = Vec::new();
    let mut lines = LineCounter::new(text);
    let mut i = 0;

    while let Some(offset) = text[i..].find('@') {
        let at = i + offset;
        let mut j = at + 1;
        while j < bytes.len() && bytes[j].is_ascii_alphabetic() {
            j += 1;
        }
        let kind = text[at + 1..j].to_ascii_lowercase();
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }

        let opener = bytes.get(j).copied();
        if kind.is_empty() || !matches!(opener, Some(b'{') | Some(b'(')) {
            i = at + 1;
            continue;
        }
        let paren = opener == Some(b'(');

        let mut depth = 0usize;
        let mut end = None;
        let mut k = j;
        while k < bytes.len() {
            match bytes[k] {
                b'{' => depth += 1,
                b'(' if paren && k == j => depth += 1,
                b'}' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 && !paren {
                        end = Some((k + 1, true));
                        break;
                    }
                }
                b')' if paren && depth == 1 => {
                    end = Some((k + 1, true));
                    break;
                }
                b'\n' if starts_entry(&text[k + 1..]) => {
                    end = Some((k + 1, false));
                    break;
                }
                _ => {}
            }
            k += 1;
        }

        let (end, complete) = end.unwrap_or((bytes.len(), false));
        let line = lines.line_at(at);
        let end_line = lines.line_at(end.saturating_sub(1).max(at));
        entries.push(RawEntry {
            kind,
            line,
            end_line,
            text: &text[at..end],
            complete,
        });
        i = end;
    }

    entries
}

/// `@ident{` or `@ident(` at the start of `s`
fn starts_entry(s: &str) -> bool {
    let Some(rest) = s.strip_prefix('@') else {
        return false;
    };
    let ident_len = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
    ident_len > 0 && rest[ident_len..].trim_start().starts_with(['{', '('])
}

/// Converts byte offsets to 1-based line numbers; offsets must not decrease
struct LineCounter<'a> {
    text: &'a str,
    offset: usize,
    line: usize,
}

impl<'a> LineCounter<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            offset: 0,
            line: 1,
        }
    }

    fn line_at(&mut self, offset: usize) -> usize {
        let offset = offset.min(self.text.len());
        if offset > self.offset {
            self.line += self.text.as_bytes()[self.offset..offset]
                .iter()
                .filter(|b| **b == b'\n')
                .count();
            self.offset = offset;
        }
        self.line
    }
}

/// Format biblatex Chunks into a clean string
fn format_chunks(chunks: &[biblatex::Spanned<biblatex::Chunk>]) -> String {
    collapse_whitespace(&chunks.format_verbatim())
}

/// Extract year from a PermissiveType<Date>
fn extract_year(date: &PermissiveType<biblatex::Date>) -> Option<i32> {
    match date {
        PermissiveType::Typed(d) => {
            use biblatex::DateValue;
            match &d.value {
                DateValue::At(dt) => Some(dt.year),
                DateValue::After(dt) => Some(dt.year),
                DateValue::Before(dt) => Some(dt.year),
                DateValue::Between(start, _) => Some(start.year),
            }
        }
        PermissiveType::Chunks(chunks) => parse_year(&chunks.format_verbatim()),
    }
}

/// Format a Person as "Last, Given" so last names survive normalization
fn format_person(person: &biblatex::Person) -> String {
    let mut last = Vec::new();
    if !person.prefix.is_empty() {
        last.push(person.prefix.as_str());
    }
    if !person.name.is_empty() {
        last.push(person.name.as_str());
    }
    let last = last.join(" ");

    let mut given = person.given_name.clone();
    if !person.suffix.is_empty() {
        given = format!("{} {}", given, person.suffix).trim().to_string();
    }

    if given.is_empty() {
        last
    } else {
        format!("{}, {}", last, given)
    }
}
