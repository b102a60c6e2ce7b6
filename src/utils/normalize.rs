//! Field normalization shared by the parsers and the deduplicator
//!
//! Every function here is pure: same input, same output, no I/O.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:19|20)\d{2}").expect("valid year regex"));

static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid digits regex"));

/// Resolver prefixes stripped from DOIs, compared case-insensitively
const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi.org/",
    "dx.doi.org/",
    "doi:",
];

const LEADING_ARTICLES: &[&str] = &["a", "an", "the"];

/// Collapse runs of whitespace (including newlines) into single spaces and trim
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Comparison key for titles
///
/// Lowercases, replaces punctuation with spaces, collapses whitespace and strips
/// leading articles. Applying it twice gives the same result as applying it once.
pub fn normalize_title(title: &str) -> String {
    let cleaned: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    let mut start = 0;
    while words.len() - start > 1 && LEADING_ARTICLES.contains(&words[start]) {
        start += 1;
    }
    words.drain(..start);
    words.join(" ")
}

/// Lowercase a DOI and strip resolver prefixes
///
/// Returns `None` for empty input or input with no DOI left after stripping.
pub fn normalize_doi(doi: &str) -> Option<String> {
    let mut value = doi.trim();

    loop {
        let lower = value.to_ascii_lowercase();
        match DOI_PREFIXES.iter().find(|p| lower.starts_with(*p)) {
            Some(prefix) => value = value[prefix.len()..].trim_start(),
            None => break,
        }
    }

    let value = value.trim_end_matches(['.', ',', ';']).trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_lowercase())
    }
}

/// First run of digits in a PubMed id field ("12345678 [indexed]" -> "12345678")
pub fn normalize_pmid(pmid: &str) -> Option<String> {
    DIGITS_RE.find(pmid).map(|m| m.as_str().to_string())
}

/// First plausible four digit year (1900-2099) in a free-text date
pub fn parse_year(value: &str) -> Option<i32> {
    YEAR_RE.find(value).and_then(|m| m.as_str().parse().ok())
}

/// Case-insensitive last name of an author string
///
/// Handles "Last, First", "First Last" and the PubMed "Last AB" style.
pub fn author_last_name(author: &str) -> String {
    let author = author.trim();

    let last = if let Some((last, _)) = author.split_once(',') {
        last.trim().to_string()
    } else {
        let tokens: Vec<&str> = author.split_whitespace().collect();
        match tokens.as_slice() {
            [] => String::new(),
            [only] => only.to_string(),
            [rest @ .., last] if is_initials(last) => rest.join(" "),
            [.., last] => last.to_string(),
        }
    };

    last.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Set of author last names for Jaccard comparison
pub fn author_key_set(authors: &[String]) -> BTreeSet<String> {
    authors
        .iter()
        .map(|a| author_last_name(a))
        .filter(|a| !a.is_empty())
        .collect()
}

/// Canonical display name for a bibliographic database label
pub fn normalize_database_name(name: &str) -> String {
    let trimmed = name.trim();
    let lower = trimmed.to_lowercase();

    let known = [
        ("pubmed", "PubMed"),
        ("medline", "PubMed"),
        ("embase", "Embase"),
        ("scopus", "Scopus"),
        ("web of science", "Web of Science"),
        ("wos", "Web of Science"),
        ("cochrane", "Cochrane"),
        ("psycinfo", "PsycINFO"),
        ("cinahl", "CINAHL"),
    ];

    known
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Initials token such as "J", "JA" or "J.A."
fn is_initials(token: &str) -> bool {
    let letters: Vec<char> = token.chars().filter(|c| *c != '.').collect();
    !letters.is_empty() && letters.len() <= 3 && letters.iter().all(|c| c.is_uppercase())
}
