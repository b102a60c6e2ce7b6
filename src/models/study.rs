use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Bibliographic export formats accepted by the importer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceFormat {
    Csv,
    Ris,
    Nbib,
    Bibtex,
}

impl ReferenceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceFormat::Csv => "csv",
            ReferenceFormat::Ris => "ris",
            ReferenceFormat::Nbib => "nbib",
            ReferenceFormat::Bibtex => "bibtex",
        }
    }

    /// Guess the format from a file extension
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(ReferenceFormat::Csv),
            "ris" => Some(ReferenceFormat::Ris),
            "nbib" | "medline" => Some(ReferenceFormat::Nbib),
            "bib" | "bibtex" => Some(ReferenceFormat::Bibtex),
            _ => None,
        }
    }
}

impl fmt::Display for ReferenceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ReferenceFormat::Csv),
            "ris" => Ok(ReferenceFormat::Ris),
            "nbib" | "medline" | "pubmed" => Ok(ReferenceFormat::Nbib),
            "bib" | "bibtex" => Ok(ReferenceFormat::Bibtex),
            other => Err(format!("Unknown reference format: {}", other)),
        }
    }
}

/// Where a record came from: the file format and, when known, the database
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceTag {
    pub format: ReferenceFormat,
    pub database: Option<String>,
}

impl SourceTag {
    pub fn new(format: ReferenceFormat) -> Self {
        Self {
            format,
            database: None,
        }
    }

    pub fn with_database(mut self, database: Option<String>) -> Self {
        self.database = database;
        self
    }

    /// Human readable label, e.g. "PubMed (nbib)"
    pub fn label(&self) -> String {
        match &self.database {
            Some(db) => format!("{} ({})", db, self.format),
            None => self.format.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudyRecord {
    pub id: String,
    pub title: String,
    pub r#abstract: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub journal: Option<String>,
    pub doi: Option<String>,
    pub pmid: Option<String>,
    pub source: SourceTag,

    /// Set by the deduplicator on every member of a duplicate group
    #[serde(default)]
    pub duplicate_group: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw: String,
}

impl StudyRecord {
    pub fn new(id: String, title: String, source: SourceTag) -> Self {
        Self {
            id,
            title,
            r#abstract: None,
            authors: Vec::new(),
            year: None,
            journal: None,
            doi: None,
            pmid: None,
            source,
            duplicate_group: None,
            raw: String::new(),
        }
    }

    /// Number of populated bibliographic fields, used to pick canonical records
    pub fn field_count(&self) -> usize {
        fn present(s: &Option<String>) -> bool {
            s.as_deref().is_some_and(|v| !v.trim().is_empty())
        }

        [
            !self.title.trim().is_empty(),
            present(&self.r#abstract),
            !self.authors.is_empty(),
            self.year.is_some(),
            present(&self.journal),
            present(&self.doi),
            present(&self.pmid),
        ]
        .iter()
        .filter(|p| **p)
        .count()
    }

    pub fn authors_display(&self) -> String {
        self.authors.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_count() {
        let mut record = StudyRecord::new(
            "a".to_string(),
            "A title".to_string(),
            SourceTag::new(ReferenceFormat::Ris),
        );
        assert_eq!(record.field_count(), 1);

        record.r#abstract = Some("   ".to_string());
        record.year = Some(2020);
        record.doi = Some("10.1/x".to_string());
        assert_eq!(record.field_count(), 3);
    }

    #[test]
    fn test_format_from_str_and_extension() {
        assert_eq!("BibTeX".parse::<ReferenceFormat>(), Ok(ReferenceFormat::Bibtex));
        assert_eq!("medline".parse::<ReferenceFormat>(), Ok(ReferenceFormat::Nbib));
        assert!("endnote".parse::<ReferenceFormat>().is_err());
        assert_eq!(
            ReferenceFormat::from_extension(Path::new("export/pubmed.NBIB")),
            Some(ReferenceFormat::Nbib)
        );
        assert_eq!(ReferenceFormat::from_extension(Path::new("refs.txt")), None);
    }

    #[test]
    fn test_source_label() {
        let tag = SourceTag::new(ReferenceFormat::Nbib).with_database(Some("PubMed".to_string()));
        assert_eq!(tag.label(), "PubMed (nbib)");
        assert_eq!(SourceTag::new(ReferenceFormat::Csv).label(), "csv");
    }
}
