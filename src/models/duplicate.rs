use serde::{Deserialize, Serialize};

/// Which pass of the deduplicator produced a group
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MatchReason {
    Doi,
    Fuzzy,
    /// Records sharing a DOI plus copies without one joined by similarity
    Mixed,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::Doi => "doi",
            MatchReason::Fuzzy => "fuzzy",
            MatchReason::Mixed => "mixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "doi" => Some(MatchReason::Doi),
            "fuzzy" => Some(MatchReason::Fuzzy),
            "mixed" => Some(MatchReason::Mixed),
            _ => None,
        }
    }
}

/// A set of records judged to describe the same study
///
/// `member_ids` is in import order and always holds at least two ids;
/// `canonical_id` is one of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateGroup {
    pub id: String,
    pub member_ids: Vec<String>,
    pub canonical_id: String,
    pub reason: MatchReason,
    /// Highest pairwise score that joined the group (1.0 for DOI matches)
    pub best_score: f64,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.member_ids.iter().any(|m| m == id)
    }

    /// Members other than the canonical record
    pub fn duplicates(&self) -> impl Iterator<Item = &str> {
        self.member_ids
            .iter()
            .map(String::as_str)
            .filter(move |id| *id != self.canonical_id)
    }
}
