//! Duplicate detection across imported reference batches
//!
//! Two passes over the concatenated records:
//! 1. records sharing a normalized DOI are grouped outright
//! 2. records are compared pairwise (within blocks) on title, author last names
//!    and year, and pairs at or above the threshold are joined. A pair where both
//!    sides carry a DOI is never scored: equal DOIs are already joined and
//!    different DOIs mean different studies. A copy without a DOI can therefore
//!    join a DOI group, which is then reported as [`MatchReason::Mixed`].
//!
//! Groups are transitive. Nothing is removed: every record comes back tagged with
//! its group id, and [`DedupOutcome::unique`] yields one record per study.

pub mod blocking;
pub mod report;
pub mod union_find;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use strsim::normalized_levenshtein;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{DuplicateGroup, MatchReason, StudyRecord};
use crate::utils::normalize::{author_key_set, normalize_doi, normalize_title};

pub use blocking::BlockingStrategy;
pub use report::DedupReport;
pub use union_find::UnionFind;

/// Tunables for the fuzzy pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DedupConfig {
    /// Minimum combined score for two records to be joined
    pub threshold: f64,
    pub title_weight: f64,
    pub author_weight: f64,
    pub year_weight: f64,
    /// Years this far apart still count as matching
    pub year_tolerance: i32,
    pub blocking: BlockingStrategy,
    /// Prefix length of each keyed title word for title blocking
    pub block_key_len: usize,
    /// Batches with fewer fuzzy candidates than this compare every pair
    pub blocking_min_records: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            title_weight: 0.7,
            author_weight: 0.2,
            year_weight: 0.1,
            year_tolerance: 1,
            blocking: BlockingStrategy::TitleKeys,
            block_key_len: 4,
            blocking_min_records: 200,
        }
    }
}

/// Comparison keys computed once per record
#[derive(Debug, Clone)]
pub(crate) struct Prepared {
    pub title: String,
    pub authors: BTreeSet<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
}

impl Prepared {
    fn from_record(record: &StudyRecord) -> Self {
        Self {
            title: normalize_title(&record.title),
            authors: author_key_set(&record.authors),
            year: record.year,
            doi: record.doi.as_deref().and_then(normalize_doi),
        }
    }
}

/// Result of a deduplication run
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    /// Every input record in input order, members tagged with their group id
    pub records: Vec<StudyRecord>,
    /// Groups of two or more, ordered by their earliest member
    pub groups: Vec<DuplicateGroup>,
}

impl DedupOutcome {
    /// Canonical records plus records in no group, in input order
    pub fn unique(&self) -> impl Iterator<Item = &StudyRecord> {
        let dropped: BTreeSet<&str> = self.groups.iter().flat_map(|g| g.duplicates()).collect();
        self.records
            .iter()
            .filter(move |r| !dropped.contains(r.id.as_str()))
    }

    pub fn unique_count(&self) -> usize {
        self.records.len() - self.groups.iter().map(|g| g.len() - 1).sum::<usize>()
    }

    pub fn group_for(&self, record_id: &str) -> Option<&DuplicateGroup> {
        self.groups.iter().find(|g| g.contains(record_id))
    }

    pub fn report(&self) -> DedupReport {
        DedupReport::from_outcome(self)
    }
}

/// Weighted similarity of two records in `[0, 1]`
///
/// Components missing on either side are left out and the remaining weights
/// renormalized, so a pair with no authors or years is scored on title alone.
pub fn pair_score(a: &StudyRecord, b: &StudyRecord, config: &DedupConfig) -> f64 {
    score_prepared(&Prepared::from_record(a), &Prepared::from_record(b), config)
}

fn score_prepared(a: &Prepared, b: &Prepared, config: &DedupConfig) -> f64 {
    let mut total = 0.0;
    let mut weight = 0.0;

    if !a.title.is_empty() && !b.title.is_empty() {
        total += config.title_weight * normalized_levenshtein(&a.title, &b.title);
        weight += config.title_weight;
    }

    if !a.authors.is_empty() && !b.authors.is_empty() {
        let shared = a.authors.intersection(&b.authors).count() as f64;
        let union = a.authors.union(&b.authors).count() as f64;
        total += config.author_weight * (shared / union);
        weight += config.author_weight;
    }

    if let (Some(ya), Some(yb)) = (a.year, b.year) {
        let matches = (ya - yb).abs() <= config.year_tolerance;
        total += config.year_weight * if matches { 1.0 } else { 0.0 };
        weight += config.year_weight;
    }

    if weight <= 0.0 {
        0.0
    } else {
        total / weight
    }
}

/// Group duplicate records
///
/// Infallible and deterministic: the same set of records produces the same groups
/// in any input order.
pub fn deduplicate(records: Vec<StudyRecord>, config: &DedupConfig) -> DedupOutcome {
    let prepared: Vec<Prepared> = records.iter().map(Prepared::from_record).collect();
    let mut sets = UnionFind::new(records.len());
    let mut in_doi_group = vec![false; records.len()];
    let mut best_score = vec![0.0_f64; records.len()];

    // Exact pass
    let mut by_doi: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, p) in prepared.iter().enumerate() {
        if let Some(doi) = &p.doi {
            by_doi.entry(doi.as_str()).or_default().push(i);
        }
    }
    for members in by_doi.values().filter(|m| m.len() > 1) {
        for &i in members {
            sets.union(members[0], i);
            in_doi_group[i] = true;
            best_score[i] = 1.0;
        }
    }

    // Fuzzy pass
    let mut fuzzy_linked = vec![false; records.len()];
    let mut candidates = Vec::new();
    for (i, p) in prepared.iter().enumerate() {
        if p.title.is_empty() {
            warn!(
                "Record {} has no comparable title ({:?}); left out of fuzzy matching",
                records[i].id, records[i].title
            );
            continue;
        }
        candidates.push(i);
    }

    let pairs = blocking::candidate_pairs(&prepared, &candidates, config);
    debug!(
        "Scoring {} candidate pairs among {} records",
        pairs.len(),
        candidates.len()
    );

    for (i, j) in pairs {
        let (a, b) = (&prepared[i], &prepared[j]);
        if a.doi.is_some() && b.doi.is_some() {
            continue;
        }

        let score = score_prepared(a, b, config);
        if score >= config.threshold {
            debug!(
                "Fuzzy match {} ~ {} (score {:.3})",
                records[i].id, records[j].id, score
            );
            sets.union(i, j);
            fuzzy_linked[i] = true;
            fuzzy_linked[j] = true;
            best_score[i] = best_score[i].max(score);
            best_score[j] = best_score[j].max(score);
        }
    }

    // Collect groups and tag members
    // Tags from an earlier run are replaced
    let mut records = records;
    for record in records.iter_mut() {
        record.duplicate_group = None;
    }
    let mut groups = Vec::new();
    for members in sets.groups().into_iter().filter(|m| m.len() > 1) {
        let by_doi = members.iter().any(|&m| in_doi_group[m]);
        let by_similarity = members.iter().any(|&m| fuzzy_linked[m]);
        let reason = match (by_doi, by_similarity) {
            (true, true) => MatchReason::Mixed,
            (true, false) => MatchReason::Doi,
            _ => MatchReason::Fuzzy,
        };

        let mut canonical = members[0];
        for &m in &members[1..] {
            if records[m].field_count() > records[canonical].field_count() {
                canonical = m;
            }
        }

        let member_ids: Vec<String> = members.iter().map(|&m| records[m].id.clone()).collect();
        let id = group_id(&member_ids);
        let score = members
            .iter()
            .map(|&m| best_score[m])
            .fold(0.0_f64, f64::max);

        for &m in &members {
            records[m].duplicate_group = Some(id.clone());
        }

        groups.push(DuplicateGroup {
            id,
            canonical_id: records[canonical].id.clone(),
            member_ids,
            reason,
            best_score: score,
        });
    }

    let count = |reason: MatchReason| groups.iter().filter(|g| g.reason == reason).count();
    info!(
        "Deduplicated {} records: {} groups ({} by DOI, {} fuzzy, {} mixed)",
        records.len(),
        groups.len(),
        count(MatchReason::Doi),
        count(MatchReason::Fuzzy),
        count(MatchReason::Mixed)
    );

    DedupOutcome { records, groups }
}

/// Group id derived from the member set, independent of input order
fn group_id(member_ids: &[String]) -> String {
    let mut sorted: Vec<&str> = member_ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    Uuid::new_v5(&Uuid::NAMESPACE_OID, sorted.join("\u{1f}").as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReferenceFormat, SourceTag};

    fn record(id: &str, title: &str) -> StudyRecord {
        StudyRecord::new(id.to_string(), title.to_string(), SourceTag::new(ReferenceFormat::Ris))
    }

    fn with(mut r: StudyRecord, authors: &[&str], year: Option<i32>, doi: Option<&str>) -> StudyRecord {
        r.authors = authors.iter().map(|a| a.to_string()).collect();
        r.year = year;
        r.doi = doi.map(str::to_string);
        r
    }

    fn member_sets(outcome: &DedupOutcome) -> BTreeSet<BTreeSet<String>> {
        outcome
            .groups
            .iter()
            .map(|g| g.member_ids.iter().cloned().collect())
            .collect()
    }

    fn sample() -> Vec<StudyRecord> {
        vec![
            with(record("a", "Exercise and depression: a meta-analysis"), &["Smith, J"], Some(2019), Some("10.1/ex")),
            with(record("b", "Something else entirely"), &["Lee K"], Some(2019), Some("https://doi.org/10.1/EX")),
            with(record("c", "Effects of X on Y: A Trial"), &["Garcia, Maria", "Chen W"], None, None),
            with(record("d", "effects of x on y a trial"), &["M. Garcia", "Wei Chen"], None, None),
            with(record("e", "Sleep hygiene in shift workers"), &["Brown, A"], Some(2015), None),
            with(record("f", "Effects of X on Y - a trial"), &["Garcia M"], Some(2020), None),
        ]
    }

    #[test]
    fn test_doi_and_fuzzy_groups() {
        let outcome = deduplicate(sample(), &DedupConfig::default());
        assert_eq!(outcome.groups.len(), 2);

        let doi_group = &outcome.groups[0];
        assert_eq!(doi_group.reason, MatchReason::Doi);
        assert_eq!(doi_group.member_ids, vec!["a", "b"]);
        assert_eq!(doi_group.best_score, 1.0);

        let fuzzy_group = &outcome.groups[1];
        assert_eq!(fuzzy_group.reason, MatchReason::Fuzzy);
        assert_eq!(fuzzy_group.member_ids, vec!["c", "d", "f"]);
        assert!(fuzzy_group.best_score >= 0.85);

        assert_eq!(outcome.unique_count(), 3);
        assert_eq!(outcome.unique().count(), 3);
        assert!(outcome.records[4].duplicate_group.is_none());
        assert_eq!(
            outcome.records[2].duplicate_group.as_deref(),
            Some(fuzzy_group.id.as_str())
        );
    }

    #[test]
    fn test_doi_precedence_over_title() {
        let records = vec![
            with(record("x", "A study of cats"), &[], None, Some("10.5/same")),
            with(record("y", "Completely different words"), &[], None, Some("doi:10.5/SAME")),
        ];
        let outcome = deduplicate(records, &DedupConfig::default());
        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(outcome.groups[0].reason, MatchReason::Doi);
    }

    #[test]
    fn test_different_dois_never_fuzzy_merge() {
        let records = vec![
            with(record("x", "Identical title here"), &["Smith J"], Some(2019), Some("10.1/one")),
            with(record("y", "Identical title here"), &["Smith J"], Some(2019), Some("10.1/two")),
        ];
        let outcome = deduplicate(records, &DedupConfig::default());
        assert!(outcome.groups.is_empty());
    }

    #[test]
    fn test_copy_without_doi_joins_doi_group() {
        let title = "Mindfulness training for anxiety in adults";
        let records = vec![
            with(record("pubmed", title), &["Smith, J"], Some(2020), Some("10.1/m")),
            with(record("scopus", title), &["Smith J"], Some(2020), Some("10.1/M")),
            with(record("embase", title), &["Smith, John"], Some(2020), None),
        ];
        let outcome = deduplicate(records, &DedupConfig::default());

        assert_eq!(outcome.groups.len(), 1);
        let group = &outcome.groups[0];
        assert_eq!(group.member_ids, vec!["pubmed", "scopus", "embase"]);
        assert_eq!(group.reason, MatchReason::Mixed);
        assert_eq!(outcome.unique_count(), 1);
        assert_eq!(outcome.unique().count(), 1);
        assert_eq!(outcome.report().mixed_duplicates, 2);
    }

    #[test]
    fn test_single_doi_copy_is_a_fuzzy_group() {
        let title = "Mindfulness training for anxiety in adults";
        let records = vec![
            with(record("pubmed", title), &["Smith, J"], Some(2020), Some("10.1/m")),
            with(record("embase", title), &["Smith, John"], Some(2020), None),
        ];
        let outcome = deduplicate(records, &DedupConfig::default());

        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(outcome.groups[0].reason, MatchReason::Fuzzy);
    }

    #[test]
    fn test_canonical_is_most_complete_then_earliest() {
        let mut sparse = record("first", "Trial of a thing");
        sparse.doi = Some("10.9/t".into());
        let mut full = with(record("second", "Trial of a thing"), &["Doe, J"], Some(2001), Some("10.9/t"));
        full.r#abstract = Some("Abstract".into());
        let mut tie = with(record("third", "Trial of a thing"), &["Doe, J"], Some(2001), Some("10.9/T"));
        tie.r#abstract = Some("Abstract".into());

        let outcome = deduplicate(vec![sparse, full, tie], &DedupConfig::default());
        assert_eq!(outcome.groups[0].canonical_id, "second");
        let dups: Vec<_> = outcome.groups[0].duplicates().collect();
        assert_eq!(dups, vec!["first", "third"]);
    }

    #[test]
    fn test_order_independent() {
        let forward = deduplicate(sample(), &DedupConfig::default());
        let mut reversed_input = sample();
        reversed_input.reverse();
        let reversed = deduplicate(reversed_input, &DedupConfig::default());
        let mut rotated_input = sample();
        rotated_input.rotate_left(2);
        let rotated = deduplicate(rotated_input, &DedupConfig::default());

        assert_eq!(member_sets(&forward), member_sets(&reversed));
        assert_eq!(member_sets(&forward), member_sets(&rotated));

        let ids = |o: &DedupOutcome| o.groups.iter().map(|g| g.id.clone()).collect::<BTreeSet<_>>();
        assert_eq!(ids(&forward), ids(&reversed));
    }

    #[test]
    fn test_empty_title_is_left_out_of_fuzzy_pass() {
        let records = vec![record("x", "???"), record("y", "!!!"), record("z", "Real title")];
        let outcome = deduplicate(records, &DedupConfig::default());
        assert!(outcome.groups.is_empty());
        assert_eq!(outcome.unique().count(), 3);
    }

    #[test]
    fn test_threshold_controls_fuzzy_pass() {
        let records = vec![
            record("x", "Yoga for chronic low back pain"),
            record("y", "Yoga for chronic neck pain"),
        ];
        assert!(deduplicate(records.clone(), &DedupConfig::default()).groups.is_empty());

        let loose = DedupConfig {
            threshold: 0.6,
            ..Default::default()
        };
        assert_eq!(deduplicate(records, &loose).groups.len(), 1);
    }

    #[test]
    fn test_pair_score_renormalizes_missing_components() {
        let config = DedupConfig::default();
        let a = record("a", "Same title");
        let b = with(record("b", "Same title"), &["Smith J"], Some(2000), None);
        assert!((pair_score(&a, &b, &config) - 1.0).abs() < 1e-9);

        let c = with(record("c", "Same title"), &["Jones K"], Some(2010), None);
        let score = pair_score(&b, &c, &config);
        assert!((score - 0.7).abs() < 1e-9);
    }
}
