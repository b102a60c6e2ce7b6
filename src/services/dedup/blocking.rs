//! Candidate pair generation for the fuzzy pass
//!
//! Only records sharing a block are compared. Title blocking keys a record by
//! the first `block_key_len` characters of each of its first two and last two
//! significant words, so a typo or a plural in one word still leaves the records
//! sharing the blocks of the others.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{DedupConfig, Prepared};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockingStrategy {
    /// Word-prefix keys from both ends of the title
    #[default]
    TitleKeys,
    /// Publication year, paired with years within the tolerance
    Year,
}

/// Pairs `(i, j)` with `i < j` that the fuzzy pass should score
///
/// `candidates` are indices into `prepared`; below `blocking_min_records`
/// candidates every pair is returned.
pub(super) fn candidate_pairs(
    prepared: &[Prepared],
    candidates: &[usize],
    config: &DedupConfig,
) -> BTreeSet<(usize, usize)> {
    if candidates.len() < config.blocking_min_records {
        return all_pairs(candidates);
    }

    match config.blocking {
        BlockingStrategy::TitleKeys => title_key_pairs(prepared, candidates, config.block_key_len),
        BlockingStrategy::Year => year_pairs(prepared, candidates, config.year_tolerance),
    }
}

fn all_pairs(candidates: &[usize]) -> BTreeSet<(usize, usize)> {
    let mut pairs = BTreeSet::new();
    for (n, &i) in candidates.iter().enumerate() {
        for &j in &candidates[n + 1..] {
            pairs.insert(ordered(i, j));
        }
    }
    pairs
}

/// Words too common to key a block on
const STOP_WORDS: &[&str] = &[
    "and", "for", "from", "into", "the", "with", "among", "between", "versus", "via",
];

/// Block keys for one normalized title
pub(super) fn title_keys(title: &str, key_len: usize) -> BTreeSet<String> {
    let key_len = key_len.max(1);
    let words: Vec<&str> = title
        .split_whitespace()
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(w))
        .collect();

    if words.is_empty() {
        return BTreeSet::from([title.chars().take(key_len).collect()]);
    }

    let edge = 2.min(words.len());
    words[..edge]
        .iter()
        .chain(&words[words.len() - edge..])
        .map(|w| w.chars().take(key_len).collect())
        .collect()
}

fn title_key_pairs(
    prepared: &[Prepared],
    candidates: &[usize],
    key_len: usize,
) -> BTreeSet<(usize, usize)> {
    let mut blocks: HashMap<String, Vec<usize>> = HashMap::new();
    for &i in candidates {
        for key in title_keys(&prepared[i].title, key_len) {
            blocks.entry(key).or_default().push(i);
        }
    }

    let mut pairs = BTreeSet::new();
    for members in blocks.values() {
        pairs.extend(all_pairs(members));
    }
    pairs
}

/// Records without a year are compared against every other candidate
fn year_pairs(
    prepared: &[Prepared],
    candidates: &[usize],
    tolerance: i32,
) -> BTreeSet<(usize, usize)> {
    let tolerance = tolerance.max(0);
    let mut by_year: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    let mut undated = Vec::new();

    for &i in candidates {
        match prepared[i].year {
            Some(year) => by_year.entry(year).or_default().push(i),
            None => undated.push(i),
        }
    }

    let mut pairs = BTreeSet::new();
    for (&year, members) in &by_year {
        pairs.extend(all_pairs(members));
        if tolerance == 0 {
            continue;
        }
        for (_, neighbours) in by_year.range(year + 1..=year + tolerance) {
            for &i in members {
                for &j in neighbours {
                    pairs.insert(ordered(i, j));
                }
            }
        }
    }

    for &u in &undated {
        for &other in candidates {
            if other != u {
                pairs.insert(ordered(u, other));
            }
        }
    }

    pairs
}

fn ordered(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}
