use std::collections::BTreeSet;

use sysrev::models::SourceTag;
use sysrev::parsers::{write_csv, write_ris};
use sysrev::utils::normalize::normalize_title;
use sysrev::{deduplicate, parse_text, DedupConfig, ParseOptions, ReferenceFormat, StudyRecord};

const RIS: &str = "\
TY  - JOUR
TI  - Mindfulness-based stress reduction for generalized anxiety
AU  - Smith, John
AU  - Doe, Jane
PY  - 2020
JO  - Journal of Anxiety
DO  - https://doi.org/10.1000/MBSR.2020
AB  - A randomized trial of mindfulness
  in adults with anxiety.
ER  -

TY  - JOUR
TI  - Yoga and sleep quality in older adults
AU  - Lee, Kim
PY  - 2018
ER  -
";

const WORDS: [&str; 64] = [
    "anxiety", "depression", "sleep", "exercise", "diet", "cognition", "memory", "stress",
    "therapy", "trial", "cohort", "adults", "children", "adolescents", "elderly", "women",
    "men", "patients", "outcomes", "effects", "mindfulness", "yoga", "nutrition", "obesity",
    "diabetes", "cancer", "stroke", "heart", "lung", "kidney", "liver", "brain",
    "pain", "fatigue", "smoking", "alcohol", "vaccine", "infection", "immunity", "genetics",
    "screening", "imaging", "surgery", "rehabilitation", "nursing", "primary", "care", "policy",
    "cost", "quality", "access", "rural", "urban", "school", "workplace", "community",
    "digital", "mobile", "online", "training", "education", "support", "family", "peer",
];

/// Small deterministic generator so the tests need no extra crates
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

fn record(id: &str, title: &str, authors: &[&str], year: Option<i32>, doi: Option<&str>) -> StudyRecord {
    let mut record = StudyRecord::new(id.into(), title.into(), SourceTag::new(ReferenceFormat::Ris));
    record.authors = authors.iter().map(|a| a.to_string()).collect();
    record.year = year;
    record.doi = doi.map(str::to_string);
    record
}

/// Random eight-word titles with unrelated authors; no two should match
fn distinct_records(count: usize, seed: u64) -> Vec<StudyRecord> {
    let mut rng = Lcg(seed);
    (0..count)
        .map(|i| {
            let title: Vec<&str> = (0..8).map(|_| WORDS[rng.below(WORDS.len())]).collect();
            let author = format!("Author{}, {}", i, ["A", "B", "C", "D"][i % 4]);
            let year = 1990 + rng.below(35) as i32;
            record(&format!("r{}", i), &title.join(" "), &[author.as_str()], Some(year), None)
        })
        .collect()
}

fn group_sets(records: Vec<StudyRecord>) -> BTreeSet<BTreeSet<String>> {
    deduplicate(records, &DedupConfig::default())
        .groups
        .into_iter()
        .map(|g| g.member_ids.into_iter().collect())
        .collect()
}

#[test]
fn ris_export_parses_back() {
    let first = parse_text(ReferenceFormat::Ris, RIS, &ParseOptions::new("scopus.ris")).unwrap();
    assert_eq!(first.records.len(), 2);

    let exported = write_ris(&first.records);
    let second = parse_text(ReferenceFormat::Ris, &exported, &ParseOptions::new("export.ris")).unwrap();

    assert_eq!(second.records.len(), 2);
    for (a, b) in first.records.iter().zip(&second.records) {
        assert_eq!(a.title, b.title);
        assert_eq!(a.authors, b.authors);
        assert_eq!(a.year, b.year);
        assert_eq!(a.doi, b.doi);
        assert_eq!(a.r#abstract, b.r#abstract);
    }
    assert_eq!(second.records[0].doi.as_deref(), Some("10.1000/mbsr.2020"));
}

#[test]
fn normalized_titles_are_stable() {
    for title in [
        "The Effects of X on Y: A Trial",
        "  A  meta-analysis  of (RCTs)  ",
        "Über-Studien: Ergebnisse!",
        "an",
        "",
    ] {
        let once = normalize_title(title);
        assert_eq!(normalize_title(&once), once, "title {:?}", title);
    }
}

#[test]
fn grouping_ignores_input_order() {
    let records = vec![
        record("a", "Exercise and depression in adolescents", &["Smith, J"], Some(2019), Some("10.1/ex")),
        record("b", "Exercise and depression in adolescents.", &["Smith, J"], Some(2019), None),
        record("c", "Exercise & depression in adolescents", &["J. Smith"], Some(2020), None),
        record("d", "Diet quality and cognition", &["Brown, A"], Some(2015), Some("10.1/diet")),
        record("e", "Something else entirely", &["Green, P"], Some(2001), Some("10.1/DIET")),
        record("f", "Sleep hygiene education", &["White, R"], Some(2011), None),
    ];
    let expected = group_sets(records.clone());
    assert!(!expected.is_empty());

    let mut rng = Lcg(42);
    for _ in 0..10 {
        let mut shuffled = records.clone();
        for i in (1..shuffled.len()).rev() {
            let j = rng.below(i + 1);
            shuffled.swap(i, j);
        }
        assert_eq!(group_sets(shuffled), expected);
    }
}

#[test]
fn identical_doi_groups_different_titles() {
    let outcome = deduplicate(
        vec![
            record("a", "Original title", &["Smith, J"], Some(2020), Some("10.5555/xyz")),
            record("b", "Completely different wording", &["Other, K"], Some(2012), Some("10.5555/XYZ")),
        ],
        &DedupConfig::default(),
    );

    assert_eq!(outcome.groups.len(), 1);
    assert_eq!(outcome.groups[0].len(), 2);
    assert_eq!(outcome.unique_count(), 1);
}

#[test]
fn csv_duplicates_collapse_on_export() {
    let csv = "Title,Abstract,DOI\n\
\"Mindfulness   for anxiety\",First copy,10.1/ABC\n\
\"mindfulness for ANXIETY\",Second copy,10.1/abc\n\
Yoga and sleep,Unrelated,\n";
    let batch = parse_text(ReferenceFormat::Csv, csv, &ParseOptions::new("export.csv")).unwrap();
    assert_eq!(batch.records.len(), 3);

    let outcome = deduplicate(batch.records, &DedupConfig::default());
    assert_eq!(outcome.groups.len(), 1);
    let group = &outcome.groups[0];
    assert_eq!(group.len(), 2);
    let canonical: Vec<_> = group.member_ids.iter().filter(|id| **id == group.canonical_id).collect();
    assert_eq!(canonical.len(), 1);

    let mut out = Vec::new();
    write_csv(outcome.unique(), &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let reparsed = parse_text(ReferenceFormat::Csv, &text, &ParseOptions::new("unique.csv")).unwrap();

    assert_eq!(reparsed.records.len(), 2);
    assert_eq!(group_sets(reparsed.records), BTreeSet::new());
}

#[test]
fn missing_end_tag_skips_only_that_record() {
    let ris = "\
TY  - JOUR
TI  - Kept first
ER  -
TY  - JOUR
TI  - Never closed
TY  - JOUR
TI  - Kept second
ER  -
";
    let batch = parse_text(ReferenceFormat::Ris, ris, &ParseOptions::new("broken.ris")).unwrap();

    assert_eq!(batch.skipped_count(), 1);
    let titles: Vec<_> = batch.records.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, ["Kept first", "Kept second"]);
}

#[test]
fn punctuation_and_case_variants_match_without_doi() {
    let outcome = deduplicate(
        vec![
            record("a", "Effects of X on Y: A Trial", &["Smith, John", "Doe, Jane"], Some(2021), None),
            record("b", "effects of x on y a trial", &["Smith, J.", "Doe, J."], Some(2021), None),
        ],
        &DedupConfig::default(),
    );

    assert_eq!(outcome.groups.len(), 1);
    assert!(outcome.group_for("a").unwrap().contains("b"));
}

#[test]
fn distinct_records_stay_separate() {
    let records = distinct_records(1000, 7);
    let outcome = deduplicate(records, &DedupConfig::default());

    assert!(outcome.groups.is_empty());
    assert_eq!(outcome.records.len(), 1000);
    assert_eq!(outcome.unique_count(), 1000);
}

#[test]
fn large_batches_still_find_near_duplicates() {
    let config = DedupConfig::default();
    let authors = ["Smith, John", "Doe, Jane"];
    let pair = [
        record("first", "Effects of mindfulness training on anxiety in adults", &authors, Some(2021), None),
        record("second", "Effect of mindfulness training on anxiety in adult", &authors, Some(2021), None),
    ];

    let small = deduplicate(pair.to_vec(), &config);
    assert_eq!(small.groups.len(), 1);

    let mut records = distinct_records(config.blocking_min_records + 100, 11);
    records.insert(40, pair[0].clone());
    records.push(pair[1].clone());
    let outcome = deduplicate(records, &config);

    assert_eq!(outcome.groups.len(), 1);
    assert!(outcome.group_for("first").unwrap().contains("second"));
    assert_eq!(outcome.unique_count(), config.blocking_min_records + 101);
}

#[test]
fn doi_copies_and_a_copy_without_doi_form_one_group() {
    let title = "Mindfulness training for anxiety in adults";
    let outcome = deduplicate(
        vec![
            record("pubmed", title, &["Smith, J"], Some(2020), Some("10.1/m")),
            record("scopus", title, &["Smith, J"], Some(2020), Some("10.1/M")),
            record("embase", title, &["Smith, J"], Some(2020), None),
        ],
        &DedupConfig::default(),
    );

    assert_eq!(outcome.groups.len(), 1);
    assert_eq!(outcome.groups[0].len(), 3);
    assert_eq!(outcome.unique_count(), 1);
}
