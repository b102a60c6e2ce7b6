//! Screening and feedback review commands
//!
//! These wire the project database to the screening services: load the studies
//! and criteria, run the LLM calls, then store decisions and audit entries.

use anyhow::{bail, Context, Result};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use super::projects::open_project;
use crate::adapters::llm::{build_client, LlmClient};
use crate::adapters::pdf::extract_pdf_file;
use crate::models::{OperationType, Project, ScreeningDecision, ScreeningPhase, Settings};
use crate::services::cost_tracker::{CostEstimate, CostTracker};
use crate::services::feedback::FeedbackReviewer;
use crate::services::screening::{ScreeningCache, Screener, StopReason};
use crate::storage::{AuditRepo, Database, DecisionRepo, StudyRepo};
use crate::utils::http::RetryConfig;
use crate::utils::keychain::lookup_api_key;

#[derive(Debug, Clone, Default)]
pub struct ScreenOptions {
    pub limit: Option<usize>,
    /// Overrides the project's budget for this run
    pub budget: Option<f64>,
    /// Only print the cost estimate
    pub estimate_only: bool,
}

#[derive(Debug, Clone)]
pub struct ScreenResult {
    pub estimate: CostEstimate,
    pub screened: usize,
    pub included: usize,
    pub excluded: usize,
    pub uncertain: usize,
    pub stopped: Option<StopReason>,
    pub spent: f64,
}

/// Client for the configured provider, with the project's model
pub fn client_for(project: &Project, settings: &Settings) -> Result<Arc<dyn LlmClient>> {
    let mut llm = settings.llm.clone();
    if settings.llm.model.is_none() && project.provider == settings.llm.provider {
        llm.model = Some(project.model.clone());
    }
    let api_key = lookup_api_key(llm.provider, |var| std::env::var(var).ok()).map(|key| {
        debug!("Using {} key from {:?}", llm.provider, key.source);
        key.value
    });
    let client = build_client(&llm, api_key, RetryConfig::from(&settings.retry))
        .with_context(|| format!("Cannot create {} client", llm.provider))?;
    Ok(client)
}

/// Cost tracker resumed from the project's audit log
pub(crate) fn tracker_for(db: &Database, project: &Project, budget: Option<f64>) -> Result<CostTracker> {
    let entries = AuditRepo::new(&db.conn).cost_entries(&project.id)?;
    Ok(CostTracker::new(budget.or(project.budget_limit)).with_entries(entries))
}

/// Title/abstract screening of every unique study not yet screened
///
/// `cancel` is checked between studies.
pub async fn run_screen(
    project_dir: &Path,
    options: &ScreenOptions,
    settings: &Settings,
    client: Option<Arc<dyn LlmClient>>,
    cancel: &AtomicBool,
) -> Result<ScreenResult> {
    let (db, project) = open_project(project_dir)?;
    let client = match client {
        Some(client) => client,
        None => client_for(&project, settings)?,
    };

    let mut pending = StudyRepo::new(&db.conn).list_unscreened(&project.id, ScreeningPhase::TitleAbstract)?;
    if let Some(limit) = options.limit {
        pending.truncate(limit);
    }

    let mut tracker = tracker_for(&db, &project, options.budget)?;
    let estimate = tracker.estimate(client.as_ref(), OperationType::TitleAbstractScreening, pending.len());
    info!(
        "Screening {} studies with {} (estimated ${:.4})",
        pending.len(),
        estimate.model,
        estimate.estimated_cost
    );

    if options.estimate_only || pending.is_empty() {
        return Ok(ScreenResult {
            estimate,
            screened: 0,
            included: 0,
            excluded: 0,
            uncertain: 0,
            stopped: None,
            spent: 0.0,
        });
    }

    let spent_before = tracker.total_cost();
    let screener = Screener::new(client, project.criteria.clone(), project.research_question.clone())
        .with_settings(settings.screening.clone())
        .with_temperature(settings.llm.temperature)
        .with_project(project.id.clone());
    let mut cache = ScreeningCache::new();

    let outcome = screener
        .screen_batch(&pending, &mut cache, &mut tracker, |progress| {
            if cancel.load(Ordering::Relaxed) {
                return ControlFlow::Break(());
            }
            info!("[{}/{}] {}", progress.index + 1, progress.total, progress.study.title);
            ControlFlow::Continue(())
        })
        .await;

    DecisionRepo::new(&db.conn).insert_all(&outcome.decisions)?;
    AuditRepo::new(&db.conn).insert_all(&outcome.audits)?;

    let (included, excluded, uncertain) = tally(&outcome.decisions);
    Ok(ScreenResult {
        estimate,
        screened: outcome.decisions.len(),
        included,
        excluded,
        uncertain,
        stopped: outcome.stopped,
        spent: tracker.total_cost() - spent_before,
    })
}

fn tally(decisions: &[ScreeningDecision]) -> (usize, usize, usize) {
    use crate::models::Verdict;
    decisions.iter().fold((0, 0, 0), |(i, e, u), d| match d.verdict {
        Verdict::Include => (i + 1, e, u),
        Verdict::Exclude => (i, e + 1, u),
        Verdict::Uncertain => (i, e, u + 1),
    })
}

#[derive(Debug, Clone)]
pub struct ReviewResult {
    pub candidates: usize,
    pub reconsidered: usize,
    pub maintained: usize,
    pub budget_exhausted: bool,
}

/// Second look at current exclusions below `threshold`
pub async fn run_review(
    project_dir: &Path,
    threshold: Option<f64>,
    settings: &Settings,
    client: Option<Arc<dyn LlmClient>>,
) -> Result<ReviewResult> {
    let (db, project) = open_project(project_dir)?;
    let client = match client {
        Some(client) => client,
        None => client_for(&project, settings)?,
    };
    let threshold = threshold.unwrap_or(settings.screening.feedback_threshold);

    let decisions = DecisionRepo::new(&db.conn).current(&project.id, None)?;
    let studies = StudyRepo::new(&db.conn).list(&project.id)?;
    let candidates = decisions
        .iter()
        .filter(|d| d.is_low_confidence_exclusion(threshold))
        .count();

    let mut tracker = tracker_for(&db, &project, None)?;
    let reviewer = FeedbackReviewer::new(client, project.criteria.clone(), project.research_question.clone())
        .with_temperature(settings.llm.temperature)
        .with_project(project.id.clone());
    let outcome = reviewer
        .review_batch(&decisions, &studies, threshold, &mut tracker)
        .await;

    DecisionRepo::new(&db.conn).insert_all(outcome.decisions())?;
    AuditRepo::new(&db.conn).insert_all(outcome.audits())?;

    Ok(ReviewResult {
        candidates,
        reconsidered: outcome.reconsidered,
        maintained: outcome.maintained,
        budget_exhausted: outcome.budget_exhausted,
    })
}

/// Full-text screening of one study from its PDF
pub async fn run_fulltext(
    project_dir: &Path,
    study_id: &str,
    pdf_path: &Path,
    settings: &Settings,
    client: Option<Arc<dyn LlmClient>>,
) -> Result<ScreeningDecision> {
    let (db, project) = open_project(project_dir)?;
    let Some(study) = StudyRepo::new(&db.conn).get(study_id)? else {
        bail!("No study {} in project {}", study_id, project.name);
    };

    let pdf = extract_pdf_file(pdf_path)
        .with_context(|| format!("Failed to read full text from {}", pdf_path.display()))?;
    if pdf.needs_ocr {
        bail!(
            "{} yielded only {} words; run OCR on it before full-text screening",
            pdf_path.display(),
            pdf.word_count
        );
    }

    let client = match client {
        Some(client) => client,
        None => client_for(&project, settings)?,
    };
    let mut tracker = tracker_for(&db, &project, None)?;
    let screener = Screener::new(client, project.criteria.clone(), project.research_question.clone())
        .with_settings(settings.screening.clone())
        .with_temperature(settings.llm.temperature)
        .with_project(project.id.clone());

    let screened = screener.screen_fulltext(&study, &pdf.text, &mut tracker).await?;
    DecisionRepo::new(&db.conn).insert(&screened.decision)?;
    if let Some(audit) = &screened.audit {
        AuditRepo::new(&db.conn).insert(audit)?;
    }
    Ok(screened.decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::import::{run_import, ImportOptions};
    use crate::commands::projects::{init_project, InitOptions};
    use crate::models::Verdict;
    use crate::services::screening::tests::ScriptedClient;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    const RIS: &str = "TY  - JOUR\nTI  - Mindfulness for anxiety in adults\nAB  - A randomised trial.\nER  - \n\
TY  - JOUR\nTI  - Sleep hygiene in toddlers\nAB  - A cohort.\nER  - \n";

    fn project_with_studies(budget: Option<f64>) -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let project_dir = dir.path().join("review");
        init_project(
            InitOptions {
                project_dir: &project_dir,
                name: "Test".into(),
                research_question: "Does mindfulness help adults?".into(),
                criteria_path: None,
                budget_limit: budget,
            },
            &Settings::default(),
        )
        .unwrap();

        let ris = dir.path().join("search.ris");
        fs::write(&ris, RIS).unwrap();
        run_import(
            &ImportOptions {
                files: vec![ris],
                project_dir: Some(project_dir.clone()),
                ..Default::default()
            },
            &Settings::default(),
        )
        .unwrap();
        (dir, project_dir)
    }

    const INCLUDE: &str = r#"{"decision":"included","reason":"Adults, RCT","reason_category":"meets_criteria","confidence":0.9}"#;
    const EXCLUDE: &str = r#"{"decision":"excluded","reason":"Toddlers","reason_category":"wrong_population","confidence":0.6}"#;

    #[tokio::test]
    async fn test_screen_then_review() {
        let (_dir, project_dir) = project_with_studies(None);
        let settings = Settings::default();
        let client = ScriptedClient::new(vec![Ok(INCLUDE.into()), Ok(EXCLUDE.into())]);

        let result = run_screen(
            &project_dir,
            &ScreenOptions::default(),
            &settings,
            Some(client.clone() as Arc<dyn LlmClient>),
            &AtomicBool::new(false),
        )
        .await
        .unwrap();
        assert_eq!(result.screened, 2);
        assert_eq!((result.included, result.excluded, result.uncertain), (1, 1, 0));
        assert!(result.stopped.is_none());

        // Nothing left to screen on a second run
        let again = run_screen(
            &project_dir,
            &ScreenOptions::default(),
            &settings,
            Some(client.clone() as Arc<dyn LlmClient>),
            &AtomicBool::new(false),
        )
        .await
        .unwrap();
        assert_eq!(again.screened, 0);
        assert_eq!(client.calls(), 2);

        let review_client = ScriptedClient::new(vec![Ok(
            r#"{"reconsider": true, "rationale": "Parents may be adults", "new_confidence": 0.5}"#.into(),
        )]);
        let review = run_review(&project_dir, None, &settings, Some(review_client as Arc<dyn LlmClient>)).await.unwrap();
        assert_eq!(review.candidates, 1);
        assert_eq!(review.reconsidered, 1);

        let (db, project) = open_project(&project_dir).unwrap();
        let decisions = DecisionRepo::new(&db.conn);
        let current = decisions.current(&project.id, None).unwrap();
        assert_eq!(current.len(), 2);
        assert!(current.iter().any(|d| d.verdict == Verdict::Uncertain && d.supersedes.is_some()));
        assert_eq!(decisions.all(&project.id).unwrap().len(), 3);
        assert_eq!(AuditRepo::new(&db.conn).list(&project.id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_estimate_only_and_cancel() {
        let (_dir, project_dir) = project_with_studies(None);
        let client = ScriptedClient::new(vec![Ok(INCLUDE.into())]);

        let estimate = run_screen(
            &project_dir,
            &ScreenOptions {
                estimate_only: true,
                ..Default::default()
            },
            &Settings::default(),
            Some(client.clone() as Arc<dyn LlmClient>),
            &AtomicBool::new(false),
        )
        .await
        .unwrap();
        assert_eq!(estimate.estimate.items, 2);
        assert_eq!(estimate.screened, 0);

        let cancelled = run_screen(
            &project_dir,
            &ScreenOptions::default(),
            &Settings::default(),
            Some(client.clone() as Arc<dyn LlmClient>),
            &AtomicBool::new(true),
        )
        .await
        .unwrap();
        assert_eq!(cancelled.screened, 0);
        assert_eq!(cancelled.stopped, Some(StopReason::Cancelled));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_budget_from_project() {
        let (_dir, project_dir) = project_with_studies(Some(0.005));
        let client = ScriptedClient::new(vec![Ok(INCLUDE.into()), Ok(INCLUDE.into())]);

        let result = run_screen(
            &project_dir,
            &ScreenOptions::default(),
            &Settings::default(),
            Some(client as Arc<dyn LlmClient>),
            &AtomicBool::new(false),
        )
        .await
        .unwrap();
        assert_eq!(result.screened, 1);
        assert_eq!(result.stopped, Some(StopReason::Budget));
        assert!((result.spent - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fulltext_rejects_non_pdf() {
        let (dir, project_dir) = project_with_studies(None);
        let (db, project) = open_project(&project_dir).unwrap();
        let study = StudyRepo::new(&db.conn).list(&project.id).unwrap().remove(0);
        let fake = dir.path().join("paper.pdf");
        fs::write(&fake, "<html>paywall</html>").unwrap();

        let err = run_fulltext(&project_dir, &study.id, &fake, &Settings::default(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("paper.pdf"));
        assert_eq!(
            DecisionRepo::new(&db.conn).history(&study.id).unwrap().len(),
            0
        );
    }
}
