//! sysrev - systematic review screening from the command line
//!
//! Usage:
//!   sysrev init --project DIR --name N --question Q [--criteria FILE | --generate]
//!   sysrev criteria --project DIR [--feedback TEXT]
//!   sysrev import FILES... [--project DIR] [--report FILE]
//!   sysrev export --project DIR --out FILE [--ris]
//!   sysrev screen --project DIR [--limit N]
//!   sysrev review --project DIR [--threshold X]
//!   sysrev fulltext --project DIR --study ID --pdf FILE
//!   sysrev extract --project DIR --fields FILE --study ID --text FILE
//!   sysrev extract --project DIR --fields FILE --out FILE

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

use sysrev::commands::criteria::{init_with_generated_criteria, refine_criteria};
use sysrev::commands::extraction::{export_extractions, run_extract};
use sysrev::commands::import::{run_export, run_import, ExportFormat, ImportOptions};
use sysrev::commands::projects::{init_project, open_project, resolve_project_dir, InitOptions};
use sysrev::commands::screening::{run_fulltext, run_review, run_screen, ScreenOptions};
use sysrev::commands::settings::{load_settings, save_settings, settings_dir};
use sysrev::models::{LlmProvider, ReferenceFormat, Settings};
use sysrev::services::screening::StopReason;
use sysrev::utils::keychain::{delete_api_key, store_api_key};
use sysrev::utils::logging::init_logging;

#[derive(Parser)]
#[command(name = "sysrev", version, about = "Reference import, deduplication and LLM screening")]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a review project
    Init {
        #[arg(long)]
        project: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        question: String,
        /// JSON file with inclusion and exclusion criteria
        #[arg(long, conflicts_with = "generate")]
        criteria: Option<PathBuf>,
        /// Draft the criteria from the research question with the LLM
        #[arg(long)]
        generate: bool,
        /// Spending limit in USD
        #[arg(long)]
        budget: Option<f64>,
    },
    /// Print the project's criteria, or revise them from feedback
    Criteria {
        #[arg(long)]
        project: PathBuf,
        /// What to change, in plain words
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Parse and deduplicate reference exports
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// csv, ris, nbib or bibtex; guessed per file when omitted
        #[arg(long)]
        format: Option<ReferenceFormat>,
        /// Database label for records that do not name one
        #[arg(long)]
        source: Option<String>,
        /// Store the records in this project
        #[arg(long)]
        project: Option<PathBuf>,
        /// Write the duplicate report as CSV
        #[arg(long)]
        report: Option<PathBuf>,
        /// Fuzzy match threshold between 0 and 1
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Write the project's unique studies as CSV or RIS
    Export {
        #[arg(long)]
        project: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        ris: bool,
    },
    /// Title/abstract screening of unscreened studies
    Screen {
        #[arg(long)]
        project: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
        /// Spending limit in USD for this run
        #[arg(long)]
        budget: Option<f64>,
        /// Print the cost estimate and stop
        #[arg(long)]
        estimate: bool,
    },
    /// Re-review low-confidence exclusions
    Review {
        #[arg(long)]
        project: PathBuf,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Full-text screening of one study
    Fulltext {
        #[arg(long)]
        project: PathBuf,
        #[arg(long)]
        study: String,
        #[arg(long)]
        pdf: PathBuf,
    },
    /// Extract data fields from one study's full text, or export all extractions
    Extract {
        #[arg(long)]
        project: PathBuf,
        /// JSON array of fields to extract
        #[arg(long)]
        fields: PathBuf,
        #[arg(long, required_unless_present = "out", requires = "text")]
        study: Option<String>,
        /// PDF or plain-text full text
        #[arg(long, requires = "study")]
        text: Option<PathBuf>,
        /// Write the latest extractions as CSV instead
        #[arg(long, conflicts_with = "study")]
        out: Option<PathBuf>,
    },
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings
    Show,
    /// Write the default settings file
    Reset,
    /// Store an API key in the macOS Keychain
    SetKey { provider: LlmProvider, key: String },
    /// Remove a stored API key
    DeleteKey { provider: LlmProvider },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings().context("Failed to load settings")?;

    let log_dir = if settings.log_to_file {
        Some(settings_dir()?.join("logs"))
    } else {
        None
    };
    let _guard = init_logging(cli.verbose, log_dir.as_deref()).context("Failed to initialise logging")?;

    let project_dir = |dir: PathBuf| resolve_project_dir(&dir, &settings);

    match cli.command {
        Commands::Init {
            project,
            name,
            question,
            criteria,
            generate,
            budget,
        } => {
            let project = project_dir(project);
            let options = InitOptions {
                project_dir: &project,
                name,
                research_question: question,
                criteria_path: criteria.as_deref(),
                budget_limit: budget,
            };
            let created = if generate {
                init_with_generated_criteria(options, &settings, None).await?
            } else {
                init_project(options, &settings)?
            };
            println!("Created project {} ({}) in {}", created.name, created.id, project.display());
            if generate {
                println!("{}", serde_json::to_string_pretty(&created.criteria)?);
            }
        }
        Commands::Criteria { project, feedback } => {
            let project = project_dir(project);
            let criteria = match feedback {
                Some(feedback) => refine_criteria(&project, &feedback, &settings, None).await?,
                None => open_project(&project)?.1.criteria,
            };
            println!("{}", serde_json::to_string_pretty(&criteria)?);
        }
        Commands::Import {
            files,
            format,
            source,
            project,
            report,
            threshold,
        } => {
            let options = ImportOptions {
                files,
                format,
                database: source,
                project_dir: project.map(project_dir),
                report_path: report,
                threshold,
            };
            let result = run_import(&options, &settings)?;
            let summary = &result.summary;

            for file in &summary.files {
                println!(
                    "{}: {} records ({} skipped, {} already imported) as {}",
                    file.label, file.records, file.skipped, file.already_imported, file.format
                );
                for warning in &file.warnings {
                    println!("  warning: {}", warning);
                }
            }
            for failed in &summary.failed {
                println!("{}: failed: {}", failed.label, failed.error);
            }
            println!("{}", summary.report.summary());
            if let Some(added) = result.new_studies {
                println!("{} new studies stored", added);
            }
        }
        Commands::Export { project, out, ris } => {
            let project = project_dir(project);
            let format = if ris { ExportFormat::Ris } else { ExportFormat::for_path(&out) };
            let count = run_export(&project, &out, format)?;
            println!("Exported {} studies to {}", count, out.display());
        }
        Commands::Screen {
            project,
            limit,
            budget,
            estimate,
        } => {
            let project = project_dir(project);
            let cancel = Arc::new(AtomicBool::new(false));
            let flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted; stopping after the current study");
                    flag.store(true, Ordering::Relaxed);
                }
            });

            let options = ScreenOptions {
                limit,
                budget,
                estimate_only: estimate,
            };
            let result = run_screen(&project, &options, &settings, None, &cancel).await?;

            println!(
                "Estimate: {} studies, ${:.4} with {}",
                result.estimate.items, result.estimate.estimated_cost, result.estimate.model
            );
            if !estimate {
                println!(
                    "Screened {}: {} included, {} excluded, {} uncertain (${:.4})",
                    result.screened, result.included, result.excluded, result.uncertain, result.spent
                );
                match result.stopped {
                    Some(StopReason::Budget) => println!("Stopped: budget reached"),
                    Some(StopReason::Cancelled) => println!("Stopped: interrupted"),
                    None => {}
                }
            }
        }
        Commands::Review { project, threshold } => {
            let project = project_dir(project);
            let result = run_review(&project, threshold, &settings, None).await?;
            println!(
                "Reviewed {} exclusions: {} reconsidered, {} maintained",
                result.candidates, result.reconsidered, result.maintained
            );
            if result.budget_exhausted {
                println!("Stopped: budget reached");
            }
        }
        Commands::Fulltext { project, study, pdf } => {
            let project = project_dir(project);
            let decision = run_fulltext(&project, &study, &pdf, &settings, None).await?;
            println!(
                "{}: {} ({}, confidence {:.2})\n{}",
                study,
                decision.verdict.as_str(),
                decision.category.as_str(),
                decision.confidence,
                decision.rationale
            );
        }
        Commands::Extract {
            project,
            fields,
            study,
            text,
            out,
        } => {
            let project = project_dir(project);
            match (study, text, out) {
                (Some(study), Some(text), _) => {
                    let extraction = run_extract(&project, &fields, &study, &text, &settings, None).await?;
                    for value in &extraction.values {
                        println!("{}: {}", value.field_name, value.display());
                    }
                    println!("Completeness {:.0}%", extraction.completeness * 100.0);
                }
                (_, _, Some(out)) => {
                    let count = export_extractions(&project, &fields, &out)?;
                    println!("Exported {} extractions to {}", count, out.display());
                }
                _ => anyhow::bail!("Give --study with --text, or --out"),
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => println!("{}", serde_json::to_string_pretty(&settings)?),
            ConfigAction::Reset => {
                let path = save_settings(&Settings::default())?;
                println!("Wrote defaults to {}", path.display());
            }
            ConfigAction::SetKey { provider, key } => {
                store_api_key(provider, &key)?;
                println!("Stored {} key", provider);
            }
            ConfigAction::DeleteKey { provider } => {
                delete_api_key(provider)?;
                println!("Removed {} key", provider);
            }
        },
    }

    Ok(())
}
