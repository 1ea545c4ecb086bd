#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # nbgrade
//!
//! Command-line front end for the notebook grading pipeline: validates
//! rubrics, inspects notebooks, and grades submissions, persisting one
//! append-only result record per run.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bpaf::*;
use colored::Colorize;
use dotenvy::dotenv;
use nbgrade::{
    NotebookGrader,
    config::{GraderConfig, OpenAiEnv},
    execute::CommandSandbox,
    llm::OpenAiModel,
    notebook::Notebook,
    report::GradingResult,
    rubric::Rubric,
    store::ResultStore,
};
use tracing::{Level, metadata::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Grade a notebook submission.
    Grade {
        /// Path to the rubric JSON.
        rubric:    PathBuf,
        /// Path to the reference solution notebook.
        reference: Option<PathBuf>,
        /// Directory of assignment data files.
        data:      Option<PathBuf>,
        /// Directory grading records are written to.
        results:   PathBuf,
        /// Path to the student notebook.
        notebook:  PathBuf,
    },
    /// Validate a rubric file without grading anything.
    CheckRubric(PathBuf),
    /// Print the parsed structure of a notebook as JSON.
    Info(PathBuf),
}

/// Parse the command line arguments and return a `Cmd` enum.
fn options() -> Cmd {
    /// Parses a notebook path positional.
    fn nb() -> impl Parser<PathBuf> {
        positional("NOTEBOOK").help("Path to a notebook file")
    }

    /// Parses a rubric path positional.
    fn rb() -> impl Parser<PathBuf> {
        positional("RUBRIC").help("Path to a rubric JSON file")
    }

    let grade = {
        let rubric = long("rubric")
            .help("Path to the rubric JSON")
            .argument::<PathBuf>("PATH");
        let reference = long("reference")
            .help("Path to the reference solution notebook")
            .argument::<PathBuf>("PATH")
            .optional();
        let data = long("data")
            .help("Directory of assignment data files")
            .argument::<PathBuf>("DIR")
            .optional();
        let results = long("results")
            .help("Directory grading records are written to")
            .argument::<PathBuf>("DIR")
            .fallback(PathBuf::from("results"));
        let notebook = nb();
        construct!(Cmd::Grade {
            rubric,
            reference,
            data,
            results,
            notebook
        })
        .to_options()
        .command("grade")
        .help("Grade a notebook submission")
    };

    let check_rubric = construct!(Cmd::CheckRubric(rb()))
        .to_options()
        .command("check-rubric")
        .help("Validate a rubric's invariants without grading");

    let info = construct!(Cmd::Info(nb()))
        .to_options()
        .command("info")
        .help("Print a JSON description of the notebook as parsed");

    construct!([grade, check_rubric, info])
        .to_options()
        .descr("Autograder for data-analysis notebooks")
        .run()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false);
    let filter_layer = LevelFilter::from_level(Level::INFO);
    tracing_subscriber::registry()
        .with(fmt)
        .with(filter_layer)
        .init();

    match options() {
        Cmd::Grade {
            rubric,
            reference,
            data,
            results,
            notebook,
        } => {
            grade(rubric, reference, data, results, notebook).await?;
        }
        Cmd::CheckRubric(path) => {
            let rubric = Rubric::load(&path)
                .with_context(|| format!("rubric {} failed validation", path.display()))?;
            println!(
                "{} `{}`: {} section(s), {} point(s)",
                "OK".green(),
                rubric.assignment,
                rubric.sections.len(),
                rubric.total_points
            );
        }
        Cmd::Info(path) => {
            let notebook = Notebook::from_path(&path)
                .with_context(|| format!("could not parse {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&notebook.extract())?);
        }
    }

    Ok(())
}

/// Grades one submission and persists the result record.
async fn grade(
    rubric_path: PathBuf,
    reference: Option<PathBuf>,
    data: Option<PathBuf>,
    results: PathBuf,
    notebook_path: PathBuf,
) -> Result<()> {
    // A broken rubric is a configuration error: it stops the batch before
    // any submission is scored.
    let rubric = Rubric::load(&rubric_path)
        .with_context(|| format!("rubric {} failed validation", rubric_path.display()))?;

    let store = ResultStore::new(results);

    // An unparseable notebook is fatal for this one submission: it becomes
    // an ungraded zero-score record with the reason attached.
    let notebook = match Notebook::from_path(&notebook_path) {
        Ok(nb) => nb,
        Err(e) => {
            let result =
                GradingResult::ungraded(&rubric.assignment, rubric.total_points, &e.to_string());
            let path = store.save(&result)?;
            eprintln!("{}", result.summary_table());
            eprintln!("{} {}", "ungraded:".red(), e);
            eprintln!("record written to {}", path.display());
            return Ok(());
        }
    };

    let reference = match &reference {
        Some(path) => Some(
            Notebook::from_path(path)
                .with_context(|| format!("could not parse reference {}", path.display()))?,
        ),
        None => None,
    };

    let config = GraderConfig::default();
    let sandbox = CommandSandbox::new();
    let model = OpenAiEnv::from_env().map(|env| OpenAiModel::from_env(&env));
    if model.is_none() {
        tracing::warn!(
            "OPENAI_ENDPOINT/OPENAI_API_KEY/OPENAI_MODEL not set; feedback will be unavailable"
        );
    }

    let result = NotebookGrader::builder()
        .notebook(&notebook)
        .rubric(&rubric)
        .maybe_reference(reference.as_ref())
        .maybe_data_dir(data.as_deref())
        .config(&config)
        .sandbox(&sandbox)
        .maybe_model(model.as_ref())
        .build()
        .run()
        .await?;

    let path = store.save(&result)?;

    eprintln!("{}", result.summary_table());

    for cap in &result.caps {
        eprintln!("{} capped at {:.0}%: {}", "!".yellow(), cap.ceiling, cap.reason);
    }
    for fix in &result.preprocessing.fixes {
        eprintln!("{} -{} {}", "~".yellow(), fix.penalty, fix.description);
    }
    if !result.discrepancies.is_empty() {
        eprintln!("\nOutput discrepancies:");
        for discrepancy in &result.discrepancies {
            eprintln!("{}", discrepancy.render());
        }
    }

    if !result.technical_findings.is_empty() || !result.technical_summary.is_empty() {
        eprintln!("\nTechnical feedback:");
        for finding in &result.technical_findings {
            eprintln!("- {finding}");
        }
        if !result.technical_summary.is_empty() {
            eprintln!("{}", result.technical_summary);
        }
    } else if let Some(reason) = &result.feedback.technical_reason {
        eprintln!("\nTechnical feedback unavailable: {reason}");
    }

    if !result.narrative_sections.is_empty() {
        eprintln!("\nNarrative feedback:");
        for section in &result.narrative_sections {
            eprintln!("## {}\n{}", section.heading, section.comments);
        }
    } else if let Some(reason) = &result.feedback.narrative_reason {
        eprintln!("Narrative feedback unavailable: {reason}");
    }

    eprintln!("\nrecord written to {}", path.display());
    Ok(())
}
