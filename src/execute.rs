#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Execution gate.
//!
//! Decides whether a notebook already carries trustworthy outputs and, when
//! it does not, re-executes it inside an isolated working directory with the
//! assignment's data files injected and a hard wall-clock timeout. Execution
//! failure is never fatal to grading: on timeout, crash, or parse failure the
//! gate falls back to the original document and records what happened.

use std::{
    ffi::OsString,
    future::Future,
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};

use anyhow::{Context, Result, anyhow, ensure};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::{
    notebook::{Cell, CellKind, Notebook},
    process,
};

/// Fraction of code cells that must carry outputs for the document to be
/// trusted without re-execution.
const TRUSTED_OUTPUT_RATIO: f64 = 0.5;

/// Data-file extensions injected into the isolated working directory.
const DATA_EXTENSIONS: &[&str] = &["csv", "tsv", "txt", "json", "xlsx", "rds"];

/// Provenance record of the gate's decision and outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Whether re-execution was needed under the trust rule.
    pub was_needed: bool,
    /// Whether re-execution was actually attempted.
    pub attempted:  bool,
    /// Whether re-execution produced a usable document.
    pub succeeded:  bool,
    /// Error message when an attempt failed and the gate fell back.
    pub error:      Option<String>,
}

/// Capability contract for running a notebook document.
///
/// The sandbox is opaque to the gate: given a document and a working
/// directory it returns the document with updated outputs or an error,
/// observing the hard deadline.
pub trait ExecutionSandbox {
    /// Runs the document in `workdir` and returns it with fresh outputs.
    fn execute(
        &self,
        notebook: &Notebook,
        workdir: &Path,
        deadline: Duration,
    ) -> impl Future<Output = Result<Notebook>> + Send;
}

/// Matches a quoted absolute or home-relative path; the trailing segment is
/// the bare filename the path is rewritten to.
static QUOTED_PATH_DOUBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:~|/|[A-Za-z]:)[^"\n]*/([^/"\n]+)""#).expect("path pattern is valid")
});

/// Single-quoted variant of [`QUOTED_PATH_DOUBLE`].
static QUOTED_PATH_SINGLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'(?:~|/|[A-Za-z]:)[^'\n]*/([^/'\n]+)'").expect("path pattern is valid")
});

/// Matches student-authored working-directory changes at statement start.
static WORKDIR_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(\s*)(setwd\s*\([^)\n]*\)|os\.chdir\s*\([^)\n]*\))")
        .expect("workdir pattern is valid")
});

/// Rewrites absolute and home-relative file paths referenced in code to bare
/// filenames, so reads resolve inside the isolated working directory.
///
/// Pattern substitution, not AST rewriting; data loads are syntactically
/// stereotyped enough for this to be reliable.
pub fn rewrite_data_paths(code: &str) -> String {
    let pass = QUOTED_PATH_DOUBLE.replace_all(code, "\"$1\"");
    QUOTED_PATH_SINGLE.replace_all(&pass, "'$1'").into_owned()
}

/// Comments out working-directory changes so student code cannot escape the
/// isolated directory.
pub fn disable_workdir_calls(code: &str) -> String {
    WORKDIR_CALL.replace_all(code, "$1# $2").into_owned()
}

/// The execution gate itself, generic over the sandbox capability.
pub struct ExecutionGate<'a, S> {
    /// Sandbox used to run documents.
    sandbox: &'a S,
    /// Hard wall-clock timeout for one execution.
    timeout: Duration,
}

impl<'a, S: ExecutionSandbox> ExecutionGate<'a, S> {
    /// Creates a gate around the given sandbox and timeout.
    pub fn new(sandbox: &'a S, timeout: Duration) -> Self {
        Self { sandbox, timeout }
    }

    /// Decides whether to execute, runs the sandbox when needed, and returns
    /// the document to grade plus the provenance report.
    ///
    /// The isolated working directory is removed on every exit path, success
    /// or failure, when the `TempDir` guard drops.
    pub async fn process(
        &self,
        notebook: &Notebook,
        data_dir: Option<&Path>,
    ) -> (Notebook, ExecutionReport) {
        if !execution_needed(notebook) {
            return (notebook.clone(), ExecutionReport::default());
        }

        let mut report = ExecutionReport {
            was_needed: true,
            ..ExecutionReport::default()
        };

        let prepared = match self.prepare(notebook, data_dir) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "could not prepare isolated working directory");
                report.error = Some(e.to_string());
                return (notebook.clone(), report);
            }
        };

        report.attempted = true;
        tracing::info!(workdir = %prepared.workdir.path().display(), "executing notebook");

        match self
            .sandbox
            .execute(&prepared.notebook, prepared.workdir.path(), self.timeout)
            .await
        {
            Ok(executed) => {
                report.succeeded = true;
                (executed, report)
            }
            Err(e) => {
                tracing::warn!(error = %e, "execution failed, grading pre-existing outputs");
                report.error = Some(e.to_string());
                (notebook.clone(), report)
            }
        }
    }

    /// Builds the isolated working directory and the derived document with
    /// rewritten paths and disabled working-directory calls.
    fn prepare(&self, notebook: &Notebook, data_dir: Option<&Path>) -> Result<Prepared> {
        let workdir = TempDir::new().context("failed to create isolated working directory")?;

        if let Some(dir) = data_dir {
            copy_data_files(dir, workdir.path())?;
        }

        let cells = notebook
            .cells()
            .iter()
            .map(|cell| match cell.kind {
                CellKind::Code => Cell {
                    source: disable_workdir_calls(&rewrite_data_paths(&cell.source)),
                    ..cell.clone()
                },
                CellKind::Narrative => cell.clone(),
            })
            .collect();

        Ok(Prepared {
            notebook: Notebook::from_cells(cells),
            workdir,
        })
    }
}

/// Returns true when fewer than half of the code cells carry outputs, the
/// threshold below which pre-existing outputs are not trusted.
pub fn execution_needed(notebook: &Notebook) -> bool {
    let code_cells: Vec<_> = notebook
        .cells()
        .iter()
        .filter(|c| c.kind == CellKind::Code)
        .collect();
    if code_cells.is_empty() {
        return false;
    }
    let with_output = code_cells.iter().filter(|c| !c.outputs.is_empty()).count();
    (with_output as f64 / code_cells.len() as f64) < TRUSTED_OUTPUT_RATIO
}

/// A derived document and the scratch directory it will run in.
struct Prepared {
    /// Document with rewritten paths.
    notebook: Notebook,
    /// Exclusive scratch directory, removed on drop.
    workdir:  TempDir,
}

/// Copies every recognised data file beneath `from` into `to`, flattened.
fn copy_data_files(from: &Path, to: &Path) -> Result<()> {
    for ext in DATA_EXTENSIONS {
        let pattern = format!("{}/**/*.{ext}", from.display());
        for entry in glob::glob(&pattern)
            .with_context(|| format!("bad data glob pattern: {pattern}"))?
            .flatten()
        {
            let name = entry
                .file_name()
                .ok_or_else(|| anyhow!("data file without a name: {}", entry.display()))?;
            std::fs::copy(&entry, to.join(name))
                .with_context(|| format!("failed to copy data file {}", entry.display()))?;
        }
    }
    Ok(())
}

/// Sandbox that executes notebooks through `jupyter nbconvert`.
///
/// Errors raised by individual cells are captured as error outputs rather
/// than aborting the run, so they survive into validation and comparison.
#[derive(Default)]
pub struct CommandSandbox {
    /// Resolved path to the `jupyter` binary, once located.
    program: Option<PathBuf>,
}

impl CommandSandbox {
    /// Creates a sandbox that locates `jupyter` on first use. A missing
    /// binary then surfaces as an execution failure, which the gate recovers
    /// from by grading pre-existing outputs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locates `jupyter` eagerly, failing fast when it is not installed.
    pub fn discover() -> Result<Self> {
        Ok(Self {
            program: Some(find_jupyter()?),
        })
    }
}

/// Discovers the path to `jupyter`.
fn find_jupyter() -> Result<PathBuf> {
    if let Ok(output) = std::process::Command::new("which").arg("jupyter").output()
        && output.status.success()
    {
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    let mut common_paths: Vec<PathBuf> = vec![
        PathBuf::from("/usr/local/bin/jupyter"),
        PathBuf::from("/opt/homebrew/bin/jupyter"),
    ];
    if let Ok(home) = std::env::var("HOME") {
        common_paths.push(PathBuf::from(home).join(".local/bin/jupyter"));
    }
    for path in common_paths {
        if path.exists() {
            return Ok(path);
        }
    }

    Err(anyhow!(
        "Could not find jupyter. Please install it with: pip install jupyter"
    ))
}

impl ExecutionSandbox for CommandSandbox {
    async fn execute(
        &self,
        notebook: &Notebook,
        workdir: &Path,
        deadline: Duration,
    ) -> Result<Notebook> {
        let program = match &self.program {
            Some(path) => path.clone(),
            None => find_jupyter()?,
        };

        let input = workdir.join("submission.ipynb");
        let rendered = serde_json::to_string(&notebook.to_nbformat())
            .context("failed to render notebook for execution")?;
        std::fs::write(&input, rendered).context("failed to stage notebook for execution")?;

        let args: Vec<OsString> = vec![
            "nbconvert".into(),
            "--to".into(),
            "notebook".into(),
            "--execute".into(),
            "--allow-errors".into(),
            "--output".into(),
            "executed.ipynb".into(),
            input.as_os_str().to_os_string(),
        ];

        let collected =
            process::run_collect(&program, &args, Some(workdir), Some(deadline)).await?;
        ensure!(
            collected.status.success(),
            "notebook execution failed:\n{}",
            collected.combined_output()
        );

        let executed = workdir.join("executed.ipynb");
        Notebook::from_path(&executed).context("executed notebook could not be parsed")
    }
}
