//! Tests for the execution gate: the trust decision, isolated-directory
//! preparation, and the fall-back-to-original reliability property.

use std::{
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, bail};
use nbgrade::{
    execute::{
        ExecutionGate, ExecutionSandbox, disable_workdir_calls, execution_needed,
        rewrite_data_paths,
    },
    notebook::{Cell, CellKind, Notebook},
};
use serde_json::json;

fn notebook_with_outputs(with_output: usize, without_output: usize) -> Notebook {
    let mut cells = Vec::new();
    for i in 0..with_output {
        cells.push(json!({
            "cell_type": "code", "source": format!("a{i} <- {i}"), "execution_count": i + 1,
            "outputs": [{"output_type": "stream", "name": "stdout", "text": "x"}]
        }));
    }
    for i in 0..without_output {
        cells.push(json!({
            "cell_type": "code", "source": format!("b{i} <- {i}"), "outputs": []
        }));
    }
    Notebook::from_json_str(&json!({"cells": cells}).to_string()).expect("notebook should parse")
}

/// Sandbox that always fails, counting invocations.
struct FailingSandbox {
    calls: AtomicUsize,
}

impl FailingSandbox {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl ExecutionSandbox for FailingSandbox {
    async fn execute(&self, _: &Notebook, _: &Path, _: Duration) -> Result<Notebook> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("kernel died");
    }
}

/// Sandbox that records the working directory contents and echoes the
/// document back with a marker output attached.
struct RecordingSandbox {
    seen_files: Mutex<Vec<PathBuf>>,
    workdirs:   Mutex<Vec<PathBuf>>,
}

impl RecordingSandbox {
    fn new() -> Self {
        Self {
            seen_files: Mutex::new(Vec::new()),
            workdirs:   Mutex::new(Vec::new()),
        }
    }
}

impl ExecutionSandbox for RecordingSandbox {
    async fn execute(&self, notebook: &Notebook, workdir: &Path, _: Duration) -> Result<Notebook> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(workdir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        files.sort();
        self.seen_files.lock().expect("lock").extend(files);
        self.workdirs
            .lock()
            .expect("lock")
            .push(workdir.to_path_buf());

        let mut cells: Vec<Cell> = notebook.cells().to_vec();
        for cell in &mut cells {
            if cell.kind == CellKind::Code {
                cell.outputs = vec![nbgrade::notebook::Output::Text {
                    text: "executed".to_string(),
                }];
                cell.execution_count = Some(1);
            }
        }
        Ok(Notebook::from_cells(cells))
    }
}

#[test]
fn execution_is_needed_below_half_outputs() {
    assert!(execution_needed(&notebook_with_outputs(1, 3)));
    assert!(execution_needed(&notebook_with_outputs(0, 2)));
}

#[test]
fn execution_is_not_needed_at_or_above_half_outputs() {
    assert!(!execution_needed(&notebook_with_outputs(2, 2)));
    assert!(!execution_needed(&notebook_with_outputs(3, 0)));
    // No code cells at all means there is nothing to execute.
    let empty = Notebook::from_json_str(r#"{"cells": []}"#).expect("parse");
    assert!(!execution_needed(&empty));
}

#[tokio::test]
async fn trusted_documents_never_reach_the_sandbox() {
    let sandbox = FailingSandbox::new();
    let gate = ExecutionGate::new(&sandbox, Duration::from_secs(5));
    let notebook = notebook_with_outputs(3, 0);

    let (document, report) = gate.process(&notebook, None).await;

    assert_eq!(document, notebook);
    assert!(!report.was_needed);
    assert!(!report.attempted);
    assert_eq!(sandbox.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_execution_falls_back_to_the_original_document() {
    let sandbox = FailingSandbox::new();
    let gate = ExecutionGate::new(&sandbox, Duration::from_secs(5));
    let notebook = notebook_with_outputs(0, 3);

    let (document, report) = gate.process(&notebook, None).await;

    // Byte-identical fallback: grading proceeds on exactly what came in.
    assert_eq!(document, notebook);
    assert_eq!(
        document.to_nbformat().to_string(),
        notebook.to_nbformat().to_string()
    );
    assert!(report.was_needed);
    assert!(report.attempted);
    assert!(!report.succeeded);
    assert!(report.error.as_deref().unwrap_or_default().contains("kernel died"));
    assert_eq!(sandbox.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn successful_execution_returns_the_fresh_document() {
    let sandbox = RecordingSandbox::new();
    let gate = ExecutionGate::new(&sandbox, Duration::from_secs(5));
    let notebook = notebook_with_outputs(0, 2);

    let (document, report) = gate.process(&notebook, None).await;

    assert!(report.succeeded);
    let extracted = document.extract();
    assert_eq!(extracted.execution_rate(), 1.0);
    assert!(extracted.code_cells.iter().all(|c| c.executed));
}

#[tokio::test]
async fn data_files_are_copied_into_the_isolated_directory() {
    let data_dir = tempfile::tempdir().expect("create data dir");
    std::fs::write(data_dir.path().join("penguins.csv"), "a,b\n1,2\n").expect("write csv");
    std::fs::write(data_dir.path().join("notes.md"), "not a data file").expect("write md");

    let sandbox = RecordingSandbox::new();
    let gate = ExecutionGate::new(&sandbox, Duration::from_secs(5));
    let notebook = notebook_with_outputs(0, 1);

    let (_, report) = gate.process(&notebook, Some(data_dir.path())).await;
    assert!(report.succeeded);

    let seen = sandbox.seen_files.lock().expect("lock");
    assert!(seen.iter().any(|p| p.file_name().is_some_and(|n| n == "penguins.csv")));
    // Non-data files are not injected.
    assert!(!seen.iter().any(|p| p.file_name().is_some_and(|n| n == "notes.md")));
}

#[tokio::test]
async fn isolated_directory_is_removed_after_the_run() {
    let sandbox = RecordingSandbox::new();
    let gate = ExecutionGate::new(&sandbox, Duration::from_secs(5));
    let notebook = notebook_with_outputs(0, 1);

    let (_, report) = gate.process(&notebook, None).await;
    assert!(report.succeeded);

    let workdirs = sandbox.workdirs.lock().expect("lock");
    assert_eq!(workdirs.len(), 1);
    assert!(!workdirs[0].exists(), "scratch directory must be cleaned up");
}

#[test]
fn absolute_and_home_paths_are_rewritten_to_bare_filenames() {
    assert_eq!(
        rewrite_data_paths(r#"read_csv("/home/student/data/penguins.csv")"#),
        r#"read_csv("penguins.csv")"#
    );
    assert_eq!(
        rewrite_data_paths("read_csv('~/downloads/survey.csv')"),
        "read_csv('survey.csv')"
    );
    assert_eq!(
        rewrite_data_paths(r#"read_csv("C:/Users/kid/Desktop/grades.csv")"#),
        r#"read_csv("grades.csv")"#
    );
    // Already-relative paths are left alone.
    assert_eq!(
        rewrite_data_paths(r#"read_csv("data.csv")"#),
        r#"read_csv("data.csv")"#
    );
}

#[test]
fn workdir_changes_are_commented_out() {
    assert_eq!(
        disable_workdir_calls("setwd(\"/home/student\")\nx <- 1"),
        "# setwd(\"/home/student\")\nx <- 1"
    );
    assert_eq!(
        disable_workdir_calls("  os.chdir('/tmp')"),
        "  # os.chdir('/tmp')"
    );
    // Calls that merely mention setwd in a string or comment keep working.
    assert_eq!(disable_workdir_calls("x <- 1 # setwd advice"), "x <- 1 # setwd advice");
}
