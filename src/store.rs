#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Minimal document store.
//!
//! Grading results are persisted append-only: one JSON record per grading
//! run, keyed by the run's unique identifier. A re-grade writes a new record
//! next to the old one, which is what lets instructors audit why a score
//! changed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};

use crate::report::GradingResult;

/// Filesystem-backed store for grading results.
pub struct ResultStore {
    /// Root directory holding one subdirectory per assignment.
    root: PathBuf,
}

impl ResultStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Persists one grading result, returning the record's path. Records are
    /// never overwritten; the run identifier is unique per invocation.
    pub fn save(&self, result: &GradingResult) -> Result<PathBuf> {
        let dir = self.root.join(&result.assignment);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("could not create results directory {}", dir.display()))?;

        let path = dir.join(format!("{}.json", result.id));
        ensure!(
            !path.exists(),
            "result record {} already exists; grading records are append-only",
            path.display()
        );

        let rendered =
            serde_json::to_string_pretty(result).context("could not serialize grading result")?;
        std::fs::write(&path, rendered)
            .with_context(|| format!("could not write result record {}", path.display()))?;

        tracing::info!(record = %path.display(), "grading result saved");
        Ok(path)
    }

    /// Loads a previously saved record by assignment and run identifier.
    pub fn load(&self, assignment: &str, id: &str) -> Result<GradingResult> {
        let path = self.root.join(assignment).join(format!("{id}.json"));
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("could not read result record {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("could not parse result record {}", path.display()))
    }

    /// Returns the store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
