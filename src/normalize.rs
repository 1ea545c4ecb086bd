#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Submission normalizer.
//!
//! Rewrites common syntax mistakes in extracted code into a canonical form,
//! recording every rewrite and an associated penalty. Rules are pattern-based
//! and conservative: only constructs with an unambiguous canonical form are
//! touched, each rule is an independently testable unit, and the original
//! document is never modified.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::notebook::{Cell, CellKind, Notebook};

/// Penalty charged per syntax-class rewrite.
const SYNTAX_FIX_PENALTY: f64 = 0.5;

/// Number of distinct fixes past which a submission is flagged for manual
/// review. Advisory only; never blocks scoring.
const MANUAL_REVIEW_THRESHOLD: usize = 5;

/// A single applied rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    /// Identifier of the rule that fired.
    pub rule:        String,
    /// Human-readable description of what was rewritten.
    pub description: String,
    /// Penalty points charged for this rewrite.
    pub penalty:     f64,
}

/// Report of all rewrites applied to one submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizeReport {
    /// Every applied fix, in application order.
    pub fixes:               Vec<Fix>,
    /// Sum of fix penalties.
    pub penalty:             f64,
    /// Advisory flag set when the fix count exceeds the review threshold.
    pub needs_manual_review: bool,
}

impl NormalizeReport {
    /// Records a fix and accumulates its penalty.
    fn push(&mut self, rule: &str, description: String, penalty: f64) {
        self.fixes.push(Fix {
            rule: rule.to_string(),
            description,
            penalty,
        });
        self.penalty += penalty;
    }
}

/// A normalization rule: applies one class of rewrite and reports each
/// occurrence it fixed.
trait FixRule {
    /// Stable identifier for the rule.
    fn name(&self) -> &'static str;

    /// Applies the rule, appending one report entry per rewritten occurrence.
    fn apply(&self, code: &str, report: &mut NormalizeReport) -> String;
}

/// Uncomments commented-out library-load lines (`# library(tidyverse)`).
struct CommentedLibraryRule;

/// Matches a line that is exactly a commented-out `library(...)` call.
static COMMENTED_LIBRARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(\s*)#+\s*(library\s*\([A-Za-z][A-Za-z0-9._]*\)\s*)$")
        .expect("commented-library pattern is valid")
});

impl FixRule for CommentedLibraryRule {
    fn name(&self) -> &'static str {
        "commented_library"
    }

    fn apply(&self, code: &str, report: &mut NormalizeReport) -> String {
        let mut out = String::with_capacity(code.len());
        let mut last = 0;
        for caps in COMMENTED_LIBRARY.captures_iter(code) {
            let whole = caps.get(0).expect("capture 0 always present");
            out.push_str(&code[last..whole.start()]);
            out.push_str(&caps[1]);
            out.push_str(caps[2].trim_end());
            last = whole.end();

            report.push(
                self.name(),
                format!("uncommented required library load `{}`", caps[2].trim()),
                SYNTAX_FIX_PENALTY,
            );
        }
        out.push_str(&code[last..]);
        out
    }
}

/// Rewrites pipe chains that reference the piped frame through its own
/// column-access syntax (`df %>% filter(df$x > 1)`) into the implicit chain
/// form (`df %>% filter(x > 1)`).
struct PipeSelfReferenceRule;

/// Captures the identifier feeding the first pipe on a line.
static PIPE_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z.][A-Za-z0-9._]*)\s*%>%").expect("pipe-head pattern is valid")
});

impl FixRule for PipeSelfReferenceRule {
    fn name(&self) -> &'static str {
        "pipe_self_reference"
    }

    fn apply(&self, code: &str, report: &mut NormalizeReport) -> String {
        let mut lines = Vec::new();
        for line in code.split('\n') {
            let Some(caps) = PIPE_HEAD.captures(line) else {
                lines.push(line.to_string());
                continue;
            };
            let frame = &caps[1];
            let chain_start = caps.get(0).expect("capture 0 always present").end();
            let (head, chain) = line.split_at(chain_start);

            // The regex crate has no backreferences, so the frame name is
            // spliced into a fresh pattern per line.
            let column_access = Regex::new(&format!(
                r"(^|[^A-Za-z0-9._]){}\$([A-Za-z.][A-Za-z0-9._]*)",
                regex::escape(frame)
            ))
            .expect("column-access pattern is valid");

            if column_access.is_match(chain) {
                let fixed = column_access.replace_all(chain, "$1$2").into_owned();
                report.push(
                    self.name(),
                    format!("rewrote `{frame}$…` column access inside a `{frame} %>%` chain"),
                    SYNTAX_FIX_PENALTY,
                );
                lines.push(format!("{head}{fixed}"));
            } else {
                lines.push(line.to_string());
            }
        }
        lines.join("\n")
    }
}

/// Replaces typographic quotes pasted from word processors with ASCII quotes.
struct SmartQuoteRule;

/// Matches any curly double or single quote.
static SMART_QUOTES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("[\u{201C}\u{201D}\u{2018}\u{2019}]").expect("smart-quote pattern is valid")
});

impl FixRule for SmartQuoteRule {
    fn name(&self) -> &'static str {
        "smart_quotes"
    }

    fn apply(&self, code: &str, report: &mut NormalizeReport) -> String {
        if !SMART_QUOTES.is_match(code) {
            return code.to_string();
        }

        let fixed = SMART_QUOTES.replace_all(code, |caps: &regex::Captures<'_>| {
            match &caps[0] {
                "\u{2018}" | "\u{2019}" => "'",
                _ => "\"",
            }
        });

        // Pure formatting repair; counted once per submission, no penalty.
        report.push(self.name(), "replaced typographic quotes with ASCII quotes".into(), 0.0);
        fixed.into_owned()
    }
}

/// The submission normalizer: an ordered pipeline of fix rules.
pub struct Normalizer {
    /// Rules, applied in order.
    rules: Vec<Box<dyn FixRule + Send + Sync>>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(CommentedLibraryRule),
                Box::new(PipeSelfReferenceRule),
                Box::new(SmartQuoteRule),
            ],
        }
    }
}

impl Normalizer {
    /// Applies every rule in order and returns the normalized code together
    /// with the report of applied fixes and penalties.
    pub fn normalize(&self, code: &str) -> (String, NormalizeReport) {
        let mut report = NormalizeReport::default();
        let mut current = code.to_string();

        for rule in &self.rules {
            current = rule.apply(&current, &mut report);
        }

        if !report.fixes.is_empty() {
            tracing::debug!(
                fixes = report.fixes.len(),
                penalty = report.penalty,
                "normalizer applied fixes"
            );
        }

        report.needs_manual_review = report.fixes.len() > MANUAL_REVIEW_THRESHOLD;
        (current, report)
    }

    /// Normalizes every code cell of a document, producing a derived
    /// document (outputs untouched) and the combined report. The original
    /// document is never modified.
    pub fn normalize_document(&self, notebook: &Notebook) -> (Notebook, NormalizeReport) {
        let mut report = NormalizeReport::default();

        let cells: Vec<Cell> = notebook
            .cells()
            .iter()
            .map(|cell| match cell.kind {
                CellKind::Code => {
                    let mut source = cell.source.clone();
                    for rule in &self.rules {
                        source = rule.apply(&source, &mut report);
                    }
                    Cell {
                        source,
                        ..cell.clone()
                    }
                }
                CellKind::Narrative => cell.clone(),
            })
            .collect();

        report.needs_manual_review = report.fixes.len() > MANUAL_REVIEW_THRESHOLD;
        (Notebook::from_cells(cells), report)
    }
}
