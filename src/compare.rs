#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Output comparator.
//!
//! Aligns the student's captured outputs to the reference solution's outputs
//! cell-by-cell and applies a layered matching strategy, cheapest check
//! first: structured row counts, then order-independent numeric sets with a
//! relative tolerance, then normalized text similarity. Comparison is an
//! enhancement signal, not a correctness gate: when no reference exists or
//! the document exceeds the size budget it skips cleanly and reports itself
//! unavailable instead of erroring.

use std::{fmt::Display, sync::LazyLock};

use colored::Colorize;
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::{
    notebook::{CodeCellRecord, ExtractedSource, Output},
    rubric::TolerancePolicy,
};

/// Fraction of reference numbers that must find a tolerant partner for the
/// numeric layer to declare a match.
const NUMERIC_MATCH_FRACTION: f64 = 0.9;

/// Numeric sets larger than this fall through to the text layer.
const NUMERIC_SET_LIMIT: usize = 400;

/// Maximum characters retained in a discrepancy snippet.
const SNIPPET_LIMIT: usize = 160;

/// Why a compared unit was declared a mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchReason {
    /// Structured row/record counts disagree beyond tolerance.
    RowCount,
    /// Numeric values disagree beyond the relative tolerance.
    NumericValue,
    /// The student output is absent, empty, or an error marker.
    MissingOutput,
    /// Normalized text similarity fell below the acceptance threshold.
    TextDivergence,
}

impl Display for MatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MatchReason::RowCount => "row-count",
            MatchReason::NumericValue => "numeric-value",
            MatchReason::MissingOutput => "missing-output",
            MatchReason::TextDivergence => "text-divergence",
        };
        write!(f, "{label}")
    }
}

/// One disagreeing unit, with enough context for a reader to judge it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    /// Notebook cell index of the unit.
    pub unit:      usize,
    /// Snippet of the student's output.
    pub student:   String,
    /// Snippet of the reference output.
    pub reference: String,
    /// Why the unit mismatched.
    pub reason:    MatchReason,
}

impl Discrepancy {
    /// Renders the discrepancy for terminal display.
    pub fn render(&self) -> String {
        format!(
            "cell {} [{}]\n  expected: {}\n  got:      {}",
            self.unit,
            self.reason,
            self.reference.green(),
            self.student.red(),
        )
    }
}

/// Aggregate comparison outcome for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    /// Units compared.
    pub compared:      usize,
    /// Units that matched.
    pub matched:       usize,
    /// Aggregate match rate in 0..=100.
    pub match_rate:    f64,
    /// Every mismatching unit.
    pub discrepancies: Vec<Discrepancy>,
}

/// Result of attempting comparison: either a report or a clean skip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutputComparison {
    /// Comparison ran and produced a report.
    Compared(ComparisonReport),
    /// Comparison was skipped; the score merger reallocates its weight.
    Unavailable {
        /// Why comparison did not run.
        reason: String,
    },
}

impl OutputComparison {
    /// The match rate, when a comparison actually happened.
    pub fn match_rate(&self) -> Option<f64> {
        match self {
            OutputComparison::Compared(report) => Some(report.match_rate),
            OutputComparison::Unavailable { .. } => None,
        }
    }
}

/// Size budget past which comparison is skipped rather than attempted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComparisonBudget {
    /// Maximum number of student code cells.
    pub max_code_cells:   usize,
    /// Maximum total captured output bytes.
    pub max_output_bytes: usize,
}

impl Default for ComparisonBudget {
    fn default() -> Self {
        Self {
            max_code_cells:   200,
            max_output_bytes: 512 * 1024,
        }
    }
}

/// The output comparator.
pub struct OutputComparator<'a> {
    /// Numeric/text tolerance policy, from the rubric.
    tolerance: &'a TolerancePolicy,
    /// Size budget.
    budget:    ComparisonBudget,
}

/// Matches `# A tibble: 150 × 5` style headers.
static TIBBLE_ROWS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#\s*A tibble:\s*([\d,]+)\s*[x×]").expect("tibble pattern is valid")
});

/// Matches `[150 rows x 5 columns]` style footers.
static FRAME_ROWS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([\d,]+) rows? x \d+ columns?\]").expect("frame pattern is valid"));

/// Matches `150 obs. of 5 variables` style structure dumps.
static OBS_ROWS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d,]+)\s+obs\.\s+of").expect("obs pattern is valid"));

/// Matches numeric literals, including scientific notation.
static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?").expect("number pattern is valid")
});

impl<'a> OutputComparator<'a> {
    /// Creates a comparator with the given tolerance policy and budget.
    pub fn new(tolerance: &'a TolerancePolicy, budget: ComparisonBudget) -> Self {
        Self { tolerance, budget }
    }

    /// Compares student outputs to reference outputs cell-by-cell.
    pub fn compare(
        &self,
        student: &ExtractedSource,
        reference: &ExtractedSource,
    ) -> OutputComparison {
        if student.code_cells.len() > self.budget.max_code_cells {
            return OutputComparison::Unavailable {
                reason: format!(
                    "submission has {} code cells, over the {}-cell comparison budget",
                    student.code_cells.len(),
                    self.budget.max_code_cells
                ),
            };
        }
        if student.total_output_bytes() > self.budget.max_output_bytes {
            return OutputComparison::Unavailable {
                reason: "captured output exceeds the comparison size budget".to_string(),
            };
        }

        let mut compared = 0usize;
        let mut matched = 0usize;
        let mut discrepancies = Vec::new();

        for (ordinal, ref_cell) in reference.code_cells.iter().enumerate() {
            let Some(ref_text) = combined_text(ref_cell) else {
                continue;
            };
            if ref_text.trim().is_empty() {
                continue;
            }
            compared += 1;

            let student_cell = student.code_cells.get(ordinal);
            let unit = student_cell
                .map(|c| c.cell_index)
                .unwrap_or(ref_cell.cell_index);

            match self.compare_unit(student_cell, &ref_text) {
                Ok(()) => matched += 1,
                Err((reason, student_snippet)) => discrepancies.push(Discrepancy {
                    unit,
                    student: student_snippet,
                    reference: snippet(&ref_text),
                    reason,
                }),
            }
        }

        if compared == 0 {
            return OutputComparison::Unavailable {
                reason: "reference solution has no comparable outputs".to_string(),
            };
        }

        OutputComparison::Compared(ComparisonReport {
            compared,
            matched,
            match_rate: matched as f64 / compared as f64 * 100.0,
            discrepancies,
        })
    }

    /// Compares one unit; `Err` carries the mismatch reason and the student
    /// snippet to report.
    fn compare_unit(
        &self,
        student_cell: Option<&CodeCellRecord>,
        ref_text: &str,
    ) -> Result<(), (MatchReason, String)> {
        let Some(cell) = student_cell else {
            return Err((MatchReason::MissingOutput, "<no such cell>".to_string()));
        };

        // An error marker is always a mismatch, regardless of the reference.
        if let Some(err) = cell.outputs.iter().find(|o| o.is_error()) {
            let label = match err {
                Output::Error { ename, evalue } => format!("<error: {ename}: {evalue}>"),
                _ => "<error>".to_string(),
            };
            return Err((MatchReason::MissingOutput, snippet(&label)));
        }

        let student_text = combined_text(cell).unwrap_or_default();
        if student_text.trim().is_empty() {
            return Err((MatchReason::MissingOutput, "<empty output>".to_string()));
        }

        // Layer 1: structured row counts.
        if let (Some(ref_rows), Some(student_rows)) =
            (extract_row_count(ref_text), extract_row_count(&student_text))
        {
            let slack = (self.tolerance.row_absolute as f64)
                .max(ref_rows as f64 * self.tolerance.row_relative);
            if (student_rows as f64 - ref_rows as f64).abs() > slack {
                return Err((MatchReason::RowCount, snippet(&student_text)));
            }
        }

        // Layer 2: order-independent numeric sets.
        let ref_numbers = extract_numbers(ref_text);
        let student_numbers = extract_numbers(&student_text);
        if !ref_numbers.is_empty()
            && !student_numbers.is_empty()
            && ref_numbers.len() <= NUMERIC_SET_LIMIT
            && student_numbers.len() <= NUMERIC_SET_LIMIT
        {
            let fraction =
                matched_fraction(&ref_numbers, &student_numbers, self.tolerance.numeric_relative);
            if fraction >= NUMERIC_MATCH_FRACTION {
                return Ok(());
            }
            return Err((MatchReason::NumericValue, snippet(&student_text)));
        }

        // Layer 3: normalized text similarity.
        let threshold = self.tolerance.strictness.text_threshold();
        if text_similarity(ref_text, &student_text) >= threshold {
            Ok(())
        } else {
            Err((MatchReason::TextDivergence, snippet(&student_text)))
        }
    }
}

/// Joins a cell's textual outputs into one comparable string, or `None` when
/// the cell has no textual output at all.
fn combined_text(cell: &CodeCellRecord) -> Option<String> {
    let parts: Vec<&str> = cell.outputs.iter().filter_map(Output::text).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

/// Extracts a row/record count from a structured output rendering.
fn extract_row_count(text: &str) -> Option<u64> {
    for pattern in [&TIBBLE_ROWS, &FRAME_ROWS, &OBS_ROWS] {
        if let Some(caps) = pattern.captures(text) {
            let digits: String = caps[1].chars().filter(char::is_ascii_digit).collect();
            if let Ok(count) = digits.parse() {
                return Some(count);
            }
        }
    }
    None
}

/// Extracts every numeric literal from the text, sorted ascending.
fn extract_numbers(text: &str) -> Vec<f64> {
    let mut numbers: Vec<f64> = NUMBER
        .find_iter(text)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    numbers.sort_by(|a, b| a.partial_cmp(b).expect("parsed numbers are comparable"));
    numbers
}

/// Fraction of reference numbers that find a student partner within the
/// relative tolerance, matching greedily over the two sorted sets.
fn matched_fraction(reference: &[f64], student: &[f64], relative: f64) -> f64 {
    let mut matched = 0usize;
    let mut cursor = 0usize;

    for &expected in reference {
        while cursor < student.len() {
            let actual = student[cursor];
            let slack = expected.abs().max(1e-9) * relative;
            if (actual - expected).abs() <= slack {
                matched += 1;
                cursor += 1;
                break;
            }
            if actual < expected - slack {
                cursor += 1;
            } else {
                break;
            }
        }
    }

    matched as f64 / reference.len() as f64
}

/// Similarity of two outputs after normalization: lowercased, whitespace
/// collapsed, and lines sorted so ordering differences do not count against
/// the student.
fn text_similarity(a: &str, b: &str) -> f64 {
    let normalize = |text: &str| -> String {
        text.lines()
            .map(|line| line.split_whitespace().join(" ").to_lowercase())
            .filter(|line| !line.is_empty())
            .sorted()
            .join("\n")
    };

    let left = normalize(a);
    let right = normalize(b);
    if left == right {
        return 1.0;
    }

    f64::from(TextDiff::from_words(&left, &right).ratio())
}

/// Truncates output text to a short snippet for reporting.
fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= SNIPPET_LIMIT {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(SNIPPET_LIMIT).collect();
        format!("{cut}…")
    }
}
