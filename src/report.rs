#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Result assembler.
//!
//! Combines the score merger's output, the parsed feedback, and the
//! normalizer report into one immutable grading record with full
//! provenance: what was auto-fixed, what was auto-executed, what was capped
//! and why. No new computation happens here beyond shape validation — every
//! expected feedback field is present even when empty. A re-grade produces a
//! new record, never an edit of an old one.

use bon::Builder;
use serde::{Deserialize, Serialize};
use tabled::{
    Table, Tabled,
    settings::{Panel, Style},
};
use uuid::Uuid;

use crate::{
    compare::{Discrepancy, OutputComparison},
    execute::ExecutionReport,
    feedback::{Feedback, FeedbackBundle, NarrativeSection},
    normalize::NormalizeReport,
    rubric::Rubric,
    score::{AppliedCap, MergedScore},
    validate::ValidationResult,
};

/// Per-field feedback availability, recorded so unavailability is visible
/// and auditable rather than silently masked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAvailability {
    /// Whether technical feedback was produced.
    pub technical:        bool,
    /// Whether narrative feedback was produced.
    pub narrative:        bool,
    /// Why technical feedback is missing, when it is.
    pub technical_reason: Option<String>,
    /// Why narrative feedback is missing, when it is.
    pub narrative_reason: Option<String>,
}

/// The immutable grading record for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct GradingResult {
    /// Unique identifier of this grading run.
    pub id:                  String,
    /// Assignment identifier from the rubric.
    pub assignment:          String,
    /// Final score, bounded to `[0, out_of]`.
    pub final_score:         f64,
    /// Maximum points for the assignment.
    pub out_of:              f64,
    /// The validator's deterministic base score, 0..=100.
    pub base_score:          f64,
    /// The comparator's match rate, when comparison ran.
    pub output_match_rate:   Option<f64>,
    /// Why comparison did not run, when it did not.
    pub comparison_skipped:  Option<String>,
    /// Every cap that fired, with reasons.
    #[builder(default)]
    pub caps:                Vec<AppliedCap>,
    /// Mismatching output units.
    #[builder(default)]
    pub discrepancies:       Vec<Discrepancy>,
    /// Technical findings list. Always present, possibly empty.
    #[builder(default)]
    pub technical_findings:  Vec<String>,
    /// Technical summary. Always present, possibly empty.
    #[builder(default)]
    pub technical_summary:   String,
    /// Narrative feedback sections. Always present, possibly empty.
    #[builder(default)]
    pub narrative_sections:  Vec<NarrativeSection>,
    /// Per-field feedback availability.
    #[builder(default)]
    pub feedback:            FeedbackAvailability,
    /// Preprocessing report: fixes applied and penalty charged.
    #[builder(default)]
    pub preprocessing:       NormalizeReport,
    /// Execution gate provenance.
    #[builder(default)]
    pub execution:           ExecutionReport,
    /// Set when the submission could not be graded at all, with the reason.
    pub ungraded_reason:     Option<String>,
}

impl GradingResult {
    /// Assembles the final record from the pipeline's stage outputs.
    pub fn assemble(
        rubric: &Rubric,
        validation: &ValidationResult,
        merged: &MergedScore,
        comparison: &OutputComparison,
        feedback: FeedbackBundle,
        preprocessing: NormalizeReport,
        execution: ExecutionReport,
    ) -> Self {
        let (match_rate, skipped, discrepancies) = match comparison {
            OutputComparison::Compared(report) => (
                Some(report.match_rate),
                None,
                report.discrepancies.clone(),
            ),
            OutputComparison::Unavailable { reason } => (None, Some(reason.clone()), Vec::new()),
        };

        let (technical_findings, technical_summary, technical_ok, technical_reason) =
            match feedback.technical {
                Feedback::Available(t) => (t.findings, t.summary, true, None),
                Feedback::Unavailable { reason } => {
                    (Vec::new(), String::new(), false, Some(reason))
                }
            };
        let (narrative_sections, narrative_ok, narrative_reason) = match feedback.narrative {
            Feedback::Available(n) => (n.sections, true, None),
            Feedback::Unavailable { reason } => (Vec::new(), false, Some(reason)),
        };

        GradingResult::builder()
            .id(Uuid::new_v4().to_string())
            .assignment(rubric.assignment.clone())
            .final_score(merged.final_points)
            .out_of(rubric.total_points)
            .base_score(validation.base_score)
            .maybe_output_match_rate(match_rate)
            .maybe_comparison_skipped(skipped)
            .caps(merged.caps.clone())
            .discrepancies(discrepancies)
            .technical_findings(technical_findings)
            .technical_summary(technical_summary)
            .narrative_sections(narrative_sections)
            .feedback(FeedbackAvailability {
                technical:        technical_ok,
                narrative:        narrative_ok,
                technical_reason,
                narrative_reason,
            })
            .preprocessing(preprocessing)
            .execution(execution)
            .build()
    }

    /// Builds a zero-score record for a submission that could not be graded
    /// (e.g. an unparseable notebook). Reported, never silently defaulted to
    /// a passing score.
    pub fn ungraded(assignment: &str, out_of: f64, reason: &str) -> Self {
        GradingResult::builder()
            .id(Uuid::new_v4().to_string())
            .assignment(assignment)
            .final_score(0.0)
            .out_of(out_of)
            .base_score(0.0)
            .feedback(FeedbackAvailability {
                technical_reason: Some(reason.to_string()),
                narrative_reason: Some(reason.to_string()),
                ..FeedbackAvailability::default()
            })
            .ungraded_reason(reason)
            .build()
    }

    /// Renders the one-line summary table shown after grading.
    pub fn summary_table(&self) -> Table {
        let row = SummaryRow {
            assignment: self.assignment.clone(),
            score:      format!("{:.2}/{:.2}", self.final_score, self.out_of),
            caps:       self.caps.len().to_string(),
            fixes:      self.preprocessing.fixes.len().to_string(),
            feedback:   match (self.feedback.technical, self.feedback.narrative) {
                (true, true) => "complete".to_string(),
                (false, false) => "unavailable".to_string(),
                _ => "partial".to_string(),
            },
        };

        let mut table = Table::new([row]);
        table
            .with(Panel::header(format!("Grading result {}", self.id)))
            .with(Style::modern());
        table
    }
}

/// Row shape for the terminal summary table.
#[derive(Tabled)]
struct SummaryRow {
    /// Assignment identifier.
    #[tabled(rename = "Assignment")]
    assignment: String,
    /// Final score over maximum.
    #[tabled(rename = "Score")]
    score:      String,
    /// Number of caps applied.
    #[tabled(rename = "Caps")]
    caps:       String,
    /// Number of normalizer fixes.
    #[tabled(rename = "Fixes")]
    fixes:      String,
    /// Feedback availability.
    #[tabled(rename = "Feedback")]
    feedback:   String,
}
