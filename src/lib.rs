#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # nbgrade
//!
//! An autograder for data-analysis notebooks that generates feedback.
//!
//! The pipeline is sequential per submission: extract, normalize, gate
//! execution, validate statically, compare outputs, merge the deterministic
//! signals into a bounded score, then ground two concurrent model feedback
//! calls in that evidence and assemble one immutable grading record.

/// Output comparison against a reference solution.
pub mod compare;
/// Explicit configuration bundle passed into the entry point.
pub mod config;
/// Execution gate and sandbox capability.
pub mod execute;
/// Feedback orchestration over two independent model calls.
pub mod feedback;
/// Language-model capability and the OpenAI-backed implementation.
pub mod llm;
/// Penalty-tracked submission normalization.
pub mod normalize;
/// Notebook document model and extraction.
pub mod notebook;
/// Tokio subprocess runner with hard deadlines.
pub mod process;
/// Grading result assembly and display.
pub mod report;
/// Declarative rubric model and its invariants.
pub mod rubric;
/// Model-response sanitization.
pub mod sanitize;
/// Deterministic score merging with hard caps.
pub mod score;
/// Append-only result persistence.
pub mod store;
/// Static validation of required artifacts.
pub mod validate;

use std::path::Path;

use anyhow::Result;
use bon::Builder;

use crate::{
    compare::{OutputComparator, OutputComparison},
    config::GraderConfig,
    execute::{ExecutionGate, ExecutionSandbox},
    feedback::{FeedbackContext, FeedbackOrchestrator},
    llm::LanguageModel,
    normalize::Normalizer,
    notebook::Notebook,
    report::GradingResult,
    rubric::Rubric,
    score::ScoreMerger,
    validate::StaticValidator,
};

/// The single grading entry point: one submission, one rubric, an optional
/// reference solution, and the capabilities the pipeline consumes.
///
/// Every field is borrowed; the grader is a pure function of its inputs plus
/// isolated filesystem scratch space, so submissions in a batch may be
/// processed in parallel by the caller.
#[derive(Builder)]
pub struct NotebookGrader<'a, S, M> {
    /// The student's notebook document.
    notebook:  &'a Notebook,
    /// The validated rubric to grade against. Read-only and shareable
    /// across submissions.
    rubric:    &'a Rubric,
    /// The reference solution, when one exists.
    reference: Option<&'a Notebook>,
    /// Directory of assignment data files injected on re-execution.
    data_dir:  Option<&'a Path>,
    /// Configuration for the run.
    config:    &'a GraderConfig,
    /// Execution sandbox capability.
    sandbox:   &'a S,
    /// Language-model capability; `None` degrades feedback to unavailable.
    model:     Option<&'a M>,
}

impl<'a, S: ExecutionSandbox, M: LanguageModel> NotebookGrader<'a, S, M> {
    /// Runs the full pipeline and returns the assembled grading record.
    ///
    /// Deterministic-stage errors (a broken rubric would already have failed
    /// at load time) propagate; execution, comparison, and model failures
    /// are recovered locally and recorded in provenance.
    pub async fn run(self) -> Result<GradingResult> {
        self.rubric.validate()?;

        // Normalize first so conservatively repaired code is what gets
        // executed, validated, and shown to the model.
        let normalizer = Normalizer::default();
        let (normalized, preprocessing) = normalizer.normalize_document(self.notebook);

        let gate = ExecutionGate::new(self.sandbox, self.config.execution_timeout());
        let (document, execution) = gate.process(&normalized, self.data_dir).await;

        let extracted = document.extract();

        let validator = StaticValidator::new(self.rubric);
        let validation = validator.validate(&extracted.code_text, extracted.execution_rate());

        let reference_extracted = self.reference.map(Notebook::extract);
        let comparison = match &reference_extracted {
            Some(reference) => {
                OutputComparator::new(&self.rubric.tolerance, self.config.comparison_budget())
                    .compare(&extracted, reference)
            }
            None => OutputComparison::Unavailable {
                reason: "no reference solution supplied".to_string(),
            },
        };

        let merger = ScoreMerger::new(self.config.score(), self.rubric);
        let merged = merger.merge(
            &validation,
            &comparison,
            extracted.error_output_count(),
            preprocessing.penalty,
        );

        let orchestrator = FeedbackOrchestrator::new(
            self.model,
            self.config.prompts(),
            self.config.generation(),
            self.config.model_timeout(),
        );
        let feedback = orchestrator
            .generate(&FeedbackContext {
                student:    &extracted,
                reference:  reference_extracted.as_ref(),
                rubric:     self.rubric,
                validation: &validation,
                comparison: &comparison,
            })
            .await;

        Ok(GradingResult::assemble(
            self.rubric,
            &validation,
            &merged,
            &comparison,
            feedback,
            preprocessing,
            execution,
        ))
    }
}
