#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Static validator.
//!
//! Checks normalized code text against the rubric: which required variables
//! and functions are present, the status of every section, and a
//! deterministic base score. Given identical code text and rubric this
//! always returns an identical result; there are no model calls, no
//! timestamps, and no randomness anywhere below this contract.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::rubric::{Rubric, Section};

/// Weight of the section breakdown in the base score.
const SECTION_WEIGHT: f64 = 0.7;

/// Weight of global variable presence in the base score.
const PRESENCE_WEIGHT: f64 = 0.3;

/// Completion status of one rubric section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionStatus {
    /// All required variables and functions were found.
    Complete,
    /// Variables were found but not every required function.
    Partial,
    /// One or more required variables are missing.
    Missing,
}

impl SectionStatus {
    /// Credit multiplier for this status.
    pub fn credit(self) -> f64 {
        match self {
            SectionStatus::Complete => 1.0,
            SectionStatus::Partial => 0.5,
            SectionStatus::Missing => 0.0,
        }
    }
}

/// Presence result for one globally required variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableCheck {
    /// The required variable name.
    pub name:  String,
    /// Whether an assignment to it was located.
    pub found: bool,
}

/// Evaluation of one rubric section, with the evidence that decided it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionResult {
    /// Section name.
    pub name:              String,
    /// Points the section is worth.
    pub points:            f64,
    /// Completion status.
    pub status:            SectionStatus,
    /// Required variables that were not located.
    pub missing_variables: Vec<String>,
    /// Required functions that were not located.
    pub missing_functions: Vec<String>,
}

/// The validator's immutable result: consumed by the score merger and
/// embedded verbatim into the feedback prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Presence of each globally required variable.
    pub variables:      Vec<VariableCheck>,
    /// Per-section evaluation, in rubric order.
    pub sections:       Vec<SectionResult>,
    /// Cells-with-output over total code cells, in 0..=1. Reported as a
    /// separate signal; it never zeroes the base score by itself.
    pub execution_rate: f64,
    /// Deterministic completeness score in 0..=100.
    pub base_score:     f64,
}

impl ValidationResult {
    /// Number of globally required variables that were not found.
    pub fn missing_required_count(&self) -> usize {
        self.variables.iter().filter(|v| !v.found).count()
    }
}

/// Builds the word-boundary assignment pattern for one variable name.
///
/// Requires the name to stand alone (no identifier characters or `$`/`.`
/// access on either side) followed by an assignment operator, so `clean_data`
/// is never satisfied by `unclean_data <- …` and `x` is never satisfied by
/// `x == 1`.
fn assignment_pattern(name: &str) -> Regex {
    Regex::new(&format!(
        r"(?m)(?:^|[^\w.$]){}\s*(?:<<?-|=(?:[^=]|$))",
        regex::escape(name)
    ))
    .expect("assignment pattern is valid")
}

/// Builds the call pattern for one function name.
fn call_pattern(name: &str) -> Regex {
    Regex::new(&format!(r"(?:^|[^\w.$]){}\s*\(", regex::escape(name)))
        .expect("call pattern is valid")
}

/// Returns true when the code contains an unambiguous assignment to `name`.
pub fn assignment_found(code: &str, name: &str) -> bool {
    assignment_pattern(name).is_match(code)
}

/// Returns true when the code contains a call to `name`.
pub fn call_found(code: &str, name: &str) -> bool {
    call_pattern(name).is_match(code)
}

/// The static validator. Holds only the rubric; all inputs arrive per call.
pub struct StaticValidator<'a> {
    /// The rubric being validated against.
    rubric: &'a Rubric,
}

impl<'a> StaticValidator<'a> {
    /// Creates a validator for the given rubric.
    pub fn new(rubric: &'a Rubric) -> Self {
        Self { rubric }
    }

    /// Validates normalized code text and produces the deterministic result.
    ///
    /// `execution_rate` is the document-to-grade's cells-with-output ratio,
    /// computed by the extractor.
    pub fn validate(&self, code: &str, execution_rate: f64) -> ValidationResult {
        let variables: Vec<VariableCheck> = self
            .rubric
            .required_variables
            .iter()
            .map(|name| VariableCheck {
                name:  name.clone(),
                found: assignment_found(code, name),
            })
            .collect();

        let sections: Vec<SectionResult> = self
            .rubric
            .sections
            .iter()
            .map(|section| evaluate_section(code, section))
            .collect();

        let base_score = base_score(&variables, &sections);

        ValidationResult {
            variables,
            sections,
            execution_rate,
            base_score,
        }
    }
}

/// Evaluates one section against the code text.
fn evaluate_section(code: &str, section: &Section) -> SectionResult {
    let missing_variables: Vec<String> = section
        .variables
        .iter()
        .filter(|v| !assignment_found(code, v))
        .cloned()
        .collect();
    let missing_functions: Vec<String> = section
        .functions
        .iter()
        .filter(|f| !call_found(code, f))
        .cloned()
        .collect();

    let status = if !missing_variables.is_empty() {
        SectionStatus::Missing
    } else if !missing_functions.is_empty() {
        SectionStatus::Partial
    } else {
        SectionStatus::Complete
    };

    SectionResult {
        name: section.name.clone(),
        points: section.points,
        status,
        missing_variables,
        missing_functions,
    }
}

/// Combines weighted section credit with global variable presence.
///
/// A rubric with zero sections falls back to 100%-of-variable-presence
/// rather than collapsing toward zero; a rubric with sections but no global
/// variable list is scored on sections alone.
fn base_score(variables: &[VariableCheck], sections: &[SectionResult]) -> f64 {
    let section_score = {
        let total: f64 = sections.iter().map(|s| s.points).sum();
        if total > 0.0 {
            let earned: f64 = sections.iter().map(|s| s.status.credit() * s.points).sum();
            Some(earned / total * 100.0)
        } else {
            None
        }
    };

    let presence_score = if variables.is_empty() {
        None
    } else {
        let found = variables.iter().filter(|v| v.found).count();
        Some(found as f64 / variables.len() as f64 * 100.0)
    };

    match (section_score, presence_score) {
        (Some(s), Some(p)) => SECTION_WEIGHT * s + PRESENCE_WEIGHT * p,
        (Some(s), None) => s,
        (None, Some(p)) => p,
        (None, None) => 100.0,
    }
}
