#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Rubric model: the declarative scoring contract for one assignment.
//!
//! A rubric is loaded once per assignment, validated eagerly, and read-only
//! for every submission graded against it. Invariant violations are
//! configuration errors: they stop the batch before any submission is
//! scored, because a broken rubric would silently mis-score all of them.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

/// Tolerance slack for floating-point point sums.
const POINT_SUM_EPSILON: f64 = 0.001;

/// Errors raised while loading or validating a rubric. All of them indicate
/// the instructor's input is wrong, not the student's.
#[derive(thiserror::Error, Debug)]
pub enum RubricError {
    /// The rubric file could not be read.
    #[error("could not read rubric: {0}")]
    Io(#[from] std::io::Error),
    /// The rubric source is not valid JSON of the expected shape.
    #[error("could not parse rubric: {0}")]
    Parse(#[from] serde_json::Error),
    /// Section points plus fixed components do not sum to the stated total.
    #[error(
        "rubric `{assignment}` points do not add up: sections + reflection = {actual}, stated \
         total = {expected}"
    )]
    PointSumMismatch {
        /// Assignment identifier.
        assignment: String,
        /// Stated total points.
        expected:   f64,
        /// Computed sum of components.
        actual:     f64,
    },
    /// The same required variable is claimed by more than one section.
    #[error("variable `{name}` is required by both section `{first}` and section `{second}`")]
    DuplicateVariable {
        /// The conflicted variable name.
        name:   String,
        /// First claiming section.
        first:  String,
        /// Second claiming section.
        second: String,
    },
    /// The rubric has no points to award.
    #[error("rubric `{assignment}` has a non-positive total of {total} points")]
    NonPositiveTotal {
        /// Assignment identifier.
        assignment: String,
        /// The offending total.
        total:      f64,
    },
}

/// Strictness preset for normalized-text output comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Accepts anything loosely similar.
    Lenient,
    /// Default threshold.
    #[default]
    Normal,
    /// Requires close agreement.
    Strict,
}

impl Strictness {
    /// Acceptance threshold for the text-similarity comparison layer.
    pub fn text_threshold(self) -> f64 {
        match self {
            Strictness::Lenient => 0.5,
            Strictness::Normal => 0.6,
            Strictness::Strict => 0.75,
        }
    }
}

/// Tolerance policy for numeric and text comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TolerancePolicy {
    /// Relative tolerance for numeric-value comparison.
    pub numeric_relative: f64,
    /// Absolute row-count slack.
    pub row_absolute:     u64,
    /// Relative row-count slack.
    pub row_relative:     f64,
    /// Text-similarity strictness preset.
    pub strictness:       Strictness,
}

impl Default for TolerancePolicy {
    fn default() -> Self {
        Self {
            numeric_relative: 0.01,
            row_absolute:     1,
            row_relative:     0.02,
            strictness:       Strictness::Normal,
        }
    }
}

/// A named, weighted slice of the rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Display name of the section.
    pub name:      String,
    /// Points this section is worth.
    pub points:    f64,
    /// Variables that must be assigned for the section to count.
    #[serde(default)]
    pub variables: Vec<String>,
    /// Functions that must be called for full section credit.
    #[serde(default)]
    pub functions: Vec<String>,
}

/// The declarative scoring contract for one assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    /// Assignment identifier.
    pub assignment:         String,
    /// Total points for the assignment.
    pub total_points:       f64,
    /// Weighted sections, in rubric order.
    #[serde(default)]
    pub sections:           Vec<Section>,
    /// Globally required variable names.
    #[serde(default)]
    pub required_variables: Vec<String>,
    /// Fixed points for reflection questions, outside any section.
    #[serde(default)]
    pub reflection_points:  f64,
    /// Tolerance policy consumed by the output comparator.
    #[serde(default)]
    pub tolerance:          TolerancePolicy,
}

impl Rubric {
    /// Loads and validates a rubric from a JSON file.
    pub fn load(path: &Path) -> Result<Self, RubricError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Parses and validates a rubric from JSON text.
    pub fn from_json_str(raw: &str) -> Result<Self, RubricError> {
        let rubric: Rubric = serde_json::from_str(raw)?;
        rubric.validate()?;
        Ok(rubric)
    }

    /// Enforces the rubric invariants: a positive total, component points
    /// summing to that total, and no variable claimed by two sections.
    pub fn validate(&self) -> Result<(), RubricError> {
        if self.total_points <= 0.0 {
            return Err(RubricError::NonPositiveTotal {
                assignment: self.assignment.clone(),
                total:      self.total_points,
            });
        }

        if !self.sections.is_empty() {
            let component_sum: f64 =
                self.sections.iter().map(|s| s.points).sum::<f64>() + self.reflection_points;
            if (component_sum - self.total_points).abs() > POINT_SUM_EPSILON {
                return Err(RubricError::PointSumMismatch {
                    assignment: self.assignment.clone(),
                    expected:   self.total_points,
                    actual:     component_sum,
                });
            }
        }

        let mut claimed: HashMap<&str, &str> = HashMap::new();
        for section in &self.sections {
            for var in &section.variables {
                if let Some(first) = claimed.insert(var.as_str(), section.name.as_str()) {
                    return Err(RubricError::DuplicateVariable {
                        name:   var.clone(),
                        first:  first.to_string(),
                        second: section.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
