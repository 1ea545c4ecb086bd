#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Score merger.
//!
//! Blends the validator's base score with the comparator's match rate under
//! documented weights, applies hard caps for deterministic failure
//! conditions, subtracts the normalizer's penalty, and clamps. The ordering
//! is the load-bearing invariant of the whole grading core: weights first,
//! then caps (most restrictive wins), then additive penalties, then the
//! final clamp to `[0, total points]`. A model-generated judgment can never
//! raise a score past what the deterministic evidence supports.

use serde::{Deserialize, Serialize};

use crate::{compare::OutputComparison, rubric::Rubric, validate::ValidationResult};

/// Relative weights of the two deterministic signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Weight of the validator's base score.
    pub validation: f64,
    /// Weight of the comparator's match rate.
    pub output:     f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            validation: 0.5,
            output:     0.5,
        }
    }
}

/// A match-rate band and the percentage ceiling it imposes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchBand {
    /// Match rates strictly below this trigger the band.
    pub below:   f64,
    /// Percentage ceiling applied.
    pub ceiling: f64,
}

/// Merge rule configuration: weights, caps, and thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreConfig {
    /// Signal weights.
    pub weights:                    ScoreWeights,
    /// Ceiling (percent) when any execution error appears in the outputs.
    pub execution_error_cap:        f64,
    /// Ceiling (percent) when too many required variables are missing.
    pub missing_variable_cap:       f64,
    /// Missing required variables tolerated before the cap applies.
    pub missing_variable_allowance: usize,
    /// Progressive match-rate bands, most restrictive first.
    pub match_bands:                Vec<MatchBand>,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            weights:                    ScoreWeights::default(),
            execution_error_cap:        80.0,
            missing_variable_cap:       75.0,
            missing_variable_allowance: 1,
            match_bands:                vec![
                MatchBand {
                    below:   40.0,
                    ceiling: 50.0,
                },
                MatchBand {
                    below:   60.0,
                    ceiling: 70.0,
                },
                MatchBand {
                    below:   75.0,
                    ceiling: 80.0,
                },
            ],
        }
    }
}

/// One cap that fired, with its human-readable justification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedCap {
    /// Percentage ceiling the cap imposes.
    pub ceiling: f64,
    /// Why the cap applies.
    pub reason:  String,
}

/// The merger's output: the bounded score and the full cap trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedScore {
    /// Final score in points, clamped to `[0, total]`.
    pub final_points: f64,
    /// Weighted percentage before caps and penalties.
    pub raw_percent:  f64,
    /// Every cap that fired.
    pub caps:         Vec<AppliedCap>,
    /// Penalty points subtracted after caps.
    pub penalty:      f64,
}

/// The score merger.
pub struct ScoreMerger<'a> {
    /// Merge configuration.
    config: &'a ScoreConfig,
    /// The rubric whose total the score is rescaled to.
    rubric: &'a Rubric,
}

impl<'a> ScoreMerger<'a> {
    /// Creates a merger for the given configuration and rubric.
    pub fn new(config: &'a ScoreConfig, rubric: &'a Rubric) -> Self {
        Self { config, rubric }
    }

    /// Merges the deterministic signals into the final bounded score.
    ///
    /// `execution_error_count` is the number of error outputs captured in
    /// the document-to-grade; `penalty` is the normalizer's total.
    pub fn merge(
        &self,
        validation: &ValidationResult,
        comparison: &OutputComparison,
        execution_error_count: usize,
        penalty: f64,
    ) -> MergedScore {
        let weights = &self.config.weights;

        // When comparison is unavailable its weight reallocates to zero and
        // the base score stands alone; it is never treated as a 0% match.
        let raw_percent = match comparison.match_rate() {
            Some(rate) => {
                let total_weight = weights.validation + weights.output;
                (validation.base_score * weights.validation + rate * weights.output) / total_weight
            }
            None => validation.base_score,
        };

        let caps = self.collect_caps(validation, comparison, execution_error_count);
        let capped_percent = caps
            .iter()
            .map(|c| c.ceiling)
            .fold(raw_percent, f64::min);

        for cap in &caps {
            tracing::info!(ceiling = cap.ceiling, reason = %cap.reason, "score cap applied");
        }

        let total = self.rubric.total_points;
        let points = capped_percent / 100.0 * total - penalty;

        MergedScore {
            final_points: points.clamp(0.0, total),
            raw_percent,
            caps,
            penalty,
        }
    }

    /// Evaluates every cap condition independently.
    fn collect_caps(
        &self,
        validation: &ValidationResult,
        comparison: &OutputComparison,
        execution_error_count: usize,
    ) -> Vec<AppliedCap> {
        let mut caps = Vec::new();

        if execution_error_count > 0 {
            caps.push(AppliedCap {
                ceiling: self.config.execution_error_cap,
                reason:  format!(
                    "{execution_error_count} execution error(s) in captured outputs"
                ),
            });
        }

        let missing = validation.missing_required_count();
        if missing > self.config.missing_variable_allowance {
            caps.push(AppliedCap {
                ceiling: self.config.missing_variable_cap,
                reason:  format!("{missing} required variable(s) missing"),
            });
        }

        if let Some(rate) = comparison.match_rate() {
            let band = self
                .config
                .match_bands
                .iter()
                .filter(|band| rate < band.below)
                .min_by(|a, b| a.ceiling.total_cmp(&b.ceiling));
            if let Some(band) = band {
                caps.push(AppliedCap {
                    ceiling: band.ceiling,
                    reason:  format!(
                        "output match rate {rate:.1}% is below {:.0}%",
                        band.below
                    ),
                });
            }
        }

        caps
    }
}
