//! Tests for the score merger: weighting, hard caps, and the
//! caps-before-penalty-before-clamp ordering invariant.

use nbgrade::{
    compare::{ComparisonReport, OutputComparison},
    rubric::Rubric,
    score::{ScoreConfig, ScoreMerger},
    validate::{ValidationResult, VariableCheck},
};

fn rubric(total: f64) -> Rubric {
    Rubric::from_json_str(&format!(
        r#"{{"assignment": "lab", "total_points": {total}}}"#
    ))
    .expect("test rubric should validate")
}

fn validation(base_score: f64) -> ValidationResult {
    ValidationResult {
        variables: vec![],
        sections: vec![],
        execution_rate: 1.0,
        base_score,
    }
}

fn validation_missing(missing: usize, found: usize) -> ValidationResult {
    let mut variables = Vec::new();
    for i in 0..missing {
        variables.push(VariableCheck {
            name:  format!("missing_{i}"),
            found: false,
        });
    }
    for i in 0..found {
        variables.push(VariableCheck {
            name:  format!("found_{i}"),
            found: true,
        });
    }
    ValidationResult {
        variables,
        sections: vec![],
        execution_rate: 1.0,
        base_score: 100.0,
    }
}

fn compared(match_rate: f64) -> OutputComparison {
    OutputComparison::Compared(ComparisonReport {
        compared: 10,
        matched: (match_rate / 10.0).round() as usize,
        match_rate,
        discrepancies: vec![],
    })
}

fn unavailable() -> OutputComparison {
    OutputComparison::Unavailable {
        reason: "no reference solution supplied".to_string(),
    }
}

#[test]
fn caps_apply_before_penalty_and_clamp_comes_last() {
    // Two execution errors (cap 80%), match rate 30% (cap 50%), and a
    // 2-point penalty on a 100-point rubric: min(80, 50) - 2 = 48, not any
    // order that applies the penalty before the caps.
    let rubric = rubric(100.0);
    let config = ScoreConfig::default();
    let merger = ScoreMerger::new(&config, &rubric);

    let merged = merger.merge(&validation(100.0), &compared(30.0), 2, 2.0);

    assert_eq!(merged.final_points, 48.0);
    assert_eq!(merged.caps.len(), 2);
    let ceilings: Vec<f64> = merged.caps.iter().map(|c| c.ceiling).collect();
    assert!(ceilings.contains(&80.0));
    assert!(ceilings.contains(&50.0));
}

#[test]
fn perfect_signals_earn_full_points() {
    let rubric = rubric(100.0);
    let config = ScoreConfig::default();
    let merged =
        ScoreMerger::new(&config, &rubric).merge(&validation(100.0), &compared(100.0), 0, 0.0);

    assert_eq!(merged.final_points, 100.0);
    assert!(merged.caps.is_empty());
}

#[test]
fn penalty_is_subtracted_after_caps_on_fractional_rubrics() {
    // Scenario B: otherwise-perfect results on a 37.5-point rubric with a
    // 1.5-point normalizer penalty.
    let rubric = rubric(37.5);
    let config = ScoreConfig::default();
    let merged =
        ScoreMerger::new(&config, &rubric).merge(&validation(100.0), &compared(100.0), 0, 1.5);

    assert_eq!(merged.final_points, 36.0);
    assert!(merged.caps.is_empty());
}

#[test]
fn unavailable_comparison_reallocates_weight_to_base_score() {
    // Scenario C: with no reference, the base score stands alone; the
    // missing signal contributes zero weight, not a zero match rate.
    let rubric = rubric(100.0);
    let config = ScoreConfig::default();
    let merged = ScoreMerger::new(&config, &rubric).merge(&validation(80.0), &unavailable(), 0, 0.0);

    assert_eq!(merged.final_points, 80.0);
    assert!(merged.caps.is_empty());
}

#[test]
fn execution_errors_cap_the_score() {
    let rubric = rubric(100.0);
    let config = ScoreConfig::default();
    let merger = ScoreMerger::new(&config, &rubric);

    let merged = merger.merge(&validation(100.0), &compared(100.0), 1, 0.0);
    assert_eq!(merged.final_points, 80.0);
    assert_eq!(merged.caps.len(), 1);
    assert!(merged.caps[0].reason.contains("execution error"));
}

#[test]
fn missing_required_variables_beyond_allowance_cap_the_score() {
    let rubric = rubric(100.0);
    let config = ScoreConfig::default();
    let merger = ScoreMerger::new(&config, &rubric);

    // One missing variable is within the allowance.
    let one = merger.merge(&validation_missing(1, 2), &compared(100.0), 0, 0.0);
    assert!(one.caps.is_empty());

    // Two missing variables trip the 75% cap.
    let two = merger.merge(&validation_missing(2, 1), &compared(100.0), 0, 0.0);
    assert_eq!(two.caps.len(), 1);
    assert_eq!(two.final_points, 75.0);
}

#[test]
fn match_rate_bands_cap_progressively() {
    let rubric = rubric(100.0);
    let config = ScoreConfig::default();
    let merger = ScoreMerger::new(&config, &rubric);

    let low = merger.merge(&validation(100.0), &compared(30.0), 0, 0.0);
    assert_eq!(low.caps[0].ceiling, 50.0);

    let mid = merger.merge(&validation(100.0), &compared(55.0), 0, 0.0);
    assert_eq!(mid.caps[0].ceiling, 70.0);

    let high = merger.merge(&validation(100.0), &compared(70.0), 0, 0.0);
    assert_eq!(high.caps[0].ceiling, 80.0);

    let fine = merger.merge(&validation(100.0), &compared(90.0), 0, 0.0);
    assert!(fine.caps.is_empty());
}

#[test]
fn score_is_bounded_for_all_inputs() {
    let rubric = rubric(50.0);
    let config = ScoreConfig::default();
    let merger = ScoreMerger::new(&config, &rubric);

    // Penalty larger than the capped score clamps to zero, never negative.
    let floored = merger.merge(&validation(10.0), &compared(10.0), 3, 100.0);
    assert_eq!(floored.final_points, 0.0);

    // Nothing can exceed the rubric total.
    let ceiled = merger.merge(&validation(100.0), &compared(100.0), 0, 0.0);
    assert!(ceiled.final_points <= 50.0);
}

#[test]
fn caps_are_monotonic_in_defects() {
    let rubric = rubric(100.0);
    let config = ScoreConfig::default();
    let merger = ScoreMerger::new(&config, &rubric);

    let clean = merger.merge(&validation(100.0), &compared(100.0), 0, 0.0);

    // Adding an execution error never increases the score.
    let with_error = merger.merge(&validation(100.0), &compared(100.0), 1, 0.0);
    assert!(with_error.final_points <= clean.final_points);

    // A lower match rate never increases the score.
    let with_worse_match = merger.merge(&validation(100.0), &compared(70.0), 0, 0.0);
    assert!(with_worse_match.final_points <= clean.final_points);

    // An extra missing required variable never increases the score.
    let with_missing = merger.merge(&validation_missing(2, 0), &compared(100.0), 0, 0.0);
    assert!(with_missing.final_points <= clean.final_points);
}
