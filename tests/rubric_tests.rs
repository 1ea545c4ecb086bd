//! Tests for rubric loading and invariant enforcement.

use nbgrade::rubric::{Rubric, RubricError, Strictness};

fn rubric_json(total: f64, sections: &str, reflection: f64) -> String {
    format!(
        r#"{{
            "assignment": "lab-03",
            "total_points": {total},
            "reflection_points": {reflection},
            "sections": {sections}
        }}"#
    )
}

#[test]
fn valid_rubric_loads() {
    let raw = rubric_json(
        20.0,
        r#"[
            {"name": "Load", "points": 10.0, "variables": ["raw_data"], "functions": ["read_csv"]},
            {"name": "Summarise", "points": 8.0, "variables": ["stats"]}
        ]"#,
        2.0,
    );
    let rubric = Rubric::from_json_str(&raw).expect("rubric should validate");
    assert_eq!(rubric.assignment, "lab-03");
    assert_eq!(rubric.sections.len(), 2);
    assert_eq!(rubric.sections[0].functions, vec!["read_csv"]);
}

#[test]
fn point_sum_mismatch_is_a_configuration_error() {
    let raw = rubric_json(
        20.0,
        r#"[{"name": "Load", "points": 10.0, "variables": ["raw_data"]}]"#,
        2.0,
    );
    let err = Rubric::from_json_str(&raw).expect_err("sum 12 != total 20");
    assert!(matches!(err, RubricError::PointSumMismatch { .. }));
}

#[test]
fn duplicate_variable_across_sections_is_rejected() {
    let raw = rubric_json(
        20.0,
        r#"[
            {"name": "Load", "points": 10.0, "variables": ["df"]},
            {"name": "Clean", "points": 10.0, "variables": ["df"]}
        ]"#,
        0.0,
    );
    let err = Rubric::from_json_str(&raw).expect_err("df claimed twice");
    match err {
        RubricError::DuplicateVariable { name, first, second } => {
            assert_eq!(name, "df");
            assert_eq!(first, "Load");
            assert_eq!(second, "Clean");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn zero_section_rubric_is_valid() {
    let raw = r#"{
        "assignment": "quiz-01",
        "total_points": 10.0,
        "required_variables": ["answer_one", "answer_two"]
    }"#;
    let rubric = Rubric::from_json_str(raw).expect("sections are optional");
    assert!(rubric.sections.is_empty());
    assert_eq!(rubric.required_variables.len(), 2);
}

#[test]
fn non_positive_total_is_rejected() {
    let raw = rubric_json(0.0, "[]", 0.0);
    let err = Rubric::from_json_str(&raw).expect_err("zero total points");
    assert!(matches!(err, RubricError::NonPositiveTotal { .. }));
}

#[test]
fn malformed_json_is_a_parse_error() {
    let err = Rubric::from_json_str("{not json").expect_err("broken JSON");
    assert!(matches!(err, RubricError::Parse(_)));
}

#[test]
fn tolerance_defaults_are_sane() {
    let raw = rubric_json(10.0, r#"[{"name": "A", "points": 10.0}]"#, 0.0);
    let rubric = Rubric::from_json_str(&raw).expect("valid rubric");
    assert_eq!(rubric.tolerance.numeric_relative, 0.01);
    assert_eq!(rubric.tolerance.strictness, Strictness::Normal);
    assert_eq!(rubric.tolerance.strictness.text_threshold(), 0.6);
    assert!(Strictness::Strict.text_threshold() > Strictness::Lenient.text_threshold());
}
