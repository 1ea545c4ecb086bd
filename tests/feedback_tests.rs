//! Tests for the feedback orchestrator: prompt grounding, response parsing
//! through the sanitizer, and per-field degradation.

use std::time::Duration;

use anyhow::Result;
use nbgrade::{
    compare::OutputComparison,
    config::GraderConfig,
    feedback::{Feedback, FeedbackContext, FeedbackOrchestrator},
    llm::{GenerationParams, LanguageModel},
    notebook::Notebook,
    rubric::Rubric,
    validate::StaticValidator,
};
use serde_json::json;

/// Model that echoes the prompt back, wraps a field in reasoning markers,
/// and pads the JSON with prose — every known quirk at once.
struct QuirkyModel;

impl LanguageModel for QuirkyModel {
    async fn complete(&self, _: &str, user: &str, _: &GenerationParams) -> Result<String> {
        let payload = if user.contains("Student narrative") {
            r#"{"sections": [{"heading": "Reflection", "comments": "<think>check rubric</think>Thoughtful answer."}]}"#
        } else {
            r#"{"findings": ["[Thinking: verify] filter() matches the reference output"], "summary": "Good work."}"#
        };
        Ok(format!("{user}\nSure! Here is the JSON you asked for:\n{payload}\nHope this helps."))
    }
}

/// Model that returns prose with no JSON in it.
struct ProseOnlyModel;

impl LanguageModel for ProseOnlyModel {
    async fn complete(&self, _: &str, _: &str, _: &GenerationParams) -> Result<String> {
        Ok("I think the submission is pretty good overall.".to_string())
    }
}

struct Fixture {
    rubric:   Rubric,
    student:  nbgrade::notebook::ExtractedSource,
    config:   GraderConfig,
}

fn fixture() -> Fixture {
    let rubric = Rubric::from_json_str(
        r#"{"assignment": "lab", "total_points": 10.0, "required_variables": ["answer"]}"#,
    )
    .expect("rubric should validate");

    let student = Notebook::from_json_str(
        &json!({"cells": [
            {"cell_type": "markdown", "source": "My answer is below."},
            {"cell_type": "code", "source": "answer <- 42", "execution_count": 1,
             "outputs": [{"output_type": "stream", "name": "stdout", "text": "[1] 42"}]}
        ]})
        .to_string(),
    )
    .expect("notebook should parse")
    .extract();

    Fixture {
        rubric,
        student,
        config: GraderConfig::default().with_model_timeout(Duration::from_secs(2)),
    }
}

#[tokio::test]
async fn quirky_responses_are_sanitized_into_clean_feedback() {
    let fx = fixture();
    let validation = StaticValidator::new(&fx.rubric).validate(&fx.student.code_text, 1.0);
    let comparison = OutputComparison::Unavailable {
        reason: "no reference solution supplied".to_string(),
    };

    let orchestrator = FeedbackOrchestrator::new(
        Some(&QuirkyModel),
        fx.config.prompts(),
        fx.config.generation(),
        fx.config.model_timeout(),
    );
    let bundle = orchestrator
        .generate(&FeedbackContext {
            student:    &fx.student,
            reference:  None,
            rubric:     &fx.rubric,
            validation: &validation,
            comparison: &comparison,
        })
        .await;

    match bundle.technical {
        Feedback::Available(technical) => {
            assert_eq!(technical.summary, "Good work.");
            // The bracketed thinking segment is scrubbed from the finding.
            assert_eq!(technical.findings, vec!["filter() matches the reference output"]);
        }
        Feedback::Unavailable { reason } => panic!("technical unavailable: {reason}"),
    }

    match bundle.narrative {
        Feedback::Available(narrative) => {
            assert_eq!(narrative.sections.len(), 1);
            assert_eq!(narrative.sections[0].comments, "Thoughtful answer.");
        }
        Feedback::Unavailable { reason } => panic!("narrative unavailable: {reason}"),
    }
}

#[tokio::test]
async fn responses_without_json_degrade_to_unavailable() {
    let fx = fixture();
    let validation = StaticValidator::new(&fx.rubric).validate(&fx.student.code_text, 1.0);
    let comparison = OutputComparison::Unavailable {
        reason: "no reference solution supplied".to_string(),
    };

    let orchestrator = FeedbackOrchestrator::new(
        Some(&ProseOnlyModel),
        fx.config.prompts(),
        fx.config.generation(),
        fx.config.model_timeout(),
    );
    let bundle = orchestrator
        .generate(&FeedbackContext {
            student:    &fx.student,
            reference:  None,
            rubric:     &fx.rubric,
            validation: &validation,
            comparison: &comparison,
        })
        .await;

    assert!(!bundle.technical.is_available());
    assert!(
        bundle
            .technical
            .unavailable_reason()
            .unwrap_or_default()
            .contains("parsed")
    );
    assert!(!bundle.narrative.is_available());
}

#[tokio::test]
async fn missing_model_degrades_both_fields_explicitly() {
    let fx = fixture();
    let validation = StaticValidator::new(&fx.rubric).validate(&fx.student.code_text, 1.0);
    let comparison = OutputComparison::Unavailable {
        reason: "no reference solution supplied".to_string(),
    };

    let orchestrator = FeedbackOrchestrator::<QuirkyModel>::new(
        None,
        fx.config.prompts(),
        fx.config.generation(),
        fx.config.model_timeout(),
    );
    let bundle = orchestrator
        .generate(&FeedbackContext {
            student:    &fx.student,
            reference:  None,
            rubric:     &fx.rubric,
            validation: &validation,
            comparison: &comparison,
        })
        .await;

    assert_eq!(
        bundle.technical.unavailable_reason(),
        Some("no language model configured")
    );
    assert_eq!(
        bundle.narrative.unavailable_reason(),
        Some("no language model configured")
    );
}
