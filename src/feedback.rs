#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Feedback orchestrator.
//!
//! Builds two prompts — technical/code-analysis and narrative/feedback-
//! synthesis — grounded in the deterministic findings, dispatches them to
//! two independent model calls issued concurrently (the pipeline's only
//! concurrency point), and parses the structured responses. Either call may
//! fail; the affected field degrades to an explicit unavailable marker and
//! the numeric score is never touched.

use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    compare::OutputComparison,
    config::PromptBundle,
    llm::{GenerationParams, LanguageModel, complete_with_retry},
    notebook::ExtractedSource,
    rubric::Rubric,
    sanitize,
    validate::ValidationResult,
};

/// Prompt truncation length for generated feedback payloads.
const PROMPT_TRUNCATE: usize = 60_000;

/// One parsed feedback field, or the explicit record of why it is missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback<T> {
    /// The model produced a parseable response.
    Available(T),
    /// The call failed or the response could not be parsed.
    Unavailable {
        /// Why the field is missing. Shown to the instructor, never papered
        /// over with fabricated text.
        reason: String,
    },
}

impl<T> Feedback<T> {
    /// Returns true when the field carries model output.
    pub fn is_available(&self) -> bool {
        matches!(self, Feedback::Available(_))
    }

    /// Returns the unavailability reason, if any.
    pub fn unavailable_reason(&self) -> Option<&str> {
        match self {
            Feedback::Available(_) => None,
            Feedback::Unavailable { reason } => Some(reason.as_str()),
        }
    }
}

/// Structured technical feedback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalFeedback {
    /// Specific, evidence-grounded findings.
    #[serde(default)]
    pub findings: Vec<String>,
    /// Short summary addressed to the student.
    #[serde(default)]
    pub summary:  String,
}

impl TechnicalFeedback {
    /// Scrubs reasoning artifacts from every free-text field.
    fn scrubbed(self) -> Self {
        Self {
            findings: self
                .findings
                .into_iter()
                .map(|f| sanitize::scrub_artifacts(&f))
                .filter(|f| !f.is_empty())
                .collect(),
            summary:  sanitize::scrub_artifacts(&self.summary),
        }
    }
}

/// One narrative feedback section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeSection {
    /// Short topic label.
    #[serde(default)]
    pub heading:  String,
    /// Feedback addressed to the student.
    #[serde(default)]
    pub comments: String,
}

/// Structured narrative feedback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeFeedback {
    /// Feedback sections, in response order.
    #[serde(default)]
    pub sections: Vec<NarrativeSection>,
}

impl NarrativeFeedback {
    /// Scrubs reasoning artifacts from every free-text field.
    fn scrubbed(self) -> Self {
        Self {
            sections: self
                .sections
                .into_iter()
                .map(|s| NarrativeSection {
                    heading:  sanitize::scrub_artifacts(&s.heading),
                    comments: sanitize::scrub_artifacts(&s.comments),
                })
                .collect(),
        }
    }
}

/// Both feedback fields for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackBundle {
    /// Technical/code-analysis feedback.
    pub technical: Feedback<TechnicalFeedback>,
    /// Narrative/reflection feedback.
    pub narrative: Feedback<NarrativeFeedback>,
}

impl FeedbackBundle {
    /// Marks both fields unavailable for the same reason.
    pub fn unavailable(reason: &str) -> Self {
        Self {
            technical: Feedback::Unavailable {
                reason: reason.to_string(),
            },
            narrative: Feedback::Unavailable {
                reason: reason.to_string(),
            },
        }
    }
}

/// Everything the prompts embed: deterministic evidence plus both sides'
/// code and narrative.
pub struct FeedbackContext<'a> {
    /// Student extraction.
    pub student:    &'a ExtractedSource,
    /// Reference extraction, when a reference solution exists.
    pub reference:  Option<&'a ExtractedSource>,
    /// The rubric being graded against.
    pub rubric:     &'a Rubric,
    /// The validator's findings, embedded verbatim.
    pub validation: &'a ValidationResult,
    /// The comparator's findings, embedded verbatim.
    pub comparison: &'a OutputComparison,
}

/// The feedback orchestrator.
pub struct FeedbackOrchestrator<'a, M> {
    /// The model capability; `None` degrades both fields.
    model:   Option<&'a M>,
    /// Prompt templates.
    prompts: &'a PromptBundle,
    /// Generation parameters for both calls.
    params:  &'a GenerationParams,
    /// Per-call timeout.
    timeout: Duration,
}

impl<'a, M: LanguageModel> FeedbackOrchestrator<'a, M> {
    /// Creates an orchestrator.
    pub fn new(
        model: Option<&'a M>,
        prompts: &'a PromptBundle,
        params: &'a GenerationParams,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            prompts,
            params,
            timeout,
        }
    }

    /// Builds both prompts and runs the two model calls concurrently.
    pub async fn generate(&self, ctx: &FeedbackContext<'_>) -> FeedbackBundle {
        let Some(model) = self.model else {
            return FeedbackBundle::unavailable("no language model configured");
        };

        let technical_prompt = self.technical_prompt(ctx);
        let narrative_prompt = self.narrative_prompt(ctx);

        // Independent calls, no shared state: wall-clock cost is the max of
        // the two, not the sum.
        let (technical, narrative) = futures::join!(
            self.call::<TechnicalFeedback>(model, &technical_prompt),
            self.call::<NarrativeFeedback>(model, &narrative_prompt),
        );

        FeedbackBundle {
            technical: match technical {
                Feedback::Available(t) => Feedback::Available(t.scrubbed()),
                unavailable => unavailable,
            },
            narrative: match narrative {
                Feedback::Available(n) => Feedback::Available(n.scrubbed()),
                unavailable => unavailable,
            },
        }
    }

    /// Runs one model call and parses its structured response.
    async fn call<T: DeserializeOwned>(&self, model: &M, prompt: &str) -> Feedback<T> {
        let raw = match complete_with_retry(
            model,
            self.prompts.system_message(),
            prompt,
            self.params,
            self.timeout,
        )
        .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "feedback call degraded to unavailable");
                return Feedback::Unavailable {
                    reason: e.to_string(),
                };
            }
        };

        match parse_response::<T>(prompt, &raw) {
            Ok(parsed) => Feedback::Available(parsed),
            Err(e) => {
                tracing::warn!(error = %e, "feedback response unparseable");
                Feedback::Unavailable {
                    reason: format!("response could not be parsed: {e}"),
                }
            }
        }
    }

    /// Fills the technical prompt template.
    fn technical_prompt(&self, ctx: &FeedbackContext<'_>) -> String {
        let prompt = self
            .prompts
            .technical_template()
            .replace("{rubric}", &to_pretty_json(ctx.rubric))
            .replace("{validation}", &to_pretty_json(ctx.validation))
            .replace("{comparison}", &to_pretty_json(ctx.comparison))
            .replace("{student_code}", &ctx.student.code_text)
            .replace(
                "{reference_code}",
                ctx.reference
                    .map(|r| r.code_text.as_str())
                    .unwrap_or("(no reference solution supplied)"),
            );
        truncate_prompt(prompt)
    }

    /// Fills the narrative prompt template.
    fn narrative_prompt(&self, ctx: &FeedbackContext<'_>) -> String {
        let prompt = self
            .prompts
            .narrative_template()
            .replace("{rubric}", &to_pretty_json(ctx.rubric))
            .replace("{validation}", &to_pretty_json(ctx.validation))
            .replace("{student_narrative}", &ctx.student.narrative_text)
            .replace(
                "{reference_narrative}",
                ctx.reference
                    .map(|r| r.narrative_text.as_str())
                    .unwrap_or("(no reference solution supplied)"),
            );
        truncate_prompt(prompt)
    }
}

/// Strips backend quirks from the raw response and deserializes the single
/// JSON object inside it.
fn parse_response<T: DeserializeOwned>(prompt: &str, raw: &str) -> anyhow::Result<T> {
    let cleaned = sanitize::strip_echoed_prompt(raw, prompt);
    let json = sanitize::extract_json_object(&cleaned)
        .ok_or_else(|| anyhow::anyhow!("no JSON object found in response"))?;
    serde_json::from_str(json).map_err(Into::into)
}

/// Serializes evidence for embedding into a prompt.
fn to_pretty_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

/// Truncates an assembled prompt to the payload limit.
fn truncate_prompt(mut prompt: String) -> String {
    if prompt.len() > PROMPT_TRUNCATE {
        prompt.truncate(PROMPT_TRUNCATE);
        prompt.push_str("...[TRUNCATED]");
    }
    prompt
}
