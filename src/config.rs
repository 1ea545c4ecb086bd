#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Grader configuration.
//!
//! Everything the pipeline consults is carried in an explicit
//! [`GraderConfig`] passed into the entry point. There is no process-wide
//! default consulted implicitly by any component below the top-level call;
//! the environment is read exactly once, in `main`, to build the optional
//! model credentials bundle.

use std::time::Duration;

use crate::{compare::ComparisonBudget, llm::GenerationParams, score::ScoreConfig};

/// Default hard wall-clock timeout for notebook execution.
const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 60;

/// Default per-call timeout for model requests.
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 90;

/// Prompt templates for feedback generation.
#[derive(Debug, Clone)]
pub struct PromptBundle {
    /// System message shared by both feedback calls.
    system_message:     String,
    /// Technical/code-analysis prompt template.
    technical_template: String,
    /// Narrative/feedback-synthesis prompt template.
    narrative_template: String,
}

impl Default for PromptBundle {
    fn default() -> Self {
        Self {
            system_message:     include_str!("prompts/system.md").to_string(),
            technical_template: include_str!("prompts/technical.md").to_string(),
            narrative_template: include_str!("prompts/narrative.md").to_string(),
        }
    }
}

impl PromptBundle {
    /// Returns the shared system message.
    pub fn system_message(&self) -> &str {
        &self.system_message
    }

    /// Returns the technical prompt template.
    pub fn technical_template(&self) -> &str {
        &self.technical_template
    }

    /// Returns the narrative prompt template.
    pub fn narrative_template(&self) -> &str {
        &self.narrative_template
    }
}

/// Configuration bundle for one grading run.
#[derive(Debug, Clone)]
pub struct GraderConfig {
    /// Score merge rule configuration.
    score:             ScoreConfig,
    /// Size budget for output comparison.
    comparison_budget: ComparisonBudget,
    /// Hard wall-clock timeout for notebook execution.
    execution_timeout: Duration,
    /// Per-call timeout for model requests.
    model_timeout:     Duration,
    /// Generation parameters for model requests.
    generation:        GenerationParams,
    /// Prompt templates.
    prompts:           PromptBundle,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            score:             ScoreConfig::default(),
            comparison_budget: ComparisonBudget::default(),
            execution_timeout: Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS),
            model_timeout:     Duration::from_secs(DEFAULT_MODEL_TIMEOUT_SECS),
            generation:        GenerationParams::default(),
            prompts:           PromptBundle::default(),
        }
    }
}

impl GraderConfig {
    /// Returns the score merge configuration.
    pub fn score(&self) -> &ScoreConfig {
        &self.score
    }

    /// Returns the comparison size budget.
    pub fn comparison_budget(&self) -> ComparisonBudget {
        self.comparison_budget
    }

    /// Returns the execution timeout.
    pub fn execution_timeout(&self) -> Duration {
        self.execution_timeout
    }

    /// Returns the per-call model timeout.
    pub fn model_timeout(&self) -> Duration {
        self.model_timeout
    }

    /// Returns the generation parameters.
    pub fn generation(&self) -> &GenerationParams {
        &self.generation
    }

    /// Returns the prompt templates.
    pub fn prompts(&self) -> &PromptBundle {
        &self.prompts
    }

    /// Returns a config with a custom execution timeout.
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Returns a config with a custom model timeout.
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    /// Returns a config with custom score merge rules.
    pub fn with_score(mut self, score: ScoreConfig) -> Self {
        self.score = score;
        self
    }
}

/// Model credentials and tuning sourced from the environment.
#[derive(Debug, Clone)]
pub struct OpenAiEnv {
    /// Base URL for the OpenAI-compatible API endpoint.
    api_base: String,
    /// API key used to authenticate requests.
    api_key:  String,
    /// Default model identifier for chat completions.
    model:    String,
}

impl OpenAiEnv {
    /// Constructs an `OpenAiEnv` from environment variables; returns `None`
    /// if any required field is missing, in which case feedback degrades to
    /// unavailable rather than failing the run.
    pub fn from_env() -> Option<Self> {
        let api_base = std::env::var("OPENAI_ENDPOINT").ok()?.trim().to_owned();
        let api_key = std::env::var("OPENAI_API_KEY").ok()?.trim().to_owned();
        let model = std::env::var("OPENAI_MODEL").ok()?.trim().to_owned();

        if api_base.is_empty() || api_key.is_empty() || model.is_empty() {
            return None;
        }

        Some(Self {
            api_base,
            api_key,
            model,
        })
    }

    /// Returns the API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Returns the API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Returns the model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }
}
