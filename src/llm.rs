#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Language-model capability.
//!
//! The grading core treats the model as opaque: given a prompt it returns
//! text. Each call carries its own timeout and is retried at most once
//! before the caller degrades the affected feedback field to unavailable.

use std::{future::Future, time::Duration};

use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client as OpenAIClient,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
};
use tokio::time::timeout;

use crate::config::OpenAiEnv;

/// Generation parameters forwarded with every completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens the model may produce.
    pub max_tokens:  u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            max_tokens:  2048,
        }
    }
}

/// Capability contract for text completion.
pub trait LanguageModel {
    /// Sends one system + user prompt pair and returns the completion text.
    fn complete(
        &self,
        system: &str,
        user: &str,
        params: &GenerationParams,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// OpenAI-compatible chat-completions backend.
pub struct OpenAiModel {
    /// The configured API client.
    client: OpenAIClient<OpenAIConfig>,
    /// Model identifier for requests.
    model:  String,
}

impl OpenAiModel {
    /// Builds a model client from environment-sourced credentials.
    pub fn from_env(env: &OpenAiEnv) -> Self {
        let client = OpenAIClient::with_config(
            OpenAIConfig::new()
                .with_api_base(env.api_base())
                .with_api_key(env.api_key()),
        );
        Self {
            client,
            model: env.model().to_string(),
        }
    }
}

impl LanguageModel for OpenAiModel {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        params: &GenerationParams,
    ) -> Result<String> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system.to_string())
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user.to_string())
                .build()?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(params.temperature)
            .max_completion_tokens(params.max_tokens)
            .build()?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .context("chat completion request failed")?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| anyhow!("model response contained no content"))
    }
}

/// Runs one completion under `limit`, retrying exactly once on failure or
/// timeout. A second failure is returned to the caller, which must degrade
/// the affected feedback field rather than fabricate text.
pub async fn complete_with_retry<M: LanguageModel>(
    model: &M,
    system: &str,
    user: &str,
    params: &GenerationParams,
    limit: Duration,
) -> Result<String> {
    match timeout(limit, model.complete(system, user, params)).await {
        Ok(Ok(text)) => return Ok(text),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "model call failed, retrying once");
        }
        Err(_) => {
            tracing::warn!(limit_secs = limit.as_secs(), "model call timed out, retrying once");
        }
    }

    match timeout(limit, model.complete(system, user, params)).await {
        Ok(result) => result.context("model call failed after retry"),
        Err(_) => Err(anyhow!("model call timed out twice")),
    }
}
