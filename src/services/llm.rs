//! LLM phrasing for insights
//!
//! Rewrites a template insight in a warmer voice with Claude Haiku. Any
//! failure, including a slow response, keeps the template text.

use crate::config::LlmSettings;
use crate::error::{PipelineError, Result};
use crate::insight::{InsightPayload, InsightRenderer, RenderOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API message format
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: usize,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// Anthropic API response format
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    text: String,
}

pub struct LlmRenderer {
    config: LlmSettings,
    client: reqwest::Client,
    endpoint: String,
}

impl LlmRenderer {
    pub fn new(config: LlmSettings) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(PipelineError::Config("ANTHROPIC_API_KEY not set".to_string()));
        }

        Ok(Self {
            config,
            client: reqwest::Client::new(),
            endpoint: ANTHROPIC_MESSAGES_URL.to_string(),
        })
    }

    /// Point the renderer at a different messages endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn prompt(payload: &InsightPayload) -> String {
        let facts: Vec<String> = payload
            .facts
            .iter()
            .map(|(k, v)| format!("- {}: {:.2}", k, v))
            .collect();

        format!(
            r#"You write short, supportive daily insights for a mindful-eating app.

Insight type: {}
Pattern: {}
Title: {}
Draft text: {}
Facts:
{}

Rewrite the draft text in two or three warm, non-judgmental sentences.
Keep every number from the draft. Do not give medical advice.
Reply with the rewritten text only."#,
            payload.kind.as_str(),
            payload.pattern_kind.map_or("none", |k| k.as_str()),
            payload.title,
            payload.body,
            facts.join("\n")
        )
    }

    async fn call_api(&self, prompt: &str) -> Result<String> {
        debug!("Calling Anthropic API");

        let request = AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::TextGeneration(format!(
                "API request failed with status {}: {}",
                status, error_text
            )));
        }

        let api_response: AnthropicResponse = response.json().await.map_err(|e| {
            PipelineError::TextGeneration(format!("Failed to parse response: {}", e))
        })?;

        api_response
            .content
            .first()
            .map(|c| c.text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| PipelineError::TextGeneration("Empty response from API".to_string()))
    }
}

#[async_trait]
impl InsightRenderer for LlmRenderer {
    async fn render(&self, payload: &InsightPayload) -> RenderOutcome {
        let prompt = Self::prompt(payload);
        match tokio::time::timeout(self.config.timeout, self.call_api(&prompt)).await {
            Ok(Ok(text)) => RenderOutcome::Rendered(text),
            Ok(Err(e)) => {
                warn!("Insight phrasing failed, using template: {}", e);
                RenderOutcome::UseTemplate(e.to_string())
            }
            Err(_) => {
                warn!(
                    "Insight phrasing timed out after {:?}, using template",
                    self.config.timeout
                );
                RenderOutcome::UseTemplate("timeout".to_string())
            }
        }
    }
}
