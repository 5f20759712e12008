//! OpenAI-compatible chat completions (`POST /v1/chat/completions`).
//!
//! Perplexity exposes the same request/response shape at
//! `POST /chat/completions`, so both share this client.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{post_json_with_retry, ChatProvider, Completion, CompletionRequest, HttpSettings};

pub struct OpenAiCompatibleProvider {
    label: &'static str,
    http: HttpSettings,
    endpoint: String,
    api_key: String,
    model: String,
    advanced_model: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn openai(
        http: HttpSettings,
        base_url: &str,
        api_key: String,
        model: &str,
        advanced_model: Option<String>,
    ) -> Self {
        Self {
            label: "openai",
            http,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
            advanced_model,
        }
    }

    pub fn perplexity(http: HttpSettings, base_url: &str, api_key: String, model: &str) -> Self {
        Self {
            label: "perplexity",
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
            advanced_model: None,
        }
    }

    fn model_for(&self, request: &CompletionRequest) -> &str {
        match (&self.advanced_model, request.prefer_advanced) {
            (Some(advanced), true) => advanced,
            _ => &self.model,
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        self.label
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn has_advanced_model(&self) -> bool {
        self.advanced_model.is_some()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let model = self.model_for(request);
        let body = serde_json::json!({
            "model": model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let json = post_json_with_retry(
            &self.http,
            self.label,
            &self.endpoint,
            &[("Authorization", format!("Bearer {}", self.api_key))],
            &body,
        )
        .await?;

        parse_response(&json, model)
    }
}

/// Extract `choices[0].message.content` and token usage.
fn parse_response(json: &serde_json::Value, requested_model: &str) -> Result<Completion> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid completion response: missing choices[0].message.content"))?;

    if content.trim().is_empty() {
        return Err(anyhow!("Invalid completion response: empty content"));
    }

    Ok(Completion {
        content: content.trim().to_string(),
        model: json
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(requested_model)
            .to_string(),
        prompt_tokens: json
            .pointer("/usage/prompt_tokens")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32),
        completion_tokens: json
            .pointer("/usage/completion_tokens")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32),
    })
}
