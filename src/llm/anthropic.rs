//! Claude messages API (`POST /v1/messages`).
//!
//! System messages are lifted into the top-level `system` field; consecutive
//! messages with the same role are merged because the API requires
//! alternating turns.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use vetchat_core::prompt::{ChatMessage, ChatRole};

use super::{post_json_with_retry, ChatProvider, Completion, CompletionRequest, HttpSettings};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    http: HttpSettings,
    endpoint: String,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(http: HttpSettings, base_url: &str, api_key: String, model: &str) -> Self {
        Self {
            http,
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
        }
    }
}

/// Split into (system text, alternating turns).
fn to_anthropic_messages(messages: &[ChatMessage]) -> (String, Vec<serde_json::Value>) {
    let mut system = Vec::new();
    let mut turns: Vec<(&'static str, String)> = Vec::new();

    for msg in messages {
        let role = match msg.role {
            ChatRole::System => {
                system.push(msg.content.as_str());
                continue;
            }
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        match turns.last_mut() {
            Some((last_role, text)) if *last_role == role => {
                text.push_str("\n\n");
                text.push_str(&msg.content);
            }
            _ => turns.push((role, msg.content.clone())),
        }
    }

    // The first turn must come from the user.
    if turns.first().is_some_and(|(role, _)| *role == "assistant") {
        turns.remove(0);
    }

    let json_turns = turns
        .into_iter()
        .map(|(role, content)| serde_json::json!({ "role": role, "content": content }))
        .collect();
    (system.join("\n\n"), json_turns)
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let (system, messages) = to_anthropic_messages(&request.messages);
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature.min(1.0),
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = serde_json::Value::String(system);
        }

        let json = post_json_with_retry(
            &self.http,
            "anthropic",
            &self.endpoint,
            &[
                ("x-api-key", self.api_key.clone()),
                ("anthropic-version", API_VERSION.to_string()),
            ],
            &body,
        )
        .await?;

        let text: String = json
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| anyhow!("Invalid Claude response: missing content array"))?
            .iter()
            .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(anyhow!("Invalid Claude response: empty content"));
        }

        Ok(Completion {
            content: text.trim().to_string(),
            model: json
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or(&self.model)
                .to_string(),
            prompt_tokens: json
                .pointer("/usage/input_tokens")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
            completion_tokens: json
                .pointer("/usage/output_tokens")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
        })
    }
}
