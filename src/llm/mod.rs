//! LLM provider abstraction and the fallback chain.
//!
//! Defines the [`ChatProvider`] trait and concrete implementations:
//! - **[`OpenAiCompatibleProvider`]**: OpenAI chat completions; also used for
//!   Perplexity, which speaks the same wire format.
//! - **[`AnthropicProvider`]**: Claude messages API.
//!
//! [`ProviderChain`] tries providers in configured order and returns the
//! first successful completion.
//!
//! # Retry Strategy
//!
//! Each provider call goes through [`post_json_with_retry`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 500ms, 1s, 2s, 4s, ... (capped at 2^5 × 500ms)

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiCompatibleProvider;

use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use vetchat_core::prompt::ChatMessage;

use crate::config::Config;
use crate::retry::{backoff_delay, is_retryable};

/// Parameters for one completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Use the provider's advanced model when it has one.
    pub prefer_advanced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider label, e.g. `"openai"`.
    fn name(&self) -> &str;

    /// Default model identifier.
    fn model(&self) -> &str;

    /// Whether `prefer_advanced` switches this provider to another model.
    fn has_advanced_model(&self) -> bool {
        false
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

/// Shared HTTP settings for provider clients.
#[derive(Clone)]
pub struct HttpSettings {
    pub client: reqwest::Client,
    pub max_retries: u32,
}

impl HttpSettings {
    pub fn new(timeout_secs: u64, max_retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            max_retries,
        })
    }
}

/// POST a JSON body with retry/backoff and return the parsed JSON response.
pub(crate) async fn post_json_with_retry(
    http: &HttpSettings,
    label: &str,
    url: &str,
    headers: &[(&str, String)],
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=http.max_retries {
        if attempt > 0 {
            let delay = backoff_delay(attempt);
            tracing::debug!(provider = label, attempt, ?delay, "retrying provider call");
            tokio::time::sleep(delay).await;
        }

        let mut req = http.client.post(url).json(body);
        for (name, value) in headers {
            req = req.header(*name, value);
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return Ok(json);
                }

                let body_text = response.text().await.unwrap_or_default();
                if is_retryable(status) {
                    last_err = Some(anyhow!("{label} API error {status}: {body_text}"));
                    continue;
                }

                bail!("{label} API error {status}: {body_text}");
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{label} request failed after retries")))
}

/// A successful chain result.
#[derive(Debug, Clone)]
pub struct ChainCompletion {
    pub provider: String,
    pub completion: Completion,
    pub latency: Duration,
}

/// Error after every provider in the chain failed.
#[derive(Debug, thiserror::Error)]
#[error("all LLM providers failed: {}", .failures.join("; "))]
pub struct ChainExhausted {
    pub failures: Vec<String>,
}

/// Ordered list of providers; the first success wins.
#[derive(Default)]
pub struct ProviderChain {
    providers: Vec<Box<dyn ChatProvider>>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, provider: Box<dyn ChatProvider>) {
        self.providers.push(provider);
    }

    pub fn with(mut self, provider: Box<dyn ChatProvider>) -> Self {
        self.push(provider);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn has_advanced_model(&self) -> bool {
        self.providers.iter().any(|p| p.has_advanced_model())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<ChainCompletion, ChainExhausted> {
        let mut failures = Vec::new();
        for provider in &self.providers {
            let started = Instant::now();
            match provider.complete(request).await {
                Ok(completion) => {
                    tracing::info!(
                        provider = provider.name(),
                        model = %completion.model,
                        latency_ms = started.elapsed().as_millis() as u64,
                        "completion succeeded"
                    );
                    return Ok(ChainCompletion {
                        provider: provider.name().to_string(),
                        completion,
                        latency: started.elapsed(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        provider = provider.name(),
                        error = %format!("{e:#}"),
                        "provider failed; trying next"
                    );
                    failures.push(format!("{}: {e}", provider.name()));
                }
            }
        }
        if failures.is_empty() {
            failures.push("no providers configured".to_string());
        }
        Err(ChainExhausted { failures })
    }
}

/// Build the provider chain from `[llm]`: the primary provider first, then
/// fallbacks in order. Providers without an API key are skipped with a
/// warning; `disabled` contributes nothing.
pub fn create_chain(config: &Config) -> Result<ProviderChain> {
    let llm = &config.llm;
    let http = HttpSettings::new(llm.timeout_secs, llm.max_retries)?;
    let mut chain = ProviderChain::new();
    let mut seen: Vec<&str> = Vec::new();

    for name in std::iter::once(&llm.provider).chain(llm.fallbacks.iter()) {
        if seen.contains(&name.as_str()) {
            continue;
        }
        seen.push(name);

        let secrets = &config.secrets;
        let key = match name.as_str() {
            "disabled" => continue,
            "openai" => secrets.openai_api_key.clone(),
            "anthropic" => secrets.anthropic_api_key.clone(),
            "perplexity" => secrets.perplexity_api_key.clone(),
            other => bail!("Unknown llm provider: {}", other),
        };
        let Some(key) = key else {
            tracing::warn!(provider = %name, "no API key configured; provider skipped");
            continue;
        };

        let provider: Box<dyn ChatProvider> = match name.as_str() {
            "openai" => Box::new(OpenAiCompatibleProvider::openai(
                http.clone(),
                &llm.openai_base_url,
                key,
                &llm.model,
                llm.premium_model.clone(),
            )),
            "perplexity" => Box::new(OpenAiCompatibleProvider::perplexity(
                http.clone(),
                &llm.perplexity_base_url,
                key,
                &llm.perplexity_model,
            )),
            _ => Box::new(AnthropicProvider::new(
                http.clone(),
                &llm.anthropic_base_url,
                key,
                &llm.anthropic_model,
            )),
        };
        chain.push(provider);
    }

    Ok(chain)
}
