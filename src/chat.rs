//! The chat pipeline behind `POST /api/chat/send`.
//!
//! validate → tier → rate limit → daily quota → conversation → mask PII →
//! intents → context → history → prompt → provider chain → persist →
//! usage/analytics. Each stage that can reject maps to a distinct
//! [`ChatError`] and from there to an API error code.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use vetchat_core::intent::{detect_intents, is_crisis, Intent};
use vetchat_core::models::{Conversation, Message, Role, User};
use vetchat_core::pii;
use vetchat_core::prompt::{build_prompt, conversation_title, PromptInput, CRISIS_LINE};
use vetchat_core::store::Store;
use vetchat_core::tier::{Tier, TierConfig};

use crate::context::retrieve_context;
use crate::crypto::{CipherError, MessageCipher};
use crate::error::{ApiError, ErrorCode};
use crate::llm::{ChainCompletion, CompletionRequest, ProviderChain};
use crate::rate_limit::RateLimiter;
use crate::usage::{quota_status, record_exchange, ExchangeRecord, QuotaStatus};

pub const RATE_WINDOW: Duration = Duration::from_secs(60);

const FALLBACK_REPLY: &str = "I'm having trouble reaching my assistant service right now. \
Please try again in a few minutes. For benefits questions you can also call the VA at 1-800-698-2411.";

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessage {
    pub message: String,
    #[serde(default, alias = "conversationId")]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub conversation_id: String,
    pub message: String,
    pub intents: Vec<Intent>,
    pub crisis: bool,
    pub provider: Option<String>,
    pub degraded: bool,
    pub usage: QuotaStatus,
    pub tier: Tier,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("message is longer than {max} characters")]
    TooLong { max: usize },
    #[error("too many requests")]
    RateLimited { retry_after_secs: u64 },
    #[error("daily message limit reached")]
    DailyLimit(QuotaStatus),
    #[error("conversation not found")]
    ConversationNotFound,
    #[error("conversation belongs to another user")]
    NotOwner,
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::EmptyMessage => ApiError::bad_request("Message must not be empty."),
            ChatError::TooLong { max } => ApiError::new(
                ErrorCode::MessageTooLong,
                format!("Message is longer than {max} characters for your plan."),
            )
            .with_field("max_chars", max),
            ChatError::RateLimited { retry_after_secs } => ApiError::new(
                ErrorCode::RateLimited,
                format!("Too many requests. Retry in {retry_after_secs}s."),
            )
            .with_retry_after(retry_after_secs),
            ChatError::DailyLimit(status) => {
                let retry_after = (status.reset_at - Utc::now()).num_seconds().max(1) as u64;
                ApiError::new(
                    ErrorCode::DailyLimitReached,
                    "You've reached today's message limit. It resets at midnight UTC.",
                )
                .with_retry_after(retry_after)
                .with_field("limit", status.limit)
                .with_field("used", status.used)
                .with_field("reset_at", status.reset_at.to_rfc3339())
            }
            ChatError::ConversationNotFound => ApiError::not_found("Conversation not found."),
            ChatError::NotOwner => {
                ApiError::forbidden("You do not have access to this conversation.")
            }
            ChatError::Cipher(e) => ApiError::internal(anyhow::Error::new(e)),
            ChatError::Store(e) => ApiError::internal(e),
        }
    }
}

/// Generation settings shared by every request.
#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn Store>,
    chain: Arc<ProviderChain>,
    limiter: Arc<RateLimiter>,
    cipher: Option<MessageCipher>,
    settings: GenerationSettings,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn Store>,
        chain: Arc<ProviderChain>,
        limiter: Arc<RateLimiter>,
        cipher: Option<MessageCipher>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            store,
            chain,
            limiter,
            cipher,
            settings,
        }
    }

    fn seal(&self, text: &str) -> Result<String, ChatError> {
        match &self.cipher {
            Some(cipher) => Ok(cipher.seal(text)?),
            None => Ok(text.to_string()),
        }
    }

    /// Decrypt stored content. Envelopes are only opened when a key is
    /// configured; otherwise they are dropped from history.
    pub fn open(&self, stored: &str) -> Option<String> {
        match &self.cipher {
            Some(cipher) => match cipher.open(stored) {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecryptable message");
                    None
                }
            },
            None if MessageCipher::is_sealed(stored) => None,
            None => Some(stored.to_string()),
        }
    }

    pub async fn send(&self, user: &User, request: SendMessage) -> Result<ChatReply, ChatError> {
        let text = request.message.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let tier_config: &TierConfig = Tier::from_status(&user.subscription_status).config();
        if text.chars().count() > tier_config.max_message_chars {
            return Err(ChatError::TooLong {
                max: tier_config.max_message_chars,
            });
        }

        self.limiter
            .check(
                &format!("user:{}", user.id),
                tier_config.requests_per_minute,
                RATE_WINDOW,
            )
            .await
            .map_err(|limited| ChatError::RateLimited {
                retry_after_secs: limited.retry_after_secs,
            })?;

        let now = Utc::now();
        let quota = quota_status(self.store.as_ref(), &user.id, tier_config, now).await;
        if quota.is_exhausted() {
            tracing::info!(user_id = %user.id, used = quota.used, "daily limit reached");
            return Err(ChatError::DailyLimit(quota));
        }

        let masked = pii::mask(text);
        if !masked.is_clean() {
            tracing::info!(findings = ?masked.findings, "masked PII in user message");
        }

        let conversation = self
            .load_or_create_conversation(user, request.conversation_id.as_deref(), &masked.text)
            .await?;

        let intents = detect_intents(&masked.text);
        let crisis = is_crisis(&intents);
        let context =
            retrieve_context(self.store.as_ref(), &intents, &masked.text, tier_config).await;

        let history: Vec<Message> = if tier_config.history_messages == 0 {
            Vec::new()
        } else {
            self.store
                .recent_messages(&conversation.id, tier_config.history_messages)
                .await?
                .into_iter()
                .filter_map(|mut m| {
                    m.content = self.open(&m.content)?;
                    Some(m)
                })
                .collect()
        };

        let prompt = build_prompt(&PromptInput {
            tier: tier_config,
            intents: &intents,
            context: &context,
            history: &history,
            user_message: &masked.text,
            user_name: user.name.as_deref(),
        });

        let user_message = Message::new(
            &conversation.id,
            &user.id,
            Role::User,
            self.seal(&masked.text)?,
        );
        self.store.append_message(&user_message).await?;

        let started = Instant::now();
        let request = CompletionRequest {
            messages: prompt,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            prefer_advanced: tier_config.features.advanced_model,
        };
        let outcome = self.complete(request, tier_config).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (reply_text, provider, degraded, failure_detail) = match outcome {
            Ok(done) => (done.completion.content, Some(done.provider), false, None),
            Err(detail) => (fallback_reply(crisis), None, true, Some(detail)),
        };

        let assistant_message = Message::new(
            &conversation.id,
            &user.id,
            Role::Assistant,
            self.seal(&reply_text)?,
        );
        self.store.append_message(&assistant_message).await?;

        let at = Utc::now();
        if let Err(e) = self.store.record_message_activity(&conversation.id, at).await {
            tracing::warn!(conversation_id = %conversation.id, error = %format!("{e:#}"), "conversation update failed");
        }
        if let Err(e) = self.store.touch_user(&user.id, at).await {
            tracing::debug!(error = %format!("{e:#}"), "touch_user failed");
        }

        let counted = record_exchange(
            self.store.as_ref(),
            ExchangeRecord {
                user_id: &user.id,
                tier: tier_config,
                intents: &intents,
                provider: provider.as_deref(),
                latency_ms,
                succeeded: !degraded,
                detail: failure_detail,
            },
            now,
        )
        .await;
        let usage = QuotaStatus::new(
            counted.unwrap_or(quota.used),
            tier_config.daily_message_limit,
            now,
        );

        tracing::info!(
            user_id = %user.id,
            tier = tier_config.tier.as_str(),
            intents = ?intents.iter().map(|i| i.as_str()).collect::<Vec<_>>(),
            provider = provider.as_deref().unwrap_or("none"),
            degraded,
            latency_ms,
            message = %pii::for_log(&masked.text),
            "chat exchange"
        );

        Ok(ChatReply {
            conversation_id: conversation.id,
            message: reply_text,
            intents,
            crisis,
            provider,
            degraded,
            usage,
            tier: tier_config.tier,
        })
    }

    /// Run the chain. Tiers with `priority_fallback` get a second pass on
    /// the standard models when the advanced pass fails. Without any
    /// advanced model configured the second pass would repeat the first.
    async fn complete(
        &self,
        request: CompletionRequest,
        tier: &TierConfig,
    ) -> Result<ChainCompletion, String> {
        let second_pass = tier.features.priority_fallback
            && request.prefer_advanced
            && self.chain.has_advanced_model();
        match self.chain.complete(&request).await {
            Ok(done) => Ok(done),
            Err(first) if second_pass => {
                tracing::warn!(error = %first, "advanced models failed; retrying on standard models");
                let retry = CompletionRequest {
                    prefer_advanced: false,
                    ..request
                };
                self.chain.complete(&retry).await.map_err(|e| {
                    tracing::error!(error = %e, "provider chain exhausted");
                    format!("{first}; {e}")
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "provider chain exhausted");
                Err(e.to_string())
            }
        }
    }

    async fn load_or_create_conversation(
        &self,
        user: &User,
        conversation_id: Option<&str>,
        first_message: &str,
    ) -> Result<Conversation, ChatError> {
        match conversation_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => {
                let conversation = self
                    .store
                    .get_conversation(id)
                    .await?
                    .ok_or(ChatError::ConversationNotFound)?;
                if !conversation.is_owned_by(&user.id) {
                    tracing::warn!(user_id = %user.id, conversation_id = id, "conversation ownership mismatch");
                    return Err(ChatError::NotOwner);
                }
                Ok(conversation)
            }
            None => Ok(self
                .store
                .create_conversation(&Conversation::new(
                    &user.id,
                    conversation_title(first_message),
                ))
                .await?),
        }
    }

    /// Messages of a conversation the user owns, decrypted, oldest first.
    pub async fn conversation_messages(
        &self,
        user: &User,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ChatError> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(ChatError::ConversationNotFound)?;
        if !conversation.is_owned_by(&user.id) {
            return Err(ChatError::NotOwner);
        }
        Ok(self
            .store
            .recent_messages(conversation_id, limit)
            .await?
            .into_iter()
            .filter_map(|mut m| {
                m.content = self.open(&m.content)?;
                Some(m)
            })
            .collect())
    }
}

pub fn fallback_reply(crisis: bool) -> String {
    if crisis {
        format!("{CRISIS_LINE}. You don't have to go through this alone.\n\n{FALLBACK_REPLY}")
    } else {
        FALLBACK_REPLY.to_string()
    }
}
