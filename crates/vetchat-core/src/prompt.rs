//! Prompt assembly.
//!
//! Builds the provider-neutral message list sent to the LLM: a single system
//! message carrying persona, tier guidance and retrieved context, followed by
//! recent history and the (already masked) user message.

use serde::{Deserialize, Serialize};

use crate::intent::{is_crisis, Intent};
use crate::models::{Message, Opportunity, Resource, Role};
use crate::tier::{Tier, TierConfig};

pub const CRISIS_LINE: &str =
    "Veterans Crisis Line: dial 988 then press 1, text 838255, or chat at VeteransCrisisLine.net";

const PERSONA: &str = "You are a knowledgeable, respectful assistant helping U.S. military \
veterans and their families navigate employment, education, VA benefits, healthcare, housing, \
and community resources. Be concise and practical. Prefer the resources and opportunities \
listed below when they are relevant, and say so when you are unsure. Never ask for Social \
Security numbers, VA file numbers, or other sensitive identifiers.";

const CRISIS_BLOCK: &str = "The user may be in crisis. Respond with empathy first, encourage \
them to reach out right now, and include this information prominently: ";

/// Role of a provider-bound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl From<Role> for ChatRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
            Role::System => ChatRole::System,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Resources and opportunities retrieved for one message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievedContext {
    pub resources: Vec<Resource>,
    pub opportunities: Vec<Opportunity>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.opportunities.is_empty()
    }
}

pub struct PromptInput<'a> {
    pub tier: &'a TierConfig,
    pub intents: &'a [Intent],
    pub context: &'a RetrievedContext,
    /// Chronological; trimmed to the tier's history size here.
    pub history: &'a [Message],
    pub user_message: &'a str,
    pub user_name: Option<&'a str>,
}

pub fn build_prompt(input: &PromptInput<'_>) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(input.history.len() + 2);
    messages.push(ChatMessage::system(system_prompt(input)));

    let keep = input.tier.history_messages;
    let skip = input.history.len().saturating_sub(keep);
    for msg in input.history.iter().skip(skip) {
        if msg.role == Role::System {
            continue;
        }
        messages.push(ChatMessage {
            role: msg.role.into(),
            content: msg.content.clone(),
        });
    }

    messages.push(ChatMessage::user(input.user_message));
    messages
}

fn system_prompt(input: &PromptInput<'_>) -> String {
    let mut out = String::from(PERSONA);

    if let Some(name) = input.user_name.filter(|n| !n.trim().is_empty()) {
        out.push_str(&format!("\n\nThe user's name is {}.", name.trim()));
    }

    match input.tier.tier {
        Tier::Free => out.push_str(
            "\n\nKeep answers under 200 words and point to the most relevant resource.",
        ),
        Tier::Premium | Tier::Founder => out.push_str(
            "\n\nGive detailed, step-by-step guidance and reference specific opportunities when they fit.",
        ),
    }

    if is_crisis(input.intents) {
        out.push_str("\n\n");
        out.push_str(CRISIS_BLOCK);
        out.push_str(CRISIS_LINE);
    }

    let topics: Vec<&str> = input
        .intents
        .iter()
        .filter(|i| **i != Intent::General)
        .map(|i| i.as_str())
        .collect();
    if !topics.is_empty() {
        out.push_str(&format!("\n\nDetected topics: {}.", topics.join(", ")));
    }

    if !input.context.resources.is_empty() {
        out.push_str("\n\nRelevant resources:");
        for r in &input.context.resources {
            out.push_str(&format!("\n- {}", r.name));
            if let Some(cat) = &r.category {
                out.push_str(&format!(" [{cat}]"));
            }
            if let Some(desc) = &r.description {
                out.push_str(&format!(": {desc}"));
            }
            if let Some(phone) = &r.phone {
                out.push_str(&format!(" (phone: {phone})"));
            }
            if let Some(url) = &r.url {
                out.push_str(&format!(" <{url}>"));
            }
        }
    }

    if !input.context.opportunities.is_empty() {
        out.push_str("\n\nCurrent opportunities:");
        for o in &input.context.opportunities {
            out.push_str(&format!("\n- {}", o.title));
            if let Some(org) = &o.organization {
                out.push_str(&format!(" at {org}"));
            }
            if let Some(loc) = &o.location {
                out.push_str(&format!(" ({loc})"));
            }
            if let Some(desc) = &o.description {
                out.push_str(&format!(": {desc}"));
            }
            if let Some(url) = &o.url {
                out.push_str(&format!(" <{url}>"));
            }
        }
    }

    out
}

/// Title for a new conversation: first line, whitespace collapsed, at most
/// 60 characters.
pub fn conversation_title(text: &str) -> String {
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "New conversation".to_string();
    }
    if collapsed.chars().count() <= 60 {
        collapsed
    } else {
        let head: String = collapsed.chars().take(57).collect();
        format!("{}...", head.trim_end())
    }
}
