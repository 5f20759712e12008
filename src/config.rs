//! TOML configuration with environment overlays.
//!
//! Non-secret settings live in the config file; API keys, signing secrets
//! and Airtable table-name overrides come from the environment and are
//! applied by [`apply_env_overrides`] after parsing.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Secrets, never read from the file.
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Sources allowed to frame `/embed`.
    #[serde(default = "default_frame_ancestors")]
    pub frame_ancestors: Vec<String>,
    /// Use `X-Forwarded-For` as the client address for unauthenticated
    /// limits. Only safe behind a proxy that overwrites the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: default_public_url(),
            frame_ancestors: default_frame_ancestors(),
            trust_forwarded_for: false,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_frame_ancestors() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_true")]
    pub allow_guest_sessions: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl(),
            issuer: default_issuer(),
            allow_guest_sessions: true,
        }
    }
}

fn default_session_ttl() -> u64 {
    7 * 24 * 3600
}
fn default_issuer() -> String {
    "vetchat".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SecurityConfig {
    /// Encrypt message bodies at rest with `ENCRYPTION_KEY`.
    #[serde(default)]
    pub encrypt_messages: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub airtable: AirtableConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
            airtable: AirtableConfig::default(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./data/vetchat.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AirtableConfig {
    #[serde(default)]
    pub base_id: Option<String>,
    #[serde(default = "default_airtable_url")]
    pub api_url: String,
    #[serde(default = "default_airtable_timeout")]
    pub timeout_secs: u64,
    /// Retries on 429/5xx with backoff.
    #[serde(default = "default_airtable_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub tables: AirtableTables,
}

impl Default for AirtableConfig {
    fn default() -> Self {
        Self {
            base_id: None,
            api_url: default_airtable_url(),
            timeout_secs: default_airtable_timeout(),
            max_retries: default_airtable_retries(),
            tables: AirtableTables::default(),
        }
    }
}

fn default_airtable_url() -> String {
    "https://api.airtable.com".to_string()
}
fn default_airtable_timeout() -> u64 {
    15
}
fn default_airtable_retries() -> u32 {
    3
}

/// Preferred table names; discovery falls back to fuzzy matching.
#[derive(Debug, Deserialize, Clone)]
pub struct AirtableTables {
    #[serde(default = "default_users_table")]
    pub users: String,
    #[serde(default = "default_conversations_table")]
    pub conversations: String,
    #[serde(default = "default_messages_table")]
    pub messages: String,
    #[serde(default = "default_opportunities_table")]
    pub opportunities: String,
    #[serde(default = "default_resources_table")]
    pub resources: String,
    #[serde(default = "default_usage_table")]
    pub usage: String,
    #[serde(default = "default_analytics_table")]
    pub analytics: String,
}

impl Default for AirtableTables {
    fn default() -> Self {
        Self {
            users: default_users_table(),
            conversations: default_conversations_table(),
            messages: default_messages_table(),
            opportunities: default_opportunities_table(),
            resources: default_resources_table(),
            usage: default_usage_table(),
            analytics: default_analytics_table(),
        }
    }
}

fn default_users_table() -> String {
    "Users".to_string()
}
fn default_conversations_table() -> String {
    "Conversations".to_string()
}
fn default_messages_table() -> String {
    "Messages".to_string()
}
fn default_opportunities_table() -> String {
    "Opportunities".to_string()
}
fn default_resources_table() -> String {
    "Resources".to_string()
}
fn default_usage_table() -> String {
    "Usage".to_string()
}
fn default_analytics_table() -> String {
    "Analytics".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    /// Tried in order after the primary provider fails.
    #[serde(default)]
    pub fallbacks: Vec<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Used for tiers with the `advanced_model` feature.
    #[serde(default)]
    pub premium_model: Option<String>,
    #[serde(default = "default_anthropic_model")]
    pub anthropic_model: String,
    #[serde(default = "default_perplexity_model")]
    pub perplexity_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_openai_url")]
    pub openai_base_url: String,
    #[serde(default = "default_anthropic_url")]
    pub anthropic_base_url: String,
    #[serde(default = "default_perplexity_url")]
    pub perplexity_base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            fallbacks: Vec::new(),
            model: default_llm_model(),
            premium_model: None,
            anthropic_model: default_anthropic_model(),
            perplexity_model: default_perplexity_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_max_retries(),
            openai_base_url: default_openai_url(),
            anthropic_base_url: default_anthropic_url(),
            perplexity_base_url: default_perplexity_url(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_anthropic_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}
fn default_perplexity_model() -> String {
    "sonar".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    800
}
fn default_llm_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}
fn default_openai_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_anthropic_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_perplexity_url() -> String {
    "https://api.perplexity.ai".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MaintenanceConfig {
    /// Conversations idle longer than this are swept; `0` disables the sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_retention_days() -> u32 {
    180
}
fn default_sweep_interval() -> u64 {
    86_400
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Values sourced only from the environment.
#[derive(Clone, Default)]
pub struct Secrets {
    pub jwt_secret: Option<String>,
    pub encryption_key: Option<String>,
    pub airtable_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub perplexity_api_key: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn set(v: &Option<String>) -> &'static str {
            if v.is_some() {
                "<set>"
            } else {
                "<unset>"
            }
        }
        f.debug_struct("Secrets")
            .field("jwt_secret", &set(&self.jwt_secret))
            .field("encryption_key", &set(&self.encryption_key))
            .field("airtable_api_key", &set(&self.airtable_api_key))
            .field("openai_api_key", &set(&self.openai_api_key))
            .field("anthropic_api_key", &set(&self.anthropic_api_key))
            .field("perplexity_api_key", &set(&self.perplexity_api_key))
            .finish()
    }
}

impl Config {
    /// Defaults only: in-memory store, no secrets. Used by commands that can
    /// run without a config file and by tests.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

/// Layer environment values over the parsed file. `lookup` is injectable so
/// tests do not have to mutate the process environment.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    config.secrets.jwt_secret = get("JWT_SECRET");
    config.secrets.encryption_key = get("ENCRYPTION_KEY");
    config.secrets.airtable_api_key = get("AIRTABLE_API_KEY");
    config.secrets.openai_api_key = get("OPENAI_API_KEY");
    config.secrets.anthropic_api_key = get("ANTHROPIC_API_KEY");
    config.secrets.perplexity_api_key = get("PERPLEXITY_API_KEY");

    if let Some(base) = get("AIRTABLE_BASE_ID") {
        config.store.airtable.base_id = Some(base);
    }

    let tables = &mut config.store.airtable.tables;
    for (key, slot) in [
        ("AIRTABLE_USERS_TABLE", &mut tables.users),
        ("AIRTABLE_CONVERSATIONS_TABLE", &mut tables.conversations),
        ("AIRTABLE_MESSAGES_TABLE", &mut tables.messages),
        ("AIRTABLE_OPPORTUNITIES_TABLE", &mut tables.opportunities),
        ("AIRTABLE_RESOURCES_TABLE", &mut tables.resources),
        ("AIRTABLE_USAGE_TABLE", &mut tables.usage),
        ("AIRTABLE_ANALYTICS_TABLE", &mut tables.analytics),
    ] {
        if let Some(value) = get(key) {
            *slot = value;
        }
    }
}

pub fn validate(config: &Config) -> Result<()> {
    match config.store.backend.as_str() {
        "memory" | "sqlite" => {}
        "airtable" => {
            if config.store.airtable.base_id.is_none() {
                anyhow::bail!("store.airtable.base_id (or AIRTABLE_BASE_ID) is required for the airtable backend");
            }
        }
        other => anyhow::bail!(
            "Unknown store backend: '{}'. Must be memory, sqlite, or airtable.",
            other
        ),
    }

    for name in std::iter::once(&config.llm.provider).chain(config.llm.fallbacks.iter()) {
        match name.as_str() {
            "openai" | "anthropic" | "perplexity" | "disabled" => {}
            other => anyhow::bail!(
                "Unknown llm provider: '{}'. Must be openai, anthropic, perplexity, or disabled.",
                other
            ),
        }
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.max_tokens == 0 {
        anyhow::bail!("llm.max_tokens must be > 0");
    }
    if config.auth.session_ttl_secs == 0 {
        anyhow::bail!("auth.session_ttl_secs must be > 0");
    }

    match config.logging.format.as_str() {
        "pretty" | "json" => {}
        other => anyhow::bail!("Unknown logging.format: '{}'. Must be pretty or json.", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.store.backend, "memory");
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.store.airtable.tables.users, "Users");
        assert_eq!(config.maintenance.retention_days, 180);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = parse("[store]\nbackend = \"mongo\"").unwrap_err();
        assert!(err.to_string().contains("Unknown store backend"));
    }

    #[test]
    fn test_unknown_fallback_rejected() {
        let err = parse("[llm]\nfallbacks = [\"anthropic\", \"bard\"]").unwrap_err();
        assert!(err.to_string().contains("bard"));
    }

    #[test]
    fn test_airtable_requires_base() {
        assert!(parse("[store]\nbackend = \"airtable\"").is_err());
        assert!(parse("[store]\nbackend = \"airtable\"\n[store.airtable]\nbase_id = \"app123\"").is_ok());
    }

    #[test]
    fn test_temperature_bounds() {
        assert!(parse("[llm]\ntemperature = 2.5").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("JWT_SECRET", "s3cret"),
            ("AIRTABLE_BASE_ID", "appXYZ"),
            ("AIRTABLE_USERS_TABLE", "Members"),
            ("OPENAI_API_KEY", "  "),
        ]
        .into_iter()
        .collect();
        let mut config = Config::minimal();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.secrets.jwt_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.store.airtable.base_id.as_deref(), Some("appXYZ"));
        assert_eq!(config.store.airtable.tables.users, "Members");
        assert_eq!(config.store.airtable.tables.messages, "Messages");
        assert!(config.secrets.openai_api_key.is_none());
    }

    #[test]
    fn test_secrets_debug_is_redacted() {
        let mut config = Config::minimal();
        config.secrets.jwt_secret = Some("topsecret".into());
        let rendered = format!("{:?}", config.secrets);
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("<set>"));
    }
}
