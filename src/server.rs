//! HTTP server for the chat API and the embeddable widget.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness (returns version) |
//! | `GET`  | `/health/ready` | Store ping and configured LLM providers; 503 when degraded |
//! | `POST` | `/api/session` | Start a session by email (find-or-create) or as a guest |
//! | `POST` | `/api/auth/login` | Start a session for an existing email |
//! | `GET`  | `/api/auth/me` | Current user and tier |
//! | `POST` | `/api/chat/send` | Run the chat pipeline |
//! | `GET`  | `/api/conversations` | Saved conversations (tier feature) |
//! | `GET`  | `/api/conversations/{id}/messages` | Messages of an owned conversation |
//! | `GET`  | `/api/tier` | Current tier and today's quota |
//! | `GET`  | `/api/tiers` | Static tier table |
//! | `GET`  | `/embed` | Widget page for iframes |
//! | `GET`  | `/embed.js` | Loader script that injects the iframe |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unauthorized", "message": "Sign in or start a session to continue." } }
//! ```
//!
//! See [`crate::error`] for codes. Rate and quota rejections also carry a
//! `Retry-After` header.
//!
//! # Sessions
//!
//! Handlers that need a user take an [`AuthUser`], which reads the token
//! from `Authorization: Bearer` or the `vetchat_session` cookie.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the widget and
//! third-party pages can call the API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, FromRequestParts, Path, Query, State,
    },
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use vetchat_core::models::{Conversation, Role, User};
use vetchat_core::store::Store;
use vetchat_core::tier::{Tier, TierConfig};

use crate::backend::open_store;
use crate::chat::{ChatReply, ChatService, GenerationSettings, SendMessage};
use crate::config::Config;
use crate::crypto::MessageCipher;
use crate::embed;
use crate::error::{ApiError, ErrorCode};
use crate::llm::{create_chain, ProviderChain};
use crate::maintenance::spawn_sweeper;
use crate::rate_limit::RateLimiter;
use crate::token::{Claims, SessionTokens};
use crate::usage::{quota_status, QuotaStatus};

pub const SESSION_COOKIE: &str = "vetchat_session";

/// Session creation attempts allowed per client address per minute.
const SESSION_REQUESTS_PER_MINUTE: u32 = 10;

const DEFAULT_CONVERSATION_PAGE: usize = 20;
const DEFAULT_MESSAGE_PAGE: usize = 50;
const MAX_PAGE: usize = 100;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub chain: Arc<ProviderChain>,
    pub tokens: Arc<SessionTokens>,
    pub limiter: Arc<RateLimiter>,
    pub chat: ChatService,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        chain: ProviderChain,
        tokens: SessionTokens,
        cipher: Option<MessageCipher>,
    ) -> Self {
        let chain = Arc::new(chain);
        let limiter = Arc::new(RateLimiter::new());
        let chat = ChatService::new(
            store.clone(),
            chain.clone(),
            limiter.clone(),
            cipher,
            GenerationSettings {
                temperature: config.llm.temperature,
                max_tokens: config.llm.max_tokens,
            },
        );
        Self {
            config: Arc::new(config),
            store,
            chain,
            tokens: Arc::new(tokens),
            limiter,
            chat,
        }
    }

    /// Wire everything from configuration: store backend, provider chain,
    /// session signer and (optionally) the message cipher.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let secret = config
            .secrets
            .jwt_secret
            .as_deref()
            .context("JWT_SECRET must be set to serve the API")?;
        let tokens =
            SessionTokens::new(secret, &config.auth.issuer, config.auth.session_ttl_secs)?;

        let cipher = if config.security.encrypt_messages {
            let key = config
                .secrets
                .encryption_key
                .as_deref()
                .context("ENCRYPTION_KEY must be set when security.encrypt_messages = true")?;
            Some(MessageCipher::from_encoded_key(key)?)
        } else {
            None
        };

        let store = open_store(config).await?;
        let chain = create_chain(config)?;
        if chain.is_empty() {
            tracing::warn!("no LLM providers available; replies will use the fallback message");
        }

        Ok(Self::new(config.clone(), store, chain, tokens, cipher))
    }
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    let sweeper = spawn_sweeper(
        state.store.clone(),
        state.limiter.clone(),
        config.maintenance.sweep_interval_secs,
        config.maintenance.retention_days,
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!(
        bind = %config.server.bind,
        backend = %config.store.backend,
        "vetchat listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutting down");
    })
    .await?;

    sweeper.abort();
    Ok(())
}

/// The full router; exposed so tests can drive it without a socket.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/health/ready", get(handle_ready))
        .route("/api/session", post(handle_create_session))
        .route("/api/auth/login", post(handle_login))
        .route("/api/auth/me", get(handle_me))
        .route("/api/chat/send", post(handle_send))
        .route("/api/conversations", get(handle_list_conversations))
        .route("/api/conversations/{id}/messages", get(handle_messages))
        .route("/api/tier", get(handle_tier))
        .route("/api/tiers", get(handle_tiers))
        .route("/embed", get(handle_embed))
        .route("/embed.js", get(handle_embed_js))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Extractors ============

/// An authenticated request: verified claims plus the current user record.
pub struct AuthUser {
    pub user: User,
    pub claims: Claims,
}

/// Bearer token first, then the session cookie.
fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        let mut parts = value.splitn(2, ' ');
        if let (Some(scheme), Some(token)) = (parts.next(), parts.next()) {
            if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
                return Some(token.trim().to_string());
            }
        }
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Sign in or start a session to continue."))?;
        let claims = state.tokens.verify(&token).map_err(|e| {
            tracing::debug!(error = %e, "rejected session token");
            ApiError::unauthorized("Your session is invalid or has expired.")
        })?;
        let user = state
            .store
            .get_user(&claims.sub)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Your session is no longer valid."))?;
        Ok(AuthUser { user, claims })
    }
}

/// Client address for unauthenticated limits.
pub struct ClientIp(pub String);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.config.server.trust_forwarded_for {
            let forwarded = parts
                .headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(ip) = forwarded {
                return Ok(ClientIp(ip.to_string()));
            }
        }
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(ClientIp(ip))
    }
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

// ============ Views ============

#[derive(Serialize)]
struct UserView {
    id: String,
    email: Option<String>,
    name: Option<String>,
    is_guest: bool,
    tier: Tier,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            is_guest: user.is_guest,
            tier: Tier::from_status(&user.subscription_status),
        }
    }
}

#[derive(Serialize)]
struct SessionResponse {
    token: String,
    expires_at: DateTime<Utc>,
    user: UserView,
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /health/ready ============

#[derive(Serialize)]
struct StoreHealth {
    backend: &'static str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    version: &'static str,
    store: StoreHealth,
    llm_providers: Vec<String>,
}

/// 200 when the store answers and at least one provider is configured,
/// 503 otherwise.
async fn handle_ready(State(state): State<AppState>) -> Response {
    let ping = tokio::time::timeout(Duration::from_secs(5), state.store.ping()).await;
    let store_error = match ping {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(_) => Some("store ping timed out".to_string()),
    };
    if let Some(error) = &store_error {
        tracing::warn!(error = %error, "readiness check: store unavailable");
    }

    let providers = state.chain.names();
    let healthy = store_error.is_none() && !providers.is_empty();
    let body = ReadyResponse {
        status: if healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        store: StoreHealth {
            backend: state.store.backend(),
            ok: store_error.is_none(),
            error: store_error,
        },
        llm_providers: providers,
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

// ============ POST /api/session, POST /api/auth/login ============

#[derive(Debug, Default, Deserialize)]
struct SessionRequest {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
}

/// Loose syntactic check: one `@`, non-empty local part, dotted domain.
fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

fn session_cookie(state: &AppState, token: &str) -> String {
    let secure = state.config.server.public_url.starts_with("https://");
    let same_site = if secure { "None; Secure" } else { "Lax" };
    format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite={same_site}; Max-Age={}",
        state.config.auth.session_ttl_secs
    )
}

fn session_response(state: &AppState, user: &User) -> Response {
    let issued = state.tokens.issue(&user.id, user.is_guest);
    let cookie = session_cookie(state, &issued.token);
    let body = SessionResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        user: UserView::from(user),
    };
    ([(header::SET_COOKIE, cookie)], Json(body)).into_response()
}

async fn limit_session_attempts(state: &AppState, ip: &str) -> Result<(), ApiError> {
    state
        .limiter
        .check(
            &format!("session:{ip}"),
            SESSION_REQUESTS_PER_MINUTE,
            crate::chat::RATE_WINDOW,
        )
        .await
        .map_err(|limited| {
            ApiError::new(
                ErrorCode::RateLimited,
                format!(
                    "Too many sign-in attempts. Retry in {}s.",
                    limited.retry_after_secs
                ),
            )
            .with_retry_after(limited.retry_after_secs)
        })
}

async fn handle_create_session(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    body: Result<Json<SessionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(body)?;
    limit_session_attempts(&state, &ip).await?;

    let name = request
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    let email = request
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());

    let user = match email {
        Some(email) => {
            if !is_valid_email(&email) {
                return Err(ApiError::bad_request("Email address is not valid."));
            }
            match state.store.find_user_by_email(&email).await? {
                Some(existing) => existing,
                None => {
                    let created = state
                        .store
                        .create_user(&User::registered(&email, name))
                        .await?;
                    tracing::info!(user_id = %created.id, "registered user");
                    created
                }
            }
        }
        None => {
            if !state.config.auth.allow_guest_sessions {
                return Err(ApiError::forbidden("Guest sessions are disabled."));
            }
            state.store.create_user(&User::guest(name)).await?
        }
    };

    Ok(session_response(&state, &user))
}

async fn handle_login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(body)?;
    limit_session_attempts(&state, &ip).await?;

    let email = request.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(ApiError::bad_request("Email address is not valid."));
    }
    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| ApiError::unauthorized("No account found for that email."))?;

    if let Err(e) = state.store.touch_user(&user.id, Utc::now()).await {
        tracing::debug!(error = %format!("{e:#}"), "touch_user failed");
    }
    Ok(session_response(&state, &user))
}

// ============ GET /api/auth/me ============

#[derive(Serialize)]
struct MeResponse {
    user: UserView,
    tier: &'static TierConfig,
    session_expires_at: i64,
}

async fn handle_me(auth: AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        tier: Tier::from_status(&auth.user.subscription_status).config(),
        user: UserView::from(&auth.user),
        session_expires_at: auth.claims.exp,
    })
}

// ============ POST /api/chat/send ============

async fn handle_send(
    State(state): State<AppState>,
    auth: AuthUser,
    body: Result<Json<SendMessage>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let request = json_body(body)?;
    let reply = state.chat.send(&auth.user, request).await?;
    Ok(Json(reply))
}

// ============ GET /api/conversations ============

#[derive(Debug, Default, Deserialize)]
struct PageParams {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ConversationsResponse {
    conversations: Vec<Conversation>,
}

async fn handle_list_conversations(
    State(state): State<AppState>,
    auth: AuthUser,
    query: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<ConversationsResponse>, ApiError> {
    let params = query_params(query)?;
    let tier = Tier::from_status(&auth.user.subscription_status).config();
    if !tier.features.saved_conversations {
        return Err(ApiError::new(
            ErrorCode::FeatureUnavailable,
            "Saved conversations are available on the Premium and Founder plans.",
        )
        .with_field("tier", tier.tier.as_str()));
    }
    let limit = params
        .limit
        .unwrap_or(DEFAULT_CONVERSATION_PAGE)
        .clamp(1, MAX_PAGE);
    let conversations = state
        .store
        .list_conversations(&auth.user.id, limit)
        .await?;
    Ok(Json(ConversationsResponse { conversations }))
}

// ============ GET /api/conversations/{id}/messages ============

#[derive(Serialize)]
struct MessageView {
    id: String,
    role: Role,
    content: String,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct MessagesResponse {
    conversation_id: String,
    messages: Vec<MessageView>,
}

async fn handle_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    query: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let params = query_params(query)?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_MESSAGE_PAGE)
        .clamp(1, MAX_PAGE);
    let messages = state
        .chat
        .conversation_messages(&auth.user, &id, limit)
        .await?
        .into_iter()
        .map(|m| MessageView {
            id: m.id,
            role: m.role,
            content: m.content,
            created_at: m.created_at,
        })
        .collect();
    Ok(Json(MessagesResponse {
        conversation_id: id,
        messages,
    }))
}

// ============ GET /api/tier, GET /api/tiers ============

#[derive(Serialize)]
struct TierResponse {
    tier: Tier,
    config: &'static TierConfig,
    usage: QuotaStatus,
}

async fn handle_tier(State(state): State<AppState>, auth: AuthUser) -> Json<TierResponse> {
    let config = Tier::from_status(&auth.user.subscription_status).config();
    let usage = quota_status(state.store.as_ref(), &auth.user.id, config, Utc::now()).await;
    Json(TierResponse {
        tier: config.tier,
        config,
        usage,
    })
}

#[derive(Serialize)]
struct TiersResponse {
    tiers: Vec<&'static TierConfig>,
}

async fn handle_tiers() -> Json<TiersResponse> {
    Json(TiersResponse {
        tiers: Tier::ALL.iter().map(|t| t.config()).collect(),
    })
}

// ============ GET /embed, GET /embed.js ============

async fn handle_embed(State(state): State<AppState>) -> Response {
    let policy = embed::frame_ancestors_policy(&state.config.server.frame_ancestors);
    (
        [(header::CONTENT_SECURITY_POLICY, policy)],
        Html(embed::embed_page(&state.config.server.public_url)),
    )
        .into_response()
}

async fn handle_embed_js(State(state): State<AppState>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "public, max-age=300"),
        ],
        embed::loader_script(&state.config.server.public_url),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_session_token_sources() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(session_token(&headers).as_deref(), Some("abc.def.ghi"));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; vetchat_session=tok123"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("tok123"));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(session_token(&headers), None);
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("vet@example.com"));
        assert!(!is_valid_email("vet@example"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a b@example.com"));
        assert!(!is_valid_email("a@b@example.com"));
    }
}
