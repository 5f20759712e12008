//! HTTP error contract.
//!
//! Every error response has the shape
//!
//! ```json
//! { "error": { "code": "rate_limited", "message": "Too many requests. Retry in 12s." } }
//! ```
//!
//! plus optional extra top-level fields (e.g. `reset_at` for quota errors)
//! and headers (`Retry-After`).

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};

/// Machine-readable error codes returned by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    MessageTooLong,
    Unauthorized,
    Forbidden,
    FeatureUnavailable,
    NotFound,
    RateLimited,
    DailyLimitReached,
    ServiceUnavailable,
    Internal,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::MessageTooLong => "message_too_long",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::FeatureUnavailable => "feature_unavailable",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::DailyLimitReached => "daily_limit_reached",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Internal => "internal",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::BadRequest | Self::MessageTooLong => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::FeatureUnavailable => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimited | Self::DailyLimitReached => StatusCode::TOO_MANY_REQUESTS,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Error type returned by route handlers.
#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub retry_after_secs: Option<u64>,
    pub extra: Map<String, Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after_secs: None,
            extra: Map::new(),
        }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Generic 500. The cause is logged, never echoed to the client.
    pub fn internal(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{err:#}"), "request failed");
        Self::new(ErrorCode::Internal, "Something went wrong. Please try again.")
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = self.extra;
        body.insert(
            "error".to_string(),
            serde_json::to_value(ErrorDetail {
                code: self.code.as_str(),
                message: self.message,
            })
            .unwrap_or(Value::Null),
        );

        let mut response = (self.code.status(), Json(Value::Object(body))).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::DailyLimitReached.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::MessageTooLong.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::FeatureUnavailable.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_retry_after_header() {
        let response = ApiError::new(ErrorCode::RateLimited, "slow down")
            .with_retry_after(12)
            .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "12");
    }
}
