use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::collections::BTreeMap;

/// A field clients may send as either a JSON number or a string. Both forms
/// normalize to the same canonical string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawStrInt")]
pub struct StrInt(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStrInt {
    Int(i64),
    Str(String),
}

impl From<RawStrInt> for StrInt {
    fn from(raw: RawStrInt) -> Self {
        match raw {
            RawStrInt::Int(n) => StrInt(n.to_string()),
            RawStrInt::Str(s) => StrInt(s.trim().to_string()),
        }
    }
}

impl StrInt {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Body of `POST /run`.
#[derive(Debug, Deserialize)]
pub struct RunPayload {
    pub code: String,
    pub language_id: StrInt,
    #[serde(default)]
    pub args: Option<String>,
    #[serde(default)]
    pub timeout: Option<StrInt>,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
}

impl RunPayload {
    /// Requested timeout in seconds; absent or empty means `0`.
    pub fn timeout_secs(&self) -> Option<u64> {
        match &self.timeout {
            None => Some(0),
            Some(t) if t.as_str().is_empty() => Some(0),
            Some(t) => t.as_str().parse().ok(),
        }
    }
}

/// Names the sandbox profile strips or sets itself.
pub const RESERVED_ENV: &[&str] = &["container"];

/// Environment variable names accepted from callers.
pub fn valid_env_name(name: &str) -> bool {
    if RESERVED_ENV.contains(&name) {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Everything the HTTP surface can answer with besides a result.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("unsupported media type")]
    UnsupportedMediaType,
    #[error("invalid request format")]
    InvalidRequest,
    #[error("invalid value for parameter language_id, must be one of: {0}")]
    InvalidLanguage(String),
    #[error("invalid value for parameter code, must be a base64 encoded string")]
    InvalidCode,
    #[error("invalid value for parameter timeout, must be a non-negative integer")]
    InvalidTimeout,
    #[error("invalid value for parameter env, names must match [A-Za-z_][A-Za-z0-9_]* and not be reserved")]
    InvalidEnv,
    #[error("forbidden")]
    Forbidden,
    #[error("you are sending too many requests")]
    RateLimited,
    #[error("internal server error")]
    Internal,
    #[error("not found")]
    NotFound,
    #[error("method not allowed")]
    MethodNotAllowed,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::InvalidRequest
            | ApiError::InvalidLanguage(_)
            | ApiError::InvalidCode
            | ApiError::InvalidTimeout
            | ApiError::InvalidEnv => StatusCode::BAD_REQUEST,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "detail": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
