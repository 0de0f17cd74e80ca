use super::types::{valid_env_name, ApiError, RunPayload};
use super::RunScope;
use crate::error::CodeboxError;
use crate::sandbox::ExecutionRequest;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine as _;
use std::sync::Arc;

pub const MASTER_KEY_HEADER: &str = "X-Master-Key";

pub async fn run(
    State(scope): State<Arc<RunScope>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let key = headers
        .get(MASTER_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
        .ok_or(ApiError::Unauthorized)?
        .to_string();
    if !authorized(&scope, key).await {
        return Err(ApiError::Unauthorized);
    }

    let mime = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if mime.split(';').next().map(str::trim) != Some("application/json") {
        return Err(ApiError::UnsupportedMediaType);
    }

    let payload: RunPayload = serde_json::from_slice(&body).map_err(|_| ApiError::InvalidRequest)?;
    let request = build_request(&scope, payload)?;

    match scope.executor.run_code(&request).await {
        Ok(result) => Ok((StatusCode::OK, Json(&*result)).into_response()),
        // already logged with the raw streams
        Err(CodeboxError::FramingViolation { .. }) => Err(ApiError::Internal),
        Err(e) => {
            tracing::error!(error = %e, "Execution failed");
            Err(ApiError::Internal)
        }
    }
}

/// Argon2 is CPU bound, so the slow path runs off the async workers.
async fn authorized(scope: &Arc<RunScope>, key: String) -> bool {
    if scope.key_store.is_cached(&key) {
        return true;
    }
    let scope = Arc::clone(scope);
    tokio::task::spawn_blocking(move || scope.key_store.check_key(&key, &scope.credentials))
        .await
        .unwrap_or(false)
}

fn build_request(scope: &RunScope, payload: RunPayload) -> Result<ExecutionRequest, ApiError> {
    let language = scope
        .languages
        .get(payload.language_id.as_str())
        .ok_or_else(|| ApiError::InvalidLanguage(scope.languages.ids().join(", ")))?;

    let code = base64::engine::general_purpose::STANDARD
        .decode(payload.code.as_bytes())
        .ok()
        .filter(|c| !c.is_empty())
        .ok_or(ApiError::InvalidCode)?;

    let timeout_secs = payload.timeout_secs().ok_or(ApiError::InvalidTimeout)?;

    let env = payload.env.unwrap_or_default();
    if !env.keys().all(|k| valid_env_name(k)) {
        return Err(ApiError::InvalidEnv);
    }

    Ok(ExecutionRequest {
        code,
        language,
        args: payload.args.unwrap_or_default(),
        stdin: payload.stdin.unwrap_or_default(),
        env,
        timeout_secs,
        enable_cache: scope.enable_cache,
    })
}

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}
