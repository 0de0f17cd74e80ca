//! Global admission layer: source allow-list and per-client rate limiting.

use super::types::ApiError;
use crate::control::RateLimiter;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Parameters of the global admission layer.
pub struct Admission {
    /// When non-empty, only these source addresses are served.
    pub allow_list: Vec<IpAddr>,
    /// Present in standalone mode.
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

pub async fn check_admission<B>(
    State(admission): State<Arc<Admission>>,
    request: Request<B>,
    next: Next<B>,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let host = peer
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let method = request.method().clone();
    let uri = request.uri().clone();

    if !admission.allow_list.is_empty() && !peer.is_some_and(|ip| admission.allow_list.contains(&ip)) {
        tracing::warn!(%host, %method, %uri, "Blocked: host not allowed");
        return ApiError::Forbidden.into_response();
    }

    if let Some(limiter) = &admission.rate_limiter {
        if !limiter.check_client(&host) {
            tracing::info!(%host, %method, %uri, "Blocked: rate limit exceeded");
            return ApiError::RateLimited.into_response();
        }
    }

    tracing::info!(%host, %method, %uri, "Request");
    next.run(request).await
}
