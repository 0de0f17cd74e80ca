use crate::cache::ResultCache;
use crate::config::Config;
use crate::control::{CredentialMaterial, KeyStore, RateLimiter};
use crate::executor::{clean_run_dir, Executor, ExecutorConfig};
use crate::languages::LanguageTable;
use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub mod admission;
pub mod routes;
pub mod types;

pub use admission::Admission;

/// Collaborators handed to the `/run` handler. Built once at startup and
/// shared by reference across requests.
pub struct RunScope {
    pub languages: Arc<LanguageTable>,
    pub credentials: CredentialMaterial,
    pub key_store: KeyStore,
    pub executor: Executor,
    pub enable_cache: bool,
}

/// Route table plus both middleware layers.
pub fn router(scope: Arc<RunScope>, gate: Arc<Admission>, max_bytes: usize, ping: bool) -> Router {
    let mut app = Router::new().route(
        "/run",
        post(routes::run).fallback(routes::method_not_allowed),
    );
    if ping {
        app = app.route("/ping", get(routes::ping));
    }

    app.fallback(routes::not_found)
        .with_state(scope)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_bytes))
        .layer(middleware::from_fn_with_state(gate, admission::check_admission))
        .layer(TraceLayer::new_for_http())
}

pub async fn start_server(config: Config) -> Result<()> {
    config.prepare()?;

    let languages = Arc::new(LanguageTable::from_file(&config.langs)?);
    let credentials = CredentialMaterial::from_file(&config.key_file)?;
    let cache = Arc::new(ResultCache::new(config.cache_size));
    // bind mount sources must be absolute for the engine
    let entry_dir = std::fs::canonicalize(&config.entry_dir)
        .with_context(|| format!("Could not resolve {}", config.entry_dir.display()))?;
    let run_dir = std::fs::canonicalize(&config.run_dir)
        .with_context(|| format!("Could not resolve {}", config.run_dir.display()))?;
    let executor = Executor::new(
        ExecutorConfig {
            engine: config.engine.clone(),
            entry_dir,
            run_dir,
            timeout_ceiling: config.timeout,
        },
        cache,
    );

    let scope = Arc::new(RunScope {
        languages,
        credentials,
        key_store: KeyStore::new(),
        executor,
        enable_cache: config.cache,
    });

    let rate_limiter = config.standalone.then(|| {
        let limiter = Arc::new(RateLimiter::new(config.burst, config.refill));
        limiter.start_cleanup();
        limiter
    });
    let admission = Arc::new(Admission {
        allow_list: config.allow_list.clone(),
        rate_limiter,
    });

    let app = router(scope, admission, config.max_bytes, config.ping);
    let handle = axum_server::Handle::new();
    tokio::spawn(shutdown_on_signal(handle.clone()));

    tracing::info!(
        addr = %config.listen,
        tls = config.tls.is_some(),
        cache = config.cache,
        standalone = config.standalone,
        "Starting codebox"
    );

    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    match &config.tls {
        Some(tls) => {
            let rustls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .context("Could not load TLS certificate")?;
            axum_server::bind_rustls(config.listen, rustls)
                .handle(handle)
                .serve(service)
                .await?;
        }
        None => {
            axum_server::bind(config.listen)
                .handle(handle)
                .serve(service)
                .await?;
        }
    }

    match clean_run_dir(&config.run_dir) {
        Ok(removed) => tracing::info!(removed, "Cleaned run directory"),
        Err(e) => tracing::warn!(error = %e, "Could not clean run directory"),
    }
    Ok(())
}

async fn shutdown_on_signal(handle: axum_server::Handle) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(15)));
}
