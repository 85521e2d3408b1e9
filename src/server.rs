/* src/server.rs */

use crate::auth::TokenVerifier;
use crate::breaker::BreakerRegistry;
use crate::clock::{Clock, MonotonicClock};
use crate::models::CorsConfig;
use crate::ratelimit::{CounterStore, FixedWindow, MemoryStore, RateLimiter, TokenBucket};
use crate::routing::RouteTable;
use crate::state::AppState;
use crate::{config, middleware, proxy, setup};
use anyhow::{Context, Result};
use axum::Router;
use fancy_log::{LogLevel, log};
use http::{HeaderName, HeaderValue, Method};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::{ClientConfig, RootCertStore};
use std::time::Duration;
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

/// Configures and runs the gateway server.
pub async fn run() -> Result<()> {
    let app_config = match config::load_config() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            log(
                LogLevel::Error,
                &format!("Failed to load configuration: {}", e),
            );
            std::process::exit(1);
        }
    };

    if app_config.routes.is_empty() {
        return setup::handle_first_run().await;
    }

    let state = build_state(app_config.clone()).await?;
    let router = build_router(state)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], app_config.port));
    log(
        LogLevel::Info,
        &format!("Tollgate listening on http://localhost:{}", app_config.port),
    );

    let server_handle = tokio::spawn(async move {
        axum_server::bind(addr)
            .serve(router.into_make_service_with_connect_info::<SocketAddr>())
            .await
    });

    tokio::select! {
        _ = shutdown_signal() => log(LogLevel::Info, "Signal received, shutting down."),
        res = server_handle => match res {
            Ok(Ok(())) => log(LogLevel::Info, "Server exited normally."),
            Ok(Err(e)) => log(LogLevel::Error, &format!("Server error: {}", e)),
            Err(join_err) => log(LogLevel::Error, &format!("Server join error: {}", join_err)),
        },
    }

    Ok(())
}

/// Builds the shared AppState, including the robust outbound HTTP client.
pub async fn build_state(app_config: Arc<config::AppConfig>) -> Result<Arc<AppState>> {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let mut http_connector = HttpConnector::new();
    http_connector.enforce_http(false);
    let https_connector = HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http_connector);
    let http_client =
        hyper_util::client::legacy::Client::builder(hyper_util::rt::tokio::TokioExecutor::new())
            .build(https_connector);

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::default());
    let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new(clock.clone()));
    let limiter = RateLimiter::new(
        TokenBucket::new(
            store.clone(),
            app_config.rate_limit.refill_per_sec,
            app_config.rate_limit.burst,
        ),
        FixedWindow::new(
            store,
            app_config.rate_limit.window_max_requests,
            app_config.rate_limit.window,
        ),
        app_config.rate_limit.strategy,
    );
    let routes = RouteTable::build(&app_config.routes, &app_config.backends)?;
    let breakers = Arc::new(BreakerRegistry::new(app_config.breaker.clone(), clock));
    let verifier = TokenVerifier::new(&app_config.auth.secret);

    Ok(Arc::new(AppState {
        config: app_config,
        http_client,
        verifier,
        limiter,
        routes,
        breakers,
    }))
}

/// Assembles the request pipeline. Layers run outermost first: CORS,
/// then authentication, then admission control, then dispatch.
pub fn build_router(state: Arc<AppState>) -> Result<Router> {
    let cors = build_cors_layer(&state.config.cors)?;

    Ok(Router::new()
        .fallback(proxy::dispatch_handler)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::authenticate,
        ))
        .layer(cors)
        .with_state(state))
}

fn build_cors_layer(cors: &CorsConfig) -> Result<CorsLayer> {
    let origins = if cors.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            cors.allowed_origins
                .iter()
                .map(|o| {
                    o.parse::<HeaderValue>()
                        .with_context(|| format!("Invalid CORS origin '{}'", o))
                })
                .collect::<Result<Vec<_>>>()?,
        )
    };

    let methods = if cors.allowed_methods.iter().any(|m| m == "*") {
        AllowMethods::any()
    } else {
        AllowMethods::list(
            cors.allowed_methods
                .iter()
                .map(|m| {
                    Method::from_bytes(m.as_bytes())
                        .with_context(|| format!("Invalid CORS method '{}'", m))
                })
                .collect::<Result<Vec<_>>>()?,
        )
    };

    let headers = if cors.allowed_headers.iter().any(|h| h == "*") {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(
            cors.allowed_headers
                .iter()
                .map(|h| {
                    h.parse::<HeaderName>()
                        .with_context(|| format!("Invalid CORS header '{}'", h))
                })
                .collect::<Result<Vec<_>>>()?,
        )
    };

    let mut layer = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .max_age(Duration::from_secs(cors.max_age_secs));
    if cors.allow_credentials {
        layer = layer.allow_credentials(true);
    }
    Ok(layer)
}

/// Listens for OS signals for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
