/* src/proxy.rs */

use crate::{error::GatewayError, routing, state::AppState};
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, Version},
    response::Response,
};
use fancy_log::{LogLevel, log};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::timeout;

const IP_HEADERS_TO_CLEAN: &[&str] = &[
    "x-real-ip",
    "x-forwarded-for",
    "x-forwarded",
    "forwarded-for",
    "forwarded",
];

#[axum::debug_handler]
pub async fn dispatch_handler(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Result<Response, GatewayError> {
    let path = req.uri().path().to_owned();

    let route = match state.routes.resolve(&path) {
        Some(route) => route,
        None => {
            log(LogLevel::Debug, &format!("No route matches path '{}'", path));
            return Err(GatewayError::RouteNotFound);
        }
    };

    // Ask the backend's breaker before spending a connection on it.
    let permit = state
        .breakers
        .get(&route.breaker)
        .try_acquire()
        .ok_or_else(|| GatewayError::CircuitOpen {
            backend: route.backend.clone(),
        })?;

    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    // Rewrite the path, keeping the query string intact.
    let query = req
        .uri()
        .query()
        .map(|q| format!("?{}", q))
        .unwrap_or_default();
    let rewritten = routing::strip_path_segments(&path, route.strip_prefix);
    let full_target_url = format!(
        "{}{}{}",
        route.target.strip_suffix('/').unwrap_or(&route.target),
        rewritten,
        query
    );

    log(
        LogLevel::Debug,
        &format!(
            "Dispatching '{}' via route '{}' to {}",
            path, route.id, full_target_url
        ),
    );

    let target_uri = match full_target_url.parse() {
        Ok(uri) => uri,
        Err(e) => {
            return Err(GatewayError::Upstream {
                backend: route.backend.clone(),
                source: anyhow::anyhow!(
                    "Invalid constructed target URL '{}': {}",
                    full_target_url,
                    e
                ),
            });
        }
    };

    let (mut parts, body) = req.into_parts();

    // Clean any inbound IP headers to prevent spoofing, then stamp the
    // real client address.
    for header in IP_HEADERS_TO_CLEAN {
        parts.headers.remove(*header);
    }
    if let Some(ip) = &client_ip {
        if let Ok(value) = ip.parse() {
            parts.headers.insert("x-forwarded-for", value);
        }
    }
    for (name, value) in &route.headers {
        parts.headers.insert(name.clone(), value.clone());
    }

    parts.uri = target_uri;
    parts.version = Version::HTTP_11;
    let upstream_req = Request::from_parts(parts, body);

    match timeout(
        state.config.upstream.timeout,
        state.http_client.request(upstream_req),
    )
    .await
    {
        Ok(Ok(response)) => {
            // 5xx answers are relayed as-is but still count against the
            // breaker; everything else counts as recovery.
            if response.status().is_server_error() {
                log(
                    LogLevel::Warn,
                    &format!(
                        "Backend '{}' answered {} for '{}'",
                        route.backend,
                        response.status(),
                        path
                    ),
                );
                permit.fail();
            } else {
                permit.succeed();
            }
            Ok(response.map(Body::new))
        }
        Ok(Err(e)) => {
            permit.fail();
            Err(GatewayError::Upstream {
                backend: route.backend.clone(),
                source: e.into(),
            })
        }
        Err(_) => {
            permit.fail();
            Err(GatewayError::Upstream {
                backend: route.backend.clone(),
                source: anyhow::anyhow!(
                    "No response within {:?}",
                    state.config.upstream.timeout
                ),
            })
        }
    }
}
