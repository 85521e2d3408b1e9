/* src/middleware.rs */

use crate::auth::{self, Principal};
use crate::error::GatewayError;
use crate::ratelimit::{self, Decision};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use fancy_log::{LogLevel, log};
use std::net::SocketAddr;
use std::sync::Arc;

/// Verifies the bearer token when one is present. A failed verification
/// never blocks the request; it simply continues without an identity.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(token) = auth::bearer_token(req.headers()) {
        match state.verifier.verify(token) {
            Ok(principal) => {
                log(
                    LogLevel::Debug,
                    &format!("Authenticated request for subject '{}'", principal.subject),
                );
                req.extensions_mut().insert(principal);
            }
            Err(e) => log(LogLevel::Warn, &format!("Rejected bearer token: {:#}", e)),
        }
    }

    next.run(req).await
}

/// Admission control. Counts the request against its caller's key and
/// rejects with 429 once the key's allowance is spent.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = ratelimit::resolve_key(
        req.extensions().get::<Principal>(),
        req.headers(),
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0),
        state.config.rate_limit.trust_forwarded,
    );

    // Peek at the route for its strategy override. Unmatched paths are
    // still counted under the default strategy before they turn into 404s.
    let strategy = state
        .routes
        .resolve(req.uri().path())
        .and_then(|route| route.strategy);

    match state.limiter.check(strategy, &key).await {
        Ok(Decision::Allowed { remaining }) => {
            let mut response = next.run(req).await;
            if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
                response
                    .headers_mut()
                    .insert(ratelimit::REMAINING_HEADER, value);
            }
            response
        }
        Ok(Decision::Denied { retry_after }) => {
            log(LogLevel::Warn, &format!("Rate limit exceeded for {}", key));
            GatewayError::RateLimited { retry_after }.into_response()
        }
        Err(e) => {
            log(
                LogLevel::Error,
                &format!("Counter store error for {}: {}. Admitting request.", key, e),
            );
            next.run(req).await
        }
    }
}
