/* src/state.rs */

use crate::auth::TokenVerifier;
use crate::breaker::BreakerRegistry;
use crate::config::AppConfig;
use crate::ratelimit::RateLimiter;
use crate::routing::RouteTable;
use std::sync::Arc;

/// Everything request handling needs, shared across workers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub http_client: hyper_util::client::legacy::Client<
        hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
        axum::body::Body,
    >,
    pub verifier: TokenVerifier,
    pub limiter: RateLimiter,
    pub routes: RouteTable,
    pub breakers: Arc<BreakerRegistry>,
}
