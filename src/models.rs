/* src/models.rs */

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Which admission algorithm guards a route.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LimiterKind {
    TokenBucket,
    FixedWindow,
}

/// Provides a default value for LimiterKind.
impl Default for LimiterKind {
    fn default() -> Self {
        LimiterKind::TokenBucket
    }
}

/// Represents the top-level structure of `config.toml`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct MainConfig {
    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub cors: CorsConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Named backends that routes point at, e.g. `persons = "http://127.0.0.1:8081"`.
    #[serde(default)]
    pub backends: HashMap<String, String>,

    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

/// Bearer-token verification settings. The `JWT_SECRET` environment
/// variable takes precedence over the value in the file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub secret: String,
}

/// Browser cross-origin policy served on preflight requests.
#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_methods")]
    pub allowed_methods: Vec<String>,

    #[serde(default = "default_headers")]
    pub allowed_headers: Vec<String>,

    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,

    #[serde(default)]
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        CorsConfig {
            allowed_origins: default_origins(),
            allowed_methods: default_methods(),
            allowed_headers: default_headers(),
            max_age_secs: default_max_age(),
            allow_credentials: false,
        }
    }
}

/// Admission-control settings shared by every route.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RateLimitConfig {
    /// Strategy applied when a route does not pick its own.
    #[serde(default)]
    pub strategy: LimiterKind,

    /// Only honor `X-Forwarded-For` when a trusted proxy sits in front.
    #[serde(default)]
    pub trust_forwarded: bool,

    #[serde(default)]
    pub token_bucket: TokenBucketConfig,

    #[serde(default)]
    pub fixed_window: FixedWindowConfig,
}

/// Steady refill rate plus burst headroom.
#[derive(Debug, Deserialize, Clone)]
pub struct TokenBucketConfig {
    #[serde(default = "default_refill")]
    pub refill_per_sec: f64,

    #[serde(default = "default_burst")]
    pub burst: f64,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        TokenBucketConfig {
            refill_per_sec: default_refill(),
            burst: default_burst(),
        }
    }
}

/// Hard request cap per wall-clock window.
#[derive(Debug, Deserialize, Clone)]
pub struct FixedWindowConfig {
    #[serde(default = "default_window_requests")]
    pub max_requests: u64,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for FixedWindowConfig {
    fn default() -> Self {
        FixedWindowConfig {
            max_requests: default_window_requests(),
            window_secs: default_window_secs(),
        }
    }
}

/// Failure tolerance before a backend is taken out of rotation.
#[derive(Debug, Deserialize, Clone)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_reset_secs")]
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_secs(),
        }
    }
}

/// Outbound dispatch settings.
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            timeout_secs: default_upstream_timeout(),
        }
    }
}

/// Represents a single routing rule.
#[derive(Debug, Deserialize, Clone)]
pub struct RouteRule {
    pub id: String,

    /// The path pattern to match. `*` matches a single segment.
    #[serde(default = "default_path")]
    pub path: String,

    /// Leading path segments to drop before dispatching upstream.
    #[serde(default)]
    pub strip_prefix: usize,

    /// Static headers injected into the upstream request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Name of the backend in `[backends]` to dispatch to.
    pub backend: String,

    /// Breaker pool to count this route's outcomes against.
    /// Defaults to the backend name.
    #[serde(default)]
    pub breaker: Option<String>,

    /// Per-route admission strategy override.
    #[serde(default)]
    pub strategy: Option<LimiterKind>,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_headers() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_max_age() -> u64 {
    3600
}

fn default_refill() -> f64 {
    10.0
}

fn default_burst() -> f64 {
    20.0
}

fn default_window_requests() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_secs() -> u64 {
    30
}

fn default_upstream_timeout() -> u64 {
    10
}
