/* src/config.rs */

use crate::breaker::BreakerSettings;
use crate::models::{CorsConfig, LimiterKind, MainConfig, RouteRule};
use anyhow::{Context, Result, bail};
use fancy_log::{LogLevel, log};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bearer-token settings with the environment override applied.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub secret: String,
}

/// Admission-control settings with durations resolved.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub strategy: LimiterKind,
    pub trust_forwarded: bool,
    pub refill_per_sec: f64,
    pub burst: f64,
    pub window_max_requests: u64,
    pub window: Duration,
}

/// Outbound dispatch settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub timeout: Duration,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub auth: AuthSettings,
    pub cors: CorsConfig,
    pub rate_limit: RateLimitSettings,
    pub breaker: BreakerSettings,
    pub upstream: UpstreamSettings,
    pub backends: HashMap<String, String>,
    pub routes: Vec<RouteRule>,
}

/// Returns the main config file path and its parent directory.
pub fn get_config_paths() -> Result<(PathBuf, PathBuf)> {
    let config_path_str =
        env::var("CONFIG").unwrap_or_else(|_| "~/tollgate/config.toml".to_string());
    let config_path = PathBuf::from(shellexpand::tilde(&config_path_str).into_owned());
    let config_dir = config_path
        .parent()
        .map(PathBuf::from)
        .context("Could not determine config directory")?;
    Ok((config_path, config_dir))
}

pub fn load_config() -> Result<AppConfig> {
    // Load env variables, using hardcoded defaults if not present
    let port = env::var("BIND_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .context("Invalid BIND_PORT")?;

    let (config_path, _config_dir) = get_config_paths()?;

    log(
        LogLevel::Info,
        &format!("Loading config from {:?}", config_path),
    );

    // If the config doesn't exist, we'll let the first-run logic handle it.
    if !config_path.exists() {
        return resolve_config(MainConfig::default(), port);
    }

    load_from_path(&config_path, port)
}

/// Reads and resolves a config file at an explicit path.
pub fn load_from_path(config_path: &Path, port: u16) -> Result<AppConfig> {
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file at {:?}", config_path))?;
    let main_config: MainConfig =
        toml::from_str(&content).context("Failed to parse config file")?;
    resolve_config(main_config, port)
}

/// Applies environment overrides and validates before producing the
/// runtime view.
fn resolve_config(file: MainConfig, port: u16) -> Result<AppConfig> {
    let secret = env::var("JWT_SECRET").unwrap_or(file.auth.secret);

    let config = AppConfig {
        port,
        auth: AuthSettings { secret },
        cors: file.cors,
        rate_limit: RateLimitSettings {
            strategy: file.rate_limit.strategy,
            trust_forwarded: file.rate_limit.trust_forwarded,
            refill_per_sec: file.rate_limit.token_bucket.refill_per_sec,
            burst: file.rate_limit.token_bucket.burst,
            window_max_requests: file.rate_limit.fixed_window.max_requests,
            window: Duration::from_secs(file.rate_limit.fixed_window.window_secs),
        },
        breaker: BreakerSettings {
            failure_threshold: file.circuit_breaker.failure_threshold,
            reset_timeout: Duration::from_secs(file.circuit_breaker.reset_timeout_secs),
        },
        upstream: UpstreamSettings {
            timeout: Duration::from_secs(file.upstream.timeout_secs),
        },
        backends: file.backends,
        routes: file.routes,
    };

    // An empty route list means first run; validation would only get in
    // the way of generating the starter config.
    if !config.routes.is_empty() {
        validate(&config)?;
    }
    Ok(config)
}

/// Startup checks. Any failure here should stop the process.
fn validate(config: &AppConfig) -> Result<()> {
    if config.auth.secret.trim().is_empty() {
        bail!("auth.secret is empty; set it in the config file or via JWT_SECRET");
    }
    if !(config.rate_limit.refill_per_sec > 0.0) || !config.rate_limit.refill_per_sec.is_finite() {
        bail!("rate_limit.token_bucket.refill_per_sec must be a positive number");
    }
    if config.rate_limit.burst < 1.0 {
        bail!("rate_limit.token_bucket.burst must be at least 1");
    }
    if config.rate_limit.window_max_requests == 0 {
        bail!("rate_limit.fixed_window.max_requests must be at least 1");
    }
    if config.rate_limit.window.is_zero() {
        bail!("rate_limit.fixed_window.window_secs must be at least 1");
    }
    if config.breaker.failure_threshold == 0 {
        bail!("circuit_breaker.failure_threshold must be at least 1");
    }
    if config.breaker.reset_timeout.is_zero() {
        bail!("circuit_breaker.reset_timeout_secs must be at least 1");
    }
    if config.upstream.timeout.is_zero() {
        bail!("upstream.timeout_secs must be at least 1");
    }
    if config.cors.allow_credentials {
        let wildcard = |values: &[String]| values.iter().any(|v| v == "*");
        if wildcard(&config.cors.allowed_origins)
            || wildcard(&config.cors.allowed_methods)
            || wildcard(&config.cors.allowed_headers)
        {
            bail!("cors.allow_credentials cannot be combined with wildcard origins, methods, or headers");
        }
    }
    Ok(())
}
