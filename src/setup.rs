/* src/setup.rs */

use crate::config;
use anyhow::{Context, Result};
use fancy_log::{LogLevel, log};
use std::fs;

const DEFAULT_CONFIG: &str = r#"
# Tollgate gateway configuration file

[auth]
# HMAC secret for verifying bearer tokens (HS256). Override with the
# JWT_SECRET environment variable instead of committing a real value here.
secret = "change-me"

# Browser access policy, enforced at the edge before any backend is reached.
[cors]
allowed_origins = ["*"]
allowed_methods = ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
allowed_headers = ["*"]
max_age_secs = 3600
allow_credentials = false

# Per-caller admission control. Authenticated callers are keyed by token
# subject, anonymous ones by client IP.
[rate_limit]
# Default strategy: "token_bucket" or "fixed_window". Routes may override.
strategy = "token_bucket"
# Only trust X-Forwarded-For when a proxy you control sits in front.
trust_forwarded = false

[rate_limit.token_bucket]
refill_per_sec = 10.0
burst = 20.0

[rate_limit.fixed_window]
max_requests = 100
window_secs = 60

# One breaker per backend. After this many consecutive failures the
# backend is cut off until the reset timeout elapses.
[circuit_breaker]
failure_threshold = 5
reset_timeout_secs = 30

[upstream]
timeout_secs = 10

# Named backend servers that routes dispatch to.
[backends]
persons = "http://127.0.0.1:8081"
images = "http://127.0.0.1:8082"

# Routing rules. The most specific matching path wins.
[[routes]]
id = "persons"
path = "/api/persons"
# Drop the first path segment before forwarding: /api/persons/1 -> /persons/1
strip_prefix = 1
backend = "persons"

[routes.headers]
"X-Service-Name" = "persons"

[[routes]]
id = "images"
path = "/api/images"
strip_prefix = 1
backend = "images"
# Bulk image fetches are better served by a hard per-minute cap.
strategy = "fixed_window"

[routes.headers]
"X-Service-Name" = "images"
"#;

/// Handles the first-run scenario by creating the config directory and a
/// commented starter config.
pub async fn handle_first_run() -> Result<()> {
    log(
        LogLevel::Warn,
        "No routes configured. Performing first-time setup.",
    );
    log(
        LogLevel::Info,
        "For guidance, visit: https://github.com/canmi21/tollgate",
    );

    let (config_path, config_dir) = config::get_config_paths()?;
    fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

    if !config_path.exists() {
        fs::write(&config_path, DEFAULT_CONFIG)?;
        log(
            LogLevel::Info,
            &format!("Created example config: {:?}", config_path),
        );
    }

    log(
        LogLevel::Info,
        "First-time setup complete. Please start Tollgate again.",
    );
    Ok(())
}
