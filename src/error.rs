/* src/error.rs */

use crate::ratelimit::RETRY_AFTER_HEADER;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fancy_log::{LogLevel, log};
use std::time::Duration;

pub enum GatewayError {
    /// No configured route pattern matches the request path.
    RouteNotFound,
    /// The caller's admission allowance is spent.
    RateLimited { retry_after: Duration },
    /// The backend's breaker is rejecting calls without dialing.
    CircuitOpen { backend: String },
    /// The backend could not be reached, or did not answer in time.
    Upstream {
        backend: String,
        source: anyhow::Error,
    },
}

/// Whole seconds a throttled client should wait, never zero.
pub fn retry_after_seconds(wait: Duration) -> u64 {
    (wait.as_secs_f64().ceil() as u64).max(1)
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::RouteNotFound => {
                (StatusCode::NOT_FOUND, "No route found for this path").into_response()
            }
            GatewayError::RateLimited { retry_after } => {
                let seconds = retry_after_seconds(retry_after);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(RETRY_AFTER_HEADER, seconds.to_string())],
                    format!(
                        "Too many requests. Please try again in {} seconds.",
                        seconds
                    ),
                )
                    .into_response()
            }
            GatewayError::CircuitOpen { backend } => {
                log(
                    LogLevel::Warn,
                    &format!("Circuit for backend '{}' is open, rejecting early", backend),
                );
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Backend temporarily unavailable. Please try again later.",
                )
                    .into_response()
            }
            GatewayError::Upstream { backend, source } => {
                log(
                    LogLevel::Error,
                    &format!("Backend '{}' failed: {}", backend, source),
                );
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Backend temporarily unavailable. Please try again later.",
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_hints_round_up_to_whole_seconds() {
        assert_eq!(retry_after_seconds(Duration::from_millis(100)), 1);
        assert_eq!(retry_after_seconds(Duration::from_millis(1001)), 2);
        assert_eq!(retry_after_seconds(Duration::from_secs(60)), 60);
        assert_eq!(retry_after_seconds(Duration::ZERO), 1);
    }

    #[test]
    fn throttled_responses_carry_the_retry_header() {
        let response = GatewayError::RateLimited {
            retry_after: Duration::from_millis(250),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(RETRY_AFTER_HEADER)
                .and_then(|v| v.to_str().ok()),
            Some("1")
        );
    }

    #[test]
    fn route_misses_are_plain_404s() {
        let response = GatewayError::RouteNotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn breaker_rejections_are_503s() {
        let response = GatewayError::CircuitOpen {
            backend: "persons".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
