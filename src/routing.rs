/* src/routing.rs */

use crate::models::{LimiterKind, RouteRule};
use anyhow::{Context, Result, bail};
use fancy_log::{LogLevel, log};
use http::header::{HeaderName, HeaderValue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Represents the quality of a match between a path and a pattern.
/// A higher score indicates a better, more specific match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct MatchScore {
    /// Number of exact (non-wildcard) path segments. Higher is better.
    exact_parts: usize,
    /// Total number of segments in the pattern. Longer is generally more specific.
    total_parts: usize,
}

/// A compiled routing rule: pattern, rewrite step, and dispatch metadata.
#[derive(Debug, Clone)]
pub struct Route {
    pub id: String,
    pub pattern: String,
    pub strip_prefix: usize,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub backend: String,
    /// Base URL of the backend this route dispatches to.
    pub target: String,
    /// Breaker pool this route's outcomes count against.
    pub breaker: String,
    pub strategy: Option<LimiterKind>,
}

/// All compiled routes, checked against the backend map at startup.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    /// Compiles the configured rules. Unknown backends, duplicate ids and
    /// header values that are not valid on the wire all fail the build.
    pub fn build(rules: &[RouteRule], backends: &HashMap<String, String>) -> Result<Self> {
        let mut seen_ids = HashSet::new();
        let mut routes = Vec::with_capacity(rules.len());

        for rule in rules {
            if !seen_ids.insert(rule.id.clone()) {
                bail!("Duplicate route id '{}'", rule.id);
            }
            let target = backends
                .get(&rule.backend)
                .with_context(|| {
                    format!(
                        "Route '{}' points at unknown backend '{}'",
                        rule.id, rule.backend
                    )
                })?
                .clone();

            let mut headers = Vec::with_capacity(rule.headers.len());
            for (name, value) in &rule.headers {
                let header_name = name.parse::<HeaderName>().with_context(|| {
                    format!("Route '{}': invalid header name '{}'", rule.id, name)
                })?;
                let header_value = value.parse::<HeaderValue>().with_context(|| {
                    format!("Route '{}': invalid value for header '{}'", rule.id, name)
                })?;
                headers.push((header_name, header_value));
            }

            routes.push(Arc::new(Route {
                id: rule.id.clone(),
                pattern: rule.path.clone(),
                strip_prefix: rule.strip_prefix,
                headers,
                backend: rule.backend.clone(),
                target,
                breaker: rule.breaker.clone().unwrap_or_else(|| rule.backend.clone()),
                strategy: rule.strategy,
            }));
        }

        Ok(RouteTable { routes })
    }

    /// Finds the single best matching route for a path.
    /// "Best" is the most specific match; declaration order breaks ties.
    pub fn resolve(&self, path: &str) -> Option<Arc<Route>> {
        let mut best: Option<(Arc<Route>, MatchScore)> = None;

        for route in &self.routes {
            if let Some(score) = get_match_score(&route.pattern, path) {
                log(
                    LogLevel::Debug,
                    &format!(
                        "Path '{}' matched route '{}' with score {:?}",
                        path, route.id, score
                    ),
                );

                match best.as_mut() {
                    None => best = Some((route.clone(), score)),
                    Some((best_route, best_score)) => {
                        if score > *best_score {
                            *best_route = route.clone();
                            *best_score = score;
                        }
                    }
                }
            }
        }

        best.map(|(route, _)| route)
    }
}

/// Calculates a specificity score for a pattern matching a given path.
///
/// - Returns `Some(MatchScore)` if the pattern matches the path prefix.
/// - Returns `None` if the pattern does not match.
///
/// The matching logic supports `*` as a single-segment wildcard.
fn get_match_score(pattern: &str, path: &str) -> Option<MatchScore> {
    let pattern_parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    // The pattern cannot be longer than the path for a prefix match.
    if pattern_parts.len() > path_parts.len() {
        return None;
    }

    let mut exact_parts = 0;

    for (i, p_part) in pattern_parts.iter().enumerate() {
        if *p_part == "*" {
            continue; // Wildcard matches any segment.
        }
        if Some(p_part) != path_parts.get(i) {
            return None; // Mismatch on an exact part.
        }
        exact_parts += 1;
    }

    Some(MatchScore {
        exact_parts,
        total_parts: pattern_parts.len(),
    })
}

/// Drops the first `strip` segments from a path, keeping the rest intact.
/// Stripping everything (or more) yields the root path.
pub fn strip_path_segments(path: &str, strip: usize) -> String {
    if strip == 0 {
        return path.to_string();
    }

    let rest: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .skip(strip)
        .collect();
    if rest.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", rest.join("/"))
    }
}
