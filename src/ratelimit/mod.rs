/* src/ratelimit/mod.rs */

mod bucket;
mod store;
mod window;

pub use bucket::TokenBucket;
pub use store::{CounterStore, MemoryStore, StoreError, TokenProbe, WindowProbe};
pub use window::FixedWindow;

use crate::auth::Principal;
use crate::models::LimiterKind;
use http::HeaderMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Response header carrying the post-admission balance.
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
/// Response header telling a throttled client how long to back off.
pub const RETRY_AFTER_HEADER: &str = "x-ratelimit-retry-after-seconds";

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Allowed { remaining: u64 },
    Denied { retry_after: Duration },
}

/// Who a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    User(String),
    Ip(String),
    Anonymous,
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitKey::User(id) => write!(f, "user:{}", id),
            RateLimitKey::Ip(ip) => write!(f, "ip:{}", ip),
            RateLimitKey::Anonymous => write!(f, "anon"),
        }
    }
}

/// Picks the identity a request is throttled under: verified token subject
/// first, then an upstream-stamped `X-User-ID`, then the forwarded client
/// IP when a trusted proxy fronts us, then the peer address.
pub fn resolve_key(
    principal: Option<&Principal>,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded: bool,
) -> RateLimitKey {
    if let Some(principal) = principal {
        return RateLimitKey::User(principal.subject.clone());
    }

    if let Some(user_id) = headers.get("x-user-id").and_then(|value| value.to_str().ok()) {
        let user_id = user_id.trim();
        if !user_id.is_empty() {
            return RateLimitKey::User(user_id.to_string());
        }
    }

    if trust_forwarded {
        if let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            // Only the first hop is the client; the rest are proxies.
            if let Some(client) = forwarded.split(',').next() {
                let client = client.trim();
                if !client.is_empty() {
                    return RateLimitKey::Ip(client.to_string());
                }
            }
        }
    }

    match peer {
        Some(addr) => RateLimitKey::Ip(addr.ip().to_string()),
        None => RateLimitKey::Anonymous,
    }
}

/// Shared admission front door; the strategy is chosen per route.
#[derive(Clone)]
pub struct RateLimiter {
    bucket: TokenBucket,
    window: FixedWindow,
    default_strategy: LimiterKind,
}

impl RateLimiter {
    pub fn new(bucket: TokenBucket, window: FixedWindow, default_strategy: LimiterKind) -> Self {
        RateLimiter {
            bucket,
            window,
            default_strategy,
        }
    }

    /// Runs one admission check for `key` under the given strategy, or the
    /// configured default when the route does not pick one.
    pub async fn check(
        &self,
        strategy: Option<LimiterKind>,
        key: &RateLimitKey,
    ) -> Result<Decision, StoreError> {
        let key = key.to_string();
        match strategy.unwrap_or(self.default_strategy) {
            LimiterKind::TokenBucket => self.bucket.check(&key).await,
            LimiterKind::FixedWindow => self.window.check(&key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashSet;

    fn principal(subject: &str) -> Principal {
        Principal {
            subject: subject.to_string(),
            roles: HashSet::new(),
            expires_at: Utc::now(),
        }
    }

    fn peer(addr: &str) -> Option<SocketAddr> {
        Some(addr.parse().unwrap())
    }

    #[test]
    fn authenticated_subject_wins_over_everything() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());

        let key = resolve_key(
            Some(&principal("alice")),
            &headers,
            peer("192.168.1.9:4242"),
            true,
        );
        assert_eq!(key, RateLimitKey::User("alice".to_string()));
        assert_eq!(key.to_string(), "user:alice");
    }

    #[test]
    fn stamped_user_id_header_outranks_addresses() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", "carol".parse().unwrap());
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());

        let key = resolve_key(None, &headers, peer("192.168.1.9:4242"), true);
        assert_eq!(key, RateLimitKey::User("carol".to_string()));

        // A verified token still wins over the stamped header.
        let key = resolve_key(Some(&principal("alice")), &headers, None, true);
        assert_eq!(key, RateLimitKey::User("alice".to_string()));

        // Blank values are not identities.
        let mut blank = HeaderMap::new();
        blank.insert("x-user-id", "  ".parse().unwrap());
        let key = resolve_key(None, &blank, peer("192.168.1.9:4242"), false);
        assert_eq!(key, RateLimitKey::Ip("192.168.1.9".to_string()));
    }

    #[test]
    fn forwarded_header_is_ignored_unless_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());

        let trusted = resolve_key(None, &headers, peer("192.168.1.9:4242"), true);
        assert_eq!(trusted, RateLimitKey::Ip("10.0.0.1".to_string()));

        let untrusted = resolve_key(None, &headers, peer("192.168.1.9:4242"), false);
        assert_eq!(untrusted, RateLimitKey::Ip("192.168.1.9".to_string()));
    }

    #[test]
    fn forwarded_chain_uses_the_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.7, 10.0.0.2, 10.0.0.3".parse().unwrap(),
        );

        let key = resolve_key(None, &headers, None, true);
        assert_eq!(key, RateLimitKey::Ip("203.0.113.7".to_string()));
    }

    #[test]
    fn no_identity_at_all_falls_back_to_anonymous() {
        let headers = HeaderMap::new();
        let key = resolve_key(None, &headers, None, true);
        assert_eq!(key, RateLimitKey::Anonymous);
        assert_eq!(key.to_string(), "anon");
    }

    #[tokio::test]
    async fn strategies_keep_separate_counters_for_the_same_key() {
        use crate::clock::ManualClock;
        use std::sync::Arc;

        let clock = ManualClock::default();
        let store = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
        let limiter = RateLimiter::new(
            TokenBucket::new(store.clone(), 1.0, 1.0),
            FixedWindow::new(store, 1, Duration::from_secs(60)),
            LimiterKind::TokenBucket,
        );
        let key = RateLimitKey::User("alice".to_string());

        // Spend the bucket, then the window still has its own allowance.
        assert!(matches!(
            limiter.check(None, &key).await.unwrap(),
            Decision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check(None, &key).await.unwrap(),
            Decision::Denied { .. }
        ));
        assert!(matches!(
            limiter
                .check(Some(LimiterKind::FixedWindow), &key)
                .await
                .unwrap(),
            Decision::Allowed { .. }
        ));
    }
}
