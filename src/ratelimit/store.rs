/* src/ratelimit/store.rs */

use crate::clock::Clock;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Raised when the counter backend cannot complete a probe.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a token-bucket draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenProbe {
    pub admitted: bool,
    /// Balance after the draw, or the refilled balance when denied.
    pub tokens: f64,
}

/// Outcome of a fixed-window increment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowProbe {
    /// Requests seen in the current window, this one included.
    pub count: u64,
    /// Time until the current window resets.
    pub resets_in: Duration,
}

/// Keyed counter state with atomic read-modify-write per key.
///
/// Each call performs the entire refill-and-consume (or count-and-expire)
/// step as one exclusive operation on the key, so two concurrent probes
/// can never both spend the same token.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn take_token(
        &self,
        key: &str,
        refill_per_sec: f64,
        capacity: f64,
    ) -> Result<TokenProbe, StoreError>;

    async fn bump_window(&self, key: &str, window: Duration) -> Result<WindowProbe, StoreError>;
}

#[derive(Debug)]
struct BucketSlot {
    tokens: f64,
    refilled_at_ms: u64,
}

#[derive(Debug)]
struct WindowSlot {
    count: u64,
    expires_at_ms: u64,
}

/// In-process store backed by sharded maps. Holding the map entry for the
/// duration of a probe makes each probe an atomic read-modify-write.
#[derive(Debug)]
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    buckets: DashMap<String, BucketSlot>,
    windows: DashMap<String, WindowSlot>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        MemoryStore {
            clock,
            buckets: DashMap::new(),
            windows: DashMap::new(),
        }
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn take_token(
        &self,
        key: &str,
        refill_per_sec: f64,
        capacity: f64,
    ) -> Result<TokenProbe, StoreError> {
        let now_ms = self.clock.now_millis();
        let mut slot = self.buckets.entry(key.to_owned()).or_insert_with(|| {
            // A key seen for the first time starts with a full bucket.
            BucketSlot {
                tokens: capacity,
                refilled_at_ms: now_ms,
            }
        });
        let slot = slot.value_mut();

        let elapsed_secs = now_ms.saturating_sub(slot.refilled_at_ms) as f64 / 1000.0;
        slot.tokens = (slot.tokens + elapsed_secs * refill_per_sec).min(capacity);
        slot.refilled_at_ms = now_ms;

        if slot.tokens >= 1.0 {
            slot.tokens -= 1.0;
            Ok(TokenProbe {
                admitted: true,
                tokens: slot.tokens,
            })
        } else {
            Ok(TokenProbe {
                admitted: false,
                tokens: slot.tokens,
            })
        }
    }

    async fn bump_window(&self, key: &str, window: Duration) -> Result<WindowProbe, StoreError> {
        let now_ms = self.clock.now_millis();
        let window_ms = window.as_millis() as u64;
        let mut slot = self
            .windows
            .entry(key.to_owned())
            .or_insert_with(|| WindowSlot {
                count: 0,
                expires_at_ms: now_ms + window_ms,
            });
        let slot = slot.value_mut();

        if now_ms >= slot.expires_at_ms {
            slot.count = 0;
            slot.expires_at_ms = now_ms + window_ms;
        }
        slot.count += 1;

        Ok(WindowProbe {
            count: slot.count,
            resets_in: Duration::from_millis(slot.expires_at_ms - now_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use futures::future::join_all;

    fn store() -> (Arc<MemoryStore>, ManualClock) {
        let clock = ManualClock::default();
        (Arc::new(MemoryStore::new(Arc::new(clock.clone()))), clock)
    }

    #[tokio::test]
    async fn first_draw_starts_from_a_full_bucket() {
        let (store, _clock) = store();
        let probe = store.take_token("k", 1.0, 5.0).await.unwrap();
        assert!(probe.admitted);
        assert_eq!(probe.tokens, 4.0);
    }

    #[tokio::test]
    async fn denied_draw_leaves_the_balance_unspent() {
        let (store, _clock) = store();
        assert!(store.take_token("k", 1.0, 1.0).await.unwrap().admitted);

        let denied = store.take_token("k", 1.0, 1.0).await.unwrap();
        assert!(!denied.admitted);
        assert!(denied.tokens < 1.0);

        // The balance was not decremented by the denied probe.
        let again = store.take_token("k", 1.0, 1.0).await.unwrap();
        assert!(!again.admitted);
        assert_eq!(again.tokens, denied.tokens);
    }

    #[tokio::test]
    async fn refill_is_capped_at_capacity() {
        let (store, clock) = store();
        for _ in 0..3 {
            store.take_token("k", 1.0, 3.0).await.unwrap();
        }
        clock.advance(3_600_000);

        let probe = store.take_token("k", 1.0, 3.0).await.unwrap();
        assert!(probe.admitted);
        assert_eq!(probe.tokens, 2.0);
    }

    #[tokio::test]
    async fn keys_do_not_share_buckets() {
        let (store, _clock) = store();
        assert!(store.take_token("a", 1.0, 1.0).await.unwrap().admitted);
        assert!(!store.take_token("a", 1.0, 1.0).await.unwrap().admitted);
        assert!(store.take_token("b", 1.0, 1.0).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn window_counts_and_expires() {
        let (store, clock) = store();
        let window = Duration::from_secs(60);

        let first = store.bump_window("k", window).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(first.resets_in, window);

        clock.advance(59_999);
        let second = store.bump_window("k", window).await.unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.resets_in, Duration::from_millis(1));

        clock.advance(1);
        let fresh = store.bump_window("k", window).await.unwrap();
        assert_eq!(fresh.count, 1);
        assert_eq!(fresh.resets_in, window);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_draws_spend_exactly_the_capacity() {
        let (store, _clock) = store();

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.take_token("k", 1.0, 5.0).await.unwrap() })
            })
            .collect();

        let admitted = join_all(tasks)
            .await
            .into_iter()
            .filter(|res| res.as_ref().unwrap().admitted)
            .count();
        assert_eq!(admitted, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_bumps_count_every_request_once() {
        let (store, _clock) = store();
        let window = Duration::from_secs(60);

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.bump_window("k", window).await.unwrap() })
            })
            .collect();

        let mut counts: Vec<u64> = join_all(tasks)
            .await
            .into_iter()
            .map(|res| res.unwrap().count)
            .collect();
        counts.sort_unstable();

        // Every probe observed a distinct count from 1 to 50.
        assert_eq!(counts, (1..=50).collect::<Vec<u64>>());
    }
}
