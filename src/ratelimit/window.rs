/* src/ratelimit/window.rs */

use super::Decision;
use super::store::{CounterStore, StoreError};
use std::sync::Arc;
use std::time::Duration;

/// Fixed-window admission: at most `max_requests` per wall-clock window.
#[derive(Clone)]
pub struct FixedWindow {
    store: Arc<dyn CounterStore>,
    max_requests: u64,
    window: Duration,
}

impl FixedWindow {
    pub fn new(store: Arc<dyn CounterStore>, max_requests: u64, window: Duration) -> Self {
        FixedWindow {
            store,
            max_requests,
            window,
        }
    }

    /// Counts this request against `key`. Once the window's allowance is
    /// spent, denials carry the time until the window resets.
    pub async fn check(&self, key: &str) -> Result<Decision, StoreError> {
        let scoped = format!("fw:{}", key);
        let probe = self.store.bump_window(&scoped, self.window).await?;

        if probe.count <= self.max_requests {
            Ok(Decision::Allowed {
                remaining: self.max_requests - probe.count,
            })
        } else {
            Ok(Decision::Denied {
                retry_after: probe.resets_in,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::MemoryStore;

    fn window(max_requests: u64, secs: u64) -> (FixedWindow, ManualClock) {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
        (
            FixedWindow::new(store, max_requests, Duration::from_secs(secs)),
            clock,
        )
    }

    #[tokio::test]
    async fn admits_up_to_the_cap_then_denies() {
        let (window, _clock) = window(3, 60);

        for expected in [2, 1, 0] {
            match window.check("k").await.unwrap() {
                Decision::Allowed { remaining } => assert_eq!(remaining, expected),
                other => panic!("expected admission, got {:?}", other),
            }
        }

        match window.check("k").await.unwrap() {
            Decision::Denied { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(60));
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn requests_across_the_boundary_land_in_different_windows() {
        let (window, clock) = window(1, 60);

        assert!(matches!(
            window.check("k").await.unwrap(),
            Decision::Allowed { .. }
        ));

        clock.advance(59_999);
        match window.check("k").await.unwrap() {
            Decision::Denied { retry_after } => {
                assert_eq!(retry_after, Duration::from_millis(1));
            }
            other => panic!("expected denial, got {:?}", other),
        }

        clock.advance(1);
        match window.check("k").await.unwrap() {
            Decision::Allowed { remaining } => assert_eq!(remaining, 0),
            other => panic!("expected admission, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn denied_requests_do_not_extend_the_window() {
        let (window, clock) = window(1, 10);

        assert!(matches!(
            window.check("k").await.unwrap(),
            Decision::Allowed { .. }
        ));
        for _ in 0..5 {
            assert!(matches!(
                window.check("k").await.unwrap(),
                Decision::Denied { .. }
            ));
        }

        clock.advance(10_000);
        assert!(matches!(
            window.check("k").await.unwrap(),
            Decision::Allowed { .. }
        ));
    }
}
