/* src/ratelimit/bucket.rs */

use super::Decision;
use super::store::{CounterStore, StoreError};
use std::sync::Arc;
use std::time::Duration;

/// Token-bucket admission: a steady refill rate with burst headroom.
#[derive(Clone)]
pub struct TokenBucket {
    store: Arc<dyn CounterStore>,
    refill_per_sec: f64,
    capacity: f64,
}

impl TokenBucket {
    pub fn new(store: Arc<dyn CounterStore>, refill_per_sec: f64, capacity: f64) -> Self {
        TokenBucket {
            store,
            refill_per_sec,
            capacity,
        }
    }

    /// Draws one token for `key`. When the bucket is empty, the denial
    /// carries the exact time until the next token refills.
    pub async fn check(&self, key: &str) -> Result<Decision, StoreError> {
        let scoped = format!("tb:{}", key);
        let probe = self
            .store
            .take_token(&scoped, self.refill_per_sec, self.capacity)
            .await?;

        if probe.admitted {
            Ok(Decision::Allowed {
                remaining: probe.tokens.floor() as u64,
            })
        } else {
            let deficit = 1.0 - probe.tokens;
            Ok(Decision::Denied {
                retry_after: Duration::from_secs_f64(deficit / self.refill_per_sec),
            })
        }
    }
}
