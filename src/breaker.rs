/* src/breaker.rs */

use crate::clock::Clock;
use dashmap::DashMap;
use fancy_log::{LogLevel, log};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Breaker state, decoded from the packed atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Tuning shared by every breaker in the registry.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

/// Lock-free circuit breaker guarding one backend.
///
/// Every transition goes through a compare-and-swap on the state byte, so
/// concurrent callers always agree on a single winner. The half-open probe
/// slot is a separate flag owned by exactly one permit at a time.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at_ms: AtomicU64,
    /// Single probe slot, held from claim until resolution or drop.
    trial_in_flight: AtomicBool,
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        CircuitBreaker {
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            trial_in_flight: AtomicBool::new(false),
            settings,
            clock,
        }
    }

    pub fn state(&self) -> BreakerState {
        match self.state.load(Ordering::SeqCst) {
            STATE_OPEN => BreakerState::Open,
            STATE_HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    /// Asks to pass one call through. `None` means reject without dialing
    /// the backend. A returned permit must be resolved with
    /// [`CallPermit::succeed`] or [`CallPermit::fail`].
    pub fn try_acquire(self: Arc<Self>) -> Option<CallPermit> {
        match self.state.load(Ordering::SeqCst) {
            STATE_CLOSED => Some(CallPermit::new(self, false)),
            STATE_OPEN => {
                let opened_at = self.opened_at_ms.load(Ordering::SeqCst);
                let elapsed = self.clock.now_millis().saturating_sub(opened_at);
                if elapsed < self.settings.reset_timeout.as_millis() as u64 {
                    return None;
                }

                // Cooldown elapsed: whoever claims the probe slot carries
                // the trial request and publishes the half-open state.
                if self
                    .trial_in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    let _ = self.state.compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                    log(
                        LogLevel::Info,
                        "Circuit half-open, next request goes through as a trial",
                    );
                    Some(CallPermit::new(self, true))
                } else {
                    None
                }
            }
            _ => {
                // HALF_OPEN: only a free probe slot lets a call through.
                if self
                    .trial_in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    Some(CallPermit::new(self, true))
                } else {
                    None
                }
            }
        }
    }

    fn record_success(&self, trial: bool) {
        if trial {
            let closed = self
                .state
                .compare_exchange(
                    STATE_HALF_OPEN,
                    STATE_CLOSED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok();
            self.consecutive_failures.store(0, Ordering::SeqCst);
            self.trial_in_flight.store(false, Ordering::SeqCst);
            if closed {
                log(LogLevel::Info, "Trial request succeeded, circuit closed");
            }
        } else {
            self.consecutive_failures.store(0, Ordering::SeqCst);
        }
    }

    fn record_failure(&self, trial: bool) {
        let now = self.clock.now_millis();
        if trial {
            self.opened_at_ms.store(now, Ordering::SeqCst);
            let reopened = self
                .state
                .compare_exchange(
                    STATE_HALF_OPEN,
                    STATE_OPEN,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok();
            self.trial_in_flight.store(false, Ordering::SeqCst);
            if reopened {
                log(LogLevel::Warn, "Trial request failed, circuit re-opened");
                return;
            }
            // Raced a concurrent transition; count it like a normal failure.
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.settings.failure_threshold {
            self.opened_at_ms.store(now, Ordering::SeqCst);
            if self
                .state
                .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                log(
                    LogLevel::Warn,
                    &format!("Circuit opened after {} consecutive failures", failures),
                );
            }
        }
    }
}

/// One admitted call. Dropping it unresolved releases a half-open probe
/// slot without recording an outcome.
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    resolved: bool,
}

impl CallPermit {
    fn new(breaker: Arc<CircuitBreaker>, trial: bool) -> Self {
        CallPermit {
            breaker,
            trial,
            resolved: false,
        }
    }

    pub fn succeed(mut self) {
        self.resolved = true;
        self.breaker.record_success(self.trial);
    }

    pub fn fail(mut self) {
        self.resolved = true;
        self.breaker.record_failure(self.trial);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.resolved && self.trial {
            self.breaker.trial_in_flight.store(false, Ordering::SeqCst);
        }
    }
}

/// Lazily creates one breaker per pool name.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
}

impl BreakerRegistry {
    pub fn new(settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        BreakerRegistry {
            breakers: DashMap::new(),
            settings,
            clock,
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_owned())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    self.settings.clone(),
                    self.clock.clone(),
                ))
            })
            .clone()
    }
}
