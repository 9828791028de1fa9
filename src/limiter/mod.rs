//! Sliding-window rate limiter keyed by caller.
//!
//! Every admitted request's `Instant` is kept in a per-key queue, oldest
//! first. On each check, timestamps older than the window are evicted and
//! the remaining count is compared against the tier's limit. Denied
//! attempts are not recorded.
//!
//! # Locking
//!
//! The key table is guarded by one mutex that is held only long enough to
//! fetch or insert a key's window handle. The read-evict-compare-append
//! sequence runs under that window's own mutex, so concurrent requests for
//! one key are serialised while distinct keys never contend.
//!
//! # Sweeping
//!
//! Idle keys are dropped by an opportunistic sweep that piggybacks on
//! [`RateLimiter::check`] once `sweep_interval` has elapsed. A window is only
//! removed when the table holds the sole reference to it, which means no
//! check can be in flight for that key.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::consts::{
    DEFAULT_ANONYMOUS_LIMIT, DEFAULT_AUTHENTICATED_LIMIT, DEFAULT_RATE_WINDOW_SECS,
    DEFAULT_SWEEP_INTERVAL_SECS,
};
use crate::identity::{AccessTier, CallerKey};

/// Limits and timing for a [`RateLimiter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    /// Requests per window for `Free` callers.
    pub anonymous_limit: u32,
    /// Requests per window for every other tier.
    pub authenticated_limit: u32,
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(DEFAULT_RATE_WINDOW_SECS),
            anonymous_limit: DEFAULT_ANONYMOUS_LIMIT,
            authenticated_limit: DEFAULT_AUTHENTICATED_LIMIT,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub limited: bool,
    /// Seconds until the oldest counted request leaves the window. Zero when
    /// the request was admitted.
    pub retry_after_seconds: u64,
    pub limit: u32,
    /// Requests counted in the window after this check.
    pub current_count: u32,
}

#[derive(Debug, Default)]
struct Window {
    stamps: VecDeque<Instant>,
}

impl Window {
    fn evict(&mut self, now: Instant, window: Duration) {
        self.stamps
            .retain(|ts| now.saturating_duration_since(*ts) <= window);
    }
}

/// Per-caller sliding-window admission control.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<CallerKey, Arc<Mutex<Window>>>>,
    last_sweep: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
            last_sweep: Mutex::new(None),
        }
    }

    /// The request limit that applies to `tier`.
    pub fn limit_for(&self, tier: AccessTier) -> u32 {
        match tier {
            AccessTier::Free => self.config.anonymous_limit,
            AccessTier::Authenticated | AccessTier::Premium | AccessTier::Admin => {
                self.config.authenticated_limit
            }
        }
    }

    /// Check and, if admitted, record a request for `key` at the current time.
    pub fn check(&self, key: &CallerKey, tier: AccessTier) -> RateDecision {
        self.maybe_sweep(Instant::now());
        let window = self.window_for(key);
        let mut window = lock(&window);
        // Sample the clock under the key's lock so stamps stay ordered.
        let now = Instant::now();
        self.decide(&mut window, tier, now)
    }

    /// Like [`check`](Self::check), with an explicit observation instant.
    /// Instants passed for one key must not go backwards.
    pub fn check_at(&self, key: &CallerKey, tier: AccessTier, now: Instant) -> RateDecision {
        self.maybe_sweep(now);
        let window = self.window_for(key);
        let mut window = lock(&window);
        self.decide(&mut window, tier, now)
    }

    /// Number of keys currently holding window state.
    pub fn tracked_keys(&self) -> usize {
        lock(&self.windows).len()
    }

    /// Evict expired timestamps everywhere and drop keys left empty.
    /// Returns the number of keys dropped.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut windows = lock(&self.windows);
        let before = windows.len();
        windows.retain(|_, handle| {
            // Anyone else holding the handle is mid-check; leave it alone.
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            let mut window = lock(handle);
            window.evict(now, self.config.window);
            !window.stamps.is_empty()
        });
        let dropped = before - windows.len();
        debug!(dropped, remaining = windows.len(), "swept rate-limit table");
        dropped
    }

    fn maybe_sweep(&self, now: Instant) {
        {
            let mut last = lock(&self.last_sweep);
            match *last {
                None => {
                    *last = Some(now);
                    return;
                }
                Some(at) if now.saturating_duration_since(at) < self.config.sweep_interval => {
                    return;
                }
                Some(_) => *last = Some(now),
            }
        }
        self.sweep_at(now);
    }

    fn window_for(&self, key: &CallerKey) -> Arc<Mutex<Window>> {
        let mut windows = lock(&self.windows);
        Arc::clone(windows.entry(key.clone()).or_default())
    }

    fn decide(&self, window: &mut Window, tier: AccessTier, now: Instant) -> RateDecision {
        let limit = self.limit_for(tier);
        window.evict(now, self.config.window);
        let count = window.stamps.len() as u32;

        if count >= limit {
            let retry_after_seconds = window
                .stamps
                .front()
                .map(|oldest| retry_after(*oldest, self.config.window, now))
                .unwrap_or(1);
            return RateDecision {
                limited: true,
                retry_after_seconds,
                limit,
                current_count: count,
            };
        }

        window.stamps.push_back(now);
        RateDecision {
            limited: false,
            retry_after_seconds: 0,
            limit,
            current_count: count + 1,
        }
    }
}

/// Whole seconds from `now` until `oldest` leaves the window, rounded up,
/// never below one. Works on durations so no window length can overflow
/// `Instant`.
fn retry_after(oldest: Instant, window: Duration, now: Instant) -> u64 {
    let remaining = window.saturating_sub(now.saturating_duration_since(oldest));
    let mut secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs += 1;
    }
    secs.max(1)
}

/// The guarded data stays consistent even if a holder panicked, so a
/// poisoned lock is recovered rather than propagated.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
