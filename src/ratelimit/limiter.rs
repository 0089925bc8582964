//! Core fixed-window rate limiter implementation.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::counter::WindowCounter;
use crate::config::TierConfig;
use crate::error::{Result, TurnstileError};
use crate::sweep::Sweep;

/// Outcome of a single rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request fits in the current window
    pub allowed: bool,
    /// Configured maximum per window
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Time until the current window resets
    pub reset_after: Duration,
}

impl RateDecision {
    /// Convert a rejection into a `RateLimitExceeded` error carrying retry guidance.
    pub fn into_result(self) -> Result<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(TurnstileError::RateLimitExceeded {
                retry_after: self.reset_after,
            })
        }
    }
}

/// Fixed-window limiter over any identifier type.
///
/// Bursts of up to twice the limit are possible across a window boundary.
struct WindowLimiter<K> {
    /// Counters indexed by identifier
    counters: RwLock<HashMap<K, WindowCounter>>,
    limit: u64,
    window: Duration,
}

impl<K> WindowLimiter<K>
where
    K: Eq + Hash,
{
    fn new(limit: u64, window: Duration) -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            limit,
            window,
        }
    }

    /// Lookups borrow the identifier; it is copied only when a new counter is inserted.
    fn check<Q>(&self, identifier: &Q) -> RateDecision
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + Display + ?Sized,
    {
        let now = Instant::now();

        let (count, reset_after) = {
            let mut counters = self.counters.write();
            match counters.get_mut(identifier) {
                Some(counter) => {
                    let count = counter.record(now, self.window);
                    (count, counter.reset_after(now))
                }
                None => {
                    let counter = WindowCounter::open(now, self.window);
                    let reset_after = counter.reset_after(now);
                    counters.insert(identifier.to_owned(), counter);
                    (1, reset_after)
                }
            }
        };

        let allowed = count <= self.limit;

        trace!(
            identifier = %identifier,
            count,
            limit = self.limit,
            "Checked rate limit"
        );

        if !allowed {
            debug!(
                identifier = %identifier,
                count,
                limit = self.limit,
                retry_after_secs = reset_after.as_secs(),
                "Rate limit exceeded"
            );
        }

        RateDecision {
            allowed,
            limit: self.limit,
            remaining: self.limit.saturating_sub(count),
            reset_after,
        }
    }

    fn current_count<Q>(&self, identifier: &Q) -> Option<u64>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let counters = self.counters.read();
        counters
            .get(identifier)
            .filter(|c| !c.is_expired(now))
            .map(|c| c.count())
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut counters = self.counters.write();
        let before = counters.len();
        counters.retain(|_, c| !c.is_expired(now));
        before - counters.len()
    }

    fn clear(&self) {
        self.counters.write().clear();
    }

    fn counter_count(&self) -> usize {
        self.counters.read().len()
    }
}

macro_rules! limiter_accessors {
    () => {
        /// Maximum requests per window.
        pub fn limit(&self) -> u64 {
            self.inner.limit
        }

        /// Window length, also the sweep period.
        pub fn window(&self) -> Duration {
            self.inner.window
        }

        /// Clear all counters.
        ///
        /// This is primarily useful for testing.
        pub fn clear(&self) {
            self.inner.clear();
        }

        /// Get the number of tracked identifiers, expired or not.
        pub fn counter_count(&self) -> usize {
            self.inner.counter_count()
        }
    };
}

/// Rate limiter keyed by an arbitrary string, typically the caller's network origin.
pub struct RateLimiter {
    inner: WindowLimiter<String>,
}

impl RateLimiter {
    /// Create a limiter allowing `limit` requests per `window`.
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            inner: WindowLimiter::new(limit, window),
        }
    }

    pub fn from_tier(tier: &TierConfig) -> Self {
        Self::new(tier.max_requests, tier.window())
    }

    /// Record a request from `identifier` and return the decision.
    pub fn check(&self, identifier: &str) -> RateDecision {
        self.inner.check(identifier)
    }

    /// Record a request from `identifier`; `true` if it is within the limit.
    pub fn allow(&self, identifier: &str) -> bool {
        self.check(identifier).allowed
    }

    /// Requests counted in the live window for `identifier`.
    pub fn current_count(&self, identifier: &str) -> Option<u64> {
        self.inner.current_count(identifier)
    }

    limiter_accessors!();
}

impl Sweep for RateLimiter {
    fn sweep(&self) -> usize {
        self.inner.sweep()
    }
}

/// Rate limiter keyed by authenticated identity id.
pub struct IdentityRateLimiter {
    inner: WindowLimiter<i64>,
}

impl IdentityRateLimiter {
    /// Create a limiter allowing `limit` requests per `window`.
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            inner: WindowLimiter::new(limit, window),
        }
    }

    pub fn from_tier(tier: &TierConfig) -> Self {
        Self::new(tier.max_requests, tier.window())
    }

    /// Record a request from `identity_id` and return the decision.
    pub fn check(&self, identity_id: i64) -> RateDecision {
        self.inner.check(&identity_id)
    }

    /// Record a request from `identity_id`; `true` if it is within the limit.
    pub fn allow(&self, identity_id: i64) -> bool {
        self.check(identity_id).allowed
    }

    /// Requests counted in the live window for `identity_id`.
    pub fn current_count(&self, identity_id: i64) -> Option<u64> {
        self.inner.current_count(&identity_id)
    }

    limiter_accessors!();
}

impl Sweep for IdentityRateLimiter {
    fn sweep(&self) -> usize {
        self.inner.sweep()
    }
}
