//! Fixed-window rate limiting for the bulk name-list endpoint.
//!
//! Counts live in a [`CounterStore`], keyed `card_names:{caller}`. The first
//! increment of a key opens a window of `window` length; once `capacity`
//! requests have been counted in the window, further requests are rejected
//! until the key expires. Rejected requests are not counted.

use axum::http::HeaderMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument};

/// Key prefix for the name-list endpoint.
pub const CARD_NAMES_SCOPE: &str = "card_names";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rate limit exceeded; retry in {}s", self.retry_after_secs())]
pub struct RateLimitExceeded {
    /// Time until the current window closes.
    pub retry_after: Duration,
}

impl RateLimitExceeded {
    /// Whole seconds for a `Retry-After` header, never zero.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        let secs = if self.retry_after.subsec_nanos() > 0 { secs + 1 } else { secs };
        secs.max(1)
    }
}

/// A live counter: its value and when it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub count: u32,
    pub expires_at: Instant,
}

/// Expiring counters shared by every request.
pub trait CounterStore: Send + Sync {
    /// The live counter for `key`, if any.
    fn get(&self, key: &str, now: Instant) -> Option<Counter>;

    /// Increment `key`, creating it with `ttl` if absent or expired. Returns the new count.
    fn incr(&self, key: &str, ttl: Duration, now: Instant) -> u32;

    /// Drop `key` immediately.
    fn expire(&self, key: &str);
}

/// In-process [`CounterStore`].
#[derive(Debug, Default)]
pub struct MemoryCounters {
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounters {
    fn get(&self, key: &str, now: Instant) -> Option<Counter> {
        let mut counters = self.counters.lock();
        match counters.get(key) {
            Some(c) if c.expires_at > now => Some(*c),
            Some(_) => {
                counters.remove(key);
                None
            }
            None => None,
        }
    }

    fn incr(&self, key: &str, ttl: Duration, now: Instant) -> u32 {
        let mut counters = self.counters.lock();
        // Expired windows are swept opportunistically
        counters.retain(|_, c| c.expires_at > now);
        let counter = counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: now + ttl,
        });
        counter.count += 1;
        counter.count
    }

    fn expire(&self, key: &str) {
        self.counters.lock().remove(key);
    }
}

/// Allows `capacity` requests per caller per window.
pub struct FixedWindowLimiter {
    counters: Arc<dyn CounterStore>,
    scope: &'static str,
    capacity: u32,
    window: Duration,
    check_lock: Mutex<()>,
}

impl FixedWindowLimiter {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        scope: &'static str,
        capacity: u32,
        window: Duration,
    ) -> Self {
        Self {
            counters,
            scope,
            capacity,
            window,
            check_lock: Mutex::new(()),
        }
    }

    /// The name-list limiter backed by in-process counters.
    pub fn for_card_names(capacity: u32, window: Duration) -> Self {
        Self::new(
            Arc::new(MemoryCounters::new()),
            CARD_NAMES_SCOPE,
            capacity,
            window,
        )
    }

    pub fn check(&self, caller: &str) -> Result<(), RateLimitExceeded> {
        self.check_at(caller, Instant::now())
    }

    /// Count a request from `caller` at `now`, or reject it.
    #[instrument(skip(self, now), fields(scope = self.scope))]
    pub fn check_at(&self, caller: &str, now: Instant) -> Result<(), RateLimitExceeded> {
        let key = format!("{}:{}", self.scope, caller);
        let _guard = self.check_lock.lock();

        if let Some(counter) = self.counters.get(&key, now) {
            if counter.count >= self.capacity {
                debug!(count = counter.count, "rate limit exceeded");
                return Err(RateLimitExceeded {
                    retry_after: counter.expires_at.saturating_duration_since(now),
                });
            }
        }
        let count = self.counters.incr(&key, self.window, now);
        debug!(count, capacity = self.capacity, "request counted");
        Ok(())
    }

    /// Forget `caller`'s current window.
    pub fn reset(&self, caller: &str) {
        self.counters.expire(&format!("{}:{}", self.scope, caller));
    }
}

/// Identify a caller by the first `X-Forwarded-For` entry, else the socket peer.
pub fn caller_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
