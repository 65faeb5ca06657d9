use std::{collections::HashMap, time::Duration};

use tokio::sync::RwLock;

use crate::time::now_ms;
use gateway_protocol::{
    DEFAULT_AUTH_WINDOW_MS, DEFAULT_MAX_AUTH_ATTEMPTS, MAX_BACKOFF_SECS,
    RATE_LIMIT_GC_INTERVAL_MS, RATE_LIMIT_IDLE_RECLAIM_MS,
};

#[derive(Debug, Clone, Default)]
struct RateLimitRecord {
    consecutive_failures: u32,
    last_attempt_ms: u64,
    blocked_until_ms: u64,
}

/// Result of [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    pub limited: bool,
    pub wait_seconds: u64,
}

/// Per-(identity,peer) failure tracking with exponential backoff and
/// periodic GC (C3). One lock over the whole map, same shape as the
/// teacher's `DedupeCache` (§4.5, §9 "Rate-limit GC").
pub struct RateLimiter {
    records: RwLock<HashMap<String, RateLimitRecord>>,
    max_attempts: u32,
    auth_window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AUTH_ATTEMPTS, Duration::from_millis(DEFAULT_AUTH_WINDOW_MS))
    }
}

impl RateLimiter {
    pub fn new(max_attempts: u32, auth_window: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            max_attempts,
            auth_window,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Is `key` currently blocked? Resets the failure counter first if the
    /// auth window has elapsed since the last attempt (§4.5).
    pub async fn check(&self, key: &str) -> CheckResult {
        let mut map = self.records.write().await;
        let now = now_ms();
        if let Some(record) = map.get_mut(key) {
            reset_if_stale(record, now, self.auth_window);
            if record.blocked_until_ms > now {
                let wait_seconds = (record.blocked_until_ms - now).div_ceil(1000);
                return CheckResult { limited: true, wait_seconds };
            }
        }
        CheckResult { limited: false, wait_seconds: 0 }
    }

    /// Record a failed attempt; blocks the key once failures reach
    /// `max_attempts`, backing off `2^(failures-1)` seconds, capped.
    pub async fn record_failure(&self, key: &str) -> CheckResult {
        let mut map = self.records.write().await;
        let now = now_ms();
        let record = map.entry(key.to_string()).or_default();
        reset_if_stale(record, now, self.auth_window);

        record.consecutive_failures += 1;
        record.last_attempt_ms = now;

        if record.consecutive_failures >= self.max_attempts {
            let exponent = record.consecutive_failures - 1;
            let backoff_secs = 2u64.saturating_pow(exponent).min(MAX_BACKOFF_SECS);
            record.blocked_until_ms = now + backoff_secs * 1000;
            CheckResult { limited: true, wait_seconds: backoff_secs }
        } else {
            CheckResult { limited: false, wait_seconds: 0 }
        }
    }

    /// Clear failures and any block on successful auth.
    pub async fn record_success(&self, key: &str) {
        let mut map = self.records.write().await;
        let now = now_ms();
        let record = map.entry(key.to_string()).or_default();
        record.consecutive_failures = 0;
        record.blocked_until_ms = 0;
        record.last_attempt_ms = now;
    }

    /// Attempts remaining before the key is blocked.
    pub async fn remaining(&self, key: &str) -> u32 {
        let map = self.records.read().await;
        let failures = map.get(key).map(|r| r.consecutive_failures).unwrap_or(0);
        self.max_attempts.saturating_sub(failures)
    }

    /// Drop idle, unblocked records (§4.5, §9 "Rate-limit GC"). Does not
    /// hold the lock across any I/O — it's a pure in-memory retain.
    pub async fn gc(&self) {
        let now = now_ms();
        let mut map = self.records.write().await;
        map.retain(|_, record| {
            let idle = now.saturating_sub(record.last_attempt_ms);
            let still_blocked = record.blocked_until_ms > now;
            idle < RATE_LIMIT_IDLE_RECLAIM_MS || still_blocked
        });
    }

    /// Spawn the periodic GC sweep on the current runtime. Returns a handle
    /// the caller can abort at shutdown.
    pub fn spawn_gc(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(RATE_LIMIT_GC_INTERVAL_MS));
            loop {
                interval.tick().await;
                self.gc().await;
            }
        })
    }
}

fn reset_if_stale(record: &mut RateLimitRecord, now: u64, window: Duration) {
    if now.saturating_sub(record.last_attempt_ms) > window.as_millis() as u64 {
        record.consecutive_failures = 0;
        record.blocked_until_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blocks_after_max_attempts() {
        let limiter = RateLimiter::new(3, Duration::from_millis(DEFAULT_AUTH_WINDOW_MS));
        assert!(!limiter.record_failure("k").await.limited);
        assert!(!limiter.record_failure("k").await.limited);
        let third = limiter.record_failure("k").await;
        assert!(third.limited);
        assert_eq!(third.wait_seconds, 4); // 2^(3-1)
    }

    #[tokio::test]
    async fn monotonicity_of_blocked_until() {
        let limiter = RateLimiter::new(5, Duration::from_millis(DEFAULT_AUTH_WINDOW_MS));
        let mut last_wait = 0u64;
        for _ in 0..5 {
            let r = limiter.record_failure("k").await;
            assert!(r.wait_seconds >= last_wait);
            last_wait = r.wait_seconds;
        }
        limiter.record_success("k").await;
        assert!(!limiter.check("k").await.limited);
    }

    #[tokio::test]
    async fn success_clears_failures() {
        let limiter = RateLimiter::new(3, Duration::from_millis(DEFAULT_AUTH_WINDOW_MS));
        limiter.record_failure("k").await;
        limiter.record_failure("k").await;
        limiter.record_success("k").await;
        assert_eq!(limiter.remaining("k").await, 3);
    }

    #[tokio::test]
    async fn gc_drops_idle_unblocked_records() {
        let limiter = RateLimiter::new(3, Duration::from_millis(DEFAULT_AUTH_WINDOW_MS));
        limiter.record_failure("k").await;
        {
            let mut map = limiter.records.write().await;
            let record = map.get_mut("k").unwrap();
            record.last_attempt_ms = 0; // force "idle forever"
        }
        limiter.gc().await;
        assert_eq!(limiter.remaining("k").await, 3);
    }
}
