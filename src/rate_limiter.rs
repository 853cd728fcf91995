//! Per-caller sliding-window request budget.
//!
//! Each caller keeps a log of the instants its admitted requests arrived. A request is
//! admitted while fewer than `requests_per_window` of them fall inside the last window,
//! so no window of that length ever holds more than the budget. Rejected requests are
//! not logged.

use crate::metrics;
use crate::settings::RateLimit;
use anyhow::{anyhow, Result};
use dashmap::DashMap;
use log::debug;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct CallerRateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
    budget: usize,
    window: Duration,
    rejected: AtomicU64,
}

impl CallerRateLimiter {
    pub fn new(config: &RateLimit) -> Result<Self> {
        if config.requests_per_window == 0 {
            return Err(anyhow!("rate_limit.requests_per_window must be non-zero"));
        }
        let window = config.window();
        if window.is_zero() {
            return Err(anyhow!("rate limit window must be non-zero"));
        }

        Ok(Self {
            windows: DashMap::new(),
            budget: config.requests_per_window as usize,
            window,
            rejected: AtomicU64::new(0),
        })
    }

    /// `true` when `caller` is within budget; only admitted requests use it up.
    pub fn check(&self, caller: &str) -> bool {
        let now = Instant::now();
        let admitted = {
            let mut log = self.windows.entry(caller.to_string()).or_default();
            while log
                .front()
                .map_or(false, |t| now.duration_since(*t) >= self.window)
            {
                log.pop_front();
            }
            if log.len() < self.budget {
                log.push_back(now);
                true
            } else {
                false
            }
        };

        if !admitted {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            metrics::increment_rate_limited();
            debug!("Rate limit exceeded for caller '{}'", caller);
        }
        admitted
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn tracked_callers(&self) -> usize {
        self.windows.len()
    }

    /// Forgets callers with no request inside the current window.
    pub fn retain_recent(&self) {
        let now = Instant::now();
        self.windows.retain(|_, log| {
            log.back()
                .map_or(false, |t| now.duration_since(*t) < self.window)
        });
        self.windows.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn limiter(budget: u32, window_ms: u64) -> CallerRateLimiter {
        CallerRateLimiter::new(&RateLimit {
            requests_per_window: budget,
            window_seconds: 60,
            window_ms: Some(window_ms),
        })
        .unwrap()
    }

    #[test]
    fn test_default_budget_rejects_request_1001() {
        let limiter = CallerRateLimiter::new(&RateLimit::default()).unwrap();
        for i in 0..1_000 {
            assert!(limiter.check("bot"), "request {} rejected", i + 1);
        }
        assert!(!limiter.check("bot"));
        assert_eq!(limiter.rejected_total(), 1);
        // other callers have their own budget
        assert!(limiter.check("other"));
    }

    #[test]
    fn test_budget_returns_after_window() {
        let limiter = limiter(3, 150);
        assert!((0..3).all(|_| limiter.check("bot")));
        assert!(!limiter.check("bot"));
        sleep(Duration::from_millis(200));
        assert!(limiter.check("bot"));
    }

    #[test]
    fn test_spread_requests_never_exceed_budget_per_window() {
        let limiter = limiter(3, 300);
        let start = Instant::now();
        let mut admitted = 0;
        while start.elapsed() < Duration::from_millis(250) {
            if limiter.check("bot") {
                admitted += 1;
            }
            sleep(Duration::from_millis(10));
        }
        assert_eq!(admitted, 3);
    }

    #[test]
    fn test_rejects_zero_budget() {
        assert!(CallerRateLimiter::new(&RateLimit {
            requests_per_window: 0,
            window_seconds: 60,
            window_ms: None,
        })
        .is_err());
    }

    #[test]
    fn test_retain_recent_forgets_idle_callers() {
        let limiter = limiter(3, 50);
        assert!(limiter.check("idle"));
        sleep(Duration::from_millis(80));
        assert!(limiter.check("active"));
        limiter.retain_recent();
        assert_eq!(limiter.tracked_callers(), 1);
    }
}
