//! # Circuit Breaker
//!
//! One breaker guards the whole engine. Counters are atomics so concurrent queries can
//! report outcomes without a lock.
//!
//! Transitions:
//! - `Closed -> Open` after `failure_threshold` consecutive failures
//! - `Open -> HalfOpen` implicitly, once the cooldown deadline has passed (no timer)
//! - `HalfOpen -> Closed` on the next success, resetting the failure counter
//! - `HalfOpen -> Open` on the next failure, with a fresh cooldown

use crate::metrics;
use crate::settings;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerStateName {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreakerStateName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitBreakerStateName::Closed => "closed",
            CircuitBreakerStateName::Open => "open",
            CircuitBreakerStateName::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            CircuitBreakerStateName::Closed => 0.0,
            CircuitBreakerStateName::Open => 1.0,
            CircuitBreakerStateName::HalfOpen => 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitBreakerStateName,
    pub consecutive_failures: u32,
    pub opened_total: u64,
    /// Milliseconds until calls are let through again; zero unless open
    pub retry_after_ms: u64,
    pub last_failure_ago_ms: Option<u64>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    epoch: Instant,
    failures: AtomicU32,
    open: AtomicBool,
    /// Deadline in ms since `epoch`
    open_until_ms: AtomicU64,
    /// ms since `epoch` plus one; zero means never failed
    last_failure_ms: AtomicU64,
    opened_total: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: &settings::CircuitBreaker) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown(),
            epoch: Instant::now(),
            failures: AtomicU32::new(0),
            open: AtomicBool::new(false),
            open_until_ms: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            opened_total: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn cooldown_ms(&self) -> u64 {
        self.cooldown.as_millis() as u64
    }

    /// `Err(retry_after_ms)` while open and before the deadline; otherwise the call may
    /// proceed (as a half-open trial call when the deadline has passed).
    pub fn try_acquire(&self) -> Result<(), u64> {
        if !self.open.load(Ordering::Acquire) {
            return Ok(());
        }
        let now = self.now_ms();
        let until = self.open_until_ms.load(Ordering::Acquire);
        if now < until {
            Err(until - now)
        } else {
            Ok(())
        }
    }

    /// Records a successful call. Returns `true` when this closed the breaker.
    pub fn record_success(&self) -> bool {
        if !self.open.load(Ordering::Acquire) {
            self.failures.store(0, Ordering::Release);
            return false;
        }
        if self.now_ms() < self.open_until_ms.load(Ordering::Acquire) {
            // started before the breaker opened
            return false;
        }
        if self
            .open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.failures.store(0, Ordering::Release);
            info!("✅ Circuit breaker closed after successful trial call");
            metrics::set_circuit_breaker_state(CircuitBreakerStateName::Closed.gauge_value());
            return true;
        }
        false
    }

    /// Records a handled failure. Returns `true` when this opened (or re-opened) the breaker.
    pub fn record_failure(&self) -> bool {
        let now = self.now_ms();
        self.last_failure_ms.store(now + 1, Ordering::Release);

        if self.open.load(Ordering::Acquire) {
            let until = self.open_until_ms.load(Ordering::Acquire);
            if now >= until
                && self
                    .open_until_ms
                    .compare_exchange(until, now + self.cooldown_ms(), Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                warn!("⚠️ Circuit breaker trial call failed, re-opening for {:?}", self.cooldown);
                self.note_opened();
                return true;
            }
            return false;
        }

        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures < self.failure_threshold {
            return false;
        }
        self.open_until_ms
            .store(now + self.cooldown_ms(), Ordering::Release);
        if self
            .open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            warn!(
                "⚠️ Circuit breaker is now Open due to {} consecutive failures (cooldown {:?})",
                failures, self.cooldown
            );
            self.note_opened();
            return true;
        }
        false
    }

    fn note_opened(&self) {
        self.opened_total.fetch_add(1, Ordering::Relaxed);
        metrics::increment_circuit_breaker_opened();
        metrics::set_circuit_breaker_state(CircuitBreakerStateName::Open.gauge_value());
    }

    pub fn state(&self) -> CircuitBreakerStateName {
        if !self.open.load(Ordering::Acquire) {
            CircuitBreakerStateName::Closed
        } else if self.now_ms() < self.open_until_ms.load(Ordering::Acquire) {
            CircuitBreakerStateName::Open
        } else {
            CircuitBreakerStateName::HalfOpen
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitBreakerStateName::Open
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = self.now_ms();
        let last = self.last_failure_ms.load(Ordering::Acquire);
        CircuitBreakerSnapshot {
            state: self.state(),
            consecutive_failures: self.consecutive_failures(),
            opened_total: self.opened_total.load(Ordering::Relaxed),
            retry_after_ms: self.try_acquire().err().unwrap_or(0),
            last_failure_ago_ms: (last > 0).then(|| now.saturating_sub(last - 1)),
        }
    }

    /// Forces the breaker closed with a zero failure count.
    pub fn reset(&self) {
        self.open.store(false, Ordering::Release);
        self.failures.store(0, Ordering::Release);
        self.open_until_ms.store(0, Ordering::Release);
        metrics::set_circuit_breaker_state(CircuitBreakerStateName::Closed.gauge_value());
    }
}
