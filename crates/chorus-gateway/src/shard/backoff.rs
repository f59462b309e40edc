//! Reconnect backoff: exponential growth, capped, with full jitter

use std::time::Duration;

use chorus_common::BackoffConfig;
use rand::Rng;

/// Tracks consecutive reconnect failures of one shard
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Consecutive failures so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Forget past failures after a successful session
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Whether another attempt is allowed
    pub fn exhausted(&self) -> bool {
        self.config
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
    }

    /// Upper bound of the delay before attempt number `attempt` (0-based)
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.config.base.saturating_mul(factor).min(self.config.max)
    }

    /// Record a failure and pick the delay before the next attempt
    ///
    /// Returns `None` once `max_attempts` consecutive failures were recorded.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        let ceiling = self.ceiling(self.attempts);
        self.attempts += 1;

        let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Some(Duration::ZERO);
        }
        Some(Duration::from_millis(rand::thread_rng().gen_range(0..=millis)))
    }

    /// Record an attempt that may go ahead without waiting
    ///
    /// Only the first attempt after a success is immediate; back-to-back requests fall
    /// back to [`Backoff::next_delay`] and count toward `max_attempts` alike.
    pub fn next_immediate(&mut self) -> Option<Duration> {
        if self.attempts == 0 && !self.exhausted() {
            self.attempts = 1;
            return Some(Duration::ZERO);
        }
        self.next_delay()
    }
}

/// Mandatory wait after a non-resumable INVALID_SESSION
pub fn invalid_session_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(1_000..=5_000))
}
