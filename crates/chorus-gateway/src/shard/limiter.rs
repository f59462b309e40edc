//! IDENTIFY rate limiting
//!
//! The gateway accepts one IDENTIFY per interval across all shards of a token.
//! Shards share one limiter; waiters are served in arrival order.
//!
//! The limiter reads Tokio's clock rather than the system clock, so it advances with
//! the runtime's timers (and with paused time in tests).

use std::time::Duration;

use governor::clock::Clock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Governor clock backed by [`tokio::time::Instant`]
#[derive(Debug, Clone, Copy)]
struct TokioClock {
    origin: Instant,
}

impl Clock for TokioClock {
    type Instant = Duration;

    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<Duration>>;

pub struct IdentifyLimiter {
    limiter: Option<Mutex<DirectLimiter>>,
    clock: TokioClock,
    interval: Duration,
}

impl IdentifyLimiter {
    /// One IDENTIFY per `interval`; a zero interval disables the limit
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        let clock = TokioClock {
            origin: Instant::now(),
        };
        let limiter = Quota::with_period(interval)
            .map(|quota| Mutex::new(RateLimiter::direct_with_clock(quota, clock)));
        Self {
            limiter,
            clock,
            interval,
        }
    }

    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for this shard's turn to IDENTIFY
    pub async fn acquire(&self) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        let limiter = limiter.lock().await;
        loop {
            match limiter.check() {
                Ok(()) => return,
                Err(not_until) => {
                    tokio::time::sleep(not_until.wait_time_from(self.clock.now())).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for IdentifyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifyLimiter")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
