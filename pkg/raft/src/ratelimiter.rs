use std::time::{Duration, Instant};

use executor::sync::SyncMutex;

/// Per-peer token-bucket rate limiter keyed by measured moving-average
/// throughput (Section 4.3 "Rate limiting"). Options-struct shape grounded
/// on this workspace's `ExponentialBackoffOptions` convention.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterOptions {
    /// Tokens refilled per second; set by `update_rate`, which the
    /// dispatcher calls out of band as it measures a peer's throughput.
    pub tokens_per_second: f64,
    /// Largest burst the bucket can hold.
    pub burst: f64,
}

impl Default for RateLimiterOptions {
    fn default() -> Self {
        Self {
            tokens_per_second: 10.0 * 1024.0 * 1024.0,
            burst: 4.0 * 1024.0 * 1024.0,
        }
    }
}

struct BucketState {
    options: RateLimiterOptions,
    tokens: f64,
    last_refill: Instant,
}

/// A blocking-acquire token bucket: `acquire(n)` waits (cooperatively, via
/// `executor::sleep`) until `n` tokens are available, then withdraws them.
/// One instance is bound to each `PeerHandle`; `update_rate` rebinds its
/// refill rate without losing currently banked tokens.
pub struct RateLimiter {
    state: SyncMutex<BucketState>,
}

impl RateLimiter {
    pub fn new(options: RateLimiterOptions) -> Self {
        Self {
            state: SyncMutex::new(BucketState {
                options,
                tokens: options.burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn update_rate(&self, tokens_per_second: f64) {
        let _ = self.state.apply(|s| {
            s.options.tokens_per_second = tokens_per_second;
        });
    }

    fn refill(state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * state.options.tokens_per_second).min(state.options.burst);
        state.last_refill = now;
    }

    /// Non-blocking: withdraws `amount` tokens if immediately available,
    /// otherwise refills and reports the wait needed.
    fn try_acquire(&self, amount: f64) -> Result<(), Duration> {
        self.state
            .apply(|s| {
                Self::refill(s);
                if s.tokens >= amount {
                    s.tokens -= amount;
                    Ok(())
                } else {
                    let deficit = amount - s.tokens;
                    Err(Duration::from_secs_f64(deficit / s.options.tokens_per_second.max(1.0)))
                }
            })
            .unwrap_or(Ok(()))
    }

    /// Acquires `logSize` permits, blocking (cooperatively) until they are
    /// available (Section 4.3, step 4's "acquires logSize permits from the
    /// peer's rate limiter (blocking)").
    pub async fn acquire(&self, amount: usize) {
        let amount = amount as f64;
        loop {
            match self.try_acquire(amount) {
                Ok(()) => return,
                Err(wait) => {
                    let _ = executor::sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_immediately_available() {
        let limiter = RateLimiter::new(RateLimiterOptions {
            tokens_per_second: 1024.0,
            burst: 2048.0,
        });
        assert!(limiter.try_acquire(2048.0).is_ok());
        assert!(limiter.try_acquire(1.0).is_err());
    }

    #[test]
    fn update_rate_changes_refill_speed() {
        let limiter = RateLimiter::new(RateLimiterOptions {
            tokens_per_second: 1.0,
            burst: 1.0,
        });
        limiter.try_acquire(1.0).unwrap();
        limiter.update_rate(1_000_000.0);
        std::thread::sleep(Duration::from_millis(5));
        assert!(limiter.try_acquire(1.0).is_ok());
    }
}
