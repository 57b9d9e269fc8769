use std::time::{Duration, Instant};

use rand::Rng;

/// Mirrors this workspace's `net::backoff::ExponentialBackoffOptions`,
/// adapted to use the `rand` crate directly for jitter instead of
/// `crypto::random` (not part of this crate's dependency closure) — the
/// same choice this pack's other Raft implementations make for the same
/// purpose.
#[derive(Clone)]
pub struct ExponentialBackoffOptions {
    /// Initial amount of time after which we should retry.
    pub base_duration: Duration,

    /// Maximum amount of random noise to add to each retry attempt.
    pub jitter_duration: Duration,

    /// Maximum amount of time to wait before retrying (doesn't include
    /// jitter).
    pub max_duration: Duration,

    /// If we see nothing but successful attempts for this long, reset the
    /// backoff state.
    pub cooldown_duration: Duration,

    /// Maximum number of attempts allowed since the last success. 0 means
    /// unlimited.
    pub max_num_attempts: usize,
}

impl Default for ExponentialBackoffOptions {
    fn default() -> Self {
        Self {
            base_duration: Duration::from_millis(100),
            jitter_duration: Duration::from_millis(50),
            max_duration: Duration::from_secs(10),
            cooldown_duration: Duration::from_secs(30),
            max_num_attempts: 0,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ExponentialBackoffResult {
    Start,
    StartAfter(Duration),
    Stop,
}

/// Tracker for how long the Catch-Up Manager should wait between retries of
/// a `LogCatchUpTask`/`SnapshotCatchUpTask` for one peer (Section 4.4).
/// Each instance is for sequential attempts against a single peer.
pub struct ExponentialBackoff {
    options: ExponentialBackoffOptions,
    current_backoff: Duration,
    successful_since: Option<Instant>,
    last_completion: Option<Instant>,
    attempt_count: usize,
    attempt_pending: bool,
}

impl ExponentialBackoff {
    pub fn new(options: ExponentialBackoffOptions) -> Self {
        Self {
            options,
            current_backoff: Duration::ZERO,
            successful_since: None,
            last_completion: None,
            attempt_pending: false,
            attempt_count: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.options.clone());
    }

    /// Returns the wait needed before starting a new attempt, or `Stop` if
    /// `max_num_attempts` has been exhausted.
    pub fn start_attempt(&mut self) -> ExponentialBackoffResult {
        if self.attempt_pending {
            self.end_attempt(false);
        }

        if self.options.max_num_attempts > 0 && self.attempt_count >= self.options.max_num_attempts
        {
            return ExponentialBackoffResult::Stop;
        }

        self.attempt_pending = true;
        if self.options.max_num_attempts > 0 {
            self.attempt_count += 1;
        }

        if self.current_backoff.is_zero() {
            return ExponentialBackoffResult::Start;
        }

        let jitter_micros = self.options.jitter_duration.as_micros() as u64;
        let jitter = if jitter_micros == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_micros)
        };
        let wait_time = self.current_backoff + Duration::from_micros(jitter);

        let now = Instant::now();
        if let Some(last_completion) = self.last_completion {
            let elapsed = now.duration_since(last_completion);
            if elapsed >= wait_time {
                return ExponentialBackoffResult::Start;
            }

            return ExponentialBackoffResult::StartAfter(wait_time - elapsed);
        }

        ExponentialBackoffResult::StartAfter(wait_time)
    }

    pub fn end_attempt(&mut self, successful: bool) {
        let now = Instant::now();
        self.attempt_pending = false;
        self.last_completion = Some(now);

        if let Some(successful_since) = &self.successful_since {
            if now - *successful_since > self.options.cooldown_duration {
                self.current_backoff = Duration::ZERO;
            }
        }

        if successful {
            self.attempt_count = 0;
            self.successful_since.get_or_insert(now);
        } else {
            if self.current_backoff.is_zero() {
                self.current_backoff = self.options.base_duration;
            } else {
                self.current_backoff =
                    std::cmp::min(2 * self.current_backoff, self.options.max_duration);
            }

            self.successful_since = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_starts_immediately() {
        let mut backoff = ExponentialBackoff::new(ExponentialBackoffOptions::default());
        assert_eq!(backoff.start_attempt(), ExponentialBackoffResult::Start);
    }

    #[test]
    fn failures_grow_the_backoff_and_stop_honors_max_attempts() {
        let mut backoff = ExponentialBackoff::new(ExponentialBackoffOptions {
            max_num_attempts: 2,
            ..ExponentialBackoffOptions::default()
        });

        assert_eq!(backoff.start_attempt(), ExponentialBackoffResult::Start);
        backoff.end_attempt(false);

        match backoff.start_attempt() {
            ExponentialBackoffResult::StartAfter(_) => {}
            other => panic!("expected StartAfter, got {:?}", other),
        }
        backoff.end_attempt(false);

        assert_eq!(backoff.start_attempt(), ExponentialBackoffResult::Stop);
    }

    #[test]
    fn success_resets_attempt_count() {
        let mut backoff = ExponentialBackoff::new(ExponentialBackoffOptions {
            max_num_attempts: 1,
            ..ExponentialBackoffOptions::default()
        });
        backoff.start_attempt();
        backoff.end_attempt(true);
        assert_eq!(backoff.start_attempt(), ExponentialBackoffResult::Start);
    }
}
