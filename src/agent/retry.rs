//! Reconnect policy with exponential backoff and an optional attempt cap.

use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;

/// Delay schedule between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub initial_interval: Duration,
    /// Cap on any single delay.
    pub max_interval: Duration,
    /// Jitter in `[0.0, 1.0]`; `0.2` means ±20%.
    pub randomization_factor: f64,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
    /// Consecutive failed attempts tolerated before giving up
    /// (`None` = retry forever).
    pub max_attempts: Option<u32>,
    /// A session must stay open this long to reset the schedule. Shorter
    /// sessions count as failed attempts.
    pub min_stable: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            randomization_factor: 0.2,
            multiplier: 2.0,
            max_attempts: None,
            min_stable: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Reconnects immediately and forever, whatever the session lifetime.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            randomization_factor: 0.0,
            multiplier: 1.0,
            max_attempts: None,
            min_stable: Duration::ZERO,
        }
    }

    /// Sets the attempt cap.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Starts a fresh schedule.
    #[must_use]
    pub fn start(&self) -> RetryState {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval.max(self.initial_interval),
            randomization_factor: self.randomization_factor.clamp(0.0, 1.0),
            multiplier: self.multiplier.max(1.0),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        backoff.reset();
        RetryState {
            backoff,
            failures: 0,
            max_attempts: self.max_attempts,
            max_interval: self.max_interval,
        }
    }
}

/// Running position in a [`RetryPolicy`] schedule.
#[derive(Debug)]
pub struct RetryState {
    backoff: ExponentialBackoff,
    failures: u32,
    max_attempts: Option<u32>,
    max_interval: Duration,
}

impl RetryState {
    /// Records a failed attempt and returns how long to wait before the
    /// next one, or `None` once the attempt cap is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.max_attempts.is_some_and(|max| self.failures >= max) {
            return None;
        }
        Some(self.backoff.next_backoff().unwrap_or(self.max_interval))
    }

    /// Failed attempts since the last reset.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Clears the failure count after a successful connection.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.backoff.reset();
    }
}
