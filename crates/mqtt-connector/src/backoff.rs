//! Reconnect delay schedule.

use std::time::Duration;

use crate::config::ReconnectPolicy;

/// Exponential reconnect delays, capped at the policy maximum.
///
/// The first delay is the policy's initial delay. Each following delay is the
/// previous one multiplied by the backoff multiplier, never exceeding the
/// maximum. [`Backoff::reset`] starts the schedule over after a successful
/// connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub const fn new(policy: &ReconnectPolicy) -> Self {
        Self {
            initial: policy.initial_delay,
            max: policy.max_delay,
            multiplier: policy.backoff_multiplier,
            current: policy.initial_delay,
            attempt: 0,
        }
    }

    /// Delay to wait before the next attempt. Advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        let next = Duration::try_from_secs_f64(delay.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        self.current = next.min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Start the schedule over from the initial delay.
    pub const fn reset(&mut self) {
        self.current = self.initial;
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}
