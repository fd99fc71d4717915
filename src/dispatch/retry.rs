//! Retry Policy
//!
//! Attempt budget, inter-attempt delays and the per-attempt deadline.

use crate::config::GatewaySettings;
use crate::error::UpstreamError;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;

/// Retry settings captured from one configuration snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Growth factor between delays; 1.0 keeps them constant
    pub multiplier: f64,

    /// Upper bound on any single delay
    pub max_delay: Duration,

    /// Deadline for one upstream attempt
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: settings.retry_delay(),
            multiplier: settings.backoff_multiplier,
            max_delay: settings.max_retry_delay(),
            attempt_timeout: settings.timeout(),
        }
    }

    /// Total upstream attempts allowed for one request.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Deterministic delay schedule for one request.
    pub fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            current_interval: self.initial_delay,
            initial_interval: self.initial_delay,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max_delay,
            // The attempt budget bounds retries, not wall-clock time.
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&GatewaySettings::default())
    }
}

/// Ephemeral per-request retry bookkeeping
#[derive(Debug)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
    backoff: ExponentialBackoff,
    last_error: Option<UpstreamError>,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_attempts: policy.max_attempts(),
            backoff: policy.backoff(),
            last_error: None,
        }
    }

    /// Start the next attempt; returns its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }

    pub fn record_failure(&mut self, error: UpstreamError) {
        self.last_error = Some(error);
    }

    pub fn take_last_error(&mut self) -> Option<UpstreamError> {
        self.last_error.take()
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.backoff.next_backoff().unwrap_or(self.backoff.max_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial_ms: u64, multiplier: f64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(initial_ms),
            multiplier,
            max_delay: Duration::from_millis(max_ms),
            attempt_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_constant_delay() {
        let mut state = RetryState::new(&policy(200, 1.0, 30_000));
        for _ in 0..5 {
            assert_eq!(state.next_delay(), Duration::from_millis(200));
        }
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let mut state = RetryState::new(&policy(100, 2.0, 350));
        assert_eq!(state.next_delay(), Duration::from_millis(100));
        assert_eq!(state.next_delay(), Duration::from_millis(200));
        assert_eq!(state.next_delay(), Duration::from_millis(350));
        assert_eq!(state.next_delay(), Duration::from_millis(350));
    }

    #[test]
    fn test_attempt_budget() {
        let mut state = RetryState::new(&policy(0, 1.0, 0));
        let mut started = 0;
        while state.has_attempts_left() {
            started = state.begin_attempt();
        }
        assert_eq!(started, 4);
        assert_eq!(state.attempts(), 4);
    }

    #[test]
    fn test_last_error_is_kept() {
        let mut state = RetryState::new(&RetryPolicy::default());
        assert!(state.take_last_error().is_none());
        state.record_failure(UpstreamError::Timeout("1s".into()));
        state.record_failure(UpstreamError::Connect("reset".into()));
        assert_eq!(
            state.take_last_error(),
            Some(UpstreamError::Connect("reset".into()))
        );
        assert!(state.take_last_error().is_none());
    }
}
