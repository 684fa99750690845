//! Polling policy: interval, bounds, and target resolution.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_MAX_DURATION,
    DEFAULT_POLL_INTERVAL, DEFAULT_REQUEST_TIMEOUT, MAX_POLL_INTERVAL,
};

/// How the toggle target is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetResolution {
    /// Trust the state supplied by the caller.
    #[default]
    CallerState,

    /// Read the state from the provider right before requesting.
    Authoritative,
}

/// Bounds and pacing for a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Fixed period between polls. The first poll fires one period after
    /// the request is acknowledged.
    pub interval: Duration,

    /// Give up after this many polls without convergence.
    pub max_attempts: Option<u32>,

    /// Give up once this much time has passed since polling started.
    pub max_duration: Option<Duration>,

    /// Consecutive failed reads tolerated before the watch fails.
    pub max_consecutive_failures: u32,

    /// Timeout applied to every provider call.
    pub request_timeout: Duration,

    pub target_resolution: TargetResolution,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            max_duration: Some(DEFAULT_MAX_DURATION),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            target_resolution: TargetResolution::CallerState,
        }
    }
}

impl PollPolicy {
    /// Check the policy for values that would make a watch misbehave.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.interval.is_zero() {
            return Err(PolicyError::ZeroInterval);
        }
        if self.interval > MAX_POLL_INTERVAL {
            return Err(PolicyError::IntervalTooLong {
                max: MAX_POLL_INTERVAL,
            });
        }
        if self.request_timeout.is_zero() {
            return Err(PolicyError::ZeroRequestTimeout);
        }
        if self.max_attempts == Some(0) {
            return Err(PolicyError::ZeroAttempts);
        }
        if self.max_duration.is_some_and(|d| d.is_zero()) {
            return Err(PolicyError::ZeroDuration);
        }
        if self.max_consecutive_failures == 0 {
            return Err(PolicyError::ZeroFailureThreshold);
        }
        Ok(())
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }

    pub fn with_max_consecutive_failures(mut self, failures: u32) -> Self {
        self.max_consecutive_failures = failures;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_target_resolution(mut self, resolution: TargetResolution) -> Self {
        self.target_resolution = resolution;
        self
    }

    /// Returns true once either bound is exhausted.
    pub(crate) fn is_exhausted(&self, attempts: u32, elapsed: Duration) -> bool {
        let attempts_exceeded = self.max_attempts.is_some_and(|max| attempts >= max);
        let duration_exceeded = self.max_duration.is_some_and(|max| elapsed >= max);
        attempts_exceeded || duration_exceeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_default() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(5));
        assert_eq!(policy.target_resolution, TargetResolution::CallerState);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_policy_validation() {
        let zero_interval = PollPolicy::default().with_interval(Duration::ZERO);
        assert_eq!(zero_interval.validate(), Err(PolicyError::ZeroInterval));

        let zero_attempts = PollPolicy::default().with_max_attempts(Some(0));
        assert_eq!(zero_attempts.validate(), Err(PolicyError::ZeroAttempts));

        let zero_duration = PollPolicy::default().with_max_duration(Some(Duration::ZERO));
        assert_eq!(zero_duration.validate(), Err(PolicyError::ZeroDuration));

        let huge_interval = PollPolicy::default().with_interval(Duration::MAX);
        assert_eq!(
            huge_interval.validate(),
            Err(PolicyError::IntervalTooLong {
                max: MAX_POLL_INTERVAL
            })
        );
        let longest = PollPolicy::default().with_interval(MAX_POLL_INTERVAL);
        assert!(longest.validate().is_ok());

        let huge_duration = PollPolicy::default().with_max_duration(Some(Duration::MAX));
        assert!(huge_duration.validate().is_ok());

        let zero_failures = PollPolicy::default().with_max_consecutive_failures(0);
        assert_eq!(zero_failures.validate(), Err(PolicyError::ZeroFailureThreshold));

        let unbounded = PollPolicy::default()
            .with_max_attempts(None)
            .with_max_duration(None);
        assert!(unbounded.validate().is_ok());
    }

    #[test]
    fn test_exhaustion() {
        let policy = PollPolicy::default()
            .with_max_attempts(Some(3))
            .with_max_duration(Some(Duration::from_secs(60)));

        assert!(!policy.is_exhausted(2, Duration::from_secs(10)));
        assert!(policy.is_exhausted(3, Duration::from_secs(10)));
        assert!(policy.is_exhausted(1, Duration::from_secs(60)));

        let unbounded = policy.with_max_attempts(None).with_max_duration(None);
        assert!(!unbounded.is_exhausted(u32::MAX, Duration::from_secs(86_400)));
    }
}
