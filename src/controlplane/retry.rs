//! Retry budget and exponential backoff for reconciliation steps.
//!
//! The reconciler counts attempts itself (the count is persisted on the
//! provision record), so this module only decides when the budget is spent
//! and how long to wait between attempts.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for backend operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Attempts allowed per phase before the claim fails
    pub max_attempts: u32,
    /// Delay after the first failure
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,
    /// Randomization applied to each delay (0.0 = none)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Whether `attempts` failed attempts use up the budget
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts.max(1)
    }

    /// Fresh delay sequence for one phase
    pub fn backoff(&self) -> RetryBackoff {
        RetryBackoff {
            inner: ExponentialBackoffBuilder::new()
                .with_initial_interval(self.initial_delay)
                .with_max_interval(self.max_delay)
                .with_multiplier(self.backoff_multiplier)
                .with_randomization_factor(self.jitter)
                .with_max_elapsed_time(None)
                .build(),
            max_delay: self.max_delay,
        }
    }
}

/// Sequence of delays between attempts
pub struct RetryBackoff {
    inner: ExponentialBackoff,
    max_delay: Duration,
}

impl RetryBackoff {
    /// Delay before the next attempt, never above the configured maximum
    pub fn next_delay(&mut self) -> Duration {
        self.inner
            .next_backoff()
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Serde helpers for durations written as milliseconds
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted() {
        let config = RetryConfig::with_max_attempts(4);
        assert!(!config.exhausted(3));
        assert!(config.exhausted(4));

        // A zero budget still allows one attempt
        let config = RetryConfig::with_max_attempts(0);
        assert!(config.exhausted(1));
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        };
        let mut backoff = config.backoff();
        let delays: Vec<u128> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();

        assert_eq!(delays, vec![10, 20, 40, 50, 50]);
    }

    #[test]
    fn test_from_yaml() {
        let config: RetryConfig =
            serde_yaml::from_str("maxAttempts: 3\ninitialDelay: 250\n").unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, RetryConfig::default().max_delay);
    }
}
