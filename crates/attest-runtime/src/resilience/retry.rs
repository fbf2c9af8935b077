//! Backoff schedule for transient backend failures.

use backon::{BackoffBuilder, ExponentialBuilder};
use std::time::Duration;

use crate::config::EvaluatorConfig;

/// Exponential backoff from a fixed base, doubling per attempt, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EvaluatorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// The full delay schedule, one entry per permitted retry.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_retries as usize)
            .build()
    }

    /// Delay before retry number `retry` (0-based), or `None` when exhausted.
    pub fn delay_for(&self, retry: u32) -> Option<Duration> {
        self.schedule().nth(retry as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_retries_once() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = policy.schedule().collect();
        assert_eq!(delays, vec![Duration::from_secs(2)]);
        assert_eq!(policy.delay_for(1), None);
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let policy = RetryPolicy {
            max_retries: 8,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        };
        let delays: Vec<_> = policy.schedule().collect();
        assert_eq!(delays.len(), 8);
        assert_eq!(delays[0], Duration::from_secs(2));
        assert_eq!(delays[1], Duration::from_secs(4));
        assert_eq!(delays[2], Duration::from_secs(8));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(60)));
        assert_eq!(delays[7], Duration::from_secs(60));
    }

    #[test]
    fn test_none_never_retries() {
        assert_eq!(RetryPolicy::none().delay_for(0), None);
    }

    #[test]
    fn test_from_config() {
        let config = EvaluatorConfig {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay_for(0), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(2)));
    }
}
