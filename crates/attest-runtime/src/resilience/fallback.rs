//! Recovery decisions after a failed backend call.
//!
//! The order is fixed: retry transient failures while retries remain, then
//! hand the requirement to the fallback backend if the primary has one, then
//! give up with an Error verdict. Permanent failures give up immediately.

use attest_core::ProviderKind;
use std::time::Duration;

use super::retry::RetryPolicy;
use crate::providers::ProviderError;

/// What to do after a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Sleep for the backoff, then call the same backend again
    Retry { backoff: Duration },

    /// Rate-limited: ask the limiter (or the backend hint) how long to wait, then retry
    RetryRateLimited {
        retry_after: Option<Duration>,
        backoff: Duration,
    },

    /// Delegate this requirement to another backend
    Fallback(ProviderKind),

    /// Produce an Error verdict
    GiveUp,
}

/// Decide how to recover from `error` after `retries_done` retries.
pub fn plan_recovery(
    error: &ProviderError,
    retries_done: u32,
    policy: &RetryPolicy,
    fallback: Option<ProviderKind>,
) -> Recovery {
    if !error.is_transient() {
        return Recovery::GiveUp;
    }

    if let Some(backoff) = policy.delay_for(retries_done) {
        return match error {
            ProviderError::RateLimited { retry_after } => Recovery::RetryRateLimited {
                retry_after: *retry_after,
                backoff,
            },
            _ => Recovery::Retry { backoff },
        };
    }

    match fallback {
        Some(kind) => Recovery::Fallback(kind),
        None => Recovery::GiveUp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overloaded() -> ProviderError {
        ProviderError::Overloaded {
            status: 529,
            message: "overloaded".to_string(),
        }
    }

    #[test]
    fn test_transient_retries_first() {
        let policy = RetryPolicy::default();
        let recovery = plan_recovery(&overloaded(), 0, &policy, Some(ProviderKind::Gemini));
        assert_eq!(
            recovery,
            Recovery::Retry {
                backoff: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn test_rate_limited_carries_hint() {
        let policy = RetryPolicy::default();
        let error = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(12)),
        };
        assert_eq!(
            plan_recovery(&error, 0, &policy, None),
            Recovery::RetryRateLimited {
                retry_after: Some(Duration::from_secs(12)),
                backoff: Duration::from_secs(2),
            }
        );
    }

    #[test]
    fn test_exhausted_retries_fall_back() {
        let policy = RetryPolicy::default();
        assert_eq!(
            plan_recovery(&overloaded(), 1, &policy, Some(ProviderKind::Gemini)),
            Recovery::Fallback(ProviderKind::Gemini)
        );
    }

    #[test]
    fn test_exhausted_without_fallback_gives_up() {
        let policy = RetryPolicy::default();
        assert_eq!(plan_recovery(&overloaded(), 1, &policy, None), Recovery::GiveUp);
    }

    #[test]
    fn test_permanent_error_gives_up_immediately() {
        let policy = RetryPolicy::default();
        let error = ProviderError::MalformedResponse("not json".to_string());
        assert_eq!(
            plan_recovery(&error, 0, &policy, Some(ProviderKind::Gemini)),
            Recovery::GiveUp
        );
    }
}
