//! Resilience patterns for attest-runtime.
//!
//! This module provides:
//! - Sliding-window token rate limiting
//! - Retry with exponential backoff
//! - Fallback decisions between backends

mod fallback;
mod rate_limiter;
mod retry;

pub use fallback::{plan_recovery, Recovery};
pub use rate_limiter::{Acquired, RateLimiterStatus, TokenRateLimiter};
pub use retry::RetryPolicy;
