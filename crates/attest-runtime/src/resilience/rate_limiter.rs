//! Sliding-window token rate limiter.
//!
//! Charges are kept in a time-ordered ledger; anything older than the window
//! is pruned before every read. Callers that do not fit wait until the oldest
//! charge ages out, with the ledger lock released while they sleep so other
//! callers are not serialized behind them.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimiterConfig;

/// Slack added after the oldest charge leaves the window.
const CAPACITY_BUFFER: Duration = Duration::from_millis(100);

/// Floor and buffer applied when a 429 carries no retry-after.
const RATE_LIMITED_BUFFER: Duration = Duration::from_secs(5);

/// Wait suggested after a 429 when there is no usage history at all.
const RATE_LIMITED_EMPTY_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
struct WindowRecord {
    at: Instant,
    tokens: u64,
}

#[derive(Debug, Default)]
struct Ledger {
    records: VecDeque<WindowRecord>,
    last_grant: Option<Instant>,
}

impl Ledger {
    fn prune(&mut self, now: Instant, window: Duration) {
        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };
        while self.records.front().is_some_and(|r| r.at < cutoff) {
            self.records.pop_front();
        }
    }

    fn usage(&mut self, now: Instant, window: Duration) -> u64 {
        self.prune(now, window);
        self.records.iter().map(|r| r.tokens).sum()
    }
}

/// Outcome of a successful [`TokenRateLimiter::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    /// Time spent blocked
    pub waited: Duration,

    /// Tokens actually charged (the estimate, clamped to the effective limit)
    pub charged: u64,

    /// Window usage including this charge
    pub usage_after: u64,
}

/// Observability snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimiterStatus {
    pub current_usage: u64,
    pub effective_limit: u64,
    pub configured_limit: u64,
    pub utilization_percent: f64,
    #[serde(with = "duration_text")]
    pub window: Duration,
    pub records_in_window: usize,
}

mod duration_text {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }
}

/// Token limiter shared by every caller of a rate-limited backend.
#[derive(Debug)]
pub struct TokenRateLimiter {
    config: RateLimiterConfig,
    effective_limit: u64,
    ledger: Mutex<Ledger>,
}

impl TokenRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let effective_limit = config.effective_limit().max(1);
        tracing::info!(
            tokens_per_minute = config.tokens_per_minute,
            effective_limit,
            safety_margin = config.safety_margin,
            "Token rate limiter initialized"
        );
        Self {
            config,
            effective_limit,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    pub fn effective_limit(&self) -> u64 {
        self.effective_limit
    }

    /// Block until `estimated_tokens` fits in the window, then charge it.
    ///
    /// `None` or `Some(0)` charges the configured default estimate.
    pub async fn acquire(&self, estimated_tokens: Option<u64>) -> Acquired {
        let requested = estimated_tokens
            .filter(|t| *t > 0)
            .unwrap_or(self.config.default_estimate);
        let tokens = requested.min(self.effective_limit);
        if tokens < requested {
            tracing::warn!(
                requested,
                charged = tokens,
                "Estimate exceeds the effective limit, clamping"
            );
        }

        let window = self.config.window;
        let started = Instant::now();
        let mut ledger = self.ledger.lock().await;

        loop {
            let now = Instant::now();

            // The gap wait keeps the lock so grants stay spaced out.
            if let Some(last) = ledger.last_grant {
                let since = now.saturating_duration_since(last);
                if since < self.config.min_request_gap {
                    tokio::time::sleep(self.config.min_request_gap - since).await;
                    continue;
                }
            }

            let usage = ledger.usage(now, window);
            if usage + tokens <= self.effective_limit {
                ledger.records.push_back(WindowRecord { at: now, tokens });
                ledger.last_grant = Some(now);
                let acquired = Acquired {
                    waited: now.saturating_duration_since(started),
                    charged: tokens,
                    usage_after: usage + tokens,
                };
                tracing::debug!(
                    tokens,
                    usage = acquired.usage_after,
                    limit = self.effective_limit,
                    "Rate limit acquired"
                );
                return acquired;
            }

            let wait = ledger
                .records
                .front()
                .map(|oldest| (oldest.at + window + CAPACITY_BUFFER).saturating_duration_since(now))
                .unwrap_or(CAPACITY_BUFFER)
                .max(CAPACITY_BUFFER);

            tracing::info!(
                usage,
                limit = self.effective_limit,
                wait = ?wait,
                "Rate limit reached, waiting"
            );

            drop(ledger);
            tokio::time::sleep(wait).await;
            ledger = self.ledger.lock().await;
        }
    }

    /// Replace a provisional charge with the real usage.
    ///
    /// Rewrites the newest live record equal to `estimated` in place, keeping
    /// its timestamp; appends `actual` when no such record is left.
    pub async fn record_actual_usage(&self, estimated: u64, actual: u64) {
        let mut ledger = self.ledger.lock().await;
        let now = Instant::now();
        ledger.prune(now, self.config.window);

        if let Some(record) = ledger.records.iter_mut().rev().find(|r| r.tokens == estimated) {
            record.tokens = actual;
            tracing::debug!(estimated, actual, "Updated token record");
            return;
        }

        ledger.records.push_back(WindowRecord { at: now, tokens: actual });
        tracing::debug!(estimated, actual, "No provisional record left, appended actual usage");
    }

    /// Suggested wait after a "too many requests" response.
    pub async fn handle_429(&self, retry_after: Option<Duration>) -> Duration {
        if let Some(retry_after) = retry_after.filter(|d| !d.is_zero()) {
            tracing::warn!(wait = ?retry_after, "429 received, backend suggests waiting");
            return retry_after;
        }

        let mut ledger = self.ledger.lock().await;
        let now = Instant::now();
        ledger.prune(now, self.config.window);

        let wait = match ledger.records.front() {
            Some(oldest) => (oldest.at + self.config.window + RATE_LIMITED_BUFFER)
                .saturating_duration_since(now)
                .max(RATE_LIMITED_BUFFER),
            None => RATE_LIMITED_EMPTY_WAIT,
        };

        tracing::warn!(wait = ?wait, "429 received, calculated wait time");
        wait
    }

    pub async fn status(&self) -> RateLimiterStatus {
        let mut ledger = self.ledger.lock().await;
        let usage = ledger.usage(Instant::now(), self.config.window);
        let utilization = (usage as f64 / self.effective_limit as f64 * 1000.0).round() / 10.0;

        RateLimiterStatus {
            current_usage: usage,
            effective_limit: self.effective_limit,
            configured_limit: self.config.tokens_per_minute,
            utilization_percent: utilization,
            window: self.config.window,
            records_in_window: ledger.records.len(),
        }
    }

    /// Forget all recorded usage.
    pub async fn reset(&self) {
        let mut ledger = self.ledger.lock().await;
        ledger.records.clear();
        ledger.last_grant = None;
    }
}

impl Default for TokenRateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
