//! Runtime configuration.
//!
//! Every knob has a default matching the documented behavior, can be
//! deserialized from JSON/YAML with human-readable durations (`"30m"`,
//! `"100ms"`), and can be overridden from the process environment.

use attest_core::{EvaluationMode, ProviderKind, UnknownProvider};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors. Raised at construction, never at evaluation time.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unsupported VISION_PROVIDER '{0}'. Expected one of: dual, both, openai, gemini, claude")]
    UnknownProvider(String),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl From<UnknownProvider> for ConfigError {
    fn from(err: UnknownProvider) -> Self {
        ConfigError::UnknownProvider(err.0)
    }
}

/// Serde helper for durations written as humantime strings.
///
/// Bare integers are accepted as seconds.
mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => humantime::parse_duration(&text).map_err(serde::de::Error::custom),
        }
    }
}

/// Evaluation queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Documents evaluated at the same time
    pub max_concurrent: usize,

    /// Queued (not yet processing) items accepted before rejecting
    pub max_queue_size: usize,

    /// Upper bound on one document evaluation
    #[serde(with = "duration_human")]
    pub job_timeout: Duration,

    /// How long `stop` waits for in-flight jobs before aborting them
    #[serde(with = "duration_human")]
    pub shutdown_grace: Duration,

    /// Finished items kept for late status queries
    pub history_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_queue_size: 100,
            job_timeout: Duration::from_secs(1800),
            shutdown_grace: Duration::from_secs(5),
            history_limit: 50,
        }
    }
}

/// Sliding-window token limiter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Provider-imposed input token budget per window
    pub tokens_per_minute: u64,

    #[serde(with = "duration_human")]
    pub window: Duration,

    /// Fraction of the budget actually used, in `(0, 1]`
    pub safety_margin: f64,

    /// Minimum spacing between granted requests
    #[serde(with = "duration_human")]
    pub min_request_gap: Duration,

    /// Charge used when the caller has no estimate
    pub default_estimate: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            tokens_per_minute: 450_000,
            window: Duration::from_secs(60),
            safety_margin: 0.85,
            min_request_gap: Duration::from_millis(100),
            default_estimate: 8_000,
        }
    }
}

impl RateLimiterConfig {
    /// `tokens_per_minute * safety_margin`, truncated.
    pub fn effective_limit(&self) -> u64 {
        (self.tokens_per_minute as f64 * self.safety_margin) as u64
    }
}

/// Per-requirement evaluator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Role of the first backend in dual mode
    pub primary: ProviderKind,

    /// Role of the second backend in dual mode
    pub secondary: ProviderKind,

    /// Concurrent requirement calls for unthrottled backends
    pub concurrency: usize,

    /// Concurrent requirement calls for rate-limited backends
    pub rate_limited_concurrency: usize,

    /// Evaluate only the first N requirements; 0 means all
    pub requirement_limit: usize,

    /// Retries on transient failure before falling back
    pub max_retries: u32,

    #[serde(with = "duration_human")]
    pub retry_base_delay: Duration,

    #[serde(with = "duration_human")]
    pub retry_max_delay: Duration,

    /// Upper bound on one requirement call
    #[serde(with = "duration_human")]
    pub request_timeout: Duration,

    /// Uploaded-file handles remembered across evaluations
    pub upload_cache_capacity: u64,

    #[serde(with = "duration_human")]
    pub upload_cache_ttl: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            primary: ProviderKind::Claude,
            secondary: ProviderKind::OpenAi,
            concurrency: 10,
            rate_limited_concurrency: 3,
            requirement_limit: 0,
            max_retries: 1,
            retry_base_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(60),
            request_timeout: Duration::from_secs(300),
            upload_cache_capacity: 256,
            upload_cache_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

impl EvaluatorConfig {
    /// Concurrency limit for a backend.
    pub fn concurrency_for(&self, rate_limited: bool) -> usize {
        if rate_limited {
            self.rate_limited_concurrency
        } else {
            self.concurrency
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub mode: EvaluationMode,
    pub queue: QueueConfig,
    pub rate_limiter: RateLimiterConfig,
    pub evaluator: EvaluatorConfig,

    /// Provider-specific settings handed to each provider factory
    pub providers: BTreeMap<ProviderKind, serde_json::Value>,
}

impl RuntimeConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`, which maps variable names to values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_lookup(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-style overrides on top of the current values.
    pub fn apply_lookup<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("MAX_CONCURRENT_EVALUATIONS") {
            self.queue.max_concurrent = parse_number("MAX_CONCURRENT_EVALUATIONS", &v)?;
        }
        if let Some(v) = get("MAX_QUEUE_SIZE") {
            self.queue.max_queue_size = parse_number("MAX_QUEUE_SIZE", &v)?;
        }
        if let Some(v) = get("EVALUATION_TIMEOUT_SECONDS") {
            let secs: f64 = parse_number("EVALUATION_TIMEOUT_SECONDS", &v)?;
            if !secs.is_finite() || secs <= 0.0 {
                return Err(invalid("EVALUATION_TIMEOUT_SECONDS", "must be positive"));
            }
            self.queue.job_timeout = Duration::from_secs_f64(secs);
        }
        if let Some(v) = get("ANTHROPIC_INPUT_TOKENS_PER_MINUTE") {
            self.rate_limiter.tokens_per_minute =
                parse_number("ANTHROPIC_INPUT_TOKENS_PER_MINUTE", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_SAFETY_MARGIN") {
            self.rate_limiter.safety_margin = parse_number("RATE_LIMIT_SAFETY_MARGIN", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_MIN_DELAY") {
            self.rate_limiter.min_request_gap = parse_duration("RATE_LIMIT_MIN_DELAY", &v)?;
        }
        if let Some(v) = get("VISION_EVALUATOR_CONCURRENCY") {
            self.evaluator.concurrency = parse_number("VISION_EVALUATOR_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("CLAUDE_EVALUATOR_CONCURRENCY") {
            self.evaluator.rate_limited_concurrency =
                parse_number("CLAUDE_EVALUATOR_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("VISION_EVALUATOR_REQUIREMENT_LIMIT") {
            self.evaluator.requirement_limit =
                parse_number("VISION_EVALUATOR_REQUIREMENT_LIMIT", &v)?;
        }
        if let Some(v) = get("EVALUATOR_RETRY_BASE_DELAY") {
            self.evaluator.retry_base_delay = parse_duration("EVALUATOR_RETRY_BASE_DELAY", &v)?;
        }

        if let Some(v) = get("VISION_PROVIDER") {
            self.mode = v.parse::<EvaluationMode>()?;
        }
        if get("VISION_COMPARE_BOTH").is_some_and(|v| is_truthy(&v)) {
            self.mode = EvaluationMode::Dual;
        }

        Ok(())
    }

    /// Fail fast on settings that would stall or misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.max_concurrent == 0 {
            return Err(invalid("queue.max_concurrent", "must be at least 1"));
        }
        if self.queue.max_queue_size == 0 {
            return Err(invalid("queue.max_queue_size", "must be at least 1"));
        }
        if self.queue.job_timeout.is_zero() {
            return Err(invalid("queue.job_timeout", "must be non-zero"));
        }
        if self.rate_limiter.tokens_per_minute == 0 {
            return Err(invalid("rate_limiter.tokens_per_minute", "must be at least 1"));
        }
        let margin = self.rate_limiter.safety_margin;
        if !(margin > 0.0 && margin <= 1.0) {
            return Err(invalid(
                "rate_limiter.safety_margin",
                &format!("{} is outside (0, 1]", margin),
            ));
        }
        if self.rate_limiter.effective_limit() == 0 {
            return Err(invalid("rate_limiter", "effective limit rounds down to zero"));
        }
        if self.rate_limiter.window.is_zero() {
            return Err(invalid("rate_limiter.window", "must be non-zero"));
        }
        if self.evaluator.concurrency == 0 || self.evaluator.rate_limited_concurrency == 0 {
            return Err(invalid("evaluator.concurrency", "must be at least 1"));
        }
        if self.mode == EvaluationMode::Dual && self.evaluator.primary == self.evaluator.secondary {
            return Err(invalid(
                "evaluator.secondary",
                "dual mode needs two different backends",
            ));
        }
        Ok(())
    }

    /// Primary backends for the configured mode, in role order.
    pub fn providers_for_mode(&self) -> Vec<ProviderKind> {
        match self.mode {
            EvaluationMode::Dual => vec![self.evaluator.primary, self.evaluator.secondary],
            EvaluationMode::Single(kind) => vec![kind],
        }
    }

    /// Settings for one provider factory; an empty object when unset.
    pub fn provider_settings(&self, kind: ProviderKind) -> serde_json::Value {
        self.providers
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}))
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| invalid(key, &format!("'{}': {}", value, e)))
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Ok(Duration::from_secs_f64(secs));
        }
    }
    humantime::parse_duration(value).map_err(|e| invalid(key, &format!("'{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.queue.max_concurrent, 2);
        assert_eq!(config.queue.max_queue_size, 100);
        assert_eq!(config.queue.job_timeout, Duration::from_secs(1800));
        assert_eq!(config.rate_limiter.tokens_per_minute, 450_000);
        assert_eq!(config.rate_limiter.effective_limit(), 382_500);
        assert_eq!(config.rate_limiter.min_request_gap, Duration::from_millis(100));
        assert_eq!(config.evaluator.max_retries, 1);
        assert_eq!(config.evaluator.primary, ProviderKind::Claude);
        assert_eq!(config.evaluator.secondary, ProviderKind::OpenAi);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("MAX_CONCURRENT_EVALUATIONS", "4"),
            ("MAX_QUEUE_SIZE", "10"),
            ("EVALUATION_TIMEOUT_SECONDS", "90"),
            ("ANTHROPIC_INPUT_TOKENS_PER_MINUTE", "30000"),
            ("RATE_LIMIT_SAFETY_MARGIN", "0.5"),
            ("RATE_LIMIT_MIN_DELAY", "250ms"),
            ("VISION_EVALUATOR_REQUIREMENT_LIMIT", "5"),
            ("EVALUATOR_RETRY_BASE_DELAY", "1s"),
        ]))
        .unwrap();
        assert_eq!(config.queue.max_concurrent, 4);
        assert_eq!(config.queue.max_queue_size, 10);
        assert_eq!(config.queue.job_timeout, Duration::from_secs(90));
        assert_eq!(config.rate_limiter.effective_limit(), 15_000);
        assert_eq!(config.rate_limiter.min_request_gap, Duration::from_millis(250));
        assert_eq!(config.evaluator.requirement_limit, 5);
        assert_eq!(config.evaluator.retry_base_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_dual_mode_detection() {
        for vars in [
            vec![("VISION_PROVIDER", "dual")],
            vec![("VISION_PROVIDER", "both")],
            vec![("VISION_COMPARE_BOTH", "true")],
            vec![("VISION_COMPARE_BOTH", "1")],
            vec![("VISION_COMPARE_BOTH", "YES")],
            vec![("VISION_PROVIDER", "openai"), ("VISION_COMPARE_BOTH", "yes")],
        ] {
            let config = RuntimeConfig::from_lookup(lookup(&vars)).unwrap();
            assert_eq!(config.mode, EvaluationMode::Dual, "{:?}", vars);
        }

        let config = RuntimeConfig::from_lookup(lookup(&[("VISION_COMPARE_BOTH", "no")])).unwrap();
        assert_ne!(config.mode, EvaluationMode::Dual);
    }

    #[test]
    fn test_single_provider_mode() {
        let config = RuntimeConfig::from_lookup(lookup(&[("VISION_PROVIDER", "Gemini")])).unwrap();
        assert_eq!(config.mode, EvaluationMode::Single(ProviderKind::Gemini));
        assert_eq!(config.providers_for_mode(), vec![ProviderKind::Gemini]);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = RuntimeConfig::from_lookup(lookup(&[("VISION_PROVIDER", "mistral")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider(_)));
        assert!(err.to_string().contains("Unsupported VISION_PROVIDER 'mistral'"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(RuntimeConfig::from_lookup(lookup(&[("MAX_QUEUE_SIZE", "lots")])).is_err());
        assert!(RuntimeConfig::from_lookup(lookup(&[("MAX_CONCURRENT_EVALUATIONS", "0")])).is_err());
        assert!(RuntimeConfig::from_lookup(lookup(&[("RATE_LIMIT_SAFETY_MARGIN", "1.5")])).is_err());
        assert!(RuntimeConfig::from_lookup(lookup(&[("RATE_LIMIT_SAFETY_MARGIN", "0")])).is_err());
    }

    #[test]
    fn test_serde_human_durations() {
        let json = serde_json::json!({
            "mode": "dual",
            "queue": { "job_timeout": "30m", "shutdown_grace": 2 },
            "rate_limiter": { "min_request_gap": "50ms" }
        });
        let config: RuntimeConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.mode, EvaluationMode::Dual);
        assert_eq!(config.queue.job_timeout, Duration::from_secs(1800));
        assert_eq!(config.queue.shutdown_grace, Duration::from_secs(2));
        assert_eq!(config.queue.max_concurrent, 2);
        assert_eq!(config.rate_limiter.min_request_gap, Duration::from_millis(50));

        let out = serde_json::to_value(&config).unwrap();
        assert_eq!(out["queue"]["job_timeout"], "30m");
    }

    #[test]
    fn test_dual_requires_distinct_backends() {
        let mut config = RuntimeConfig {
            mode: EvaluationMode::Dual,
            ..Default::default()
        };
        config.evaluator.secondary = ProviderKind::Claude;
        assert!(config.validate().is_err());
    }
}
