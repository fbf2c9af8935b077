//! Credential and settings resolution for HTTP backends.
//!
//! API keys are wrapped in [`SecretString`] as soon as they are read, so they
//! cannot leak through `Debug`/`Display` or tracing fields. Each lookup
//! checks the provider's JSON settings first and then a list of environment
//! variables.
//!
//! ```ignore
//! let key = ApiCredential::resolve(&config, "api_key", &["GEMINI_API_KEY", "GOOGLE_API_KEY"], "Gemini API key")?;
//! request.header("x-goog-api-key", key.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// The provider's JSON settings
    Config,
    /// The named environment variable
    Environment(String),
    /// Passed in directly
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment(var) => write!(f, "env {}", var),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// An API key that only reveals itself through [`expose`](Self::expose).
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Resolve from `config[config_key]`, then the first set env var in `env_vars`.
    ///
    /// Empty values are treated as unset.
    pub fn resolve(
        config: &JsonValue,
        config_key: &str,
        env_vars: &[&str],
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        Self::resolve_with(config, config_key, env_vars, name, |var| std::env::var(var).ok())
    }

    /// [`resolve`](Self::resolve) with an injectable environment lookup.
    pub fn resolve_with<F>(
        config: &JsonValue,
        config_key: &str,
        env_vars: &[&str],
        name: &'static str,
        lookup: F,
    ) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = config[config_key].as_str().filter(|v| !v.trim().is_empty()) {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        for var in env_vars {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                return Ok(Self::new(value, CredentialSource::Environment(var.to_string()), name));
            }
        }

        Err(ProviderError::NotConfigured(format!(
            "{} required: set '{}' in provider settings or one of {:?}",
            name, config_key, env_vars
        )))
    }

    /// Only call at the point of use, e.g. when setting a header.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn source(&self) -> &CredentialSource {
        &self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

/// A plain (non-secret) setting: config key, then env var, then default.
pub fn setting<F>(config: &JsonValue, config_key: &str, env_var: &str, default: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    config[config_key]
        .as_str()
        .map(str::to_string)
        .or_else(|| lookup(env_var))
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_credential_redacted() {
        let secret = "sk-super-secret-key-12345";
        let cred = ApiCredential::new(secret, CredentialSource::Programmatic, "Test API key");

        let debug = format!("{:?}", cred);
        let display = format!("{}", cred);
        assert!(!debug.contains(secret));
        assert!(!display.contains(secret));
        assert!(debug.contains("[REDACTED]"));
        assert!(display.contains("Test API key"));
        assert_eq!(cred.expose(), secret);
    }

    #[test]
    fn test_config_takes_precedence() {
        let config = serde_json::json!({"api_key": "config-key"});
        let cred = ApiCredential::resolve_with(
            &config,
            "api_key",
            &["TEST_KEY"],
            "Test key",
            env(&[("TEST_KEY", "env-key")]),
        )
        .unwrap();
        assert_eq!(cred.expose(), "config-key");
        assert_eq!(cred.source(), &CredentialSource::Config);
    }

    #[test]
    fn test_env_vars_tried_in_order() {
        let cred = ApiCredential::resolve_with(
            &serde_json::json!({}),
            "api_key",
            &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
            "Gemini API key",
            env(&[("GEMINI_API_KEY", ""), ("GOOGLE_API_KEY", "g-key")]),
        )
        .unwrap();
        assert_eq!(cred.expose(), "g-key");
        assert_eq!(
            cred.source(),
            &CredentialSource::Environment("GOOGLE_API_KEY".to_string())
        );
    }

    #[test]
    fn test_missing_credential_names_sources() {
        let err = ApiCredential::resolve_with(
            &serde_json::json!({}),
            "api_key",
            &["NONEXISTENT_VAR"],
            "Test key",
            env(&[]),
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Test key"));
        assert!(message.contains("api_key"));
        assert!(message.contains("NONEXISTENT_VAR"));
    }

    #[test]
    fn test_setting_resolution() {
        let lookup = env(&[("MODEL_ENV", "from-env")]);
        assert_eq!(
            setting(&serde_json::json!({"model": "m"}), "model", "MODEL_ENV", "d", &lookup),
            "m"
        );
        assert_eq!(
            setting(&serde_json::json!({}), "model", "MODEL_ENV", "d", &lookup),
            "from-env"
        );
        assert_eq!(
            setting(&serde_json::json!({}), "model", "OTHER", "d", &lookup),
            "d"
        );
    }
}
