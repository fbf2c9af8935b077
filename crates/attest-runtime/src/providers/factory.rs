//! Provider factories and the registry that selects a backend per kind.
//!
//! Backends are chosen once at construction. The composition root looks up
//! the factory for each configured [`ProviderKind`] and hands it the
//! provider-specific JSON settings.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults();
//! let claude = registry.create(ProviderKind::Claude, &json!({"model": "claude-sonnet-4-5"}))?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use attest_core::ProviderKind;
use serde_json::Value as JsonValue;

use super::{ProviderError, ReasoningProvider};

/// Factory for creating a backend from configuration.
pub trait ProviderFactory: Send + Sync {
    /// Which backend this factory builds.
    fn kind(&self) -> ProviderKind;

    /// Create a backend from provider-specific JSON settings.
    fn create(&self, config: &JsonValue) -> Result<Arc<dyn ReasoningProvider>, ProviderError>;

    /// Validate settings without creating a backend.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    /// Defaults for optional fields.
    fn default_config(&self) -> JsonValue {
        serde_json::json!({})
    }

    fn description(&self) -> &'static str {
        "Reasoning backend"
    }
}

/// Registry of backend factories keyed by kind.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    factories: BTreeMap<ProviderKind, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any existing one for the same kind.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, factory: Arc<dyn ProviderFactory>) -> Self {
        self.register(factory);
        self
    }

    /// Create a backend for `kind`.
    pub fn create(
        &self,
        kind: ProviderKind,
        config: &JsonValue,
    ) -> Result<Arc<dyn ReasoningProvider>, ProviderError> {
        self.factory(kind)?.create(config)
    }

    /// Validate settings for `kind`.
    pub fn validate(&self, kind: ProviderKind, config: &JsonValue) -> Result<(), ProviderError> {
        self.factory(kind)?.validate_config(config)
    }

    pub fn available(&self) -> Vec<ProviderKind> {
        self.factories.keys().copied().collect()
    }

    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn default_config(&self, kind: ProviderKind) -> Option<JsonValue> {
        self.factories.get(&kind).map(|f| f.default_config())
    }

    fn factory(&self, kind: ProviderKind) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.factories.get(&kind).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "No backend registered for '{}'. Available: {:?}",
                kind,
                self.available()
            ))
        })
    }

    /// A registry with every backend compiled into this build.
    #[allow(unused_mut)]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::ClaudeProviderFactory));

        #[cfg(feature = "openai")]
        registry.register(Arc::new(super::OpenAiProviderFactory));

        #[cfg(feature = "gemini")]
        registry.register(Arc::new(super::GeminiProviderFactory));

        registry
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::scripted::ScriptedFactory;

    #[test]
    fn test_registry_register_and_create() {
        let registry = ProviderRegistry::new().with(Arc::new(ScriptedFactory::new(ProviderKind::OpenAi)));

        assert!(registry.has_provider(ProviderKind::OpenAi));
        assert!(!registry.has_provider(ProviderKind::Gemini));

        let provider = registry
            .create(ProviderKind::OpenAi, &serde_json::json!({"model": "scripted-x"}))
            .unwrap();
        assert_eq!(provider.kind(), ProviderKind::OpenAi);
        assert_eq!(provider.model(), "scripted-x");
    }

    #[test]
    fn test_registry_unknown_provider() {
        let registry = ProviderRegistry::new();
        match registry.create(ProviderKind::Claude, &serde_json::json!({})) {
            Err(ProviderError::NotConfigured(msg)) => assert!(msg.contains("claude")),
            other => panic!("Expected NotConfigured error, got {:?}", other.map(|p| p.kind())),
        }
    }

    #[test]
    fn test_registry_available_sorted() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(ScriptedFactory::new(ProviderKind::Claude)))
            .with(Arc::new(ScriptedFactory::new(ProviderKind::OpenAi)));
        assert_eq!(
            registry.available(),
            vec![ProviderKind::OpenAi, ProviderKind::Claude]
        );
    }

    #[test]
    fn test_registry_validate() {
        let registry = ProviderRegistry::new().with(Arc::new(ScriptedFactory::new(ProviderKind::Gemini)));
        assert!(registry.validate(ProviderKind::Gemini, &serde_json::json!({})).is_ok());
        assert!(registry.validate(ProviderKind::OpenAi, &serde_json::json!({})).is_err());
    }
}
