//! In-process backend that replays scripted outcomes.
//!
//! Used by tests and by offline dry runs of the CLI. Each requirement id has
//! its own queue of outcomes; once a queue is empty the default outcome is
//! returned.

use async_trait::async_trait;
use attest_core::{ProviderKind, VerdictStatus};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{
    factory::ProviderFactory, ProviderError, ProviderResponse, ReasoningProvider, TokenUsage,
    UploadedDocument,
};
use crate::document::DocumentPayload;
use crate::prompts::RequirementPrompt;

const DEFAULT_USAGE: TokenUsage = TokenUsage {
    input_tokens: 900,
    output_tokens: 100,
};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Return this text as the backend answer
    Respond { text: String, usage: TokenUsage },

    /// Fail the call
    Fail(ProviderError),

    /// Sleep, then play the inner outcome
    Delayed(Duration, Box<ScriptedOutcome>),
}

impl ScriptedOutcome {
    /// A well-formed JSON verdict.
    pub fn verdict(status: VerdictStatus, confidence: f64) -> Self {
        let body = serde_json::json!({
            "status": status.as_str(),
            "confidence": confidence,
            "rationale": format!("Scripted {}", status),
            "evidence": ["Scripted evidence, p.1"],
            "gaps": [],
            "recommendations": [],
        });
        ScriptedOutcome::Respond {
            text: body.to_string(),
            usage: DEFAULT_USAGE,
        }
    }

    pub fn respond(text: impl Into<String>) -> Self {
        ScriptedOutcome::Respond {
            text: text.into(),
            usage: DEFAULT_USAGE,
        }
    }

    /// Report this usage instead of the default 900 in / 100 out.
    pub fn with_usage(self, input_tokens: u64, output_tokens: u64) -> Self {
        match self {
            ScriptedOutcome::Respond { text, .. } => ScriptedOutcome::Respond {
                text,
                usage: TokenUsage {
                    input_tokens,
                    output_tokens,
                },
            },
            ScriptedOutcome::Delayed(delay, inner) => {
                ScriptedOutcome::Delayed(delay, Box::new(inner.with_usage(input_tokens, output_tokens)))
            }
            fail => fail,
        }
    }

    pub fn fail(error: ProviderError) -> Self {
        ScriptedOutcome::Fail(error)
    }

    pub fn after(self, delay: Duration) -> Self {
        ScriptedOutcome::Delayed(delay, Box::new(self))
    }
}

/// Backend whose answers are set up in advance.
pub struct ScriptedProvider {
    kind: ProviderKind,
    model: String,
    default: ScriptedOutcome,
    scripts: Mutex<HashMap<String, VecDeque<ScriptedOutcome>>>,
    upload_failure: Mutex<Option<ProviderError>>,
    uploads: AtomicUsize,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedProvider {
    /// A backend that answers PASS with 0.9 confidence to everything.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            model: format!("scripted-{}", kind),
            default: ScriptedOutcome::verdict(VerdictStatus::Pass, 0.9),
            scripts: Mutex::new(HashMap::new()),
            upload_failure: Mutex::new(None),
            uploads: AtomicUsize::new(0),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Outcome used once a requirement's script is exhausted.
    pub fn with_default(mut self, outcome: ScriptedOutcome) -> Self {
        self.default = outcome;
        self
    }

    /// Queue outcomes for one requirement, played in order.
    pub fn script(
        self,
        requirement_id: impl Into<String>,
        outcomes: impl IntoIterator<Item = ScriptedOutcome>,
    ) -> Self {
        self.scripts
            .lock()
            .entry(requirement_id.into())
            .or_default()
            .extend(outcomes);
        self
    }

    /// Make every upload fail with `error`.
    pub fn failing_upload(self, error: ProviderError) -> Self {
        *self.upload_failure.lock() = Some(error);
        self
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Calls made for one requirement.
    pub fn call_count(&self, requirement_id: &str) -> usize {
        self.calls.lock().get(requirement_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    fn next_outcome(&self, requirement_id: &str) -> ScriptedOutcome {
        *self.calls.lock().entry(requirement_id.to_string()).or_insert(0) += 1;
        self.scripts
            .lock()
            .get_mut(requirement_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl ReasoningProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn upload_document(
        &self,
        document: &DocumentPayload,
    ) -> Result<UploadedDocument, ProviderError> {
        let count = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.upload_failure.lock().clone() {
            return Err(error);
        }
        Ok(UploadedDocument {
            provider: self.kind,
            file_id: format!("{}-file-{}", self.kind, count),
            mime_type: document.mime_type().to_string(),
            content_hash: document.content_hash().to_string(),
        })
    }

    async fn evaluate_requirement(
        &self,
        _document: &UploadedDocument,
        prompt: &RequirementPrompt,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut outcome = self.next_outcome(&prompt.requirement_id);
        loop {
            match outcome {
                ScriptedOutcome::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    outcome = *inner;
                }
                ScriptedOutcome::Fail(error) => return Err(error),
                ScriptedOutcome::Respond { text, usage } => {
                    return Ok(ProviderResponse {
                        text,
                        usage,
                        model: self.model.clone(),
                    })
                }
            }
        }
    }
}

/// Factory for [`ScriptedProvider`].
///
/// Either builds a fresh always-PASS backend per `create`, or hands out one
/// shared, pre-scripted instance so callers can inspect its counters.
pub struct ScriptedFactory {
    kind: ProviderKind,
    shared: Option<Arc<ScriptedProvider>>,
}

impl ScriptedFactory {
    pub fn new(kind: ProviderKind) -> Self {
        Self { kind, shared: None }
    }

    pub fn shared(provider: Arc<ScriptedProvider>) -> Self {
        Self {
            kind: provider.kind(),
            shared: Some(provider),
        }
    }
}

impl ProviderFactory for ScriptedFactory {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn ReasoningProvider>, ProviderError> {
        if let Some(provider) = &self.shared {
            return Ok(provider.clone());
        }
        let mut provider = ScriptedProvider::new(self.kind);
        if let Some(model) = config["model"].as_str() {
            provider = provider.with_model(model);
        }
        Ok(Arc::new(provider))
    }

    fn validate_config(&self, _config: &JsonValue) -> Result<(), ProviderError> {
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Scripted in-process backend"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::RequirementPrompt;

    fn prompt(id: &str) -> RequirementPrompt {
        RequirementPrompt {
            requirement_id: id.to_string(),
            system: "system".to_string(),
            user: "user".to_string(),
        }
    }

    #[tokio::test]
    async fn test_script_then_default() {
        let provider = ScriptedProvider::new(ProviderKind::Claude).script(
            "R1",
            [ScriptedOutcome::fail(ProviderError::RateLimited { retry_after: None })],
        );
        let doc = DocumentPayload::new("a.pdf", "application/pdf", vec![1]);
        let uploaded = provider.upload_document(&doc).await.unwrap();
        assert_eq!(uploaded.content_hash, doc.content_hash());

        assert!(provider.evaluate_requirement(&uploaded, &prompt("R1")).await.is_err());
        let second = provider.evaluate_requirement(&uploaded, &prompt("R1")).await.unwrap();
        assert!(second.text.contains("PASS"));
        assert_eq!(second.usage.total(), 1_000);
        assert_eq!(provider.call_count("R1"), 2);
        assert_eq!(provider.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_upload() {
        let provider = ScriptedProvider::new(ProviderKind::OpenAi).failing_upload(ProviderError::Auth);
        let doc = DocumentPayload::new("a.pdf", "application/pdf", vec![1]);
        assert_eq!(provider.upload_document(&doc).await, Err(ProviderError::Auth));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_outcome() {
        let provider = ScriptedProvider::new(ProviderKind::Gemini).with_default(
            ScriptedOutcome::verdict(VerdictStatus::Fail, 0.8).after(Duration::from_secs(30)),
        );
        let doc = DocumentPayload::new("a.pdf", "application/pdf", vec![1]);
        let uploaded = provider.upload_document(&doc).await.unwrap();

        let start = tokio::time::Instant::now();
        let response = provider.evaluate_requirement(&uploaded, &prompt("R9")).await.unwrap();
        assert!(response.text.contains("FAIL"));
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
