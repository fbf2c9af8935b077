//! Reasoning backends for attest-runtime.
//!
//! Every backend implements [`ReasoningProvider`]: upload a document once,
//! then ask one question per requirement against the uploaded file. The set
//! of backends is closed ([`ProviderKind`]); HTTP implementations live behind
//! cargo features and an in-process [`ScriptedProvider`] is always available.
//!
//! ## Security
//!
//! All HTTP backends use the [`secrets`] module for credential handling.
//! See [`ApiCredential`].

use async_trait::async_trait;
use attest_core::ProviderKind;
use std::time::Duration;
use thiserror::Error;

use crate::document::DocumentPayload;
use crate::prompts::RequirementPrompt;

mod factory;
pub mod scripted;
pub mod secrets;

#[cfg(any(feature = "anthropic", feature = "openai", feature = "gemini"))]
mod http;

#[cfg(feature = "anthropic")]
mod anthropic;

#[cfg(feature = "gemini")]
mod gemini;

#[cfg(feature = "openai")]
mod openai;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use scripted::{ScriptedFactory, ScriptedOutcome, ScriptedProvider};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{ClaudeProvider, ClaudeProviderFactory};

#[cfg(feature = "gemini")]
pub use gemini::{GeminiProvider, GeminiProviderFactory};

#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OpenAiProviderFactory};

/// Tokens charged for the attached document on top of the prompt text.
pub const DOCUMENT_TOKEN_OVERHEAD: u64 = 6_000;

/// Errors from reasoning backends.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Backend overloaded: {status} - {message}")]
    Overloaded { status: u16, message: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Authentication failed")]
    Auth,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether retrying the same call can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Http(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::Overloaded { .. }
                | ProviderError::Timeout(_)
        )
    }

    /// Backend-supplied wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// A document as known to one backend after upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedDocument {
    pub provider: ProviderKind,

    /// Backend-side handle (file id or file URI)
    pub file_id: String,

    pub mime_type: String,

    pub content_hash: String,
}

/// Token usage from one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Raw answer from a backend, before verdict parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
}

/// One reasoning backend.
///
/// Implementations map their failures onto [`ProviderError`] so callers can
/// tell transient from permanent errors; they never retry internally.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    /// Make the document available to later requirement calls.
    async fn upload_document(
        &self,
        document: &DocumentPayload,
    ) -> Result<UploadedDocument, ProviderError>;

    /// Ask one requirement question against an uploaded document.
    async fn evaluate_requirement(
        &self,
        document: &UploadedDocument,
        prompt: &RequirementPrompt,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Whether calls must pass through the shared token rate limiter.
    fn requires_rate_limit(&self) -> bool {
        self.kind() == ProviderKind::Claude
    }

    /// Estimate tokens for a call (~4 chars per token plus the document).
    fn estimate_tokens(&self, prompt: &RequirementPrompt) -> u64 {
        (prompt.len() / 4) as u64 + DOCUMENT_TOKEN_OVERHEAD
    }
}
