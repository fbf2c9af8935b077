//! # attest-runtime
//!
//! Async evaluation runtime for attest.
//!
//! This crate turns the deterministic model in `attest-core` into a running
//! service:
//! - [`EvaluationQueue`]: bounded FIFO of document jobs with a concurrency cap
//! - [`TokenRateLimiter`]: sliding-window input-token budget shared by
//!   rate-limited backends
//! - [`SingleProviderEvaluator`]: one backend per requirement, with retry and
//!   a static fallback
//! - [`MultiProviderComparator`]: two backends merged conservatively
//!
//! HTTP backends are behind the `anthropic`, `openai` and `gemini` features.
//!
//! ## Example
//!
//! ```rust,ignore
//! use attest_runtime::{ChecklistFile, Orchestrator, RuntimeConfig};
//! use std::sync::Arc;
//!
//! let config = RuntimeConfig::from_env()?;
//! let orchestrator = Orchestrator::builder(config, Arc::new(ChecklistFile::new("iso-9001.yaml")))
//!     .build()?;
//! orchestrator.start();
//!
//! let document = DocumentPayload::from_path("plan.pdf").await?;
//! let (_, position) = orchestrator.enqueue("job-1", document, "plan.pdf")?;
//! ```

pub mod cache;
pub mod config;
pub mod document;
pub mod evaluator;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod queue;
pub mod resilience;

pub use cache::UploadCache;
pub use config::{ConfigError, EvaluatorConfig, QueueConfig, RateLimiterConfig, RuntimeConfig};
pub use document::DocumentPayload;
pub use evaluator::{
    ChecklistFile, DocumentEvaluator, EvaluationProgress, EvaluatorError, MultiProviderComparator,
    ProgressCallback, RequirementSet, RequirementSource, SingleEvaluatorBuilder,
    SingleProviderEvaluator,
};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorStatus};
pub use prompts::{build_prompt, PromptContext, RequirementPrompt};
pub use providers::{
    ProviderError, ProviderFactory, ProviderRegistry, ReasoningProvider, TokenUsage,
    UploadedDocument,
};
pub use queue::{
    EvaluationCallback, EvaluationJob, EvaluationQueue, QueueError, QueueItem, QueueItemState,
    QueueStatus,
};
pub use resilience::{RateLimiterStatus, RetryPolicy, TokenRateLimiter};

use attest_core::{CoreError, ProviderKind};
use thiserror::Error;

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Could not construct {provider} backend: {source}")]
    Provider {
        provider: ProviderKind,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Evaluator(#[from] EvaluatorError),
}
