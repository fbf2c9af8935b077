//! Wires configuration, backends and the queue into one runtime.
//!
//! The orchestrator owns the process-wide pieces that every evaluation
//! shares:
//! - one [`TokenRateLimiter`] for all rate-limited backends
//! - one [`UploadCache`] so a document is uploaded once per backend
//! - one [`EvaluationQueue`] feeding a single or dual evaluator

use attest_core::{EvaluationMode, MergedSummary, ProviderKind};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cache::UploadCache;
use crate::config::RuntimeConfig;
use crate::document::DocumentPayload;
use crate::evaluator::{
    DocumentEvaluator, MultiProviderComparator, ProgressCallback, RequirementSource,
    SingleProviderEvaluator,
};
use crate::providers::ProviderRegistry;
use crate::queue::{EvaluationQueue, QueueError, QueueItem, QueueStatus};
use crate::resilience::{RateLimiterStatus, TokenRateLimiter};
use crate::RuntimeError;

/// Snapshot of the whole runtime.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub mode: EvaluationMode,
    pub providers: Vec<ProviderKind>,
    pub queue: QueueStatus,
    pub rate_limiter: RateLimiterStatus,
    pub cached_uploads: u64,
}

/// The assembled runtime.
pub struct Orchestrator {
    config: RuntimeConfig,
    evaluator: Arc<dyn DocumentEvaluator>,
    queue: EvaluationQueue,
    limiter: Arc<TokenRateLimiter>,
    uploads: UploadCache,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("mode", &self.config.mode)
            .field("queue", &self.queue)
            .field("uploads", &self.uploads)
            .finish()
    }
}

impl Orchestrator {
    pub fn builder(config: RuntimeConfig, requirements: Arc<dyn RequirementSource>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config, requirements)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The evaluator jobs run through.
    pub fn evaluator(&self) -> Arc<dyn DocumentEvaluator> {
        self.evaluator.clone()
    }

    pub fn queue(&self) -> &EvaluationQueue {
        &self.queue
    }

    pub fn rate_limiter(&self) -> &Arc<TokenRateLimiter> {
        &self.limiter
    }

    pub fn start(&self) {
        self.queue.start();
    }

    pub async fn stop(&self) {
        self.queue.stop().await;
    }

    pub fn enqueue(
        &self,
        id: impl Into<String>,
        document: DocumentPayload,
        label: impl Into<String>,
    ) -> Result<(QueueItem, usize), QueueError> {
        self.queue.enqueue(id, document, label)
    }

    pub fn cancel(&self, id: &str) -> bool {
        self.queue.cancel(id)
    }

    pub fn item_status(&self, id: &str) -> Option<QueueItem> {
        self.queue.item_status(id)
    }

    /// Evaluate one document directly, bypassing the queue.
    pub async fn evaluate_now(&self, document: &DocumentPayload) -> Result<MergedSummary, RuntimeError> {
        let cancel = CancellationToken::new();
        let run = self.evaluator.evaluate_document(document, cancel.clone());
        match tokio::time::timeout(self.config.queue.job_timeout, run).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                cancel.cancel();
                Err(QueueError::Timeout.into())
            }
        }
    }

    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            mode: self.config.mode,
            providers: self.config.providers_for_mode(),
            queue: self.queue.status(),
            rate_limiter: self.limiter.status().await,
            cached_uploads: self.uploads.entry_count().await,
        }
    }

    /// Clear limiter history and forget uploaded files.
    pub async fn reset(&self) {
        self.limiter.reset().await;
        self.uploads.invalidate_all();
        tracing::info!("Runtime state reset");
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: RuntimeConfig,
    requirements: Arc<dyn RequirementSource>,
    registry: Option<ProviderRegistry>,
    progress: Option<ProgressCallback>,
}

impl OrchestratorBuilder {
    pub fn new(config: RuntimeConfig, requirements: Arc<dyn RequirementSource>) -> Self {
        Self {
            config,
            requirements,
            registry: None,
            progress: None,
        }
    }

    /// Backends to build from; defaults to every backend compiled in.
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn on_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn build(self) -> Result<Orchestrator, RuntimeError> {
        self.config.validate()?;
        let registry = self.registry.unwrap_or_else(ProviderRegistry::with_defaults);

        let limiter = Arc::new(TokenRateLimiter::new(self.config.rate_limiter.clone()));
        let uploads = UploadCache::new(
            self.config.evaluator.upload_cache_capacity,
            self.config.evaluator.upload_cache_ttl,
        );

        let single = |kind: ProviderKind| -> Result<SingleProviderEvaluator, RuntimeError> {
            let provider = registry
                .create(kind, &self.config.provider_settings(kind))
                .map_err(|source| RuntimeError::Provider { provider: kind, source })?;

            let mut builder = SingleProviderEvaluator::builder(provider, self.requirements.clone())
                .config(self.config.evaluator.clone())
                .upload_cache(uploads.clone())
                .rate_limiter(limiter.clone());
            if let Some(fallback) = kind.fallback() {
                builder = builder.fallback_from(registry.clone(), self.config.provider_settings(fallback));
            }
            if let Some(progress) = &self.progress {
                builder = builder.on_progress(progress.clone());
            }
            Ok(builder.build())
        };

        let evaluator: Arc<dyn DocumentEvaluator> = match self.config.mode {
            EvaluationMode::Dual => Arc::new(
                MultiProviderComparator::new(
                    single(self.config.evaluator.primary)?,
                    single(self.config.evaluator.secondary)?,
                    self.requirements.clone(),
                )
                .with_requirement_limit(self.config.evaluator.requirement_limit),
            ),
            EvaluationMode::Single(kind) => Arc::new(single(kind)?),
        };

        let queue = EvaluationQueue::new(self.config.queue.clone());
        queue.set_evaluator(evaluator.clone());

        tracing::info!(
            mode = %self.config.mode,
            providers = ?self.config.providers_for_mode(),
            max_concurrent = self.config.queue.max_concurrent,
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            config: self.config,
            evaluator,
            queue,
            limiter,
            uploads,
        })
    }
}
