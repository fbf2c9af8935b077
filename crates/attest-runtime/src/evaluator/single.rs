//! One backend walking a requirement list.
//!
//! Per requirement: call, retry transient failures per [`RetryPolicy`], hand
//! the requirement to the fallback backend once retries are exhausted, and
//! otherwise record an Error verdict. A failing requirement never aborts the
//! rest of the batch.

use async_trait::async_trait;
use attest_core::{
    parse_response, EvaluationMode, MergedSummary, MergedVerdict, ProviderKind, Requirement,
    RequirementVerdict,
};
use futures::future::{join_all, BoxFuture, FutureExt};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, Semaphore};
use tokio_util::sync::CancellationToken;

use super::traits::{
    DocumentEvaluator, EvaluationProgress, EvaluatorError, ProgressCallback, RequirementSource,
};
use crate::cache::UploadCache;
use crate::config::EvaluatorConfig;
use crate::document::DocumentPayload;
use crate::prompts::{build_prompt, PromptContext, RequirementPrompt};
use crate::providers::{ProviderError, ProviderRegistry, ReasoningProvider, UploadedDocument};
use crate::resilience::{plan_recovery, Recovery, RetryPolicy, TokenRateLimiter};

/// Where to build the fallback backend from, on first use.
struct FallbackSlot {
    kind: ProviderKind,
    registry: ProviderRegistry,
    settings: JsonValue,
    evaluator: OnceCell<Arc<SingleProviderEvaluator>>,
}

/// Evaluates every requirement against one backend.
pub struct SingleProviderEvaluator {
    provider: Arc<dyn ReasoningProvider>,
    requirements: Arc<dyn RequirementSource>,
    uploads: UploadCache,
    limiter: Option<Arc<TokenRateLimiter>>,
    policy: RetryPolicy,
    config: EvaluatorConfig,
    fallback: Option<FallbackSlot>,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for SingleProviderEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleProviderEvaluator")
            .field("provider", &self.provider.kind())
            .field("model", &self.provider.model())
            .field("rate_limited", &self.limiter.is_some())
            .field("fallback", &self.fallback.as_ref().map(|f| f.kind))
            .finish()
    }
}

impl SingleProviderEvaluator {
    pub fn builder(
        provider: Arc<dyn ReasoningProvider>,
        requirements: Arc<dyn RequirementSource>,
    ) -> SingleEvaluatorBuilder {
        SingleEvaluatorBuilder::new(provider, requirements)
    }

    pub fn kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    pub fn fallback_kind(&self) -> Option<ProviderKind> {
        self.fallback.as_ref().map(|f| f.kind)
    }

    /// Whether the fallback backend has been constructed yet.
    pub fn fallback_initialized(&self) -> bool {
        self.fallback
            .as_ref()
            .map(|f| f.evaluator.initialized())
            .unwrap_or(false)
    }

    /// Upload (or reuse) the document on this backend.
    pub async fn upload(&self, document: &DocumentPayload) -> Result<UploadedDocument, EvaluatorError> {
        self.uploads
            .get_or_upload(self.provider.as_ref(), document)
            .await
            .map_err(|source| EvaluatorError::Upload {
                provider: self.kind(),
                source,
            })
    }

    /// Evaluate `requirements` against `document`, one verdict per requirement in input order.
    ///
    /// Fails only when the document cannot be uploaded.
    pub async fn evaluate_requirements(
        &self,
        document: &DocumentPayload,
        requirements: &[Requirement],
        context: &PromptContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<RequirementVerdict>, EvaluatorError> {
        let uploaded = self.upload(document).await?;
        let kind = self.kind();
        let concurrency = self
            .config
            .concurrency_for(self.limiter.is_some())
            .max(1);
        let semaphore = Semaphore::new(concurrency);
        let completed = AtomicUsize::new(0);
        let total = requirements.len();

        tracing::info!(
            provider = %kind,
            model = %self.provider.model(),
            document = %document.name(),
            requirements = total,
            concurrency,
            "Evaluating document"
        );

        let tasks = requirements.iter().map(|requirement| {
            let semaphore = &semaphore;
            let completed = &completed;
            let uploaded = &uploaded;
            async move {
                let verdict = match semaphore.acquire().await {
                    Ok(_permit) => {
                        self.evaluate_one(document, uploaded, requirement, context, cancel)
                            .await
                    }
                    Err(_) => RequirementVerdict::error(&requirement.id, kind, "evaluator closed"),
                }
                .labelled(requirement);

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(progress) = &self.progress {
                    progress(EvaluationProgress::new(kind, done, total, requirement.id.as_str()));
                }
                verdict
            }
        });

        Ok(join_all(tasks).await)
    }

    /// Run one requirement through call, retry, fallback, give up.
    ///
    /// Boxed because the fallback path re-enters it on another evaluator.
    fn evaluate_one<'a>(
        &'a self,
        document: &'a DocumentPayload,
        uploaded: &'a UploadedDocument,
        requirement: &'a Requirement,
        context: &'a PromptContext,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, RequirementVerdict> {
        async move {
            let kind = self.kind();
            let prompt = build_prompt(requirement, context);
            let mut retries_done = 0;

            loop {
                let attempt = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return RequirementVerdict::error(&requirement.id, kind, EvaluatorError::Cancelled);
                    }
                    attempt = self.call_once(uploaded, &prompt) => attempt,
                };

                let error = match attempt {
                    Ok(verdict) => return verdict,
                    Err(EvaluatorError::Provider { source, .. }) => source,
                    Err(EvaluatorError::PermanentBackend {
                        provider,
                        tokens_used,
                        source,
                    }) => {
                        tracing::warn!(
                            provider = %provider,
                            requirement = %requirement.id,
                            error = %source,
                            "Unusable backend response"
                        );
                        let mut verdict = RequirementVerdict::error(&requirement.id, kind, source);
                        verdict.tokens_used = tokens_used;
                        return verdict;
                    }
                    Err(other) => return RequirementVerdict::error(&requirement.id, kind, other),
                };

                match plan_recovery(&error, retries_done, &self.policy, self.fallback_kind()) {
                    Recovery::Retry { backoff } => {
                        tracing::warn!(
                            provider = %kind,
                            requirement = %requirement.id,
                            error = %error,
                            backoff = ?backoff,
                            "Transient failure, retrying"
                        );
                        if !self.pause(backoff, cancel).await {
                            return RequirementVerdict::error(&requirement.id, kind, EvaluatorError::Cancelled);
                        }
                    }
                    Recovery::RetryRateLimited {
                        retry_after,
                        backoff,
                    } => {
                        let wait = match &self.limiter {
                            Some(limiter) => limiter.handle_429(retry_after).await,
                            None => retry_after.unwrap_or(backoff),
                        };
                        tracing::warn!(
                            provider = %kind,
                            requirement = %requirement.id,
                            wait = ?wait,
                            "Rate limited, retrying"
                        );
                        if !self.pause(wait, cancel).await {
                            return RequirementVerdict::error(&requirement.id, kind, EvaluatorError::Cancelled);
                        }
                    }
                    Recovery::Fallback(fallback) => {
                        return self
                            .delegate(fallback, document, requirement, context, cancel, &error)
                            .await;
                    }
                    Recovery::GiveUp => {
                        tracing::warn!(
                            provider = %kind,
                            requirement = %requirement.id,
                            error = %error,
                            retries = retries_done,
                            "Giving up on requirement"
                        );
                        return RequirementVerdict::error(&requirement.id, kind, error);
                    }
                }
                retries_done += 1;
            }
        }
        .boxed()
    }

    /// One backend call, rate limited when the backend requires it.
    async fn call_once(
        &self,
        uploaded: &UploadedDocument,
        prompt: &RequirementPrompt,
    ) -> Result<RequirementVerdict, EvaluatorError> {
        let kind = self.kind();
        let acquired = match &self.limiter {
            Some(limiter) => Some(limiter.acquire(Some(self.provider.estimate_tokens(prompt))).await),
            None => None,
        };

        let call = self.provider.evaluate_requirement(uploaded, prompt);
        let response = match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => return Err(EvaluatorError::Provider { provider: kind, source }),
            Err(_) => {
                return Err(EvaluatorError::Provider {
                    provider: kind,
                    source: ProviderError::Timeout(self.config.request_timeout),
                })
            }
        };

        // The window budgets input tokens; output still counts toward the verdict's cost.
        let tokens_used = response.usage.total();
        if let (Some(limiter), Some(acquired)) = (&self.limiter, acquired) {
            limiter
                .record_actual_usage(acquired.charged, response.usage.input_tokens)
                .await;
        }

        parse_response(&response.text)
            .map(|parsed| parsed.into_verdict(&prompt.requirement_id, kind, tokens_used))
            .map_err(|source| EvaluatorError::PermanentBackend {
                provider: kind,
                tokens_used,
                source,
            })
    }

    /// Sleep unless cancelled first. Returns false when cancelled.
    async fn pause(&self, wait: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }

    /// Hand one requirement to the fallback backend.
    async fn delegate(
        &self,
        fallback: ProviderKind,
        document: &DocumentPayload,
        requirement: &Requirement,
        context: &PromptContext,
        cancel: &CancellationToken,
        primary_error: &ProviderError,
    ) -> RequirementVerdict {
        let kind = self.kind();
        tracing::warn!(
            provider = %kind,
            fallback = %fallback,
            requirement = %requirement.id,
            error = %primary_error,
            "Retries exhausted, delegating to fallback"
        );

        let evaluator = match self.fallback_evaluator().await {
            Ok(evaluator) => evaluator,
            Err(e) => {
                tracing::warn!(fallback = %fallback, error = %e, "Fallback unavailable");
                return RequirementVerdict::error(
                    &requirement.id,
                    kind,
                    format!("{}; fallback unavailable: {}", primary_error, e),
                );
            }
        };

        let uploaded = match evaluator.upload(document).await {
            Ok(uploaded) => uploaded,
            Err(e) => {
                return RequirementVerdict::error(
                    &requirement.id,
                    kind,
                    format!("{}; fallback {}", primary_error, e),
                )
            }
        };

        let verdict = evaluator
            .evaluate_one(document, &uploaded, requirement, context, cancel)
            .await;
        if verdict.is_error() {
            let mut failed = RequirementVerdict::error(
                &requirement.id,
                kind,
                format!("{}; fallback {} also failed", primary_error, fallback),
            );
            failed.tokens_used = verdict.tokens_used;
            return failed;
        }
        verdict.tagged_fallback(kind, fallback)
    }

    /// Build the fallback evaluator on first use. It never has a fallback of its own.
    async fn fallback_evaluator(&self) -> Result<&Arc<SingleProviderEvaluator>, EvaluatorError> {
        let slot = self.fallback.as_ref().ok_or_else(|| EvaluatorError::Setup {
            provider: self.kind(),
            source: ProviderError::NotConfigured("no fallback backend".to_string()),
        })?;

        slot.evaluator
            .get_or_try_init(|| async {
                let provider = slot
                    .registry
                    .create(slot.kind, &slot.settings)
                    .map_err(|source| EvaluatorError::Setup {
                        provider: slot.kind,
                        source,
                    })?;
                tracing::info!(fallback = %slot.kind, model = %provider.model(), "Constructed fallback backend");

                let mut builder = SingleEvaluatorBuilder::new(provider, self.requirements.clone())
                    .config(self.config.clone())
                    .upload_cache(self.uploads.clone())
                    .retry_policy(self.policy)
                    .without_fallback();
                if let Some(limiter) = &self.limiter {
                    builder = builder.rate_limiter(limiter.clone());
                }
                Ok(Arc::new(builder.build()))
            })
            .await
    }
}

#[async_trait]
impl DocumentEvaluator for SingleProviderEvaluator {
    async fn evaluate_document(
        &self,
        document: &DocumentPayload,
        cancel: CancellationToken,
    ) -> Result<MergedSummary, EvaluatorError> {
        let set = self.requirements.load().await?.limited(self.config.requirement_limit);
        let verdicts = self
            .evaluate_requirements(document, &set.requirements, &set.context, &cancel)
            .await?;

        let kind = self.kind();
        let merged = verdicts.into_iter().map(MergedVerdict::single).collect();
        Ok(MergedSummary::new(
            document.info(EvaluationMode::Single(kind), vec![kind]),
            merged,
        ))
    }
}

/// Builder for [`SingleProviderEvaluator`].
pub struct SingleEvaluatorBuilder {
    provider: Arc<dyn ReasoningProvider>,
    requirements: Arc<dyn RequirementSource>,
    config: EvaluatorConfig,
    policy: Option<RetryPolicy>,
    uploads: Option<UploadCache>,
    limiter: Option<Arc<TokenRateLimiter>>,
    fallback: Option<(ProviderRegistry, JsonValue)>,
    no_fallback: bool,
    progress: Option<ProgressCallback>,
}

impl SingleEvaluatorBuilder {
    pub fn new(provider: Arc<dyn ReasoningProvider>, requirements: Arc<dyn RequirementSource>) -> Self {
        Self {
            provider,
            requirements,
            config: EvaluatorConfig::default(),
            policy: None,
            uploads: None,
            limiter: None,
            fallback: None,
            no_fallback: false,
            progress: None,
        }
    }

    pub fn config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the policy derived from the config.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn upload_cache(mut self, uploads: UploadCache) -> Self {
        self.uploads = Some(uploads);
        self
    }

    /// Shared limiter; only attached when the backend requires rate limiting.
    pub fn rate_limiter(mut self, limiter: Arc<TokenRateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Where to build the static fallback for this backend's kind.
    pub fn fallback_from(mut self, registry: ProviderRegistry, settings: JsonValue) -> Self {
        self.fallback = Some((registry, settings));
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.no_fallback = true;
        self
    }

    pub fn on_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn build(self) -> SingleProviderEvaluator {
        let policy = self
            .policy
            .unwrap_or_else(|| RetryPolicy::from_config(&self.config));
        let uploads = self.uploads.unwrap_or_else(|| {
            UploadCache::new(self.config.upload_cache_capacity, self.config.upload_cache_ttl)
        });
        let limiter = self
            .limiter
            .filter(|_| self.provider.requires_rate_limit());

        let fallback = match (self.no_fallback, self.provider.kind().fallback(), self.fallback) {
            (false, Some(kind), Some((registry, settings))) => Some(FallbackSlot {
                kind,
                registry,
                settings,
                evaluator: OnceCell::new(),
            }),
            _ => None,
        };

        SingleProviderEvaluator {
            provider: self.provider,
            requirements: self.requirements,
            uploads,
            limiter,
            policy,
            config: self.config,
            fallback,
            progress: self.progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimiterConfig;
    use crate::providers::{ScriptedFactory, ScriptedOutcome, ScriptedProvider};
    use attest_core::{Checklist, Confidence, VerdictStatus};
    use parking_lot::Mutex;

    fn checklist(ids: &[&str]) -> Arc<dyn RequirementSource> {
        Arc::new(
            Checklist::new(
                "Test",
                ids.iter().map(|id| Requirement::new(*id, format!("Requirement {}", id))).collect(),
            )
            .unwrap(),
        )
    }

    fn document() -> DocumentPayload {
        DocumentPayload::new("manual.pdf", "application/pdf", b"%PDF-1.7 test".to_vec())
    }

    fn overloaded() -> ScriptedOutcome {
        ScriptedOutcome::fail(ProviderError::Overloaded {
            status: 529,
            message: "overloaded".to_string(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi));
        let evaluator = SingleProviderEvaluator::builder(provider.clone(), checklist(&["R1", "R2"])).build();

        let summary = evaluator
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.verdicts.len(), 2);
        assert_eq!(summary.statistics.count(VerdictStatus::Pass), 2);
        assert_eq!(provider.upload_count(), 1);
        assert_eq!(provider.call_count("R1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_once() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::Gemini).script("R1", [overloaded()]));
        let evaluator = SingleProviderEvaluator::builder(provider.clone(), checklist(&["R1"])).build();

        let start = tokio::time::Instant::now();
        let summary = evaluator
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.verdicts[0].status(), VerdictStatus::Pass);
        assert_eq!(provider.call_count("R1"), 2);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gemini_without_fallback_errors_after_retry() {
        let provider = Arc::new(
            ScriptedProvider::new(ProviderKind::Gemini).script("R1", [overloaded(), overloaded()]),
        );
        let evaluator = SingleProviderEvaluator::builder(provider.clone(), checklist(&["R1", "R2"]))
            .fallback_from(ProviderRegistry::new(), serde_json::json!({}))
            .build();
        assert_eq!(evaluator.fallback_kind(), None);

        let summary = evaluator
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();
        let r1 = summary.verdict("R1").unwrap();
        assert_eq!(r1.status(), VerdictStatus::Error);
        assert_eq!(r1.verdict.confidence, Confidence::Low);
        assert!(r1.verdict.evidence.is_empty());
        assert_eq!(summary.verdict("R2").unwrap().status(), VerdictStatus::Pass);
        assert_eq!(provider.call_count("R1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_two_transient_failures() {
        let primary = Arc::new(
            ScriptedProvider::new(ProviderKind::OpenAi).script("R1", [overloaded(), overloaded()]),
        );
        let fallback = Arc::new(
            ScriptedProvider::new(ProviderKind::Gemini)
                .with_default(ScriptedOutcome::verdict(VerdictStatus::Fail, 0.8)),
        );
        let registry = ProviderRegistry::new().with(Arc::new(ScriptedFactory::shared(fallback.clone())));

        let evaluator = SingleProviderEvaluator::builder(primary.clone(), checklist(&["R1", "R2"]))
            .fallback_from(registry, serde_json::json!({}))
            .build();
        assert!(!evaluator.fallback_initialized());

        let summary = evaluator
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();

        let r1 = summary.verdict("R1").unwrap();
        assert_eq!(r1.status(), VerdictStatus::Fail);
        assert_eq!(r1.verdict.provider, ProviderKind::OpenAi);
        assert_eq!(r1.verdict.fallback_provider, Some(ProviderKind::Gemini));
        assert_eq!(summary.statistics.fallback_count, 1);

        assert_eq!(summary.verdict("R2").unwrap().verdict.fallback_provider, None);
        assert!(evaluator.fallback_initialized());
        assert_eq!(fallback.call_count("R1"), 1);
        assert_eq!(fallback.call_count("R2"), 0);
        assert_eq!(fallback.upload_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_failure_is_error_not_third_provider() {
        let primary = Arc::new(
            ScriptedProvider::new(ProviderKind::Claude).script("R1", [overloaded(), overloaded()]),
        );
        let fallback = Arc::new(
            ScriptedProvider::new(ProviderKind::Gemini).script("R1", [overloaded(), overloaded()]),
        );
        let registry = ProviderRegistry::new().with(Arc::new(ScriptedFactory::shared(fallback.clone())));

        let evaluator = SingleProviderEvaluator::builder(primary.clone(), checklist(&["R1"]))
            .fallback_from(registry, serde_json::json!({}))
            .build();
        let summary = evaluator
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();

        let r1 = summary.verdict("R1").unwrap();
        assert_eq!(r1.status(), VerdictStatus::Error);
        assert!(r1.verdict.gaps[0].contains("also failed"));
        assert_eq!(primary.call_count("R1"), 2);
        assert_eq!(fallback.call_count("R1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_fallback_yields_error() {
        let primary = Arc::new(
            ScriptedProvider::new(ProviderKind::OpenAi).script("R1", [overloaded(), overloaded()]),
        );
        let evaluator = SingleProviderEvaluator::builder(primary, checklist(&["R1"]))
            .fallback_from(ProviderRegistry::new(), serde_json::json!({}))
            .build();

        let summary = evaluator
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();
        let r1 = summary.verdict("R1").unwrap();
        assert_eq!(r1.status(), VerdictStatus::Error);
        assert!(r1.verdict.rationale.contains("fallback unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_not_retried() {
        let provider = Arc::new(
            ScriptedProvider::new(ProviderKind::OpenAi).script("R1", [ScriptedOutcome::respond("I think it passes")]),
        );
        let evaluator = SingleProviderEvaluator::builder(provider.clone(), checklist(&["R1"])).build();

        let summary = evaluator
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();
        let r1 = summary.verdict("R1").unwrap();
        assert_eq!(r1.status(), VerdictStatus::Error);
        assert_eq!(r1.verdict.tokens_used, 1_000);
        assert_eq!(provider.call_count("R1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_failure_is_document_error() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi).failing_upload(ProviderError::Auth));
        let evaluator = SingleProviderEvaluator::builder(provider, checklist(&["R1"])).build();

        let result = evaluator
            .evaluate_document(&document(), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(EvaluatorError::Upload { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_is_transient() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::Gemini).script(
            "R1",
            [ScriptedOutcome::verdict(VerdictStatus::Pass, 0.9).after(Duration::from_secs(600))],
        ));
        let config = EvaluatorConfig {
            request_timeout: Duration::from_secs(10),
            ..EvaluatorConfig::default()
        };
        let evaluator = SingleProviderEvaluator::builder(provider.clone(), checklist(&["R1"]))
            .config(config)
            .build();

        let summary = evaluator
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.verdicts[0].status(), VerdictStatus::Pass);
        assert_eq!(provider.call_count("R1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_backend_charges_limiter() {
        let limiter = Arc::new(TokenRateLimiter::new(RateLimiterConfig::default()));
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::Claude));
        let evaluator = SingleProviderEvaluator::builder(provider, checklist(&["R1", "R2", "R3"]))
            .rate_limiter(limiter.clone())
            .build();

        evaluator
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();

        let status = limiter.status().await;
        assert_eq!(status.records_in_window, 3);
        assert_eq!(status.current_usage, 2_700);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiter_records_input_tokens_only() {
        let limiter = Arc::new(TokenRateLimiter::new(RateLimiterConfig::default()));
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::Claude).with_default(
            ScriptedOutcome::verdict(VerdictStatus::Pass, 0.9).with_usage(12_000, 3_000),
        ));
        let evaluator = SingleProviderEvaluator::builder(provider, checklist(&["R1", "R2"]))
            .rate_limiter(limiter.clone())
            .build();

        let summary = evaluator
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.verdicts[0].verdict.tokens_used, 15_000);
        assert_eq!(summary.statistics.total_tokens, 30_000);

        let status = limiter.status().await;
        assert_eq!(status.records_in_window, 2);
        assert_eq!(status.current_usage, 24_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fallback_keeps_spent_tokens() {
        let primary = Arc::new(
            ScriptedProvider::new(ProviderKind::OpenAi).script("R1", [overloaded(), overloaded()]),
        );
        let fallback = Arc::new(
            ScriptedProvider::new(ProviderKind::Gemini)
                .script("R1", [ScriptedOutcome::respond("no verdict here").with_usage(1_500, 200)]),
        );
        let registry = ProviderRegistry::new().with(Arc::new(ScriptedFactory::shared(fallback)));
        let evaluator = SingleProviderEvaluator::builder(primary, checklist(&["R1"]))
            .fallback_from(registry, serde_json::json!({}))
            .build();

        let summary = evaluator
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();
        let r1 = summary.verdict("R1").unwrap();
        assert_eq!(r1.status(), VerdictStatus::Error);
        assert!(r1.verdict.gaps[0].contains("also failed"));
        assert_eq!(r1.verdict.tokens_used, 1_700);
        assert_eq!(summary.statistics.total_tokens, 1_700);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verdicts_labelled_with_requirement() {
        let mut requirement = Requirement::new("ISO-5.2", "Quality policy is documented");
        requirement.title = Some("Quality policy".to_string());
        requirement.clause = Some("5.2".to_string());
        let requirements: Arc<dyn RequirementSource> =
            Arc::new(Checklist::new("Labels", vec![requirement]).unwrap());
        let provider = Arc::new(
            ScriptedProvider::new(ProviderKind::Gemini).script("ISO-5.2", [overloaded(), overloaded()]),
        );
        let evaluator = SingleProviderEvaluator::builder(provider, requirements).build();

        let summary = evaluator
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();
        let merged = &summary.verdicts[0];
        assert_eq!(merged.status(), VerdictStatus::Error);
        assert_eq!(merged.requirement_title(), Some("Quality policy"));
        assert_eq!(merged.requirement_clause(), Some("5.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiter_ignored_for_unlimited_backend() {
        let limiter = Arc::new(TokenRateLimiter::new(RateLimiterConfig::default()));
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi));
        let evaluator = SingleProviderEvaluator::builder(provider, checklist(&["R1"]))
            .rate_limiter(limiter.clone())
            .build();

        evaluator
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(limiter.status().await.records_in_window, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requirement_limit_and_progress() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let config = EvaluatorConfig {
            requirement_limit: 2,
            ..EvaluatorConfig::default()
        };
        let evaluator = SingleProviderEvaluator::builder(
            Arc::new(ScriptedProvider::new(ProviderKind::OpenAi)),
            checklist(&["R1", "R2", "R3"]),
        )
        .config(config)
        .on_progress(Arc::new(move |p: EvaluationProgress| sink.lock().push(p)))
        .build();

        let summary = evaluator
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.verdicts.len(), 2);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen.last().unwrap().completed, 2);
        assert_eq!(seen.last().unwrap().percent, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_yields_error_verdicts() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi).with_default(
            ScriptedOutcome::verdict(VerdictStatus::Pass, 0.9).after(Duration::from_secs(60)),
        ));
        let evaluator = SingleProviderEvaluator::builder(provider, checklist(&["R1"])).build();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = evaluator.evaluate_document(&document(), cancel).await.unwrap();
        assert_eq!(summary.verdicts[0].status(), VerdictStatus::Error);
    }
}
