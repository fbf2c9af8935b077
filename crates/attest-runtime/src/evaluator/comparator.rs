//! Two backends over the same requirement list, merged conservatively.
//!
//! Both sides run concurrently. A side whose upload fails turns into all
//! Error verdicts instead of aborting the other side.

use async_trait::async_trait;
use attest_core::{
    merge, EvaluationMode, MergedSummary, ProviderKind, Requirement, RequirementVerdict,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::single::SingleProviderEvaluator;
use super::traits::{DocumentEvaluator, EvaluatorError, RequirementSource};
use crate::document::DocumentPayload;

/// Runs a primary and a secondary evaluator and merges per requirement.
pub struct MultiProviderComparator {
    primary: SingleProviderEvaluator,
    secondary: SingleProviderEvaluator,
    requirements: Arc<dyn RequirementSource>,
    requirement_limit: usize,
}

impl std::fmt::Debug for MultiProviderComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiProviderComparator")
            .field("primary", &self.primary)
            .field("secondary", &self.secondary)
            .field("requirement_limit", &self.requirement_limit)
            .finish()
    }
}

impl MultiProviderComparator {
    /// Ties in the merge keep the `primary` side.
    pub fn new(
        primary: SingleProviderEvaluator,
        secondary: SingleProviderEvaluator,
        requirements: Arc<dyn RequirementSource>,
    ) -> Self {
        Self {
            primary,
            secondary,
            requirements,
            requirement_limit: 0,
        }
    }

    /// Evaluate only the first `limit` requirements; 0 means all.
    pub fn with_requirement_limit(mut self, limit: usize) -> Self {
        self.requirement_limit = limit;
        self
    }

    pub fn providers(&self) -> (ProviderKind, ProviderKind) {
        (self.primary.kind(), self.secondary.kind())
    }

    pub fn primary(&self) -> &SingleProviderEvaluator {
        &self.primary
    }

    pub fn secondary(&self) -> &SingleProviderEvaluator {
        &self.secondary
    }
}

/// Every requirement as an Error verdict from `provider`.
fn failed_side(provider: ProviderKind, requirements: &[Requirement], error: &EvaluatorError) -> Vec<RequirementVerdict> {
    tracing::warn!(provider = %provider, error = %error, "Provider failed for whole document");
    requirements
        .iter()
        .map(|r| RequirementVerdict::error(&r.id, provider, error).labelled(r))
        .collect()
}

#[async_trait]
impl DocumentEvaluator for MultiProviderComparator {
    async fn evaluate_document(
        &self,
        document: &DocumentPayload,
        cancel: CancellationToken,
    ) -> Result<MergedSummary, EvaluatorError> {
        let set = self.requirements.load().await?.limited(self.requirement_limit);
        let (primary_kind, secondary_kind) = self.providers();

        let (primary, secondary) = tokio::join!(
            self.primary
                .evaluate_requirements(document, &set.requirements, &set.context, &cancel),
            self.secondary
                .evaluate_requirements(document, &set.requirements, &set.context, &cancel),
        );

        let primary = primary.unwrap_or_else(|e| failed_side(primary_kind, &set.requirements, &e));
        let secondary = secondary.unwrap_or_else(|e| failed_side(secondary_kind, &set.requirements, &e));

        let merged: Vec<_> = primary
            .into_iter()
            .zip(secondary)
            .map(|(p, s)| merge(p, s))
            .collect();

        let summary = MergedSummary::new(
            document.info(EvaluationMode::Dual, vec![primary_kind, secondary_kind]),
            merged,
        );
        tracing::info!(
            document = %document.name(),
            compliance_score = summary.statistics.compliance_score,
            total_tokens = summary.statistics.total_tokens,
            fallbacks = summary.statistics.fallback_count,
            "Comparison complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{
        ProviderError, ProviderRegistry, ScriptedFactory, ScriptedOutcome, ScriptedProvider,
    };
    use attest_core::{AgreementStatus, Checklist, Confidence, VerdictStatus};
    use std::time::Duration;

    fn source(ids: &[&str]) -> Arc<dyn RequirementSource> {
        Arc::new(
            Checklist::new(
                "Test",
                ids.iter().map(|id| Requirement::new(*id, "text")).collect(),
            )
            .unwrap(),
        )
    }

    fn document() -> DocumentPayload {
        DocumentPayload::new("plan.pdf", "application/pdf", b"%PDF plan".to_vec())
    }

    fn comparator(
        primary: Arc<ScriptedProvider>,
        secondary: Arc<ScriptedProvider>,
        registry: ProviderRegistry,
        ids: &[&str],
    ) -> MultiProviderComparator {
        let requirements = source(ids);
        MultiProviderComparator::new(
            SingleProviderEvaluator::builder(primary, requirements.clone())
                .fallback_from(registry.clone(), serde_json::json!({}))
                .build(),
            SingleProviderEvaluator::builder(secondary, requirements.clone())
                .fallback_from(registry, serde_json::json!({}))
                .build(),
            requirements,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_takes_conservative_status() {
        let primary = Arc::new(
            ScriptedProvider::new(ProviderKind::Claude)
                .script("R1", [ScriptedOutcome::verdict(VerdictStatus::Pass, 0.5)]),
        );
        let secondary = Arc::new(
            ScriptedProvider::new(ProviderKind::OpenAi)
                .script("R1", [ScriptedOutcome::verdict(VerdictStatus::Fail, 0.9)]),
        );
        let summary = comparator(primary, secondary, ProviderRegistry::new(), &["R1", "R2"])
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();

        let r1 = summary.verdict("R1").unwrap();
        assert_eq!(r1.status(), VerdictStatus::Fail);
        assert_eq!(r1.verdict.confidence, Confidence::Medium);
        assert_eq!(r1.agreement_status, AgreementStatus::Conflict);
        assert_eq!(r1.source_provider, ProviderKind::OpenAi);
        assert_eq!(r1.verdict.tokens_used, 2_000);

        let r2 = summary.verdict("R2").unwrap();
        assert_eq!(r2.agreement_status, AgreementStatus::Agreement);
        assert_eq!(r2.source_provider, ProviderKind::Claude);
        assert_eq!(summary.statistics.total_tokens, 4_000);
        assert_eq!(summary.document.providers, vec![ProviderKind::Claude, ProviderKind::OpenAi]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_failure_marks_side_error() {
        let primary = Arc::new(ScriptedProvider::new(ProviderKind::Claude).failing_upload(ProviderError::Auth));
        let secondary = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi));
        let summary = comparator(primary, secondary, ProviderRegistry::new(), &["R1", "R2"])
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();

        for merged in &summary.verdicts {
            assert_eq!(merged.status(), VerdictStatus::Pass);
            assert_eq!(merged.agreement_status, AgreementStatus::SingleProvider);
            assert_eq!(merged.source_provider, ProviderKind::OpenAi);
        }
        assert_eq!(summary.statistics.compliance_score, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requirement_labels_survive_merge() {
        let labelled = |id: &str, title: &str, clause: &str| {
            let mut requirement = Requirement::new(id, "text");
            requirement.title = Some(title.to_string());
            requirement.clause = Some(clause.to_string());
            requirement
        };
        let requirements: Arc<dyn RequirementSource> = Arc::new(
            Checklist::new(
                "Labels",
                vec![labelled("R1", "Scope", "4.3"), labelled("R2", "Leadership", "5.1")],
            )
            .unwrap(),
        );
        let primary = Arc::new(ScriptedProvider::new(ProviderKind::Claude).failing_upload(ProviderError::Auth));
        let secondary = Arc::new(
            ScriptedProvider::new(ProviderKind::OpenAi)
                .script("R1", [ScriptedOutcome::respond("garbage")])
                .script("R2", [ScriptedOutcome::verdict(VerdictStatus::Fail, 0.9)]),
        );

        let summary = MultiProviderComparator::new(
            SingleProviderEvaluator::builder(primary, requirements.clone()).build(),
            SingleProviderEvaluator::builder(secondary, requirements.clone()).build(),
            requirements,
        )
        .evaluate_document(&document(), CancellationToken::new())
        .await
        .unwrap();

        // Both sides errored: the kept row is the primary's upload failure
        let r1 = summary.verdict("R1").unwrap();
        assert_eq!(r1.agreement_status, AgreementStatus::Unknown);
        assert_eq!(r1.source_provider, ProviderKind::Claude);
        assert_eq!(r1.requirement_title(), Some("Scope"));
        assert_eq!(r1.requirement_clause(), Some("4.3"));

        let r2 = summary.verdict("R2").unwrap();
        assert_eq!(r2.status(), VerdictStatus::Fail);
        assert_eq!(r2.requirement_title(), Some("Leadership"));
        assert_eq!(r2.requirement_clause(), Some("5.1"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["verdicts"][1]["requirement_title"], "Leadership");
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_sides_error_is_unknown() {
        let overloaded = || {
            ScriptedOutcome::fail(ProviderError::Overloaded {
                status: 503,
                message: "down".to_string(),
            })
        };
        let primary = Arc::new(ScriptedProvider::new(ProviderKind::Gemini).with_default(overloaded()));
        let secondary = Arc::new(
            ScriptedProvider::new(ProviderKind::OpenAi).script("R1", [ScriptedOutcome::respond("not json")]),
        );
        let summary = comparator(primary, secondary, ProviderRegistry::new(), &["R1"])
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();

        let r1 = summary.verdict("R1").unwrap();
        assert_eq!(r1.status(), VerdictStatus::Error);
        assert_eq!(r1.agreement_status, AgreementStatus::Unknown);
        assert_eq!(summary.statistics.compliance_score, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_result_is_merged_not_failed_primary() {
        let transient = || ScriptedOutcome::fail(ProviderError::RateLimited { retry_after: Some(Duration::from_secs(1)) });
        let primary = Arc::new(ScriptedProvider::new(ProviderKind::Claude).script("R1", [transient(), transient()]));
        let secondary = Arc::new(
            ScriptedProvider::new(ProviderKind::OpenAi)
                .script("R1", [ScriptedOutcome::verdict(VerdictStatus::Flagged, 0.9)]),
        );
        let gemini = Arc::new(
            ScriptedProvider::new(ProviderKind::Gemini)
                .with_default(ScriptedOutcome::verdict(VerdictStatus::Flagged, 0.8)),
        );
        let registry = ProviderRegistry::new().with(Arc::new(ScriptedFactory::shared(gemini.clone())));

        let summary = comparator(primary, secondary, registry, &["R1"])
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();

        let r1 = summary.verdict("R1").unwrap();
        assert_eq!(r1.agreement_status, AgreementStatus::Agreement);
        assert_eq!(r1.verdict.fallback_provider, Some(ProviderKind::Gemini));
        assert_eq!(r1.sides[0].answered_by, ProviderKind::Gemini);
        assert_eq!(gemini.call_count("R1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_score_excludes_errors() {
        let ids: Vec<String> = (1..=10).map(|i| format!("R{}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        let mut primary = ScriptedProvider::new(ProviderKind::Claude);
        let mut secondary = ScriptedProvider::new(ProviderKind::OpenAi);
        for id in ["R7", "R8"] {
            primary = primary.script(id, [ScriptedOutcome::verdict(VerdictStatus::Fail, 0.9)]);
            secondary = secondary.script(id, [ScriptedOutcome::verdict(VerdictStatus::Fail, 0.9)]);
        }
        for id in ["R9", "R10"] {
            primary = primary.script(id, [ScriptedOutcome::respond("garbage")]);
            secondary = secondary.script(id, [ScriptedOutcome::respond("garbage")]);
        }

        let summary = comparator(Arc::new(primary), Arc::new(secondary), ProviderRegistry::new(), &id_refs)
            .evaluate_document(&document(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.statistics.count(VerdictStatus::Pass), 6);
        assert_eq!(summary.statistics.count(VerdictStatus::Fail), 2);
        assert_eq!(summary.statistics.count(VerdictStatus::Error), 2);
        assert_eq!(summary.statistics.compliance_score, 75.0);
    }
}
