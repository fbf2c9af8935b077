//! Document-level aggregation of merged verdicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::merge::{AgreementStatus, MergedVerdict};
use crate::provider::{EvaluationMode, ProviderKind};
use crate::verdict::VerdictStatus;

/// Flat blended rate used for cost estimation, USD per million tokens.
pub const COST_PER_MILLION_TOKENS_USD: f64 = 5.0;

/// Identity of the evaluated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub name: String,
    pub size_bytes: u64,
    /// Hex digest of the document bytes
    pub content_hash: String,
    pub mode: EvaluationMode,
    /// Primary backends in role order
    pub providers: Vec<ProviderKind>,
}

/// Aggregate statistics over all requirements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub total_requirements: usize,

    /// `pass / (total - error) * 100`, one decimal
    pub compliance_score: f64,

    /// Always contains all five statuses
    pub status_counts: BTreeMap<VerdictStatus, usize>,

    pub agreement_counts: BTreeMap<AgreementStatus, usize>,

    /// Summed across every side of every requirement
    pub total_tokens: u64,

    /// Keyed by the backend that actually answered
    pub tokens_by_provider: BTreeMap<ProviderKind, u64>,

    /// Verdicts whose kept content came from a fallback backend
    pub fallback_count: usize,

    pub estimated_cost_usd: f64,
}

impl SummaryStatistics {
    pub fn from_verdicts(verdicts: &[MergedVerdict]) -> Self {
        let mut status_counts: BTreeMap<VerdictStatus, usize> =
            VerdictStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut agreement_counts: BTreeMap<AgreementStatus, usize> =
            AgreementStatus::ALL.iter().map(|a| (*a, 0)).collect();
        let mut tokens_by_provider: BTreeMap<ProviderKind, u64> = BTreeMap::new();
        let mut fallback_count = 0;

        for merged in verdicts {
            *status_counts.entry(merged.status()).or_insert(0) += 1;
            *agreement_counts.entry(merged.agreement_status).or_insert(0) += 1;
            if merged.used_fallback() {
                fallback_count += 1;
            }
            for side in &merged.sides {
                *tokens_by_provider.entry(side.answered_by).or_insert(0) += side.tokens_used;
            }
        }

        let total_tokens: u64 = tokens_by_provider.values().sum();
        let total = verdicts.len();
        let errors = status_counts[&VerdictStatus::Error];
        let passes = status_counts[&VerdictStatus::Pass];

        Self {
            total_requirements: total,
            compliance_score: compliance_score(passes, total, errors),
            status_counts,
            agreement_counts,
            total_tokens,
            tokens_by_provider,
            fallback_count,
            estimated_cost_usd: estimated_cost(total_tokens),
        }
    }

    pub fn count(&self, status: VerdictStatus) -> usize {
        self.status_counts.get(&status).copied().unwrap_or(0)
    }
}

/// `passes / (total - errors) * 100`, rounded to one decimal; 0 when nothing is scoreable.
pub fn compliance_score(passes: usize, total: usize, errors: usize) -> f64 {
    let scored = total.saturating_sub(errors);
    if scored == 0 {
        return 0.0;
    }
    round_to(passes as f64 / scored as f64 * 100.0, 1)
}

pub fn estimated_cost(total_tokens: u64) -> f64 {
    round_to(total_tokens as f64 / 1_000_000.0 * COST_PER_MILLION_TOKENS_USD, 4)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Everything a caller needs to persist or display one document evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedSummary {
    pub document: DocumentInfo,
    pub verdicts: Vec<MergedVerdict>,
    pub statistics: SummaryStatistics,
    /// Requirement id to agreement status
    pub agreement: BTreeMap<String, AgreementStatus>,
    pub generated_at: DateTime<Utc>,
}

impl MergedSummary {
    pub fn new(document: DocumentInfo, verdicts: Vec<MergedVerdict>) -> Self {
        let statistics = SummaryStatistics::from_verdicts(&verdicts);
        let agreement = verdicts
            .iter()
            .map(|v| (v.requirement_id().to_string(), v.agreement_status))
            .collect();

        Self {
            document,
            verdicts,
            statistics,
            agreement,
            generated_at: Utc::now(),
        }
    }

    pub fn verdict(&self, requirement_id: &str) -> Option<&MergedVerdict> {
        self.verdicts.iter().find(|v| v.requirement_id() == requirement_id)
    }
}
