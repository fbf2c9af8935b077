//! Merge policy: reconciles two backends' verdicts for the same requirement.
//!
//! The policy is strict and non-configurable:
//! 1. Both sides scoreable: the more conservative status wins (ties keep the
//!    primary), confidence drops to the lower of the two, and the content of
//!    the winning side is kept.
//! 2. Exactly one side scoreable: that side is used verbatim.
//! 3. Neither side scoreable: the result is an Error with unknown agreement.

use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;
use crate::verdict::{Confidence, RequirementVerdict, VerdictStatus};

/// How the two sides related to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementStatus {
    /// Both sides returned the same non-Error status
    Agreement,

    /// Both sides were scoreable but disagreed
    Conflict,

    /// Exactly one side was scoreable
    SingleProvider,

    /// Neither side was scoreable
    Unknown,
}

impl AgreementStatus {
    pub const ALL: [AgreementStatus; 4] = [
        AgreementStatus::Agreement,
        AgreementStatus::Conflict,
        AgreementStatus::SingleProvider,
        AgreementStatus::Unknown,
    ];
}

/// What one side contributed, kept for provenance after merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideOutcome {
    /// Backend role asked for the verdict
    pub provider: ProviderKind,

    /// Backend that actually answered
    pub answered_by: ProviderKind,

    pub status: VerdictStatus,
    pub confidence: Confidence,
    pub tokens_used: u64,
}

impl From<&RequirementVerdict> for SideOutcome {
    fn from(v: &RequirementVerdict) -> Self {
        Self {
            provider: v.provider,
            answered_by: v.fallback_provider.unwrap_or(v.provider),
            status: v.status,
            confidence: v.confidence,
            tokens_used: v.tokens_used,
        }
    }
}

/// Final verdict for one requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedVerdict {
    #[serde(flatten)]
    pub verdict: RequirementVerdict,

    pub agreement_status: AgreementStatus,

    /// Role whose content was kept
    pub source_provider: ProviderKind,

    /// Per-side provenance, primary first
    pub sides: Vec<SideOutcome>,
}

impl MergedVerdict {
    /// Wrap the output of a single-provider run.
    pub fn single(verdict: RequirementVerdict) -> Self {
        let agreement_status = if verdict.is_error() {
            AgreementStatus::Unknown
        } else {
            AgreementStatus::SingleProvider
        };
        Self {
            source_provider: verdict.provider,
            sides: vec![SideOutcome::from(&verdict)],
            verdict,
            agreement_status,
        }
    }

    pub fn requirement_id(&self) -> &str {
        &self.verdict.requirement_id
    }

    pub fn status(&self) -> VerdictStatus {
        self.verdict.status
    }

    pub fn requirement_title(&self) -> Option<&str> {
        self.verdict.requirement_title.as_deref()
    }

    pub fn requirement_clause(&self) -> Option<&str> {
        self.verdict.requirement_clause.as_deref()
    }

    /// True when the kept content came from a fallback backend.
    pub fn used_fallback(&self) -> bool {
        self.verdict.fallback_provider.is_some()
    }
}

/// Merge the primary and secondary verdicts for one requirement.
pub fn merge(primary: RequirementVerdict, secondary: RequirementVerdict) -> MergedVerdict {
    let sides = vec![SideOutcome::from(&primary), SideOutcome::from(&secondary)];
    let total_tokens = primary.tokens_used + secondary.tokens_used;
    let title = primary.requirement_title.clone().or_else(|| secondary.requirement_title.clone());
    let clause = primary.requirement_clause.clone().or_else(|| secondary.requirement_clause.clone());

    let (mut kept, agreement_status) = match (primary.is_error(), secondary.is_error()) {
        (false, false) => {
            let agreement = if primary.status == secondary.status {
                AgreementStatus::Agreement
            } else {
                AgreementStatus::Conflict
            };
            let confidence = primary.confidence.min_rank(secondary.confidence);
            let mut chosen =
                if secondary.status.conservatism() > primary.status.conservatism() {
                    secondary
                } else {
                    primary
                };
            chosen.confidence = confidence;
            (chosen, agreement)
        }
        (false, true) => (primary, AgreementStatus::SingleProvider),
        (true, false) => (secondary, AgreementStatus::SingleProvider),
        (true, true) => (primary, AgreementStatus::Unknown),
    };

    kept.tokens_used = total_tokens;
    kept.requirement_title = title;
    kept.requirement_clause = clause;

    MergedVerdict {
        source_provider: kept.provider,
        verdict: kept,
        agreement_status,
        sides,
    }
}
