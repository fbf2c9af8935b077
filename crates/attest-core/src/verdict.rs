//! Verdict types produced per requirement by a single backend.

use crate::checklist::Requirement;
use crate::provider::ProviderKind;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Outcome of evaluating one requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    /// Requirement is satisfied
    Pass,

    /// Requirement is not satisfied
    Fail,

    /// Partially satisfied or needs human review
    Flagged,

    /// Requirement does not apply to this document
    NotApplicable,

    /// The backend could not produce a verdict
    Error,
}

impl VerdictStatus {
    /// All statuses, used to zero-fill histograms.
    pub const ALL: [VerdictStatus; 5] = [
        VerdictStatus::Pass,
        VerdictStatus::Fail,
        VerdictStatus::Flagged,
        VerdictStatus::NotApplicable,
        VerdictStatus::Error,
    ];

    /// Priority used when two backends disagree. Higher wins.
    ///
    /// `Fail 4 > Flagged 3 = Error 3 > Pass 2 > NotApplicable 1`
    pub const fn conservatism(self) -> u8 {
        match self {
            VerdictStatus::Fail => 4,
            VerdictStatus::Flagged | VerdictStatus::Error => 3,
            VerdictStatus::Pass => 2,
            VerdictStatus::NotApplicable => 1,
        }
    }

    pub const fn is_error(self) -> bool {
        matches!(self, VerdictStatus::Error)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            VerdictStatus::Pass => "PASS",
            VerdictStatus::Fail => "FAIL",
            VerdictStatus::Flagged => "FLAGGED",
            VerdictStatus::NotApplicable => "NOT_APPLICABLE",
            VerdictStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How well-supported a verdict is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// `Low 0 < Medium 1 < High 2`
    pub const fn rank(self) -> u8 {
        match self {
            Confidence::Low => 0,
            Confidence::Medium => 1,
            Confidence::High => 2,
        }
    }

    /// Map a numeric score in `[0, 1]` onto a label.
    pub fn from_score(score: f64) -> Self {
        if score < 0.4 {
            Confidence::Low
        } else if score < 0.7 {
            Confidence::Medium
        } else {
            Confidence::High
        }
    }

    /// Parse a label case-insensitively.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Confidence::Low),
            "medium" => Some(Confidence::Medium),
            "high" => Some(Confidence::High),
            _ => None,
        }
    }

    /// The lower of two confidences.
    pub fn min_rank(self, other: Confidence) -> Confidence {
        if other.rank() < self.rank() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        };
        f.write_str(s)
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Label(String),
            Score(f64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Label(label) => Confidence::from_label(&label).ok_or_else(|| {
                serde::de::Error::custom(format!("unknown confidence label '{}'", label))
            }),
            Raw::Score(score) if (0.0..=1.0).contains(&score) => Ok(Confidence::from_score(score)),
            Raw::Score(score) => Err(serde::de::Error::custom(format!(
                "confidence score {} outside [0, 1]",
                score
            ))),
        }
    }
}

/// The verdict one backend produced for one requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementVerdict {
    pub requirement_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_title: Option<String>,

    /// Clause reference copied from the checklist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_clause: Option<String>,

    pub status: VerdictStatus,

    pub confidence: Confidence,

    #[serde(default)]
    pub rationale: String,

    #[serde(default)]
    pub evidence: Vec<String>,

    #[serde(default)]
    pub gaps: Vec<String>,

    #[serde(default)]
    pub recommendations: Vec<String>,

    /// Tokens consumed by the call that produced this verdict
    #[serde(default)]
    pub tokens_used: u64,

    /// Backend role that was asked for this verdict
    pub provider: ProviderKind,

    /// Backend that actually answered, when a fallback substituted for `provider`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_provider: Option<ProviderKind>,
}

impl RequirementVerdict {
    /// An unscoreable verdict carrying the failure reason as a gap.
    pub fn error(requirement_id: impl Into<String>, provider: ProviderKind, reason: impl fmt::Display) -> Self {
        Self {
            requirement_id: requirement_id.into(),
            requirement_title: None,
            requirement_clause: None,
            status: VerdictStatus::Error,
            confidence: Confidence::Low,
            rationale: format!("Evaluation failed: {}", reason),
            evidence: Vec::new(),
            gaps: vec![format!("No verdict from {}: {}", provider, reason)],
            recommendations: Vec::new(),
            tokens_used: 0,
            provider,
            fallback_provider: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }

    /// Copy the title and clause of the requirement this verdict answers.
    pub fn labelled(mut self, requirement: &Requirement) -> Self {
        self.requirement_title = requirement.title.clone();
        self.requirement_clause = requirement.clause.clone();
        self
    }

    /// Mark this verdict as produced by `fallback` on behalf of `primary`.
    pub fn tagged_fallback(mut self, primary: ProviderKind, fallback: ProviderKind) -> Self {
        self.provider = primary;
        self.fallback_provider = Some(fallback);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conservatism_order() {
        assert!(VerdictStatus::Fail.conservatism() > VerdictStatus::Flagged.conservatism());
        assert_eq!(VerdictStatus::Flagged.conservatism(), VerdictStatus::Error.conservatism());
        assert!(VerdictStatus::Error.conservatism() > VerdictStatus::Pass.conservatism());
        assert!(VerdictStatus::Pass.conservatism() > VerdictStatus::NotApplicable.conservatism());
    }

    #[test]
    fn test_status_serde_names() {
        assert_eq!(
            serde_json::to_string(&VerdictStatus::NotApplicable).unwrap(),
            "\"NOT_APPLICABLE\""
        );
        let parsed: VerdictStatus = serde_json::from_str("\"FLAGGED\"").unwrap();
        assert_eq!(parsed, VerdictStatus::Flagged);
    }

    #[test]
    fn test_confidence_from_score_thresholds() {
        assert_eq!(Confidence::from_score(0.0), Confidence::Low);
        assert_eq!(Confidence::from_score(0.39), Confidence::Low);
        assert_eq!(Confidence::from_score(0.4), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.69), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.7), Confidence::High);
        assert_eq!(Confidence::from_score(1.0), Confidence::High);
    }

    #[test]
    fn test_confidence_deserializes_labels_and_scores() {
        let label: Confidence = serde_json::from_str("\"HIGH\"").unwrap();
        assert_eq!(label, Confidence::High);
        let score: Confidence = serde_json::from_str("0.5").unwrap();
        assert_eq!(score, Confidence::Medium);
        assert!(serde_json::from_str::<Confidence>("\"certain\"").is_err());
        assert!(serde_json::from_str::<Confidence>("1.5").is_err());
    }

    #[test]
    fn test_min_rank() {
        assert_eq!(Confidence::High.min_rank(Confidence::Medium), Confidence::Medium);
        assert_eq!(Confidence::Low.min_rank(Confidence::High), Confidence::Low);
    }

    #[test]
    fn test_error_verdict_has_no_evidence() {
        let verdict = RequirementVerdict::error("R1", ProviderKind::Claude, "upload failed");
        assert!(verdict.is_error());
        assert!(verdict.evidence.is_empty());
        assert_eq!(verdict.confidence, Confidence::Low);
        assert!(verdict.gaps[0].contains("upload failed"));
    }

    #[test]
    fn test_labelled_error_carries_requirement_provenance() {
        let mut requirement = Requirement::new("ISO-4.1", "Context of the organization");
        requirement.title = Some("Context".to_string());
        requirement.clause = Some("4.1".to_string());

        let verdict = RequirementVerdict::error("ISO-4.1", ProviderKind::OpenAi, "timeout").labelled(&requirement);
        assert_eq!(verdict.requirement_title.as_deref(), Some("Context"));
        assert_eq!(verdict.requirement_clause.as_deref(), Some("4.1"));

        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["requirement_clause"], "4.1");
        let bare = serde_json::to_value(RequirementVerdict::error("R2", ProviderKind::OpenAi, "x")).unwrap();
        assert!(bare.get("requirement_title").is_none());
    }
}
