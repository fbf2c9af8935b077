//! # attest-core
//!
//! Deterministic data model for document compliance evaluation.
//!
//! This crate answers, without any network access:
//! - What requirements is a document checked against?
//! - What did a backend say about one requirement?
//! - How are two backends' answers reconciled?
//! - What does the whole document score?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: merging and scoring are pure functions
//! 2. **Conservative**: on disagreement the stricter status wins
//! 3. **Explicit failure**: unscoreable requirements are `ERROR`, never missing
//!
//! ## Example
//!
//! ```rust,ignore
//! use attest_core::{merge, Checklist, MergedSummary};
//!
//! let checklist = Checklist::from_path("iso-9001.yaml")?;
//! let merged = merge(primary_verdict, secondary_verdict);
//! let summary = MergedSummary::new(document_info, vec![merged]);
//! println!("score: {}", summary.statistics.compliance_score);
//! ```

pub mod checklist;
pub mod merge;
pub mod provider;
pub mod response;
pub mod summary;
pub mod verdict;

pub use checklist::{Checklist, ChecklistError, Requirement};
pub use merge::{merge, AgreementStatus, MergedVerdict, SideOutcome};
pub use provider::{EvaluationMode, ProviderKind, UnknownProvider};
pub use response::{parse_response, ParsedVerdict, ResponseError};
pub use summary::{DocumentInfo, MergedSummary, SummaryStatistics};
pub use verdict::{Confidence, RequirementVerdict, VerdictStatus};

use thiserror::Error;

/// Errors surfaced by the deterministic layer.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Checklist error: {0}")]
    Checklist(#[from] ChecklistError),

    #[error("Response error: {0}")]
    Response(#[from] ResponseError),

    #[error(transparent)]
    UnknownProvider(#[from] UnknownProvider),
}
