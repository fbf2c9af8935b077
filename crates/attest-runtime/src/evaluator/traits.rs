//! Evaluator seams: where requirements come from and what evaluates a document.

use async_trait::async_trait;
use attest_core::{Checklist, ChecklistError, MergedSummary, ProviderKind, Requirement, ResponseError};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::document::DocumentPayload;
use crate::prompts::PromptContext;
use crate::providers::ProviderError;

/// Errors from document evaluators.
///
/// Per-requirement failures never surface here; they become Error verdicts.
#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error("{provider} call failed: {source}")]
    Provider {
        provider: ProviderKind,
        #[source]
        source: ProviderError,
    },

    #[error("{provider} returned an unusable verdict: {source}")]
    PermanentBackend {
        provider: ProviderKind,
        tokens_used: u64,
        #[source]
        source: ResponseError,
    },

    #[error("Upload to {provider} failed: {source}")]
    Upload {
        provider: ProviderKind,
        #[source]
        source: ProviderError,
    },

    #[error("Could not construct {provider} backend: {source}")]
    Setup {
        provider: ProviderKind,
        #[source]
        source: ProviderError,
    },

    #[error("Requirement source failed: {0}")]
    Requirements(#[from] ChecklistError),

    #[error("Evaluation cancelled")]
    Cancelled,
}

/// The requirements one evaluation runs against, plus shared prompt context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequirementSet {
    pub requirements: Vec<Requirement>,
    pub context: PromptContext,
}

impl RequirementSet {
    /// Keep only the first `limit` requirements; 0 keeps all.
    pub fn limited(mut self, limit: usize) -> Self {
        if limit > 0 {
            self.requirements.truncate(limit);
        }
        self
    }
}

impl From<&Checklist> for RequirementSet {
    fn from(checklist: &Checklist) -> Self {
        Self {
            requirements: checklist.requirements.clone(),
            context: PromptContext::from_checklist(checklist),
        }
    }
}

/// Supplies requirement descriptors for each document evaluation.
#[async_trait]
pub trait RequirementSource: Send + Sync {
    async fn load(&self) -> Result<RequirementSet, EvaluatorError>;
}

#[async_trait]
impl RequirementSource for Checklist {
    async fn load(&self) -> Result<RequirementSet, EvaluatorError> {
        Ok(RequirementSet::from(self))
    }
}

/// Re-reads a checklist file for every evaluation so edits apply to the next job.
#[derive(Debug, Clone)]
pub struct ChecklistFile {
    path: PathBuf,
}

impl ChecklistFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RequirementSource for ChecklistFile {
    async fn load(&self) -> Result<RequirementSet, EvaluatorError> {
        let checklist = Checklist::from_path(&self.path)?;
        Ok(RequirementSet::from(&checklist))
    }
}

/// Anything that turns a document into a [`MergedSummary`].
///
/// Implemented by the single-provider evaluator and the comparator; the
/// queue only sees this trait.
#[async_trait]
pub trait DocumentEvaluator: Send + Sync {
    async fn evaluate_document(
        &self,
        document: &DocumentPayload,
        cancel: CancellationToken,
    ) -> Result<MergedSummary, EvaluatorError>;
}

#[async_trait]
impl<T: DocumentEvaluator + ?Sized> DocumentEvaluator for Arc<T> {
    async fn evaluate_document(
        &self,
        document: &DocumentPayload,
        cancel: CancellationToken,
    ) -> Result<MergedSummary, EvaluatorError> {
        (**self).evaluate_document(document, cancel).await
    }
}

/// Progress after each finished requirement.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationProgress {
    pub provider: ProviderKind,
    pub completed: usize,
    pub total: usize,
    /// 0-100, one decimal
    pub percent: f64,
    pub last_requirement_id: String,
}

impl EvaluationProgress {
    pub fn new(provider: ProviderKind, completed: usize, total: usize, last_requirement_id: impl Into<String>) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            (completed as f64 / total as f64 * 1000.0).round() / 10.0
        };
        Self {
            provider,
            completed,
            total,
            percent,
            last_requirement_id: last_requirement_id.into(),
        }
    }
}

/// Callback invoked with [`EvaluationProgress`].
pub type ProgressCallback = Arc<dyn Fn(EvaluationProgress) + Send + Sync>;
