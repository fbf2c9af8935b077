//! Document evaluators.
//!
//! [`SingleProviderEvaluator`] walks the requirement list against one
//! backend with retry and fallback; [`MultiProviderComparator`] runs two of
//! them concurrently and merges the results.

mod comparator;
mod single;
mod traits;

pub use comparator::MultiProviderComparator;
pub use single::{SingleEvaluatorBuilder, SingleProviderEvaluator};
pub use traits::{
    ChecklistFile, DocumentEvaluator, EvaluationProgress, EvaluatorError, ProgressCallback,
    RequirementSet, RequirementSource,
};
