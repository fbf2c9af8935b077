//! Structured-response parsing.
//!
//! Backends answer with free text that should contain a single JSON object.
//! This module strips markdown fences, validates the object against the
//! embedded verdict schema and converts it into a [`RequirementVerdict`].
//! Any failure here is permanent: retrying the same prompt is not expected to
//! produce a different shape.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use thiserror::Error;

use crate::provider::ProviderKind;
use crate::verdict::{Confidence, RequirementVerdict, VerdictStatus};

const VERDICT_SCHEMA_JSON: &str = include_str!("../schema/verdict.schema.json");

static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

lazy_static! {
    // ```json ... ``` or bare ``` ... ``` fences
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").unwrap();
}

/// Why a backend response could not be turned into a verdict.
#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("Empty response from backend")]
    Empty,

    #[error("Response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Response does not match verdict schema: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("Failed to load verdict schema: {0}")]
    SchemaLoad(String),
}

/// The fields a backend is asked to produce.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParsedVerdict {
    pub status: VerdictStatus,
    pub confidence: Confidence,
    pub rationale: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl ParsedVerdict {
    pub fn into_verdict(
        self,
        requirement_id: impl Into<String>,
        provider: ProviderKind,
        tokens_used: u64,
    ) -> RequirementVerdict {
        RequirementVerdict {
            requirement_id: requirement_id.into(),
            requirement_title: None,
            requirement_clause: None,
            status: self.status,
            confidence: self.confidence,
            rationale: self.rationale,
            evidence: self.evidence,
            gaps: self.gaps,
            recommendations: self.recommendations,
            tokens_used,
            provider,
            fallback_provider: None,
        }
    }
}

fn get_validator() -> Result<&'static jsonschema::Validator, ResponseError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(VERDICT_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;
        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result
        .as_ref()
        .map_err(|e| ResponseError::SchemaLoad(e.clone()))
}

/// Extract the JSON payload from a raw backend answer.
///
/// Prefers the first fenced block; otherwise takes the outermost `{ ... }`.
pub fn extract_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(inner) = FENCED_BLOCK.captures(trimmed).and_then(|c| c.get(1)) {
        let inner = inner.as_str().trim();
        if !inner.is_empty() {
            return Some(inner);
        }
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => Some(&trimmed[start..=end]),
        _ => Some(trimmed),
    }
}

/// Parse a raw backend answer into verdict fields.
pub fn parse_response(raw: &str) -> Result<ParsedVerdict, ResponseError> {
    let payload = extract_json(raw).ok_or(ResponseError::Empty)?;
    let value: serde_json::Value = serde_json::from_str(payload)?;

    let validator = get_validator()?;
    let errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();
    if !errors.is_empty() {
        return Err(ResponseError::SchemaViolation(errors));
    }

    Ok(serde_json::from_value(value)?)
}
