//! Checklist parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::schema::validate_checklist_schema;

/// Errors that can occur when loading checklists.
#[derive(Error, Debug)]
pub enum ChecklistError {
    #[error("Failed to read checklist file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Checklist does not match schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Checklist validation failed: {0}")]
    ValidationError(String),

    #[error("Unsupported checklist format: {0}")]
    UnsupportedFormat(String),
}

/// One checklist item a document is evaluated against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirement {
    /// Unique identifier (e.g., "ISO-9001-4.1")
    pub id: String,

    /// Clause reference in the source framework
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clause: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// The requirement text
    #[serde(alias = "requirement_text")]
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_artifacts: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_notes: Option<String>,
}

impl Requirement {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            clause: None,
            title: None,
            text: text.into(),
            acceptance_criteria: None,
            expected_artifacts: None,
            guidance_notes: None,
        }
    }
}

/// A named, ordered list of requirements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checklist {
    /// Human-readable name
    pub name: String,

    /// Framework identifier propagated to every backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Instruction prefix sent with every requirement prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    pub requirements: Vec<Requirement>,
}

impl Checklist {
    /// Build a checklist in memory.
    pub fn new(name: impl Into<String>, requirements: Vec<Requirement>) -> Result<Self, ChecklistError> {
        let checklist = Self {
            name: name.into(),
            framework_id: None,
            version: None,
            system_prompt: None,
            requirements,
        };
        checklist.validate()?;
        Ok(checklist)
    }

    /// Parse a checklist from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ChecklistError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a checklist from JSON string.
    pub fn from_json(json: &str) -> Result<Self, ChecklistError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a checklist from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ChecklistError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a checklist from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ChecklistError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse a checklist file, choosing the format by extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ChecklistError> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let checklist = match ext.as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path)?,
            "json" => Self::from_json_file(path)?,
            other => {
                return Err(ChecklistError::UnsupportedFormat(format!(
                    "{} (expected .yaml, .yml or .json)",
                    if other.is_empty() { "<none>" } else { other }
                )))
            }
        };
        tracing::debug!(
            path = %path.display(),
            name = %checklist.name,
            requirements = checklist.len(),
            "Loaded checklist"
        );
        Ok(checklist)
    }

    /// The first `limit` requirements, or all of them when `limit` is 0.
    pub fn limited(&self, limit: usize) -> Vec<Requirement> {
        if limit == 0 {
            self.requirements.clone()
        } else {
            self.requirements.iter().take(limit).cloned().collect()
        }
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Requirement> {
        self.requirements.iter().find(|r| r.id == id)
    }

    fn from_value(value: serde_json::Value) -> Result<Self, ChecklistError> {
        validate_checklist_schema(&value).map_err(ChecklistError::SchemaError)?;
        let checklist: Checklist = serde_json::from_value(value)?;
        checklist.validate()?;
        Ok(checklist)
    }

    /// Validate the checklist structure.
    fn validate(&self) -> Result<(), ChecklistError> {
        if self.name.trim().is_empty() {
            return Err(ChecklistError::ValidationError("name is empty".to_string()));
        }

        if self.requirements.is_empty() {
            return Err(ChecklistError::ValidationError(
                "checklist has no requirements".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for requirement in &self.requirements {
            if requirement.id.trim().is_empty() {
                return Err(ChecklistError::ValidationError(
                    "requirement with empty id".to_string(),
                ));
            }
            if !seen.insert(requirement.id.as_str()) {
                return Err(ChecklistError::ValidationError(format!(
                    "Duplicate requirement ID: {}",
                    requirement.id
                )));
            }
        }

        Ok(())
    }
}
