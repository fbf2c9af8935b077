//! JSON Schema validation for checklists.
//!
//! Raw checklist documents are validated against `schema/checklist.schema.json`
//! before they are deserialized, so malformed files fail with a precise path.

use std::sync::OnceLock;
use thiserror::Error;

const CHECKLIST_SCHEMA_JSON: &str = include_str!("../../schema/checklist.schema.json");

static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(CHECKLIST_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result
        .as_ref()
        .map_err(|e| SchemaError::LoadError(e.clone()))
}

/// Validate a raw checklist document.
///
/// Returns every violation as `"<message> at <instance path>"`.
pub fn validate_checklist_schema(checklist_json: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(checklist_json)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_checklist_passes_schema() {
        let value = serde_json::json!({
            "name": "Minimal",
            "requirements": [{ "id": "R1", "text": "Do the thing" }]
        });
        assert!(validate_checklist_schema(&value).is_ok());
    }

    #[test]
    fn test_requirement_text_alias_passes_schema() {
        let value = serde_json::json!({
            "name": "Alias",
            "requirements": [{ "id": "R1", "requirement_text": "Do the thing" }]
        });
        assert!(validate_checklist_schema(&value).is_ok());
    }

    #[test]
    fn test_missing_name_fails() {
        let value = serde_json::json!({
            "requirements": [{ "id": "R1", "text": "Do the thing" }]
        });
        assert!(validate_checklist_schema(&value).is_err());
    }

    #[test]
    fn test_unknown_requirement_field_fails() {
        let value = serde_json::json!({
            "name": "Extra",
            "requirements": [{ "id": "R1", "text": "x", "weight": 3 }]
        });
        let errors = validate_checklist_schema(&value).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_invalid_id_format_fails() {
        let value = serde_json::json!({
            "name": "Bad id",
            "requirements": [{ "id": " spaced id", "text": "x" }]
        });
        assert!(validate_checklist_schema(&value).is_err());
    }
}
