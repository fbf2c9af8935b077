//! Requirement checklists.
//!
//! A checklist is the flat list of requirements a document is evaluated
//! against. Checklists are YAML or JSON files validated against an embedded
//! JSON Schema.

mod parser;
mod schema;

pub use parser::{Checklist, ChecklistError, Requirement};
pub use schema::validate_checklist_schema;
