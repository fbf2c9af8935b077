//! Prompts for requirement evaluation.
//!
//! Prompts are split so backends with prompt caching can reuse the stable part:
//! 1. System prompt (checklist-provided or the default) - cacheable
//! 2. Method and output format - cacheable
//! 3. Requirement details - per call
//!
//! The exact wording is not a contract; the JSON shape in
//! [`OUTPUT_FORMAT_PROMPT`] is, because [`attest_core::parse_response`]
//! validates against it.

use attest_core::{Checklist, Requirement};

/// Default system prompt when the checklist does not provide one.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"
You are a compliance auditor evaluating one document against one requirement.

Use both the document's text and visual content. When graphs appear, read axis
titles and units and summarise trends. When tables appear, read the cells and
preserve structure in your answer. If text appears inside an image, transcribe
it before reasoning. If something is unreadable, write "[unreadable]" and move on.
"#;

/// Method and response shape, shared by every requirement.
pub const OUTPUT_FORMAT_PROMPT: &str = r#"
## Mandatory Method
1. Evaluate each acceptance criterion individually; cite page or section references for your evidence.
2. Use PASS when all criteria are clearly satisfied with explicit evidence, FAIL when evidence is clearly missing or contradictory, and FLAGGED only when the evidence is partial or genuinely uncertain.
3. Use NOT_APPLICABLE only when the requirement cannot apply to this kind of document.
4. Before finalising, confirm the chosen status best matches the evidence; avoid defaulting to FLAGGED when PASS or FAIL is well supported.

## Output Format (JSON only, no prose)
{
  "status": "PASS" | "FAIL" | "FLAGGED" | "NOT_APPLICABLE",
  "confidence": 0.0-1.0,
  "rationale": "Explain satisfied/unsatisfied criteria with citations",
  "evidence": ["Page/Section citation with quote"],
  "gaps": ["What is missing"],
  "recommendations": ["What would close the gap"]
}
"#;

/// A fully rendered prompt for one requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementPrompt {
    pub requirement_id: String,

    /// Instructions for the system slot of the backend
    pub system: String,

    /// Requirement-specific user message
    pub user: String,
}

impl RequirementPrompt {
    /// Total characters across both parts.
    pub fn len(&self) -> usize {
        self.system.len() + self.user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.user.is_empty()
    }
}

/// Shared per-checklist prompt context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    pub system_prompt: Option<String>,
    pub framework_id: Option<String>,
}

impl PromptContext {
    pub fn from_checklist(checklist: &Checklist) -> Self {
        Self {
            system_prompt: checklist.system_prompt.clone(),
            framework_id: checklist.framework_id.clone(),
        }
    }
}

/// Render the prompt for one requirement.
pub fn build_prompt(requirement: &Requirement, context: &PromptContext) -> RequirementPrompt {
    let system_base = context
        .system_prompt
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);
    let system = format!("{}\n{}", system_base.trim(), OUTPUT_FORMAT_PROMPT);

    let not_specified = "Not specified";
    let mut details = vec![format!("- ID: {}", requirement.id)];
    if let Some(framework) = &context.framework_id {
        details.push(format!("- Framework: {}", framework));
    }
    details.push(format!(
        "- Clause: {}",
        requirement.clause.as_deref().unwrap_or(not_specified)
    ));
    details.push(format!(
        "- Title: {}",
        requirement.title.as_deref().unwrap_or(not_specified)
    ));
    details.push(format!("- Requirement Text: {}", requirement.text));
    details.push(format!(
        "- Acceptance Criteria: {}",
        requirement.acceptance_criteria.as_deref().unwrap_or(not_specified)
    ));
    details.push(format!(
        "- Expected Artifacts: {}",
        requirement.expected_artifacts.as_deref().unwrap_or(not_specified)
    ));
    if let Some(notes) = &requirement.guidance_notes {
        details.push(format!("- Guidance Notes: {}", notes));
    }

    let user = format!(
        "Evaluate the attached document against this requirement.\n\nRequirement:\n{}",
        details.join("\n")
    );

    RequirementPrompt {
        requirement_id: requirement.id.clone(),
        system,
        user,
    }
}
