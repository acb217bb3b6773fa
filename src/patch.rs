//! Patches and the applier
//!
//! A `Patch` is a complete proposed replacement of a file's content, paired
//! with the defect it targets and a natural-language description. Applying
//! one is a pure, local operation - no analyzer run, no code execution.
//! Validation happens on the next loop pass when the controller re-analyzes.

use crate::defect::Defect;
use serde::{Deserialize, Serialize};

/// A proposed fix: full replacement content targeting one defect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub target: Defect,
    pub description: String,
    pub new_content: String,
}

impl Patch {
    pub fn new(target: Defect, description: impl Into<String>, new_content: impl Into<String>) -> Self {
        Self {
            target,
            description: description.into(),
            new_content: new_content.into(),
        }
    }
}

/// Output of applying one patch
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyResult {
    pub content: String,
    pub explanation: String,
}

/// Apply a patch, producing the new file content plus an auditable
/// explanation composed from the targeted defect and the patch description.
pub fn apply(patch: &Patch) -> ApplyResult {
    ApplyResult {
        content: patch.new_content.clone(),
        explanation: explanation_for(patch),
    }
}

/// Fixed-format explanation so every applied fix reads the same way in
/// progress output and the attempt log.
fn explanation_for(patch: &Patch) -> String {
    format!("Fixed issue: {} by {}", patch.target.raw, patch.description)
}
