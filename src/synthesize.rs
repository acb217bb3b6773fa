//! Fix synthesizer
//!
//! Turns (source, defects, optional references) into one candidate patch per
//! defect, in defect order. Each patch's `new_content` is a complete
//! replacement of the file - never a diff fragment - which sidesteps patch
//! merging entirely. An unreachable backend or an answer that cannot be
//! parsed into the expected patch list is `SynthesisUnavailable`: fatal for
//! the file being repaired, invisible to the rest of the run.

use crate::backend::ModelBackend;
use crate::defect::DefectSet;
use crate::error::CoreError;
use crate::patch::Patch;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Files beyond this size don't fit a full-replacement fix prompt
const MAX_FIX_FILE_CHARS: usize = 20000;

const FIX_SYSTEM: &str = r#"You are a senior developer repairing a broken source file.

You will receive the current file content, a numbered list of defects, and
sometimes reference snippets from documentation or discussion threads.

Rules:
1. Output ONLY a JSON array, nothing else
2. Produce exactly one object per defect, in the same order as the defect list
3. Each object has the keys:
   "defect" - the defect you are addressing, copied from the list
   "description" - one sentence describing the fix in plain language
   "new_content" - the COMPLETE corrected file content, not a diff
4. Every "new_content" must be the whole file with that defect fixed
5. Preserve code that is unrelated to the defects
6. Do NOT include explanations, markdown, or any other text outside the array"#;

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Propose one patch per defect, in input order.
    async fn synthesize(
        &self,
        source: &str,
        defects: &DefectSet,
        references: &[String],
    ) -> Result<Vec<Patch>, CoreError>;
}

/// Synthesizer backed by a model backend, with bounded concurrency so
/// parallel file sessions cannot fan requests out unboundedly.
pub struct FixSynthesizer {
    backend: Arc<dyn ModelBackend>,
    permits: Semaphore,
}

impl FixSynthesizer {
    pub fn new(backend: Arc<dyn ModelBackend>, max_in_flight: usize) -> Self {
        Self {
            backend,
            permits: Semaphore::new(max_in_flight.max(1)),
        }
    }

}

#[async_trait]
impl Synthesizer for FixSynthesizer {
    async fn synthesize(
        &self,
        source: &str,
        defects: &DefectSet,
        references: &[String],
    ) -> Result<Vec<Patch>, CoreError> {
        let char_count = source.chars().count();
        if char_count > MAX_FIX_FILE_CHARS {
            return Err(CoreError::synthesis(format!(
                "file too large to repair in one pass ({} chars, limit {})",
                char_count, MAX_FIX_FILE_CHARS
            )));
        }

        let user = build_user_prompt(source, defects, references);

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CoreError::synthesis("synthesizer shut down"))?;

        let content = self
            .backend
            .complete(FIX_SYSTEM, &user)
            .await
            .map_err(|e| CoreError::synthesis(e.to_string()))?;

        parse_patches(&content, defects)
    }
}

fn build_user_prompt(source: &str, defects: &DefectSet, references: &[String]) -> String {
    let defect_list = defects
        .iter()
        .enumerate()
        .map(|(i, d)| format!("{}. {}", i + 1, d))
        .collect::<Vec<_>>()
        .join("\n");

    let reference_section = if references.is_empty() {
        String::new()
    } else {
        let joined = references
            .iter()
            .map(|r| format!("- {}", r))
            .collect::<Vec<_>>()
            .join("\n");
        format!("\nReference material:\n{}\n", joined)
    };

    format!(
        "Defects:\n{}\n{}\nCurrent file content:\n```\n{}\n```\n\nProduce the JSON array of fixes:",
        defect_list, reference_section, source
    )
}

/// Response object shape the model is asked for
#[derive(Debug, Deserialize)]
struct PatchJson {
    #[serde(default)]
    #[allow(dead_code)]
    defect: Option<String>,
    #[serde(default)]
    description: Option<String>,
    new_content: String,
}

/// Parse the model's answer into patches, pairing each with its defect by
/// position. Anything that doesn't yield exactly one usable patch per defect
/// is an unusable response.
fn parse_patches(response: &str, defects: &DefectSet) -> Result<Vec<Patch>, CoreError> {
    let clean = strip_markdown_fences(response);
    let json_str = extract_json_fragment(clean, '[', ']').unwrap_or(clean);

    let parsed: Vec<PatchJson> = serde_json::from_str(json_str).map_err(|e| {
        CoreError::synthesis(format!(
            "unparseable model response ({}): {}",
            e,
            crate::util::truncate(response, 200)
        ))
    })?;

    if parsed.len() != defects.len() {
        return Err(CoreError::synthesis(format!(
            "expected {} patches, model returned {}",
            defects.len(),
            parsed.len()
        )));
    }

    let mut patches = Vec::with_capacity(parsed.len());
    for (item, defect) in parsed.into_iter().zip(defects.iter()) {
        if item.new_content.trim().is_empty() {
            return Err(CoreError::synthesis(format!(
                "model returned empty content for defect '{}'",
                defect
            )));
        }
        patches.push(Patch::new(
            defect.clone(),
            item.description
                .unwrap_or_else(|| "Applied the proposed fix".to_string()),
            item.new_content,
        ));
    }

    Ok(patches)
}

/// Strip markdown code fences from a response
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        trimmed
    };
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

/// Extract a JSON fragment between matching delimiters
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defect::{Defect, DefectKind};

    fn one_defect() -> DefectSet {
        DefectSet::new(vec![Defect::new(
            DefectKind::Syntax,
            "unexpected EOF while parsing",
        )])
    }

    #[test]
    fn test_parse_bare_array() {
        let response = r#"[{"defect":"SyntaxError","description":"Close the paren.","new_content":"print('ok')\n"}]"#;
        let patches = parse_patches(response, &one_defect()).unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].description, "Close the paren.");
        assert_eq!(patches[0].new_content, "print('ok')\n");
    }

    #[test]
    fn test_parse_fenced_array_with_prose() {
        let response = "Here is the fix:\n```json\n[{\"description\":\"Close it.\",\"new_content\":\"x = 1\\n\"}]\n```";
        let patches = parse_patches(response, &one_defect()).unwrap();
        assert_eq!(patches[0].new_content, "x = 1\n");
    }

    #[test]
    fn test_patch_count_mismatch_is_unusable() {
        let response = r#"[]"#;
        let err = parse_patches(response, &one_defect()).unwrap_err();
        assert!(err.to_string().contains("expected 1 patches"));
    }

    #[test]
    fn test_empty_content_is_unusable() {
        let response = r#"[{"description":"Nothing.","new_content":"  "}]"#;
        assert!(parse_patches(response, &one_defect()).is_err());
    }

    #[test]
    fn test_patches_pair_with_defects_in_order() {
        let defects = DefectSet::new(vec![
            Defect::new(DefectKind::Syntax, "unexpected EOF while parsing"),
            Defect::new(DefectKind::Name, "name 'x' is not defined"),
        ]);
        let response = r#"[
            {"description":"first","new_content":"a\n"},
            {"description":"second","new_content":"b\n"}
        ]"#;
        let patches = parse_patches(response, &defects).unwrap();
        assert_eq!(patches[0].target.kind, DefectKind::Syntax);
        assert_eq!(patches[1].target.kind, DefectKind::Name);
    }

    #[test]
    fn test_prompt_includes_references_when_present() {
        let defects = one_defect();
        let refs = vec!["Parentheses must balance.".to_string()];
        let prompt = build_user_prompt("print(", &defects, &refs);
        assert!(prompt.contains("Reference material:"));
        assert!(prompt.contains("Parentheses must balance."));

        let bare = build_user_prompt("print(", &defects, &[]);
        assert!(!bare.contains("Reference material:"));
    }
}
