//! Prompt text for the three model calls

use crate::section_map::{Section, SectionMap};

pub const MAP_SYSTEM: &str = "You map the structure of large single-file HTML applications. \
You are given a skeleton: a subset of the file's lines, each prefixed with its real line number. \
Return only valid JSON.";

pub fn map_user_prompt(filename: &str, total_lines: usize, skeleton: &str) -> String {
    format!(
        r#"Below is a skeleton of "{filename}" ({total_lines} lines). Only structural lines and a sample of other lines are shown; the number before each line is its real line number in the full file.

Identify the logical sections that matter for implementing features (layout regions, style blocks, state/data, UI components, event handlers, modules). For each section give:
- "name": short, unique, descriptive (e.g. "Quiz Game", "Gradebook Panel")
- "startLine" and "endLine": inclusive, using the real line numbers
- "description": one sentence on what the section does
- "identifiers": key function names, class names and element IDs

Sections should not overlap and together should cover the file.

Return ONLY this JSON, no markdown or commentary:
{{
  "filename": "{filename}",
  "totalLines": {total_lines},
  "sections": [
    {{
      "name": "Section Name",
      "startLine": 1,
      "endLine": 120,
      "description": "What this section does",
      "identifiers": ["id1", "functionName"]
    }}
  ]
}}

SKELETON:
{skeleton}"#
    )
}

pub const SELECT_SYSTEM: &str =
    "You select which code sections to modify. Return only a JSON array.";

fn section_line(section: &Section) -> String {
    format!(
        "- \"{}\" (L{}–{}): {}",
        section.name, section.start_line, section.end_line, section.description
    )
}

pub fn select_user_prompt(feature: &str, map: &SectionMap) -> String {
    let sections: Vec<String> = map.sections.iter().map(section_line).collect();
    format!(
        r#"Given this feature request and these code sections, which sections need to be modified?

Feature: {feature}

Available sections:
{}

Return ONLY a JSON array of the exact section names that need modification (2-5 sections max):
["Section Name 1", "Section Name 2"]

Pick only the sections directly relevant to implementing this feature."#,
        sections.join("\n")
    )
}

pub const FEATURE_SYSTEM: &str = "You are a senior frontend developer. You implement features in \
HTML/CSS/JS applications by modifying specific code sections. Return only valid JSON.";

/// One labelled block of original section text for the generation prompt.
pub fn section_snippet(section: &Section, code: &str) -> String {
    format!(
        "=== {} (lines {}–{}) ===\n{}",
        section.name, section.start_line, section.end_line, code
    )
}

pub fn feature_user_prompt(feature: &str, snippets: &[String]) -> String {
    format!(
        r#"Implement this feature by modifying the code sections below.

Feature: {feature}

Sections to modify:
{}

Return ONLY this JSON structure:
{{
  "modifications": [
    {{
      "sectionName": "Exact name of the section",
      "type": "replace",
      "newContent": "Complete replacement code for this section"
    }}
  ],
  "summary": "What was implemented"
}}

Rules:
- Use "type": "replace" with the COMPLETE new code of the section in "newContent"
- Only for pure additions you may instead use {{"sectionName": "...", "type": "insert", "insertAfterLine": N, "content": "..."}} where N counts lines from the section's first line (0 = right after the first line) and must stay inside the section
- Never return both a replace and an insert for the same section
- Include ALL original code that isn't being changed
- Keep every tag you open closed, and keep the original indentation style
- Do NOT break existing functionality
- Do NOT add dependencies that are not already in the file"#,
        snippets.join("\n\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_prompt_embeds_skeleton_and_counts() {
        let prompt = map_user_prompt("app.html", 420, "1: <!DOCTYPE html>");
        assert!(prompt.contains("\"totalLines\": 420"));
        assert!(prompt.contains("1: <!DOCTYPE html>"));
        assert!(prompt.contains("(420 lines)"));
    }

    #[test]
    fn test_select_prompt_lists_sections_with_ranges() {
        let map = SectionMap::new(
            "app.html",
            100,
            vec![Section::new("Quiz Game", 10, 40).with_description("Quiz UI")],
        );
        let prompt = select_user_prompt("add a timer", &map);
        assert!(prompt.contains("- \"Quiz Game\" (L10–40): Quiz UI"));
        assert!(prompt.contains("Feature: add a timer"));
    }

    #[test]
    fn test_feature_prompt_includes_snippets() {
        let section = Section::new("Contact Form", 5, 6);
        let snippet = section_snippet(&section, "<form>\n</form>");
        assert!(snippet.starts_with("=== Contact Form (lines 5–6) ==="));
        let prompt = feature_user_prompt("add a submit button", &[snippet]);
        assert!(prompt.contains("<form>\n</form>"));
        assert!(prompt.contains("\"modifications\""));
    }
}
