//! Feature generation
//!
//! Sends the literal text of the target sections to the generation model and
//! turns its JSON answer into name-checked [`Modification`]s.

use crate::document::Document;
use crate::error::PipelineError;
use crate::llm::prompts::{feature_user_prompt, section_snippet, FEATURE_SYSTEM};
use crate::llm::{decode_object, DecodeHint, GenerationRequest, Model, Models, TextGenerator};
use crate::section_map::SectionMap;
use serde::Serialize;
use serde_json::Value;

/// What to do with a section
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Edit {
    /// Replace the whole section
    Replace {
        #[serde(rename = "newContent")]
        new_content: String,
    },
    /// Insert after the section line at offset `insert_after_line`
    /// (0 = right after the section's first line)
    Insert {
        #[serde(rename = "insertAfterLine")]
        insert_after_line: usize,
        content: String,
    },
}

impl Edit {
    pub fn kind(&self) -> &'static str {
        match self {
            Edit::Replace { .. } => "replace",
            Edit::Insert { .. } => "insert",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Modification {
    pub section_name: String,
    #[serde(flatten)]
    pub edit: Edit,
}

impl Modification {
    pub fn replace(section_name: impl Into<String>, new_content: impl Into<String>) -> Self {
        Self {
            section_name: section_name.into(),
            edit: Edit::Replace {
                new_content: new_content.into(),
            },
        }
    }

    pub fn insert(
        section_name: impl Into<String>,
        insert_after_line: usize,
        content: impl Into<String>,
    ) -> Self {
        Self {
            section_name: section_name.into(),
            edit: Edit::Insert {
                insert_after_line,
                content: content.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeaturePlan {
    pub modifications: Vec<Modification>,
    pub summary: String,
    /// `(returned, resolved)` names rewritten by fuzzy matching
    pub renamed: Vec<(String, String)>,
}

fn text_field<'a>(obj: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

/// Type-check one raw modification. Section names are not resolved here.
pub fn parse_modification(value: &Value, index: usize) -> Result<Modification, PipelineError> {
    let obj = value.as_object().ok_or_else(|| {
        PipelineError::validation(format!("Modification {} is not an object", index))
    })?;

    let section_name = text_field(obj, "sectionName")
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            PipelineError::validation(format!("Modification {} missing \"sectionName\"", index))
        })?
        .to_string();

    let edit = match text_field(obj, "type").unwrap_or("replace") {
        "replace" => {
            let new_content = text_field(obj, "newContent")
                .or_else(|| text_field(obj, "content"))
                .ok_or_else(|| {
                    PipelineError::validation(format!(
                        "Modification for \"{}\" missing \"newContent\"",
                        section_name
                    ))
                })?;
            Edit::Replace {
                new_content: new_content.to_string(),
            }
        }
        "insert" => {
            let content = text_field(obj, "content")
                .or_else(|| text_field(obj, "newContent"))
                .ok_or_else(|| {
                    PipelineError::validation(format!(
                        "Insert for \"{}\" missing \"content\"",
                        section_name
                    ))
                })?;
            let offset = obj
                .get("insertAfterLine")
                .and_then(Value::as_u64)
                .ok_or_else(|| {
                    PipelineError::validation(format!(
                        "Insert for \"{}\" needs a non-negative integer \"insertAfterLine\"",
                        section_name
                    ))
                })?;
            Edit::Insert {
                insert_after_line: offset as usize,
                content: content.to_string(),
            }
        }
        other => {
            return Err(PipelineError::validation(format!(
                "Modification for \"{}\" has unknown type \"{}\"",
                section_name, other
            )))
        }
    };

    Ok(Modification { section_name, edit })
}

/// Turn the decoded response into modifications whose names all exist in `map`.
pub fn harden_plan(value: &Value, map: &SectionMap) -> Result<FeaturePlan, PipelineError> {
    let raw = match value.get("modifications") {
        Some(Value::Array(items)) if !items.is_empty() => items,
        Some(Value::Array(_)) => {
            return Err(PipelineError::validation("Model returned no modifications"))
        }
        _ => {
            return Err(PipelineError::validation(
                "Response missing \"modifications\" array",
            ))
        }
    };

    let mut modifications = Vec::with_capacity(raw.len());
    let mut renamed = Vec::new();
    for (i, item) in raw.iter().enumerate() {
        let mut modification = parse_modification(item, i)?;
        if map.find(&modification.section_name).is_none() {
            let Some(section) = map.fuzzy_find(&modification.section_name) else {
                return Err(PipelineError::validation(format!(
                    "Modification references unknown section \"{}\". Valid sections: {}",
                    modification.section_name,
                    map.available_names()
                )));
            };
            renamed.push((modification.section_name.clone(), section.name.clone()));
            modification.section_name = section.name.clone();
        }
        modifications.push(modification);
    }

    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(FeaturePlan {
        modifications,
        summary,
        renamed,
    })
}

pub async fn generate_feature<G: TextGenerator>(
    generator: &G,
    models: &Models,
    feature: &str,
    text: &str,
    map: &SectionMap,
    targets: &[String],
) -> Result<FeaturePlan, PipelineError> {
    let document = Document::from_text(text);
    let mut snippets = Vec::with_capacity(targets.len());
    for name in targets {
        let section = map.find(name).ok_or_else(|| {
            PipelineError::validation(format!(
                "Unknown target section \"{}\". Valid sections: {}",
                name,
                map.available_names()
            ))
        })?;
        let code = document.slice(section.start_line, section.end_line);
        snippets.push(section_snippet(section, &code));
    }

    let request = GenerationRequest {
        model: Model::Generation,
        model_id: models.id(Model::Generation).to_string(),
        max_output_tokens: models.generation_max_tokens,
        system_prompt: Some(FEATURE_SYSTEM.to_string()),
        user_prompt: feature_user_prompt(feature, &snippets),
    };
    log::info!(
        "Generating modifications for {} section(s) with {}",
        targets.len(),
        request.model_id
    );
    let response = generator.generate(&request).await?;

    let hint = if response.truncated() {
        DecodeHint::Truncated
    } else {
        DecodeHint::Complete
    };
    let decoded = decode_object(&response.text, hint)?;
    if decoded.repaired {
        log::warn!("Generation response was truncated; dropped the unfinished tail to recover it");
    }

    let plan = harden_plan(&decoded.value, map)?;
    for (from, to) in &plan.renamed {
        log::warn!("Fuzzy matched section \"{}\" -> \"{}\"", from, to);
    }
    log::info!("Model returned {} modification(s)", plan.modifications.len());
    Ok(plan)
}
