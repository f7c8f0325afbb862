//! Section selection
//!
//! Either the scout model picks the sections a feature touches, or the
//! operator names them and [`validate_manual_sections`] checks them.

use crate::error::PipelineError;
use crate::llm::prompts::{select_user_prompt, SELECT_SYSTEM};
use crate::llm::{decode_array, GenerationRequest, Model, Models, TextGenerator};
use crate::section_map::SectionMap;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Valid section names, in the order the scout returned them
    pub names: Vec<String>,
    /// True when exact matching found nothing and substring matching was used
    pub fuzzy: bool,
}

/// Reconcile scout-returned names against the map.
///
/// Exact matches win; only when there are none does each name go through
/// [`SectionMap::fuzzy_find`].
pub fn reconcile_names(returned: &[String], map: &SectionMap) -> Result<Selection, PipelineError> {
    let mut names: Vec<String> = Vec::new();
    for name in returned {
        if map.find(name).is_some() && !names.contains(name) {
            names.push(name.clone());
        }
    }
    if !names.is_empty() {
        return Ok(Selection {
            names,
            fuzzy: false,
        });
    }

    for name in returned {
        if let Some(section) = map.fuzzy_find(name) {
            if !names.contains(&section.name) {
                names.push(section.name.clone());
            }
        }
    }
    if names.is_empty() {
        return Err(PipelineError::scout(format!(
            "Selected sections not found in map: {}. Available: {}",
            returned.join(", "),
            map.available_names()
        )));
    }

    Ok(Selection { names, fuzzy: true })
}

pub async fn select_sections<G: TextGenerator>(
    generator: &G,
    models: &Models,
    feature: &str,
    map: &SectionMap,
) -> Result<Selection, PipelineError> {
    let request = GenerationRequest {
        model: Model::Scout,
        model_id: models.id(Model::Scout).to_string(),
        max_output_tokens: models.select_max_tokens,
        system_prompt: Some(SELECT_SYSTEM.to_string()),
        user_prompt: select_user_prompt(feature, map),
    };
    log::info!("Asking {} which sections to modify", request.model_id);
    let response = generator.generate(&request).await?;

    let items = decode_array(&response.text).map_err(|e| {
        PipelineError::scout(format!("Could not parse section selection: {}", e.detail()))
    })?;
    let returned: Vec<String> = items
        .iter()
        .filter_map(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if returned.is_empty() {
        return Err(PipelineError::scout("Scout selected no sections"));
    }

    let selection = reconcile_names(&returned, map)?;
    if selection.fuzzy {
        log::warn!(
            "Scout returned unknown names ({}); fuzzy matched to: {}",
            returned.join(", "),
            selection.names.join(", ")
        );
    }
    log::info!("Selected sections: {}", selection.names.join(", "));
    Ok(selection)
}

/// Manually supplied names must match the map exactly.
pub fn validate_manual_sections(names: &[String], map: &SectionMap) -> Result<Vec<String>, PipelineError> {
    let cleaned: Vec<String> = names
        .iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();
    if cleaned.is_empty() {
        return Err(PipelineError::validation("No section names given"));
    }

    let unknown: Vec<&str> = cleaned
        .iter()
        .filter(|n| map.find(n).is_none())
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(PipelineError::validation(format!(
            "Unknown sections: {}. Available: {}",
            unknown.join(", "),
            map.available_names()
        )));
    }

    let mut out: Vec<String> = Vec::new();
    for name in cleaned {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    Ok(out)
}
