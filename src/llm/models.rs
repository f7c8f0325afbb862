use serde::{Deserialize, Serialize};

/// The two model tiers the pipeline talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    /// Scout tier - fast, cheap model for structural mapping and section selection
    Scout,
    /// Generation tier - heavier model that writes the actual modifications
    Generation,
}

impl Model {
    pub fn label(&self) -> &'static str {
        match self {
            Model::Scout => "scout",
            Model::Generation => "generation",
        }
    }
}

const DEFAULT_SCOUT_ID: &str = "claude-haiku-4-5-20251001";
const DEFAULT_GENERATION_ID: &str = "claude-sonnet-4-5-20250929";

/// Model ids and output budgets per call site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Models {
    pub scout_id: String,
    pub generation_id: String,
    /// Output budget for the Section Map response
    pub map_max_tokens: u32,
    /// Output budget for the section selection response
    pub select_max_tokens: u32,
    /// Output budget for the modifications response
    pub generation_max_tokens: u32,
}

impl Default for Models {
    fn default() -> Self {
        Self {
            scout_id: DEFAULT_SCOUT_ID.to_string(),
            generation_id: DEFAULT_GENERATION_ID.to_string(),
            map_max_tokens: 8000,
            select_max_tokens: 1000,
            generation_max_tokens: 16000,
        }
    }
}

impl Models {
    pub fn id(&self, model: Model) -> &str {
        match model {
            Model::Scout => &self.scout_id,
            Model::Generation => &self.generation_id,
        }
    }
}

/// Token usage reported by the API
#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model_ids() {
        let models = Models::default();
        assert!(models.id(Model::Scout).contains("haiku"));
        assert!(models.id(Model::Generation).contains("sonnet"));
    }

    #[test]
    fn test_scout_budget_is_smaller_than_generation() {
        let models = Models::default();
        assert!(models.select_max_tokens < models.generation_max_tokens);
    }

    #[test]
    fn test_models_partial_json_uses_defaults() {
        let models: Models = serde_json::from_str(r#"{"scout_id": "tiny"}"#).unwrap();
        assert_eq!(models.scout_id, "tiny");
        assert_eq!(models.generation_id, DEFAULT_GENERATION_ID);
    }

    #[test]
    fn test_usage_deserialize() {
        let usage: Usage =
            serde_json::from_str(r#"{"input_tokens": 100, "output_tokens": 50}"#).unwrap();
        assert_eq!(usage.total(), 150);
    }
}
