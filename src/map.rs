//! Map generation
//!
//! Skeleton -> scout model -> resilient decode -> sanitize. Any failure aborts
//! the run; there is no partial map.

use crate::document::{content_hash, line_count};
use crate::error::PipelineError;
use crate::llm::prompts::{map_user_prompt, MAP_SYSTEM};
use crate::llm::{decode_object, DecodeHint, GenerationRequest, Model, Models, TextGenerator};
use crate::section_map::{sanitize_map, MapNote, SectionMap, DEFAULT_LARGE_SECTION_LINES};
use crate::skeleton::{extract_skeleton, SkeletonOptions, SkeletonStats};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapOptions {
    pub skeleton: SkeletonOptions,
    pub large_section_lines: usize,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            skeleton: SkeletonOptions::default(),
            large_section_lines: DEFAULT_LARGE_SECTION_LINES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MapOutcome {
    pub map: SectionMap,
    pub notes: Vec<MapNote>,
    pub skeleton_stats: SkeletonStats,
    /// True when the scout response needed truncation repair
    pub repaired: bool,
}

pub async fn generate_map<G: TextGenerator>(
    generator: &G,
    models: &Models,
    filename: &str,
    text: &str,
    options: &MapOptions,
) -> Result<MapOutcome, PipelineError> {
    if text.trim().is_empty() {
        return Err(PipelineError::validation(format!("{} is empty", filename)));
    }

    let skeleton = extract_skeleton(text, &options.skeleton)?;
    if skeleton.is_empty() {
        return Err(PipelineError::validation(format!(
            "Skeleton of {} is empty",
            filename
        )));
    }
    let stats = skeleton.stats;
    log::info!(
        "Skeleton: {} -> {} lines ({:.1}% of original)",
        stats.input_lines,
        stats.output_lines,
        stats.compression_ratio * 100.0
    );

    let total_lines = line_count(text);
    let request = GenerationRequest {
        model: Model::Scout,
        model_id: models.id(Model::Scout).to_string(),
        max_output_tokens: models.map_max_tokens,
        system_prompt: Some(MAP_SYSTEM.to_string()),
        user_prompt: map_user_prompt(filename, total_lines, &skeleton.text),
    };
    log::info!("Requesting section map from {}", request.model_id);
    let response = generator.generate(&request).await?;

    let hint = if response.truncated() {
        DecodeHint::Truncated
    } else {
        DecodeHint::Complete
    };
    let decoded = decode_object(&response.text, hint)?;
    if decoded.repaired {
        log::warn!("Scout response was truncated; dropped the unfinished tail to recover the map");
    }

    let sanitized = sanitize_map(
        &decoded.value,
        total_lines,
        filename,
        options.large_section_lines,
    )?;
    for note in &sanitized.notes {
        if note.is_warning() {
            log::warn!("{}", note);
        } else {
            log::info!("{}", note);
        }
    }

    let mut map = sanitized.map;
    map.filename = filename.to_string();
    map.source_hash = Some(content_hash(text));
    map.generated_at = Some(chrono::Utc::now());
    log::info!("Mapped {} sections", map.sections.len());

    Ok(MapOutcome {
        map,
        notes: sanitized.notes,
        skeleton_stats: stats,
        repaired: decoded.repaired,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedGenerator;

    fn sample_doc(lines: usize) -> String {
        let mut out = vec!["<!DOCTYPE html>".to_string(), "<html>".to_string()];
        while out.len() < lines - 1 {
            out.push(format!("  <p>line {}</p>", out.len() + 1));
        }
        out.push("</html>".to_string());
        out.join("\n")
    }

    #[tokio::test]
    async fn test_generate_map_sanitizes_scout_output() {
        let doc = sample_doc(100);
        let generator = ScriptedGenerator::new().reply(
            "```json\n{\"filename\":\"x\",\"totalLines\":90,\"sections\":[\
             {\"name\":\"Top\",\"startLine\":1,\"endLine\":50},\
             {\"name\":\"Rest\",\"startLine\":51,\"endLine\":400}]}\n```",
        );

        let outcome = generate_map(&generator, &Models::default(), "app.html", &doc, &MapOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.map.filename, "app.html");
        assert_eq!(outcome.map.total_lines, 100);
        assert_eq!(outcome.map.sections[1].end_line, 100);
        assert_eq!(outcome.map.source_hash.as_deref(), Some(content_hash(&doc).as_str()));
        assert!(outcome.map.generated_at.is_some());
        assert!(!outcome.repaired);
        assert_eq!(outcome.notes.len(), 2);

        let requests = generator.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, Model::Scout);
        assert_eq!(requests[0].max_output_tokens, Models::default().map_max_tokens);
        assert!(requests[0].user_prompt.contains("1: <!DOCTYPE html>"));
    }

    #[tokio::test]
    async fn test_truncated_response_drops_unfinished_section() {
        let doc = sample_doc(40);
        let generator = ScriptedGenerator::new().reply_truncated(
            "{\"filename\":\"app.html\",\"totalLines\":40,\"sections\":[{\"name\":\"Body\",\"startLine\":1,\"endLine\":29},\
             {\"name\":\"Footer\",\"startLine\":30,\"endLine\":40,\"description\":\"Page foo",
        );

        let outcome = generate_map(&generator, &Models::default(), "app.html", &doc, &MapOptions::default())
            .await
            .unwrap();
        assert!(outcome.repaired);
        assert_eq!(outcome.map.names(), vec!["Body"]);
        assert_eq!(outcome.map.sections[0].end_line, 29);
    }

    #[tokio::test]
    async fn test_empty_document_fails_before_calling_model() {
        let generator = ScriptedGenerator::new();
        let err = generate_map(&generator, &Models::default(), "e.html", "  \n", &MapOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(generator.requests().is_empty());
    }

    #[tokio::test]
    async fn test_map_without_sections_fails() {
        let generator = ScriptedGenerator::new().reply("{\"filename\":\"a\",\"sections\":[]}");
        let err = generate_map(&generator, &Models::default(), "a.html", &sample_doc(20), &MapOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_network_error_propagates() {
        let generator = ScriptedGenerator::new().fail(PipelineError::Network("503".to_string()));
        let err = generate_map(&generator, &Models::default(), "a.html", &sample_doc(20), &MapOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "network");
    }
}
