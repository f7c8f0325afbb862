//! File-level orchestration
//!
//! Each command reads its inputs, runs the stages in order and returns a
//! report the CLI prints as JSON. Any stage error aborts the run; nothing is
//! written unless every stage succeeded.

use crate::apply::apply_modifications;
use crate::config::Config;
use crate::document::line_count;
use crate::error::PipelineError;
use crate::feature::generate_feature;
use crate::llm::TextGenerator;
use crate::map::generate_map;
use crate::section_map::SectionMap;
use crate::select::{select_sections, validate_manual_sections};
use crate::util::write_atomic;
use crate::validate::validate_structure;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

fn file_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string())
}

fn file_name(input: &Path) -> String {
    input
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| input.display().to_string())
}

/// `map-<basename>.json` next to the input
pub fn default_map_path(input: &Path) -> PathBuf {
    input.with_file_name(format!("map-{}.json", file_stem(input)))
}

/// `<basename>.modified.html` next to the input
pub fn default_output_path(input: &Path) -> PathBuf {
    input.with_file_name(format!("{}.modified.html", file_stem(input)))
}

fn read_document(path: &Path) -> Result<String, PipelineError> {
    fs::read_to_string(path).map_err(|e| {
        PipelineError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read {}: {}", path.display(), e),
        ))
    })
}

#[derive(Debug, Clone)]
pub struct MapRun {
    pub map: SectionMap,
    pub path: PathBuf,
}

pub async fn build_map<G: TextGenerator>(
    generator: &G,
    config: &Config,
    input: &Path,
    output: Option<&Path>,
) -> Result<MapRun, PipelineError> {
    let text = read_document(input)?;
    log::info!(
        "Read {} ({} bytes, {} lines)",
        input.display(),
        text.len(),
        line_count(&text)
    );

    let outcome = generate_map(
        generator,
        &config.models,
        &file_name(input),
        &text,
        &config.map_options(),
    )
    .await?;

    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_map_path(input));
    outcome.map.save(&path)?;
    log::info!("Map written to {}", path.display());

    Ok(MapRun {
        map: outcome.map,
        path,
    })
}

#[derive(Debug, Clone, Default)]
pub struct AddRequest {
    pub input: PathBuf,
    pub feature: String,
    pub map_path: Option<PathBuf>,
    /// Manual section names; empty means the scout picks
    pub sections: Vec<String>,
    pub output: Option<PathBuf>,
    pub dry_run: bool,
    /// Write the output even if the result fails structural checks
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddReport {
    pub success: bool,
    pub output: Option<String>,
    pub summary: String,
    pub modifications: usize,
    pub sections: Vec<String>,
    pub line_delta: isize,
    pub valid: bool,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn add_feature<G: TextGenerator>(
    generator: &G,
    config: &Config,
    request: &AddRequest,
) -> Result<AddReport, PipelineError> {
    let feature = request.feature.trim();
    if feature.is_empty() {
        return Err(PipelineError::validation("Feature description is empty"));
    }

    let text = read_document(&request.input)?;
    let map_path = request
        .map_path
        .clone()
        .unwrap_or_else(|| default_map_path(&request.input));
    if !map_path.exists() {
        return Err(PipelineError::validation(format!(
            "Map file not found: {} (run `surgeon map` first)",
            map_path.display()
        )));
    }
    let loaded = SectionMap::load(&map_path, line_count(&text), config.large_section_lines)?;
    for note in &loaded.notes {
        log::warn!("{}", note);
    }
    let map = loaded.map;
    if map.is_stale_for(&text) {
        log::warn!(
            "{} changed since the map was generated; line ranges may be off",
            request.input.display()
        );
    }
    log::info!(
        "Files loaded ({} bytes, {} sections)",
        text.len(),
        map.sections.len()
    );

    let source_report = validate_structure(&text);
    if !source_report.is_valid() {
        log::warn!(
            "Source document already fails structural checks: {}",
            source_report.errors().join("; ")
        );
    }

    let targets = if request.sections.is_empty() {
        select_sections(generator, &config.models, feature, &map)
            .await?
            .names
    } else {
        validate_manual_sections(&request.sections, &map)?
    };
    log::info!("Target sections: {}", targets.join(", "));

    let plan = generate_feature(generator, &config.models, feature, &text, &map, &targets).await?;
    let outcome = apply_modifications(&text, &plan.modifications, &map)?;
    log::info!(
        "Applied {} modification(s): {} -> {} lines",
        outcome.applied,
        outcome.original_lines,
        outcome.final_lines
    );

    let result_report = validate_structure(&outcome.text);
    let valid = result_report.is_valid();
    let error = (!valid).then(|| result_report.errors().join("; "));
    if let Some(err) = &error {
        log::error!("Modified document fails structural checks: {}", err);
        if !request.force {
            return Err(PipelineError::Structural(format!(
                "{} (output not written; use --force to write anyway)",
                err
            )));
        }
    }

    let output = if request.dry_run {
        log::info!("Dry run: output not written");
        None
    } else {
        let path = request
            .output
            .clone()
            .unwrap_or_else(|| default_output_path(&request.input));
        write_atomic(&path, &outcome.text)?;
        log::info!("Output written to {} ({} bytes)", path.display(), outcome.text.len());
        Some(path.display().to_string())
    };

    Ok(AddReport {
        success: valid,
        output,
        summary: plan.summary,
        modifications: plan.modifications.len(),
        sections: targets,
        line_delta: outcome.line_delta(),
        valid,
        warnings: result_report.warnings,
        error,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateReport {
    pub valid: bool,
    pub path: String,
    pub size: usize,
    pub lines: usize,
    pub warnings: Vec<String>,
}

pub fn validate_file(path: &Path) -> Result<ValidateReport, PipelineError> {
    let text = read_document(path)?;
    log::info!("Validating {} ({} bytes)", path.display(), text.len());

    let report = validate_structure(&text);
    for check in &report.checks {
        log::info!("{} {}: {}", check.status.icon(), check.name, check.detail);
    }
    let warnings = report.into_result()?;

    Ok(ValidateReport {
        valid: true,
        path: path.display().to_string(),
        size: text.len(),
        lines: line_count(&text),
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{content_hash, Document};
    use crate::llm::testing::ScriptedGenerator;
    use crate::section_map::Section;
    use serde_json::json;

    /// 400 lines: head/styles, navigation, contact form, scripts.
    fn four_section_page() -> String {
        let mut lines = vec![
            "<!DOCTYPE html>".to_string(),
            "<html lang=\"en\">".to_string(),
            "<head>".to_string(),
            "<title>School App</title>".to_string(),
            "<style>".to_string(),
        ];
        lines.extend((6..=98).map(|i| format!("  .c{} {{ margin: {}px; }}", i, i)));
        lines.push("</style>".to_string());
        lines.push("</head>".to_string());

        lines.push("<body>".to_string());
        lines.push("<nav>".to_string());
        lines.extend((103..=199).map(|i| format!("  <a href=\"#p{}\">Link {}</a>", i, i)));
        lines.push("</nav>".to_string());

        lines.push("<form id=\"contact\">".to_string());
        lines.extend((202..=299).map(|i| format!("  <label>Field {}</label><input name=\"f{}\">", i, i)));
        lines.push("</form>".to_string());

        lines.push("<script>".to_string());
        lines.extend((302..=397).map(|i| format!("  const v{} = {};", i, i)));
        lines.push("</script>".to_string());
        lines.push("</body>".to_string());
        lines.push("</html>".to_string());
        lines.join("\n")
    }

    fn four_section_map(text: &str) -> SectionMap {
        let mut map = SectionMap::new(
            "page.html",
            400,
            vec![
                Section::new("Head and Styles", 1, 100).with_description("Document head and CSS"),
                Section::new("Navigation", 101, 200).with_description("Top navigation links"),
                Section::new("Contact Form", 201, 300).with_description("Contact form fields"),
                Section::new("Scripts", 301, 400).with_description("Page behavior"),
            ],
        );
        map.source_hash = Some(content_hash(text));
        map
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        input: PathBuf,
        text: String,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("page.html");
        let text = four_section_page();
        fs::write(&input, &text).unwrap();
        four_section_map(&text).save(&default_map_path(&input)).unwrap();
        Fixture {
            _dir: dir,
            input,
            text,
        }
    }

    fn form_with_button(text: &str) -> String {
        let doc = Document::from_text(text);
        let mut form: Vec<String> = doc.lines()[200..300].to_vec();
        form.insert(99, "  <button type=\"submit\">Submit</button>".to_string());
        form.join("\n")
    }

    #[test]
    fn test_default_paths() {
        let input = Path::new("/tmp/work/app.html");
        assert_eq!(default_map_path(input), PathBuf::from("/tmp/work/map-app.json"));
        assert_eq!(
            default_output_path(input),
            PathBuf::from("/tmp/work/app.modified.html")
        );
    }

    #[tokio::test]
    async fn test_add_submit_button_end_to_end() {
        let fx = fixture();
        assert_eq!(line_count(&fx.text), 400);
        assert!(validate_structure(&fx.text).is_valid());

        let new_form = form_with_button(&fx.text);
        let generation = json!({
            "modifications": [{"sectionName": "Contact Form", "type": "replace", "newContent": new_form}],
            "summary": "Added a submit button to the contact form"
        });
        let generator = ScriptedGenerator::new()
            .reply("[\"Contact Form\"]")
            .reply(generation.to_string());

        let request = AddRequest {
            input: fx.input.clone(),
            feature: "add a submit button to the contact form".to_string(),
            ..AddRequest::default()
        };
        let report = add_feature(&generator, &Config::default(), &request)
            .await
            .unwrap();

        assert!(report.success && report.valid);
        assert_eq!(report.sections, vec!["Contact Form"]);
        assert_eq!(report.modifications, 1);
        assert_eq!(report.line_delta, 1);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);

        let out_path = default_output_path(&fx.input);
        assert_eq!(report.output.as_deref(), Some(out_path.display().to_string().as_str()));
        let result = fs::read_to_string(&out_path).unwrap();
        let before: Vec<&str> = fx.text.split('\n').collect();
        let after: Vec<&str> = result.split('\n').collect();
        assert_eq!(after.len(), 401);
        assert_eq!(after[..200], before[..200]);
        assert_eq!(after[200..301].join("\n"), new_form);
        assert_eq!(after[301..], before[300..]);
        assert!(validate_structure(&result).is_valid());

        let requests = generator.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].user_prompt.contains("=== Contact Form (lines 201–300) ==="));
    }

    #[tokio::test]
    async fn test_manual_sections_skip_the_scout() {
        let fx = fixture();
        let generation = json!({
            "modifications": [{"sectionName": "Contact Form", "newContent": form_with_button(&fx.text)}],
            "summary": "ok"
        });
        let generator = ScriptedGenerator::new().reply(generation.to_string());
        let request = AddRequest {
            input: fx.input.clone(),
            feature: "add a submit button".to_string(),
            sections: vec!["Contact Form".to_string()],
            dry_run: true,
            ..AddRequest::default()
        };

        let report = add_feature(&generator, &Config::default(), &request)
            .await
            .unwrap();
        assert_eq!(generator.requests().len(), 1);
        assert!(report.output.is_none());
        assert!(!default_output_path(&fx.input).exists());
    }

    #[tokio::test]
    async fn test_unknown_manual_section_fails_without_network() {
        let fx = fixture();
        let generator = ScriptedGenerator::new();
        let request = AddRequest {
            input: fx.input.clone(),
            feature: "x".to_string(),
            sections: vec!["Footer".to_string()],
            ..AddRequest::default()
        };
        let err = add_feature(&generator, &Config::default(), &request)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown sections: Footer"));
        assert!(generator.requests().is_empty());
    }

    #[tokio::test]
    async fn test_broken_result_is_not_written_unless_forced() {
        let fx = fixture();
        let broken = json!({
            "modifications": [{"sectionName": "Contact Form", "newContent": "<form id=\"contact\">\n<div>"}],
            "summary": "broken"
        })
        .to_string();
        let request = AddRequest {
            input: fx.input.clone(),
            feature: "break it".to_string(),
            sections: vec!["Contact Form".to_string()],
            ..AddRequest::default()
        };

        let generator = ScriptedGenerator::new().reply(broken.clone());
        let err = add_feature(&generator, &Config::default(), &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "structural");
        assert!(!default_output_path(&fx.input).exists());

        let generator = ScriptedGenerator::new().reply(broken);
        let forced = AddRequest {
            force: true,
            ..request
        };
        let report = add_feature(&generator, &Config::default(), &forced)
            .await
            .unwrap();
        assert!(!report.success);
        assert!(report.error.unwrap().contains("Unclosed tags"));
        assert!(default_output_path(&fx.input).exists());
    }

    #[tokio::test]
    async fn test_missing_map_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("page.html");
        fs::write(&input, four_section_page()).unwrap();
        let request = AddRequest {
            input,
            feature: "x".to_string(),
            ..AddRequest::default()
        };
        let err = add_feature(&ScriptedGenerator::new(), &Config::default(), &request)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Map file not found"));
    }

    #[tokio::test]
    async fn test_build_map_writes_default_map_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("page.html");
        let text = four_section_page();
        fs::write(&input, &text).unwrap();
        let scout = serde_json::to_string(&four_section_map(&text)).unwrap();
        let generator = ScriptedGenerator::new().reply(scout);

        let run = build_map(&generator, &Config::default(), &input, None)
            .await
            .unwrap();
        assert_eq!(run.path, dir.path().join("map-page.json"));
        assert_eq!(run.map.filename, "page.html");
        assert_eq!(run.map.sections.len(), 4);

        let loaded = SectionMap::load(&run.path, 400, 500).unwrap();
        assert_eq!(loaded.map.names(), run.map.names());
        assert!(!loaded.map.is_stale_for(&text));
    }

    #[test]
    fn test_validate_file_reports() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.html");
        fs::write(&good, four_section_page()).unwrap();
        let report = validate_file(&good).unwrap();
        assert!(report.valid);
        assert_eq!(report.lines, 400);

        let bad = dir.path().join("bad.html");
        fs::write(&bad, "<html><head></head><body><div></body></html>").unwrap();
        let err = validate_file(&bad).unwrap_err();
        assert_eq!(err.kind(), "structural");
    }
}
