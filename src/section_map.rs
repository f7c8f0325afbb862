//! Section Map model
//!
//! The map is produced by a model and persisted between runs, so it is never
//! trusted as-is: [`sanitize_map`] type-checks and range-clamps the raw JSON
//! every time a map enters the pipeline, whether fresh from the scout or loaded
//! from disk.

use crate::document::content_hash;
use crate::error::PipelineError;
use crate::util::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

/// Sections longer than this many lines get a size warning.
pub const DEFAULT_LARGE_SECTION_LINES: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub name: String,
    /// First line, 1-based inclusive
    pub start_line: usize,
    /// Last line, 1-based inclusive
    pub end_line: usize,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub identifiers: Vec<String>,
}

impl Section {
    pub fn new(name: impl Into<String>, start_line: usize, end_line: usize) -> Self {
        Self {
            name: name.into(),
            start_line,
            end_line,
            description: String::new(),
            identifiers: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn line_span(&self) -> usize {
        self.end_line + 1 - self.start_line
    }

    pub fn overlaps(&self, other: &Section) -> bool {
        self.start_line <= other.end_line && other.start_line <= self.end_line
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionMap {
    pub filename: String,
    pub total_lines: usize,
    pub sections: Vec<Section>,
    /// Hash of the document this map was generated from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

impl SectionMap {
    pub fn new(filename: impl Into<String>, total_lines: usize, sections: Vec<Section>) -> Self {
        Self {
            filename: filename.into(),
            total_lines,
            sections,
            source_hash: None,
            generated_at: None,
        }
    }

    pub fn find(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Case-insensitive match, first exact then substring in either direction.
    pub fn fuzzy_find(&self, name: &str) -> Option<&Section> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.sections
            .iter()
            .find(|s| s.name.to_lowercase() == needle)
            .or_else(|| {
                self.sections.iter().find(|s| {
                    let hay = s.name.to_lowercase();
                    hay.contains(&needle) || needle.contains(&hay)
                })
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    /// Comma-separated section names for error messages.
    pub fn available_names(&self) -> String {
        self.names().join(", ")
    }

    /// True when the map records a source hash that does not match `text`.
    pub fn is_stale_for(&self, text: &str) -> bool {
        self.source_hash
            .as_deref()
            .is_some_and(|hash| hash != content_hash(text))
    }

    pub fn to_json_pretty(&self) -> Result<String, PipelineError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::validation(format!("Failed to serialize map: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        write_atomic(path, &self.to_json_pretty()?)?;
        Ok(())
    }

    /// Load a persisted map and re-sanitize it against the current document.
    pub fn load(
        path: &Path,
        document_lines: usize,
        large_section_lines: usize,
    ) -> Result<SanitizedMap, PipelineError> {
        let content = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content).map_err(|e| {
            PipelineError::validation(format!("Map file {} is not valid JSON: {}", path.display(), e))
        })?;
        let fallback_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        sanitize_map(&value, document_lines, &fallback_name, large_section_lines)
    }
}

/// A correction or warning recorded while sanitizing a map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapNote {
    TotalLinesCorrected { reported: Option<i64>, actual: usize },
    Clamped { name: String, from: (i64, i64), to: (usize, usize) },
    LargeSection { name: String, lines: usize },
}

impl MapNote {
    pub fn is_warning(&self) -> bool {
        matches!(self, MapNote::LargeSection { .. })
    }
}

impl fmt::Display for MapNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapNote::TotalLinesCorrected { reported, actual } => match reported {
                Some(n) => write!(f, "Map totalLines mismatch (map says {}, actual {}); corrected", n, actual),
                None => write!(f, "Map totalLines missing; set to actual {}", actual),
            },
            MapNote::Clamped { name, from, to } => write!(
                f,
                "Section \"{}\" range [{}, {}] clamped to [{}, {}]",
                name, from.0, from.1, to.0, to.1
            ),
            MapNote::LargeSection { name, lines } => {
                write!(f, "Large section detected: \"{}\" spans {} lines", name, lines)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SanitizedMap {
    pub map: SectionMap,
    pub notes: Vec<MapNote>,
}

fn line_number(value: Option<&Value>) -> Option<i64> {
    value.and_then(Value::as_f64).map(|n| n.floor() as i64)
}

/// Type-check and clamp an untrusted map against the real line count.
///
/// Hard failures: missing/empty `sections`, a section without a name, a
/// non-numeric line number, duplicate names. Everything else is corrected and
/// reported through [`MapNote`]s.
pub fn sanitize_map(
    value: &Value,
    actual_total_lines: usize,
    fallback_filename: &str,
    large_section_lines: usize,
) -> Result<SanitizedMap, PipelineError> {
    let obj = value
        .as_object()
        .ok_or_else(|| PipelineError::validation("Map is not a JSON object"))?;

    let raw_sections = match obj.get("sections") {
        Some(Value::Array(items)) => items,
        _ => return Err(PipelineError::validation("Map missing \"sections\" array")),
    };
    if raw_sections.is_empty() {
        return Err(PipelineError::validation("Map contains no sections"));
    }

    let total = actual_total_lines.max(1);
    let mut notes = Vec::new();

    let reported_total = obj.get("totalLines").and_then(Value::as_i64);
    if reported_total != Some(total as i64) {
        notes.push(MapNote::TotalLinesCorrected {
            reported: reported_total,
            actual: total,
        });
    }

    let mut sections = Vec::with_capacity(raw_sections.len());
    let mut seen = HashSet::new();
    for (i, raw) in raw_sections.iter().enumerate() {
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| PipelineError::validation(format!("Section {} missing \"name\" field", i)))?
            .to_string();

        let (start, end) = match (
            line_number(raw.get("startLine")),
            line_number(raw.get("endLine")),
        ) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(PipelineError::validation(format!(
                    "Section \"{}\" has invalid line numbers: startLine={}, endLine={}",
                    name,
                    raw.get("startLine").unwrap_or(&Value::Null),
                    raw.get("endLine").unwrap_or(&Value::Null)
                )))
            }
        };

        if !seen.insert(name.clone()) {
            return Err(PipelineError::validation(format!(
                "Duplicate section name \"{}\"",
                name
            )));
        }

        let start_line = start.clamp(1, total as i64) as usize;
        let end_line = end.clamp(start_line as i64, total as i64) as usize;
        if start_line as i64 != start || end_line as i64 != end {
            notes.push(MapNote::Clamped {
                name: name.clone(),
                from: (start, end),
                to: (start_line, end_line),
            });
        }

        let description = raw
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let identifiers = raw
            .get("identifiers")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let section = Section {
            name,
            start_line,
            end_line,
            description,
            identifiers,
        };
        if section.line_span() > large_section_lines {
            notes.push(MapNote::LargeSection {
                name: section.name.clone(),
                lines: section.line_span(),
            });
        }
        sections.push(section);
    }

    let filename = obj
        .get("filename")
        .and_then(Value::as_str)
        .filter(|f| !f.is_empty())
        .unwrap_or(fallback_filename)
        .to_string();

    let map = SectionMap {
        filename,
        total_lines: total,
        sections,
        source_hash: obj
            .get("sourceHash")
            .and_then(Value::as_str)
            .map(str::to_string),
        generated_at: obj
            .get("generatedAt")
            .and_then(|v| serde_json::from_value(v.clone()).ok()),
    };

    Ok(SanitizedMap { map, notes })
}
