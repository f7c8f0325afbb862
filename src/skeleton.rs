//! Skeleton extraction
//!
//! Compresses a large HTML document into a line-numbered digest the scout
//! model can map without seeing every line. A line survives if it is blank,
//! looks structural, or falls on the sampling stride.

use crate::error::PipelineError;
use crate::util::truncate;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Every Nth line is kept regardless of content.
pub const DEFAULT_SAMPLE_STRIDE: usize = 10;
/// Retained lines longer than this are cut with a `...` marker.
pub const DEFAULT_MAX_LINE_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkeletonOptions {
    pub sample_stride: usize,
    pub max_line_chars: usize,
    /// Lines starting with one of these words (after indentation and an
    /// optional declaration keyword) are kept. Matched case-insensitively.
    pub domain_keywords: Vec<String>,
}

impl Default for SkeletonOptions {
    fn default() -> Self {
        Self {
            sample_stride: DEFAULT_SAMPLE_STRIDE,
            max_line_chars: DEFAULT_MAX_LINE_CHARS,
            domain_keywords: [
                "render", "init", "setup", "handle", "load", "save", "show", "hide", "update",
                "state", "toggle", "start", "submit",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkeletonStats {
    pub input_lines: usize,
    pub output_lines: usize,
    /// Retained lines / input lines (0.0 for an empty document)
    pub compression_ratio: f64,
}

#[derive(Debug, Clone)]
pub struct Skeleton {
    pub text: String,
    pub stats: SkeletonStats,
}

impl Skeleton {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

pub struct SkeletonExtractor {
    options: SkeletonOptions,
    structural_patterns: Vec<Regex>,
}

impl SkeletonExtractor {
    pub fn new(options: SkeletonOptions) -> Result<Self, PipelineError> {
        let structural_patterns = build_patterns(&options.domain_keywords)
            .map_err(|e| PipelineError::Config(format!("Invalid skeleton pattern: {}", e)))?;
        Ok(Self {
            options,
            structural_patterns,
        })
    }

    fn is_structural(&self, line: &str) -> bool {
        self.structural_patterns.iter().any(|re| re.is_match(line))
    }

    fn keep(&self, index: usize, line: &str) -> bool {
        let stride = self.options.sample_stride.max(1);
        line.trim().is_empty() || index % stride == 0 || self.is_structural(line)
    }

    pub fn extract(&self, text: &str) -> Skeleton {
        if text.is_empty() {
            return Skeleton {
                text: String::new(),
                stats: SkeletonStats {
                    input_lines: 0,
                    output_lines: 0,
                    compression_ratio: 0.0,
                },
            };
        }

        let mut out = Vec::new();
        let mut input_lines = 0usize;
        for (index, line) in text.split('\n').enumerate() {
            input_lines += 1;
            if self.keep(index, line) {
                let shown = truncate(line.trim_end_matches('\r'), self.options.max_line_chars);
                out.push(format!("{}: {}", index + 1, shown));
            }
        }

        let output_lines = out.len();
        Skeleton {
            text: out.join("\n"),
            stats: SkeletonStats {
                input_lines,
                output_lines,
                compression_ratio: output_lines as f64 / input_lines as f64,
            },
        }
    }
}

/// Convenience wrapper around [`SkeletonExtractor`].
pub fn extract_skeleton(text: &str, options: &SkeletonOptions) -> Result<Skeleton, PipelineError> {
    Ok(SkeletonExtractor::new(options.clone())?.extract(text))
}

fn build_patterns(domain_keywords: &[String]) -> Result<Vec<Regex>, regex::Error> {
    let mut patterns = vec![
        // Markup boundaries
        Regex::new(
            r"(?i)^\s*</?(?:html|head|body|script|style|main|section|header|footer|nav|article|aside|form|template|dialog|table|svg)\b",
        )?,
        Regex::new(r#"(?i)^\s*<div\b[^>]*\b(?:id|class)\s*="#)?,
        Regex::new(r"(?i)^\s*<!doctype")?,
        // Comments and section dividers
        Regex::new(r"^\s*(?:<!--|/\*|\*/)")?,
        Regex::new(r"^\s*//\s*(?:[=\-#*─═]{3,}|[A-Z][A-Z0-9 _:/-]{3,}$)")?,
        // Declarations
        Regex::new(r"^\s*(?:export\s+)?(?:async\s+)?function\s*\*?\s*[\w$]+")?,
        Regex::new(r"^\s*(?:export\s+)?class\s+[\w$]+")?,
        Regex::new(r"^\s*(?:export\s+)?(?:const|let|var)\s+[\w${}\[\], ]+\s*=")?,
        Regex::new(r"^\s*(?:@media|@keyframes|@font-face|@import|:root)\b")?,
        // DOM queries
        Regex::new(
            r"\b(?:getElementById|getElementsByClassName|querySelector|querySelectorAll|addEventListener|createElement)\s*\(",
        )?,
        // Control flow
        Regex::new(r"^\s*(?:\}\s*)?(?:if|else|for|while|switch|case|try|catch|finally)\b")?,
        // Closing-bracket-only lines
        Regex::new(r"^\s*[}\])]+[;,)]*\s*$")?,
    ];

    let keywords: Vec<String> = domain_keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(regex::escape)
        .collect();
    if !keywords.is_empty() {
        patterns.push(Regex::new(&format!(
            r"(?i)^\s*(?:(?:async|function|const|let|var)\s+)?(?:{})",
            keywords.join("|")
        ))?);
    }

    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> SkeletonExtractor {
        SkeletonExtractor::new(SkeletonOptions::default()).unwrap()
    }

    fn numbers(skeleton: &Skeleton) -> Vec<usize> {
        skeleton
            .text
            .lines()
            .map(|l| l.split(':').next().unwrap().parse().unwrap())
            .collect()
    }

    #[test]
    fn test_empty_document_gives_empty_skeleton() {
        let skeleton = extractor().extract("");
        assert!(skeleton.is_empty());
        assert_eq!(skeleton.stats.input_lines, 0);
        assert_eq!(skeleton.stats.compression_ratio, 0.0);
    }

    #[test]
    fn test_structural_lines_are_kept_and_numbered() {
        let text = [
            "plain text zero",
            "plain text",
            "<section id=\"quiz\">",
            "  some prose here",
            "function renderQuiz() {",
            "  const x = document.getElementById('q');",
            "  }",
            "more prose",
        ]
        .join("\n");
        let skeleton = extractor().extract(&text);
        // line 1 is kept by the stride, the rest by pattern
        assert_eq!(numbers(&skeleton), vec![1, 3, 5, 6, 7]);
        assert!(skeleton.text.contains("3: <section id=\"quiz\">"));
    }

    #[test]
    fn test_sampling_stride_keeps_every_tenth_line() {
        let text: Vec<String> = (0..35).map(|i| format!("prose line {}", i)).collect();
        let skeleton = extractor().extract(&text.join("\n"));
        assert_eq!(numbers(&skeleton), vec![1, 11, 21, 31]);
        assert_eq!(skeleton.stats.input_lines, 35);
        assert_eq!(skeleton.stats.output_lines, 4);
    }

    #[test]
    fn test_blank_lines_are_kept() {
        let skeleton = extractor().extract("prose\n\nprose\n   \nprose");
        assert_eq!(numbers(&skeleton), vec![1, 2, 4]);
    }

    #[test]
    fn test_long_lines_are_truncated() {
        let long = format!("<div class=\"x\">{}</div>", "a".repeat(300));
        let skeleton = extractor().extract(&long);
        let line = skeleton.text.lines().next().unwrap();
        assert!(line.ends_with("..."));
        assert_eq!(line.len(), "1: ".len() + DEFAULT_MAX_LINE_CHARS);
    }

    #[test]
    fn test_domain_keywords_are_configurable() {
        let options = SkeletonOptions {
            domain_keywords: vec!["quiz".to_string()],
            ..SkeletonOptions::default()
        };
        let extractor = SkeletonExtractor::new(options).unwrap();
        let skeleton = extractor.extract("first\n  quizState.score += 1;\n  other.score += 1;");
        assert_eq!(numbers(&skeleton), vec![1, 2]);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let text: Vec<String> = (0..200)
            .map(|i| match i % 7 {
                0 => "<div class=\"card\">".to_string(),
                3 => "}".to_string(),
                _ => format!("text {}", i),
            })
            .collect();
        let text = text.join("\n");
        let a = extractor().extract(&text);
        let b = extractor().extract(&text);
        assert_eq!(a.text, b.text);
        assert!(a.stats.compression_ratio < 1.0);
    }
}
