//! Line-array view of a document
//!
//! Lines are split on `\n` only, so `\r` stays attached to its line and
//! joining with `\n` reproduces the original text byte for byte. A trailing
//! newline therefore shows up as a final empty line, which keeps external
//! line numbers identical to what editors display for line 1..=N.

use crate::util::hash_str;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    lines: Vec<String>,
}

impl Document {
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.split('\n').map(str::to_string).collect(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Text of the inclusive 1-based range `start..=end`, clamped to the document.
    pub fn slice(&self, start: usize, end: usize) -> String {
        let start_idx = start.saturating_sub(1).min(self.lines.len());
        let end_idx = end.min(self.lines.len()).max(start_idx);
        self.lines[start_idx..end_idx].join("\n")
    }

    /// Replace the 0-based half-open range `start_idx..end_idx`.
    pub(crate) fn splice(&mut self, start_idx: usize, end_idx: usize, replacement: Vec<String>) {
        self.lines.splice(start_idx..end_idx, replacement);
    }

    pub fn to_text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Actual line count of a text, using the same rule as [`Document`].
pub fn line_count(text: &str) -> usize {
    text.split('\n').count()
}

/// Hash recorded in a Section Map to detect a stale map.
pub fn content_hash(text: &str) -> String {
    hash_str(text)
}

pub(crate) fn split_content(content: &str) -> Vec<String> {
    content.split('\n').map(str::to_string).collect()
}
