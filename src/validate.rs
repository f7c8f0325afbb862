//! Structural checks
//!
//! Heuristic confidence that a document still looks like well-formed markup
//! after modification. This is not an HTML parser: script, style and comment
//! interiors are blanked out and the remaining tags are walked with a stack.

use crate::error::PipelineError;
use serde::Serialize;
use std::collections::HashSet;

/// Elements that never take a closing tag
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const REQUIRED_MARKERS: &[(&str, &str)] = &[
    ("<html", "<html> tag"),
    ("</html>", "</html> closing tag"),
    ("<head", "<head> tag"),
    ("</head>", "</head> closing tag"),
    ("<body", "<body> tag"),
    ("</body>", "</body> closing tag"),
];

/// Opening marker, the closing marker that must follow it (if any), label
const RECOMMENDED_MARKERS: &[(&str, Option<&str>, &str)] = &[
    ("<title", Some("</title>"), "<title> tag"),
    ("<!doctype", None, "DOCTYPE declaration"),
];

const DUPLICATE_WINDOW: usize = 100;
const DUPLICATE_THRESHOLD: usize = 50;
/// Documents shorter than this skip the duplicate-line heuristic
const DUPLICATE_MIN_LINES: usize = 100;
const LARGE_SCRIPT_BYTES: usize = 10_000;
const LARGE_COMMENT_BYTES: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "+",
            CheckStatus::Warn => "!",
            CheckStatus::Fail => "●",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Pass,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Fail,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub checks: Vec<CheckResult>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.checks.iter().all(|c| c.status != CheckStatus::Fail)
    }

    pub fn errors(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .map(|c| c.detail.as_str())
            .collect()
    }

    /// Warnings on success, one aggregated `Structural` error otherwise.
    pub fn into_result(self) -> Result<Vec<String>, PipelineError> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(PipelineError::Structural(self.errors().join("; ")))
        }
    }

    fn push(&mut self, check: CheckResult, warnings: Vec<String>) {
        let check = if check.status == CheckStatus::Pass && !warnings.is_empty() {
            CheckResult {
                status: CheckStatus::Warn,
                detail: warnings.join("; "),
                ..check
            }
        } else {
            check
        };
        self.checks.push(check);
        self.warnings.extend(warnings);
    }
}

/// Run every check. Checks are independent; one failing does not stop the others.
pub fn validate_structure(text: &str) -> ValidationReport {
    let neutralized = neutralize(text);
    let mut report = ValidationReport::default();

    let (check, warnings) = check_critical_elements(text);
    report.push(check, warnings);
    report.push(check_tag_balance(&neutralized.text), Vec::new());
    let (check, warnings) = check_blocks(&neutralized);
    report.push(check, warnings);
    let (check, warnings) = check_consistency(text, &neutralized);
    report.push(check, warnings);

    report
}

fn check_critical_elements(text: &str) -> (CheckResult, Vec<String>) {
    let lower = text.to_ascii_lowercase();
    let missing: Vec<&str> = REQUIRED_MARKERS
        .iter()
        .filter(|(marker, _)| !has_marker(&lower, marker))
        .map(|(_, label)| *label)
        .collect();
    let warnings = RECOMMENDED_MARKERS
        .iter()
        .filter(|(open, close, _)| !has_element(&lower, open, *close))
        .map(|(_, _, label)| format!("Missing {}", label))
        .collect();

    let check = if missing.is_empty() {
        CheckResult::pass("critical elements", "html, head and body present")
    } else {
        CheckResult::fail(
            "critical elements",
            format!("Missing required {}", missing.join(", ")),
        )
    };
    (check, warnings)
}

/// `<head` must not match `<header`, so an opening marker needs a tag boundary after it.
fn has_marker(lower: &str, marker: &str) -> bool {
    if marker.ends_with('>') {
        return lower.contains(marker);
    }
    lower.match_indices(marker).any(|(idx, _)| {
        lower[idx + marker.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_whitespace() || c == '>' || c == '/')
    })
}

/// Opening marker that comes before the last occurrence of its closing marker.
fn has_element(lower: &str, open: &str, close: Option<&str>) -> bool {
    match close {
        None => has_marker(lower, open),
        Some(close) => lower
            .rfind(close)
            .is_some_and(|close_at| has_marker(&lower[..close_at], open)),
    }
}

struct OpenTag {
    name: String,
    line: usize,
}

struct TagToken<'a> {
    name: &'a str,
    closing: bool,
    self_closing: bool,
    start: usize,
    end: usize,
}

/// Next tag at or after `from`, skipping `<` that does not start a tag.
fn next_tag(text: &str, from: usize) -> Option<TagToken<'_>> {
    let bytes = text.as_bytes();
    let mut i = from;
    while let Some(off) = text[i..].find('<') {
        let start = i + off;
        let mut pos = start + 1;
        let closing = bytes.get(pos) == Some(&b'/');
        if closing {
            pos += 1;
        }
        let name_start = pos;
        if !bytes.get(pos).is_some_and(u8::is_ascii_alphabetic) {
            i = start + 1;
            continue;
        }
        while bytes
            .get(pos)
            .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'-')
        {
            pos += 1;
        }
        let name_end = pos;

        let mut quote: Option<u8> = None;
        let mut end = None;
        while pos < bytes.len() {
            let b = bytes[pos];
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None if b == b'"' || b == b'\'' => quote = Some(b),
                None if b == b'>' => {
                    end = Some(pos + 1);
                    break;
                }
                None => {}
            }
            pos += 1;
        }
        let end = end?;
        return Some(TagToken {
            name: &text[name_start..name_end],
            closing,
            self_closing: bytes[end - 2] == b'/',
            start,
            end,
        });
    }
    None
}

fn check_tag_balance(neutralized: &str) -> CheckResult {
    const NAME: &str = "tag balance";
    let mut stack: Vec<OpenTag> = Vec::new();
    let mut unclosed: Vec<OpenTag> = Vec::new();
    let mut line = 1usize;
    let mut counted_to = 0usize;
    let mut pos = 0usize;
    let mut tags = 0usize;

    while let Some(tag) = next_tag(neutralized, pos) {
        line += neutralized[counted_to..tag.start].matches('\n').count();
        counted_to = tag.start;
        pos = tag.end;
        tags += 1;

        let name = tag.name.to_ascii_lowercase();
        if VOID_ELEMENTS.contains(&name.as_str()) || (tag.self_closing && !tag.closing) {
            continue;
        }

        if !tag.closing {
            stack.push(OpenTag { name, line });
            continue;
        }

        if stack.last().is_some_and(|open| open.name == name) {
            stack.pop();
            continue;
        }
        // A close that matches a deeper open tag implicitly closes the ones above it
        if let Some(idx) = stack.iter().rposition(|open| open.name == name) {
            unclosed.extend(stack.drain(idx + 1..));
            stack.pop();
            continue;
        }

        let detail = match stack.last() {
            None => format!(
                "Closing tag </{}> without opening tag at line {} (position {})",
                name, line, tag.start
            ),
            Some(open) => format!(
                "Tag mismatch: expected </{}> (opened at line {}) but found </{}> at line {} (position {})",
                open.name, open.line, name, line, tag.start
            ),
        };
        return CheckResult::fail(NAME, detail);
    }

    unclosed.extend(stack);
    if !unclosed.is_empty() {
        unclosed.sort_by_key(|t| t.line);
        let listed: Vec<String> = unclosed
            .iter()
            .map(|t| format!("{} (line {})", t.name, t.line))
            .collect();
        return CheckResult::fail(NAME, format!("Unclosed tags: {}", listed.join(", ")));
    }

    CheckResult::pass(NAME, format!("{} tags balanced", tags))
}

fn check_blocks(neutralized: &Neutralized) -> (CheckResult, Vec<String>) {
    let scripts = neutralized.script_sizes.len();
    let styles = neutralized.style_count;
    let mut warnings = Vec::new();
    if scripts == 0 && styles == 0 {
        warnings.push("No script or style blocks found".to_string());
    }
    let check = CheckResult::pass(
        "embedded blocks",
        format!("{} script, {} style", scripts, styles),
    );
    (check, warnings)
}

fn check_consistency(text: &str, neutralized: &Neutralized) -> (CheckResult, Vec<String>) {
    const NAME: &str = "consistency";
    let mut warnings = Vec::new();
    if neutralized
        .script_sizes
        .iter()
        .any(|size| *size >= LARGE_SCRIPT_BYTES)
    {
        warnings.push("Very large script block detected (> 10KB)".to_string());
    }
    if neutralized
        .comment_sizes
        .iter()
        .any(|size| *size >= LARGE_COMMENT_BYTES)
    {
        warnings.push("Very large comment block detected (> 50KB)".to_string());
    }

    let issues = duplicate_runs(text);
    let check = if issues.is_empty() {
        CheckResult::pass(NAME, "no repeated blocks")
    } else {
        CheckResult::fail(
            NAME,
            format!("Consistency check failed: {}", issues.join("; ")),
        )
    };
    (check, warnings)
}

/// Lines that repeat at least `DUPLICATE_THRESHOLD` times within a
/// `DUPLICATE_WINDOW`-line window, blank lines included. Each distinct line is
/// reported once.
fn duplicate_runs(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.split('\n').collect();
    if lines.len() <= DUPLICATE_MIN_LINES {
        return Vec::new();
    }

    let mut reported: HashSet<&str> = HashSet::new();
    let mut issues = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if reported.contains(line) {
            continue;
        }
        let window_end = (i + DUPLICATE_WINDOW).min(lines.len());
        let same = 1 + lines[i + 1..window_end]
            .iter()
            .filter(|other| *other == line)
            .count();
        if same >= DUPLICATE_THRESHOLD {
            reported.insert(*line);
            issues.push(format!(
                "Found {} identical lines starting at line {}",
                same,
                i + 1
            ));
        }
    }
    issues
}

/// Text with script/style/comment interiors blanked, plus block statistics.
struct Neutralized {
    text: String,
    /// Interior byte length of each script block
    script_sizes: Vec<usize>,
    style_count: usize,
    /// Interior byte length of each comment
    comment_sizes: Vec<usize>,
}

#[derive(Clone, Copy)]
enum BlockKind {
    Comment,
    Script,
    Style,
}

const BLOCK_OPENERS: [(&str, BlockKind); 3] = [
    ("<!--", BlockKind::Comment),
    ("<script", BlockKind::Script),
    ("<style", BlockKind::Style),
];

fn find_opener(lower: &str, from: usize, needle: &str, kind: BlockKind) -> Option<usize> {
    lower[from..]
        .match_indices(needle)
        .find(|(idx, _)| {
            matches!(kind, BlockKind::Comment)
                || lower[from + idx + needle.len()..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_whitespace() || c == '>' || c == '/')
        })
        .map(|(idx, _)| from + idx)
}

/// Finds the next block opener of any kind. Each opener's next position is
/// remembered and only searched again once the scan has moved past it, so the
/// whole document is read about once per opener kind.
struct BlockFinder<'a> {
    lower: &'a str,
    /// `None` until searched; `Some(None)` once no opener of that kind remains
    next: [Option<Option<usize>>; 3],
}

impl<'a> BlockFinder<'a> {
    fn new(lower: &'a str) -> Self {
        Self {
            lower,
            next: [None; 3],
        }
    }

    fn next_block(&mut self, from: usize) -> Option<(usize, BlockKind)> {
        let mut best: Option<(usize, BlockKind)> = None;
        for (slot, (needle, kind)) in self.next.iter_mut().zip(BLOCK_OPENERS) {
            let stale = match *slot {
                None => true,
                Some(Some(at)) => at < from,
                Some(None) => false,
            };
            if stale {
                *slot = Some(find_opener(self.lower, from, needle, kind));
            }
            if let Some(Some(at)) = *slot {
                if best.is_none_or(|(b, _)| at < b) {
                    best = Some((at, kind));
                }
            }
        }
        best
    }
}

/// Blank `range`, keeping newlines so line numbers and byte offsets survive.
fn blank(bytes: &mut [u8], range: std::ops::Range<usize>) {
    for b in &mut bytes[range] {
        if *b != b'\n' {
            *b = b' ';
        }
    }
}

fn neutralize(text: &str) -> Neutralized {
    let lower = text.to_ascii_lowercase();
    let mut bytes = text.as_bytes().to_vec();
    let mut out = Neutralized {
        text: String::new(),
        script_sizes: Vec::new(),
        style_count: 0,
        comment_sizes: Vec::new(),
    };

    let mut finder = BlockFinder::new(&lower);
    let mut pos = 0;
    while let Some((start, kind)) = finder.next_block(pos) {
        match kind {
            BlockKind::Comment => {
                let end = lower[start + 4..]
                    .find("-->")
                    .map(|i| start + 4 + i + 3)
                    .unwrap_or(lower.len());
                out.comment_sizes.push(end - start);
                blank(&mut bytes, start..end);
                pos = end;
            }
            BlockKind::Script | BlockKind::Style => {
                let closer = if matches!(kind, BlockKind::Script) {
                    "</script"
                } else {
                    "</style"
                };
                let Some(open_end) = next_tag(&lower, start).map(|t| t.end) else {
                    break;
                };
                let close_start = lower[open_end..]
                    .find(closer)
                    .map(|i| open_end + i)
                    .unwrap_or(lower.len());
                match kind {
                    BlockKind::Script => out.script_sizes.push(close_start - open_end),
                    _ => out.style_count += 1,
                }
                blank(&mut bytes, open_end..close_start);
                pos = close_start.max(start + 1);
            }
        }
    }

    out.text = String::from_utf8(bytes)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
    out
}
