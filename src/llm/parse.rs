//! Resilient JSON decoding for model output
//!
//! Model responses arrive wrapped in markdown fences, with trailing commas, or
//! cut off mid-object when the output budget runs out. Everything that turns
//! that text into a `serde_json::Value` lives here so the map and feature
//! stages share one implementation.

use crate::error::ParseError;
use crate::util::truncate_str;
use serde_json::Value;

/// How many chars of the raw response an error carries
const EXCERPT_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeHint {
    /// The model finished normally
    Complete,
    /// The model stopped at its token budget; run truncation repair up front
    Truncated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value: Value,
    /// True when the value only parsed after truncation repair
    pub repaired: bool,
}

/// Strip a leading ```` ```lang ```` fence and a trailing ```` ``` ```` fence.
pub fn strip_markdown_fences(text: &str) -> &str {
    let mut clean = text.trim();
    if let Some(rest) = clean.strip_prefix("```") {
        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
            .unwrap_or(rest.len());
        let rest = rest[tag_len..].trim_start_matches([' ', '\t']);
        let rest = rest
            .strip_prefix("\r\n")
            .or_else(|| rest.strip_prefix('\n'))
            .unwrap_or(rest);
        clean = rest;
    }
    if let Some(rest) = clean.trim_end().strip_suffix("```") {
        clean = rest;
    }
    clean.trim()
}

/// Remove commas that directly precede `}` or `]`, ignoring string contents.
pub fn strip_trailing_commas(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in json.char_indices() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            ',' => {
                let next = json[idx + 1..].trim_start().chars().next();
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

/// String-aware scan of a JSON prefix.
struct ScanState {
    /// Open brackets with their byte offsets, innermost last
    stack: Vec<(char, usize)>,
    in_string: bool,
    /// Byte offset of the opening quote of the current (or last completed) string
    string_start: Option<usize>,
    /// Byte offset just past the closing quote of the last completed string
    last_string_end: Option<usize>,
}

fn scan(text: &str) -> ScanState {
    let mut state = ScanState {
        stack: Vec::new(),
        in_string: false,
        string_start: None,
        last_string_end: None,
    };
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if state.in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                state.in_string = false;
                state.last_string_end = Some(idx + 1);
            }
            continue;
        }
        match ch {
            '"' => {
                state.in_string = true;
                state.string_start = Some(idx);
            }
            '{' | '[' => state.stack.push((ch, idx)),
            '}' | ']' => {
                state.stack.pop();
            }
            _ => {}
        }
    }

    state
}

/// Drop whatever dangling fragment ends a truncated JSON prefix: an
/// unterminated string, a key without a value, a partial literal, a comma.
///
/// A number at the very end is dropped too: `12` cut to `1` still parses.
fn strip_dangling_fragment(text: &str) -> String {
    let mut s = text.trim_end().to_string();
    let mut at_cut = true;

    let state = scan(&s);
    if state.in_string {
        if let Some(start) = state.string_start {
            s.truncate(start);
        }
    }

    loop {
        let trimmed_len = s.trim_end().len();
        s.truncate(trimmed_len);
        let Some(last) = s.chars().last() else {
            break;
        };
        let cut_here = std::mem::replace(&mut at_cut, false);

        if last == ',' || last == ':' {
            s.pop();
            continue;
        }

        if last == '"' {
            // A string that sits in key position has lost its value
            let state = scan(&s);
            let is_last_token = state.last_string_end == Some(s.len());
            if let (Some(start), true) = (state.string_start, is_last_token) {
                let before = s[..start].trim_end().chars().last();
                let in_object = matches!(state.stack.last(), Some(('{', _)));
                if in_object && matches!(before, Some('{') | Some(',')) {
                    s.truncate(start);
                    continue;
                }
            }
            break;
        }

        if last.is_ascii_alphanumeric() || matches!(last, '.' | '+' | '-') {
            let word_start = s
                .rfind(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-')))
                .map(|i| i + 1)
                .unwrap_or(0);
            let word = &s[word_start..];
            let keep = match serde_json::from_str::<Value>(word) {
                Ok(Value::Number(_)) => !cut_here,
                Ok(_) => true,
                Err(_) => false,
            };
            if !keep {
                s.truncate(word_start);
                continue;
            }
        }

        break;
    }

    s
}

/// Close a JSON prefix that was cut off by the token budget.
///
/// Strips the dangling fragment and drops any array element object that
/// never closed, then appends one closer per open bracket, innermost first,
/// and finally removes any comma left before a closer.
pub fn repair_truncated(text: &str) -> String {
    let mut repaired = strip_dangling_fragment(text);

    // An element object still open at the cut is missing fields
    let partial_element = scan(&repaired)
        .stack
        .windows(2)
        .find(|pair| pair[0].0 == '[' && pair[1].0 == '{')
        .map(|pair| pair[1].1);
    if let Some(start) = partial_element {
        repaired.truncate(start);
        repaired = strip_dangling_fragment(&repaired);
    }

    let state = scan(&repaired);
    for (open, _) in state.stack.iter().rev() {
        repaired.push(if *open == '{' { '}' } else { ']' });
    }
    strip_trailing_commas(&repaired)
}

fn excerpt(raw: &str) -> String {
    truncate_str(raw, EXCERPT_CHARS).to_string()
}

/// Parse a JSON object out of a model response.
///
/// All-or-nothing: either a complete `Value` comes back or a `ParseError`
/// describing every attempt.
pub fn decode_object(raw: &str, hint: DecodeHint) -> Result<Decoded, ParseError> {
    let clean = strip_markdown_fences(raw);

    if hint == DecodeHint::Truncated {
        if let Some(start) = clean.find('{') {
            let repaired = repair_truncated(&clean[start..]);
            if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                let repaired_flag = strip_trailing_commas(&clean[start..]) != repaired;
                return Ok(Decoded {
                    value,
                    repaired: repaired_flag,
                });
            }
        }
        // The budget flag can be wrong; fall through to the normal path.
    }

    let (start, end) = match (clean.find('{'), clean.rfind('}')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            return Err(ParseError::new("no JSON object found", excerpt(raw)));
        }
    };
    let json = strip_trailing_commas(&clean[start..=end]);

    let original_error = match serde_json::from_str::<Value>(&json) {
        Ok(value) => {
            return Ok(Decoded {
                value,
                repaired: false,
            })
        }
        Err(err) => err.to_string(),
    };

    let repaired = repair_truncated(&json);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => Ok(Decoded {
            value,
            repaired: true,
        }),
        Err(repair_err) => Err(ParseError {
            message: "JSON parse failed after repair".to_string(),
            original_error: Some(original_error),
            repair_error: Some(repair_err.to_string()),
            excerpt: excerpt(raw),
        }),
    }
}

/// Parse a bare JSON array (first `[` to last `]`) out of a model response.
pub fn decode_array(raw: &str) -> Result<Vec<Value>, ParseError> {
    let clean = strip_markdown_fences(raw);
    let (start, end) = match (clean.find('['), clean.rfind(']')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => return Err(ParseError::new("no JSON array found", excerpt(raw))),
    };
    let json = strip_trailing_commas(&clean[start..=end]);
    match serde_json::from_str::<Value>(&json) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(_) => Err(ParseError::new("response is not a JSON array", excerpt(raw))),
        Err(err) => {
            let mut parse_err = ParseError::new("JSON array parse failed", excerpt(raw));
            parse_err.original_error = Some(err.to_string());
            Err(parse_err)
        }
    }
}
