//! Modification applier
//!
//! Every check runs against the original line array before the first splice,
//! so a batch is applied completely or not at all. Splicing then runs in
//! descending start-line order; a later edit never shifts an earlier,
//! not-yet-applied section.

use crate::document::{split_content, Document};
use crate::error::PipelineError;
use crate::feature::{Edit, Modification};
use crate::section_map::{Section, SectionMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub text: String,
    pub applied: usize,
    pub original_lines: usize,
    pub final_lines: usize,
}

impl ApplyOutcome {
    pub fn line_delta(&self) -> isize {
        self.final_lines as isize - self.original_lines as isize
    }
}

struct Planned<'a> {
    modification: &'a Modification,
    section: &'a Section,
}

fn resolve<'a>(
    modifications: &'a [Modification],
    map: &'a SectionMap,
) -> Result<Vec<Planned<'a>>, PipelineError> {
    modifications
        .iter()
        .map(|modification| {
            map.find(&modification.section_name)
                .map(|section| Planned {
                    modification,
                    section,
                })
                .ok_or_else(|| {
                    PipelineError::validation(format!(
                        "Cannot resolve section \"{}\" for modification",
                        modification.section_name
                    ))
                })
        })
        .collect()
}

/// Sorted by descending start line, so checking adjacent pairs covers every
/// intersecting pair.
fn check_overlaps(planned: &[Planned<'_>]) -> Result<(), PipelineError> {
    for pair in planned.windows(2) {
        let (curr, next) = (pair[0].section, pair[1].section);
        if curr.overlaps(next) {
            return Err(PipelineError::validation(format!(
                "Overlapping modifications: \"{}\" (L{}-{}) and \"{}\" (L{}-{})",
                curr.name, curr.start_line, curr.end_line, next.name, next.start_line, next.end_line
            )));
        }
    }
    Ok(())
}

fn check_bounds(planned: &Planned<'_>, total_lines: usize) -> Result<(), PipelineError> {
    let section = planned.section;
    if section.start_line == 0 || section.end_line > total_lines || section.start_line > section.end_line {
        return Err(PipelineError::validation(format!(
            "Section \"{}\" range L{}-{} is out of bounds for a {}-line document",
            section.name, section.start_line, section.end_line, total_lines
        )));
    }

    if let Edit::Insert {
        insert_after_line, ..
    } = &planned.modification.edit
    {
        let max_offset = section.end_line - section.start_line;
        if *insert_after_line > max_offset {
            return Err(PipelineError::validation(format!(
                "Insert offset {} is outside section \"{}\" (allowed 0..={})",
                insert_after_line, section.name, max_offset
            )));
        }
    }
    Ok(())
}

pub fn apply_modifications(
    text: &str,
    modifications: &[Modification],
    map: &SectionMap,
) -> Result<ApplyOutcome, PipelineError> {
    let mut document = Document::from_text(text);
    let original_lines = document.line_count();

    let mut planned = resolve(modifications, map)?;
    planned.sort_by(|a, b| b.section.start_line.cmp(&a.section.start_line));
    check_overlaps(&planned)?;
    for p in &planned {
        check_bounds(p, original_lines)?;
    }

    for p in &planned {
        let section = p.section;
        match &p.modification.edit {
            Edit::Replace { new_content } => {
                document.splice(section.start_line - 1, section.end_line, split_content(new_content));
            }
            Edit::Insert {
                insert_after_line,
                content,
            } => {
                let at = section.start_line + insert_after_line;
                document.splice(at, at, split_content(content));
            }
        }
    }

    let final_lines = document.line_count();
    Ok(ApplyOutcome {
        text: document.to_text(),
        applied: planned.len(),
        original_lines,
        final_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("line {}", i)).collect()
    }

    fn block(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{} {}", prefix, i)).collect()
    }

    #[test]
    fn test_overlapping_sections_are_rejected_before_any_splice() {
        let text = numbered(30).join("\n");
        let map = SectionMap::new(
            "a.html",
            30,
            vec![Section::new("A", 10, 20), Section::new("B", 15, 25)],
        );
        let mods = vec![
            Modification::replace("A", "new a"),
            Modification::replace("B", "new b"),
        ];
        let before = text.clone();
        let err = apply_modifications(&text, &mods, &map).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("\"A\"") && message.contains("\"B\""));
        assert_eq!(text, before);
    }

    #[test]
    fn test_descending_application_keeps_every_region_correct() {
        let original = numbered(120);
        let map = SectionMap::new(
            "a.html",
            120,
            vec![
                Section::new("A", 5, 10),
                Section::new("B", 50, 60),
                Section::new("C", 100, 110),
            ],
        );
        let (a, b, c) = (block("a", 2), block("b", 20), block("c", 1));
        let mods = vec![
            Modification::replace("A", a.join("\n")),
            Modification::replace("B", b.join("\n")),
            Modification::replace("C", c.join("\n")),
        ];

        let outcome = apply_modifications(&original.join("\n"), &mods, &map).unwrap();

        let mut expected: Vec<String> = Vec::new();
        expected.extend_from_slice(&original[..4]);
        expected.extend(a);
        expected.extend_from_slice(&original[10..49]);
        expected.extend(b);
        expected.extend_from_slice(&original[60..99]);
        expected.extend(c);
        expected.extend_from_slice(&original[110..]);
        assert_eq!(outcome.text, expected.join("\n"));
        assert_eq!(outcome.applied, 3);
        assert_eq!(outcome.original_lines, 120);
        assert_eq!(outcome.final_lines, expected.len());
        assert_eq!(outcome.line_delta(), expected.len() as isize - 120);
    }

    #[test]
    fn test_insert_goes_after_offset_line() {
        let text = numbered(10).join("\n");
        let map = SectionMap::new("a.html", 10, vec![Section::new("S", 3, 6)]);

        let outcome = apply_modifications(&text, &[Modification::insert("S", 0, "new")], &map).unwrap();
        let lines: Vec<&str> = outcome.text.split('\n').collect();
        assert_eq!(lines[2], "line 3");
        assert_eq!(lines[3], "new");
        assert_eq!(lines[4], "line 4");

        let outcome = apply_modifications(&text, &[Modification::insert("S", 3, "tail")], &map).unwrap();
        let lines: Vec<&str> = outcome.text.split('\n').collect();
        assert_eq!(lines[5], "line 6");
        assert_eq!(lines[6], "tail");
    }

    #[test]
    fn test_insert_outside_section_is_rejected() {
        let text = numbered(10).join("\n");
        let map = SectionMap::new("a.html", 10, vec![Section::new("S", 3, 6)]);
        let err = apply_modifications(&text, &[Modification::insert("S", 4, "x")], &map).unwrap_err();
        assert!(err.to_string().contains("allowed 0..=3"));
    }

    #[test]
    fn test_insert_and_replace_on_same_section_overlap() {
        let text = numbered(10).join("\n");
        let map = SectionMap::new("a.html", 10, vec![Section::new("S", 3, 6)]);
        let mods = vec![
            Modification::replace("S", "x"),
            Modification::insert("S", 1, "y"),
        ];
        assert!(apply_modifications(&text, &mods, &map).is_err());
    }

    #[test]
    fn test_stale_map_range_is_out_of_bounds() {
        let text = numbered(10).join("\n");
        let map = SectionMap::new("a.html", 50, vec![Section::new("S", 8, 40)]);
        let err = apply_modifications(&text, &[Modification::replace("S", "x")], &map).unwrap_err();
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn test_unresolvable_section_fails() {
        let map = SectionMap::new("a.html", 3, vec![Section::new("S", 1, 3)]);
        let err = apply_modifications("a\nb\nc", &[Modification::replace("T", "x")], &map).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_trailing_newline_is_preserved() {
        let text = "a\nb\nc\n";
        let map = SectionMap::new("a.html", 4, vec![Section::new("S", 2, 2)]);
        let outcome = apply_modifications(text, &[Modification::replace("S", "B")], &map).unwrap();
        assert_eq!(outcome.text, "a\nB\nc\n");
    }
}
