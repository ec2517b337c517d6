//! Reference extraction from expression text.
//!
//! Finds every cell or range reference in an expression, qualified
//! (`sheet1!A3`, `sheet1!A1:B2`) or not (`A3`, `A1:B2`), plus the broken
//! reference marker. String literals are skipped. The same scanner drives
//! dependency analysis, execution rewriting and the reference transformer,
//! so all three agree on what a reference is.

use regex::{Captures, Regex};
use std::sync::OnceLock;

use super::cell_ref::{BROKEN_REF, CellRef, RangeRef};

/// What a reference token points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefTarget {
    Cell(CellRef),
    Range(RangeRef),
    /// The broken-reference marker.
    Broken,
}

/// A reference found in an expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefToken {
    /// Resource prefix, for `sheet1!A1` style references.
    pub resource: Option<String>,
    pub target: RefTarget,
}

impl RefToken {
    /// Canonical text of the reference. Ranges are normalized and one-cell
    /// ranges collapse to the cell, so `A2:A1` and `A1:A2` share a key.
    pub fn key(&self) -> String {
        let local = match &self.target {
            RefTarget::Cell(cell) => cell.to_string(),
            RefTarget::Range(range) => range.normalized().to_string(),
            RefTarget::Broken => return BROKEN_REF.to_string(),
        };
        match &self.resource {
            Some(resource) => super::cell_ref::qualify(resource, &local),
            None => local,
        }
    }
}

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"#REF!|(?:\b(?P<res>[A-Za-z_][A-Za-z0-9_]*)!)?\b(?P<start>[A-Z]+[0-9]+)(?::(?P<end>[A-Z]+[0-9]+))?\b",
        )
        .expect("reference regex must compile")
    })
}

fn parse_token(caps: &Captures) -> Option<RefToken> {
    if &caps[0] == BROKEN_REF {
        return Some(RefToken {
            resource: None,
            target: RefTarget::Broken,
        });
    }
    let resource = caps.name("res").map(|m| m.as_str().to_string());
    let start = CellRef::from_str(caps.name("start")?.as_str())?;
    let target = match caps.name("end") {
        Some(end) => {
            let range = RangeRef::new(start, CellRef::from_str(end.as_str())?).normalized();
            if range.is_single() {
                RefTarget::Cell(range.start)
            } else {
                RefTarget::Range(range)
            }
        }
        None => RefTarget::Cell(start),
    };
    Some(RefToken { resource, target })
}

/// Extract all references from an expression, in order of appearance.
pub fn extract_references(script: &str) -> Vec<RefToken> {
    let mut refs = Vec::new();
    for_each_code_segment(script, |seg| {
        for caps in reference_re().captures_iter(seg) {
            if let Some(token) = parse_token(&caps) {
                refs.push(token);
            }
        }
        seg.to_string()
    });
    refs
}

/// Rewrite references outside string literals. `replace` returns the new text
/// for a token, or `None` to leave the original text untouched.
pub fn replace_references<F>(script: &str, mut replace: F) -> String
where
    F: FnMut(&RefToken) -> Option<String>,
{
    for_each_code_segment(script, |seg| {
        reference_re()
            .replace_all(seg, |caps: &Captures| {
                parse_token(caps)
                    .and_then(|token| replace(&token))
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .to_string()
    })
}

/// Apply `f` to every segment of `script` that is outside a string literal and
/// stitch the result back together. String literals are copied verbatim.
pub(crate) fn for_each_code_segment<F>(script: &str, mut f: F) -> String
where
    F: FnMut(&str) -> String,
{
    let bytes = script.as_bytes();
    let mut out = String::with_capacity(script.len());
    let mut seg_start = 0;
    let mut in_string = false;
    let mut backslashes = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if b == b'\\' {
                backslashes += 1;
                i += 1;
                continue;
            }
            if b == b'"' && backslashes.is_multiple_of(2) {
                out.push_str(&script[seg_start..=i]);
                in_string = false;
                seg_start = i + 1;
            }
            backslashes = 0;
            i += 1;
            continue;
        }

        if b == b'"' {
            out.push_str(&f(&script[seg_start..i]));
            in_string = true;
            seg_start = i;
            backslashes = 0;
        }
        i += 1;
    }

    if seg_start < script.len() {
        if in_string {
            out.push_str(&script[seg_start..]);
        } else {
            out.push_str(&f(&script[seg_start..]));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_references_empty() {
        assert!(extract_references("").is_empty());
        assert!(extract_references("10 + 20").is_empty());
        assert!(extract_references("x + y1").is_empty());
    }

    #[test]
    fn test_extract_references_mixed() {
        let refs = extract_references("A1 + sum(B2:C3) + sheet1!D4");
        let keys: Vec<String> = refs.iter().map(RefToken::key).collect();
        assert_eq!(keys, vec!["A1", "B2:C3", "sheet1!D4"]);
    }

    #[test]
    fn test_extract_references_skips_string_literals() {
        let refs = extract_references(r#"A1 + len("B2 \" C3") + D4"#);
        let keys: Vec<String> = refs.iter().map(RefToken::key).collect();
        assert_eq!(keys, vec!["A1", "D4"]);
    }

    #[test]
    fn test_inverted_and_single_cell_ranges_normalize() {
        let refs = extract_references("A2:A1 + B2:B2");
        assert_eq!(refs[0].key(), "A1:A2");
        assert_eq!(refs[1].target, RefTarget::Cell(CellRef::new(1, 1)));
    }

    #[test]
    fn test_broken_marker_is_a_reference() {
        let refs = extract_references("#REF! + 1");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].target, RefTarget::Broken);
    }

    #[test]
    fn test_replace_references_keeps_unmatched_text() {
        let out = replace_references("A1 * 2 + \"A1\"", |t| Some(format!("<{}>", t.key())));
        assert_eq!(out, "<A1> * 2 + \"A1\"");
    }
}
