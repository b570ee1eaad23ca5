//! Repeated-formula detection via canonicalized shapes.
//!
//! `=B2+C2` and `=B3+C3` share the shape `=B#+C#`; a workbook full of
//! row-copied formulas collapses to a handful of shapes plus one example
//! each, which is much cheaper for a model to read than every instance.

use regex::Regex;
use std::collections::HashMap;

const CELL_REF: &str =
    r"(?:(?:'[^'!]*'|[A-Za-z_][A-Za-z0-9_.]*)!)?\$?[A-Za-z]{1,3}\$?[0-9]{1,7}(?::\$?[A-Za-z]{1,3}\$?[0-9]{1,7})?";

/// A canonical formula shape with its occurrence count and one
/// representative example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaPattern {
    pub pattern: String,
    pub example: String,
    pub count: usize,
}

/// Canonicalize a formula: every row number inside a reference token becomes
/// `#`, column letters are retained, `$` anchors and sheet-name quotes are
/// stripped. Formulas mixing structurally different reference shapes stay
/// distinct; shapes are never merged.
pub fn canonicalize(formula: &str) -> String {
    let re = Regex::new(CELL_REF).unwrap();
    // scan a string-literal-masked copy so quoted text is never rewritten;
    // masking preserves byte offsets into the original
    let masked = super::dependencies::mask_string_literals(formula);
    let bytes = masked.as_bytes();
    let mut out = String::with_capacity(formula.len());
    let mut last = 0;

    for m in re.find_iter(&masked) {
        // same boundary rules as the dependency scan: skip identifier tails
        // and function calls
        if m.start() > 0 {
            let prev = bytes[m.start() - 1];
            if prev.is_ascii_alphanumeric() || matches!(prev, b'_' | b'$' | b'.') {
                continue;
            }
        }
        if let Some(&next) = bytes.get(m.end()) {
            if next == b'(' || next.is_ascii_alphanumeric() || next == b'_' {
                continue;
            }
        }
        out.push_str(&formula[last..m.start()]);
        out.push_str(&mask_rows(m.as_str()));
        last = m.end();
    }
    out.push_str(&formula[last..]);
    out
}

/// `$B$12` → `B#`, `A1:A5` → `A#:A#`, `Sheet2!C3` → `Sheet2!C#`.
fn mask_rows(token: &str) -> String {
    let cleaned = token.replace(['$', '\''], "");
    // digits in a sheet name (`Sheet2!`) are not row numbers
    match cleaned.rsplit_once('!') {
        Some((sheet, reference)) => format!("{sheet}!{}", mask_reference_rows(reference)),
        None => mask_reference_rows(&cleaned),
    }
}

fn mask_reference_rows(reference: &str) -> String {
    let mut out = String::with_capacity(reference.len());
    let mut in_digits = false;
    for ch in reference.chars() {
        if ch.is_ascii_digit() {
            if !in_digits {
                out.push('#');
                in_digits = true;
            }
        } else {
            in_digits = false;
            out.push(ch);
        }
    }
    out
}

/// Count canonical shapes across every formula in the workbook and keep the
/// ones that repeat, each with its first-seen example. Singletons are
/// omitted. Ordering: descending count, then pattern text.
pub fn extract_patterns<'a, I>(formulas: I) -> Vec<FormulaPattern>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<String, (usize, String)> = HashMap::new();
    for formula in formulas {
        let shape = canonicalize(formula);
        counts
            .entry(shape)
            .and_modify(|(n, _)| *n += 1)
            .or_insert_with(|| (1, formula.to_string()));
    }

    let mut patterns: Vec<FormulaPattern> = counts
        .into_iter()
        .filter(|(_, (count, _))| *count > 1)
        .map(|(pattern, (count, example))| FormulaPattern {
            pattern,
            example,
            count,
        })
        .collect();
    patterns.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.pattern.cmp(&b.pattern)));
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_row_copies() {
        assert_eq!(canonicalize("=B2+C2"), "=B#+C#");
        assert_eq!(canonicalize("=B3+C3"), "=B#+C#");
    }

    #[test]
    fn test_canonicalize_strips_anchors() {
        assert_eq!(canonicalize("=$B$12*D4"), "=B#*D#");
    }

    #[test]
    fn test_canonicalize_ranges_and_sheets() {
        assert_eq!(canonicalize("=SUM(A1:A5)"), "=SUM(A#:A#)");
        assert_eq!(canonicalize("=Sheet2!C3+1"), "=Sheet2!C#+1");
    }

    #[test]
    fn test_canonicalize_leaves_functions_alone() {
        assert_eq!(canonicalize("=LOG10(B2)"), "=LOG10(B#)");
    }

    #[test]
    fn test_string_literals_untouched() {
        assert_eq!(
            canonicalize("=IF(A1>0,\"B2\",C3)"),
            "=IF(A#>0,\"B2\",C#)"
        );
    }

    #[test]
    fn test_repeated_pattern_reported_once() {
        let patterns = extract_patterns(["=B2+C2", "=B3+C3", "=B4+C4"]);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern, "=B#+C#");
        assert_eq!(patterns[0].count, 3);
        assert_eq!(patterns[0].example, "=B2+C2");
    }

    #[test]
    fn test_singletons_omitted() {
        let patterns = extract_patterns(["=B2+C2", "=B3+C3", "=SUM(A1:A9)"]);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern, "=B#+C#");
    }

    #[test]
    fn test_structurally_different_shapes_stay_distinct() {
        let patterns = extract_patterns(["=B2+C2", "=B3+C3", "=B4-C4", "=B5-C5"]);
        assert_eq!(patterns.len(), 2);
        let shapes: Vec<&str> = patterns.iter().map(|p| p.pattern.as_str()).collect();
        assert!(shapes.contains(&"=B#+C#"));
        assert!(shapes.contains(&"=B#-C#"));
    }

    #[test]
    fn test_deterministic_ordering() {
        let patterns = extract_patterns(["=A1", "=A2", "=B1*2", "=B2*2", "=B3*2"]);
        assert_eq!(patterns[0].pattern, "=B#*2");
        assert_eq!(patterns[1].pattern, "=A#");
    }
}
