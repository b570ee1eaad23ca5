//! Dependency extraction from formula text.
//!
//! Purely syntactic: references are tokenized out of the formula string,
//! never resolved against sheet contents and never evaluated.

use regex::Regex;
use std::collections::HashSet;

/// Cell-reference token, optionally sheet-qualified, single cell or range.
const CELL_REF: &str =
    r"(?:(?:'[^'!]*'|[A-Za-z_][A-Za-z0-9_.]*)!)?\$?[A-Za-z]{1,3}\$?[0-9]{1,7}(?::\$?[A-Za-z]{1,3}\$?[0-9]{1,7})?";

/// 3-D span such as `Sheet1:Sheet3!A1` — recorded as unresolved, never
/// guessed at.
const SHEET_SPAN: &str = r"(?:'[^'!]*'|[A-Za-z_][A-Za-z0-9_.]*):(?:'[^'!]*'|[A-Za-z_][A-Za-z0-9_.]*)!\$?[A-Za-z]{1,3}\$?[0-9]{1,7}(?::\$?[A-Za-z]{1,3}\$?[0-9]{1,7})?";

const IDENTIFIER: &str = r"[A-Za-z_][A-Za-z0-9_.]*";

/// Built-in function names never counted as named-range dependencies.
const BUILTIN_FUNCTIONS: &[&str] = &[
    "SUM", "SUMIF", "SUMIFS", "IF", "IFS", "AVERAGE", "AVERAGEIF", "AVERAGEIFS", "COUNT",
    "COUNTA", "COUNTIF", "COUNTIFS", "MAX", "MIN", "AND", "OR", "NOT", "VLOOKUP", "HLOOKUP",
    "XLOOKUP", "INDEX", "MATCH", "OFFSET", "INDIRECT", "ROW", "COLUMN", "CELL", "IFERROR",
    "ISERROR", "ISBLANK", "ISTEXT", "ISNONTEXT", "ISNUMBER", "TODAY", "NOW", "TEXT", "VALUE",
    "LEN", "LEFT", "RIGHT", "MID", "TRIM", "CONCATENATE", "CONCAT", "SUBSTITUTE", "REPLACE",
    "DATE", "DAY", "MONTH", "YEAR", "EOMONTH", "NETWORKDAYS", "WORKDAY", "ROUND", "ROUNDUP",
    "ROUNDDOWN", "ABS", "SQRT", "POWER", "MOD", "PRODUCT", "UPPER", "LOWER", "TRUE", "FALSE",
];

/// Everything a formula reads from, in first-appearance order, de-duplicated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormulaDeps {
    /// Single-cell and range references, `$` anchors and sheet-name quotes
    /// stripped (`B2`, `A1:A5`, `Sheet2!C3`).
    pub cell_refs: Vec<String>,
    /// Identifiers that resolved through the workbook's named-range table.
    pub named_refs: Vec<String>,
    /// Tokens we refuse to resolve: `INDIRECT`/`OFFSET` argument text and
    /// 3-D sheet spans.
    pub unresolved: Vec<String>,
    /// The formula references its own cell — a circular-formula condition to
    /// surface, not silently drop.
    pub circular: bool,
}

impl FormulaDeps {
    pub fn is_empty(&self) -> bool {
        self.cell_refs.is_empty()
            && self.named_refs.is_empty()
            && self.unresolved.is_empty()
            && !self.circular
    }
}

/// Extract every cell/range/named-range token from `formula`.
///
/// `sheet_name`/`coord` identify the cell owning the formula (for the
/// self-reference check); `named_ranges` holds lowercased defined names.
pub fn extract(
    formula: &str,
    sheet_name: &str,
    coord: &str,
    named_ranges: &HashSet<String>,
) -> FormulaDeps {
    let mut deps = FormulaDeps::default();
    let body = formula.strip_prefix('=').unwrap_or(formula);
    if body.is_empty() {
        return deps;
    }

    // String literals must not contribute tokens; masking keeps byte offsets
    // aligned with the original text.
    let mut masked = mask_string_literals(body);

    collect_unresolved_spans(&mut masked, &mut deps.unresolved);
    collect_indirection_args(body, &masked, &mut deps.unresolved);
    let ref_spans = collect_cell_refs(&masked, sheet_name, coord, &mut deps);
    collect_named_refs(&masked, &ref_spans, named_ranges, &mut deps.named_refs);

    deps
}

/// Replace `"..."` literal contents (quotes included) with spaces of the same
/// byte length. Doubled quotes inside a literal toggle twice, which masks
/// them as intended.
pub(crate) fn mask_string_literals(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    for ch in text.chars() {
        if ch == '"' {
            in_string = !in_string;
            out.push(' ');
        } else if in_string {
            for _ in 0..ch.len_utf8() {
                out.push(' ');
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Record 3-D sheet spans as unresolved and blank them out of the masked
/// text so later passes don't re-tokenize their pieces.
fn collect_unresolved_spans(masked: &mut String, unresolved: &mut Vec<String>) {
    let re = Regex::new(SHEET_SPAN).unwrap();
    let mut spans = Vec::new();
    for m in re.find_iter(masked) {
        let token = m.as_str().replace(['$', '\''], "");
        if !unresolved.contains(&token) {
            unresolved.push(token);
        }
        spans.push((m.start(), m.end()));
    }
    let mut bytes = std::mem::take(masked).into_bytes();
    for (start, end) in spans {
        for b in &mut bytes[start..end] {
            *b = b' ';
        }
    }
    // spans are blanked whole, so the buffer stays valid UTF-8
    *masked = String::from_utf8(bytes).unwrap_or_default();
}

/// Record the literal first-argument text of `INDIRECT(...)`/`OFFSET(...)`
/// calls as unresolved markers. Static references inside those arguments are
/// still picked up by the ordinary reference scan.
fn collect_indirection_args(body: &str, masked: &str, unresolved: &mut Vec<String>) {
    let upper = masked.to_ascii_uppercase();
    for func in ["INDIRECT(", "OFFSET("] {
        let mut search = 0;
        while let Some(pos) = upper[search..].find(func) {
            let open = search + pos + func.len();
            // call must not be the tail of a longer identifier
            let at = search + pos;
            let preceded = at > 0
                && upper.as_bytes()[at - 1]
                    .is_ascii_alphanumeric();
            if !preceded {
                if let Some(arg) = first_argument(&masked[open..]) {
                    let literal = body[open..open + arg.len()].trim().to_string();
                    if !literal.is_empty() && !unresolved.contains(&literal) {
                        unresolved.push(literal);
                    }
                }
            }
            search = open;
        }
    }
}

/// Slice up to the first top-level `,` or the matching `)`.
fn first_argument(rest: &str) -> Option<&str> {
    let mut depth = 0usize;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                if depth == 0 {
                    return Some(&rest[..idx]);
                }
                depth -= 1;
            }
            ',' if depth == 0 => return Some(&rest[..idx]),
            _ => {}
        }
    }
    None
}

/// Scan cell/range references; returns their byte spans for the named-range
/// pass to exclude.
fn collect_cell_refs(
    masked: &str,
    sheet_name: &str,
    coord: &str,
    deps: &mut FormulaDeps,
) -> Vec<(usize, usize)> {
    let re = Regex::new(CELL_REF).unwrap();
    let bytes = masked.as_bytes();
    let mut spans = Vec::new();

    for m in re.find_iter(masked) {
        // not the tail of a longer identifier
        if m.start() > 0 {
            let prev = bytes[m.start() - 1];
            if prev.is_ascii_alphanumeric() || matches!(prev, b'_' | b'$' | b'.') {
                continue;
            }
        }
        // a following `(` means function call, a following word char means
        // this was part of a longer identifier
        if let Some(&next) = bytes.get(m.end()) {
            if next == b'(' || next.is_ascii_alphanumeric() || next == b'_' {
                continue;
            }
        }

        spans.push((m.start(), m.end()));
        let token = m.as_str().replace(['$', '\''], "");
        if is_self_reference(&token, sheet_name, coord) {
            deps.circular = true;
        }
        if !deps.cell_refs.contains(&token) {
            deps.cell_refs.push(token);
        }
    }
    spans
}

fn is_self_reference(token: &str, sheet_name: &str, coord: &str) -> bool {
    if token.contains(':') {
        return false;
    }
    let qualified = format!("{sheet_name}!{coord}");
    token.eq_ignore_ascii_case(coord) || token.eq_ignore_ascii_case(&qualified)
}

/// Identifiers that resolve through the workbook's named-range table are
/// dependencies; anything else (function names, table/column identifiers,
/// stray words) is not.
fn collect_named_refs(
    masked: &str,
    ref_spans: &[(usize, usize)],
    named_ranges: &HashSet<String>,
    named_refs: &mut Vec<String>,
) {
    if named_ranges.is_empty() {
        return;
    }
    let re = Regex::new(IDENTIFIER).unwrap();
    let bytes = masked.as_bytes();

    for m in re.find_iter(masked) {
        if ref_spans
            .iter()
            .any(|&(s, e)| m.start() < e && m.end() > s)
        {
            continue;
        }
        if let Some(&next) = bytes.get(m.end()) {
            // function call or sheet qualifier
            if next == b'(' || next == b'!' {
                continue;
            }
        }
        let token = m.as_str();
        if BUILTIN_FUNCTIONS.contains(&token.to_ascii_uppercase().as_str()) {
            continue;
        }
        if named_ranges.contains(&token.to_ascii_lowercase()) {
            let owned = token.to_string();
            if !named_refs.contains(&owned) {
                named_refs.push(owned);
            }
        }
    }
}
