//! Cell encoding: one cell of the model into its compact JSON record.

use crate::encode::keys::Keys;
use crate::extract::FormulaDeps;
use crate::types::{Cell, CellValue, ConvertOptions};
use serde_json::{json, Map, Value};

/// Encode one cell, or `None` when the cell should be omitted.
///
/// Omission rules, in order:
/// 1. formulas-only mode drops every cell without a formula;
/// 2. an empty cell (no value, no formula) is dropped unless it carries a
///    non-default style *and* formatting was requested — empty cells cost
///    tokens for no informational gain.
pub fn encode_cell(
    cell: &Cell,
    deps: Option<&FormulaDeps>,
    keys: &Keys,
    options: &ConvertOptions,
) -> Option<Value> {
    if options.formulas_only && cell.formula.is_none() {
        return None;
    }
    if cell.is_empty() && !(options.keep_formatting && !cell.has_default_style()) {
        return None;
    }

    let mut record = Map::new();

    let value = match &cell.formula {
        Some(formula) => {
            // formula cells nest the cached result next to the formula text
            let mut nested = Map::new();
            nested.insert(keys.key("formula").to_string(), json!(formula));
            nested.insert(
                keys.key("calculated_value").to_string(),
                encode_value(&cell.value),
            );
            Value::Object(nested)
        }
        None => encode_value(&cell.value),
    };
    record.insert(keys.key("value").to_string(), value);

    if let Some(deps) = deps {
        if !deps.is_empty() {
            record.insert(keys.key("dependencies").to_string(), encode_deps(deps, keys));
        }
    }

    if options.keep_formatting {
        if let Some(style) = &cell.style {
            if !style.is_default() {
                record.insert(keys.key("style").to_string(), encode_style(style, keys));
            }
        }
    }

    Some(Value::Object(record))
}

/// Literal values map straight onto JSON; whole numbers are emitted as
/// integers so `100` doesn't serialize as `100.0`.
pub fn encode_value(value: &CellValue) -> Value {
    match value {
        CellValue::Text(s) => json!(s),
        CellValue::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                json!(*n as i64)
            } else {
                json!(*n)
            }
        }
        CellValue::Bool(b) => json!(b),
        CellValue::DateTime(iso) => json!(iso),
        CellValue::Error(e) => json!(e),
        CellValue::Empty => Value::Null,
    }
}

fn encode_deps(deps: &FormulaDeps, keys: &Keys) -> Value {
    let mut map = Map::new();
    if !deps.cell_refs.is_empty() {
        map.insert(keys.key("cell_references").to_string(), json!(deps.cell_refs));
    }
    if !deps.named_refs.is_empty() {
        map.insert(
            keys.key("named_references").to_string(),
            json!(deps.named_refs),
        );
    }
    if !deps.unresolved.is_empty() {
        map.insert(keys.key("unresolved").to_string(), json!(deps.unresolved));
    }
    if deps.circular {
        map.insert(keys.key("circular").to_string(), json!(true));
    }
    Value::Object(map)
}

/// Only attributes differing from the default style are present.
fn encode_style(style: &crate::types::CellStyle, keys: &Keys) -> Value {
    let mut map = Map::new();
    if style.bold {
        map.insert(keys.key("bold").to_string(), json!(true));
    }
    if style.italic {
        map.insert(keys.key("italic").to_string(), json!(true));
    }
    if let Some(color) = &style.font_color {
        map.insert(keys.key("font_color").to_string(), json!(color));
    }
    if let Some(color) = &style.fill_color {
        map.insert(keys.key("fill_color").to_string(), json!(color));
    }
    if let Some(format) = &style.number_format {
        map.insert(keys.key("number_format").to_string(), json!(format));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CellStyle;
    use pretty_assertions::assert_eq;

    fn cell(value: CellValue, formula: Option<&str>) -> Cell {
        Cell {
            row: 2,
            col: 4,
            value,
            formula: formula.map(str::to_string),
            style: None,
        }
    }

    fn verbose() -> (Keys, ConvertOptions) {
        (
            Keys::new(false),
            ConvertOptions {
                abbreviate: false,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_plain_value() {
        let (keys, options) = verbose();
        let encoded = encode_cell(&cell(CellValue::Number(100.0), None), None, &keys, &options)
            .expect("encoded");
        assert_eq!(encoded, json!({"value": 100}));
    }

    #[test]
    fn test_formula_nests_cached_value_and_deps() {
        let (keys, options) = verbose();
        let deps = FormulaDeps {
            cell_refs: vec!["B2".into(), "C2".into()],
            ..Default::default()
        };
        let encoded = encode_cell(
            &cell(CellValue::Number(115.0), Some("=B2+C2")),
            Some(&deps),
            &keys,
            &options,
        )
        .expect("encoded");
        assert_eq!(
            encoded,
            json!({
                "value": {"formula": "=B2+C2", "calculated_value": 115},
                "dependencies": {"cell_references": ["B2", "C2"]}
            })
        );
    }

    #[test]
    fn test_abbreviated_keys() {
        let keys = Keys::new(true);
        let options = ConvertOptions::default();
        let deps = FormulaDeps {
            cell_refs: vec!["B2".into()],
            ..Default::default()
        };
        let encoded = encode_cell(
            &cell(CellValue::Number(5.0), Some("=B2*1")),
            Some(&deps),
            &keys,
            &options,
        )
        .expect("encoded");
        assert_eq!(
            encoded,
            json!({
                "v": {"f": "=B2*1", "cv": 5},
                "d": {"cr": ["B2"]}
            })
        );
    }

    #[test]
    fn test_formulas_only_omits_plain_cells() {
        let keys = Keys::new(true);
        let options = ConvertOptions {
            formulas_only: true,
            ..Default::default()
        };
        assert!(encode_cell(&cell(CellValue::Number(1.0), None), None, &keys, &options).is_none());
        assert!(
            encode_cell(&cell(CellValue::Empty, Some("=A1")), None, &keys, &options).is_some()
        );
    }

    #[test]
    fn test_empty_cell_omitted_unless_styled_and_formatting_kept() {
        let keys = Keys::new(true);
        let plain = ConvertOptions::default();
        let formatted = ConvertOptions {
            keep_formatting: true,
            ..Default::default()
        };

        let empty = cell(CellValue::Empty, None);
        assert!(encode_cell(&empty, None, &keys, &plain).is_none());
        assert!(encode_cell(&empty, None, &keys, &formatted).is_none());

        let styled = Cell {
            style: Some(CellStyle {
                bold: true,
                ..Default::default()
            }),
            ..empty
        };
        assert!(encode_cell(&styled, None, &keys, &plain).is_none());
        assert!(encode_cell(&styled, None, &keys, &formatted).is_some());
    }

    #[test]
    fn test_style_only_non_default_attributes() {
        let (keys, mut options) = verbose();
        options.keep_formatting = true;
        let styled = Cell {
            style: Some(CellStyle {
                bold: true,
                number_format: Some("0.00%".to_string()),
                ..Default::default()
            }),
            ..cell(CellValue::Number(0.5), None)
        };
        let encoded = encode_cell(&styled, None, &keys, &options).expect("encoded");
        assert_eq!(
            encoded,
            json!({
                "value": 0.5,
                "style": {"bold": true, "number_format": "0.00%"}
            })
        );
    }

    #[test]
    fn test_circular_flag_surfaces() {
        let keys = Keys::new(true);
        let options = ConvertOptions::default();
        let deps = FormulaDeps {
            cell_refs: vec!["D2".into()],
            circular: true,
            ..Default::default()
        };
        let encoded = encode_cell(
            &cell(CellValue::Empty, Some("=D2+1")),
            Some(&deps),
            &keys,
            &options,
        )
        .expect("encoded");
        assert_eq!(encoded["d"]["circ"], json!(true));
    }

    #[test]
    fn test_fractional_numbers_stay_fractional() {
        assert_eq!(encode_value(&CellValue::Number(1.5)), json!(1.5));
        assert_eq!(encode_value(&CellValue::Number(3.0)), json!(3));
    }
}
