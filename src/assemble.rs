//! Document assembly: the loaded workbook model becomes the output JSON.

use crate::encode::{encode_cell, keys, Keys};
use crate::error::{ConvertResult, ExtractionWarning};
use crate::extract::{columns, context, dependencies, patterns};
use crate::tokens::TokenCounter;
use crate::types::{ConvertOptions, RangeScope, Sheet, Workbook};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// The fully assembled document plus the figures the CLI reports.
#[derive(Debug)]
pub struct AssembledDocument {
    pub json: Value,
    pub token_count: usize,
}

/// Build the output document for one workbook.
///
/// The token count is computed over the serialized document *before* the
/// metadata block is attached, so converting the same workbook twice yields
/// identical output except for the timestamp.
pub fn assemble(
    workbook: &Workbook,
    options: &ConvertOptions,
    counter: &dyn TokenCounter,
    timestamp: &str,
    warnings: &mut Vec<ExtractionWarning>,
) -> ConvertResult<AssembledDocument> {
    let keys = Keys::new(options.abbreviate);
    let named_set: HashSet<String> = workbook
        .named_ranges
        .iter()
        .map(|nr| nr.name.to_ascii_lowercase())
        .collect();

    let mut doc = Map::new();
    doc.insert(
        keys.key("file_name").to_string(),
        json!(workbook.file_name),
    );
    doc.insert(
        keys.key("named_ranges").to_string(),
        encode_named_ranges(workbook, &keys),
    );

    let mut sheets = Map::new();
    for sheet in &workbook.sheets {
        sheets.insert(
            sheet.name.clone(),
            encode_sheet(sheet, options, &keys, &named_set, warnings),
        );
    }
    doc.insert(keys.key("sheets").to_string(), Value::Object(sheets));

    if options.enrich {
        doc.insert(
            keys.key("enriched_context").to_string(),
            enriched_context(workbook, options, &keys),
        );
    }

    let mut json = Value::Object(doc);
    let serialized = serialize(&json, options)?;
    let token_count = counter.count(&serialized);

    let mut metadata = Map::new();
    metadata.insert(keys.key("token_count").to_string(), json!(token_count));
    metadata.insert(
        keys.key("conversion_timestamp").to_string(),
        json!(timestamp),
    );
    metadata.insert(
        keys.key("original_filename").to_string(),
        json!(workbook.file_name),
    );
    if let Value::Object(ref mut doc) = json {
        doc.insert(keys.key("metadata").to_string(), Value::Object(metadata));
    }

    Ok(AssembledDocument { json, token_count })
}

/// Serialize per the minify setting. Write happens only after this succeeds,
/// so a failing run never leaves a partial output file.
pub fn serialize(doc: &Value, options: &ConvertOptions) -> ConvertResult<String> {
    let result = if options.minify {
        serde_json::to_string(doc)
    } else {
        serde_json::to_string_pretty(doc)
    };
    result.map_err(|e| crate::error::ConvertError::Assembly(e.to_string()))
}

fn encode_named_ranges(workbook: &Workbook, keys: &Keys) -> Value {
    let mut map = Map::new();
    for nr in &workbook.named_ranges {
        let scope = match &nr.scope {
            RangeScope::Workbook => "workbook".to_string(),
            RangeScope::Sheet(sheet) => sheet.clone(),
        };
        let mut entry = Map::new();
        entry.insert(keys.key("value").to_string(), json!(nr.target));
        entry.insert(keys.key("scope").to_string(), json!(scope));
        map.insert(nr.name.clone(), Value::Object(entry));
    }
    Value::Object(map)
}

/// The last row the row limit allows: the header row plus `limit` data rows.
fn effective_last_row(sheet: &Sheet, options: &ConvertOptions) -> u32 {
    match options.row_limit {
        Some(limit) => sheet.max_row.min(limit as u32 + 1),
        None => sheet.max_row,
    }
}

fn encode_sheet(
    sheet: &Sheet,
    options: &ConvertOptions,
    keys: &Keys,
    named_set: &HashSet<String>,
    warnings: &mut Vec<ExtractionWarning>,
) -> Value {
    let mut out = Map::new();

    let mut metadata = Map::new();
    metadata.insert(keys.key("title").to_string(), json!(sheet.name));
    if let Some(dims) = sheet.dimensions() {
        metadata.insert(keys.key("dimensions").to_string(), json!(dims));
    }
    metadata.insert(keys.key("max_row").to_string(), json!(sheet.max_row));
    metadata.insert(keys.key("max_column").to_string(), json!(sheet.max_col));
    out.insert(keys.key("metadata").to_string(), Value::Object(metadata));

    let last_row = effective_last_row(sheet, options);
    let mut cells = Map::new();
    for cell in sheet.cells.values() {
        if cell.row > last_row {
            // BTreeMap iteration is row-major, nothing below will match
            break;
        }
        let coord = cell.coord();
        let deps = cell.formula.as_deref().map(|formula| {
            let deps = dependencies::extract(formula, &sheet.name, &coord, named_set);
            if deps.circular {
                warnings.push(ExtractionWarning::new(
                    format!("{}!{}", sheet.name, coord),
                    "formula references its own cell (circular)",
                ));
            }
            deps
        });
        if let Some(encoded) = encode_cell(cell, deps.as_ref(), keys, options) {
            cells.insert(coord, encoded);
        }
    }
    out.insert(keys.key("cells").to_string(), Value::Object(cells));

    // structural blocks are omitted when empty; they'd cost tokens for no
    // informational gain
    if !sheet.merged.is_empty() {
        out.insert(keys.key("merged_cells").to_string(), json!(sheet.merged));
    }
    if !sheet.conditional_formatting.is_empty() {
        let rules: Vec<Value> = sheet
            .conditional_formatting
            .iter()
            .map(|rule| {
                let mut r = Map::new();
                r.insert(keys.key("range").to_string(), json!(rule.range));
                r.insert(keys.key("type").to_string(), json!(rule.rule_type));
                r.insert(keys.key("priority").to_string(), json!(rule.priority));
                if let Some(op) = &rule.operator {
                    r.insert(keys.key("operator").to_string(), json!(op));
                }
                if !rule.formulas.is_empty() {
                    r.insert(keys.key("formulas").to_string(), json!(rule.formulas));
                }
                Value::Object(r)
            })
            .collect();
        out.insert(
            keys.key("conditional_formatting").to_string(),
            Value::Array(rules),
        );
    }
    if let Some(protection) = &sheet.protection {
        let mut p = Map::new();
        p.insert(keys.key("enabled").to_string(), json!(protection.enabled));
        p.insert(
            keys.key("password_protected").to_string(),
            json!(protection.password_protected),
        );
        if !protection.options.is_empty() {
            p.insert(keys.key("options").to_string(), json!(protection.options));
        }
        out.insert(keys.key("protection").to_string(), Value::Object(p));
    }
    if let Some(view) = &sheet.view {
        let mut v = Map::new();
        if view.frozen_rows > 0 || view.frozen_cols > 0 {
            v.insert(keys.key("frozen_rows").to_string(), json!(view.frozen_rows));
            v.insert(keys.key("frozen_cols").to_string(), json!(view.frozen_cols));
        }
        if view.zoom_scale != 100 {
            v.insert(keys.key("zoom_scale").to_string(), json!(view.zoom_scale));
        }
        if !view.show_gridlines {
            v.insert(keys.key("show_gridlines").to_string(), json!(false));
        }
        if !view.hidden_rows.is_empty() {
            v.insert(keys.key("hidden_rows").to_string(), json!(view.hidden_rows));
        }
        if !view.hidden_cols.is_empty() {
            v.insert(
                keys.key("hidden_columns").to_string(),
                json!(view.hidden_cols),
            );
        }
        out.insert(keys.key("view_settings").to_string(), Value::Object(v));
    }

    Value::Object(out)
}

fn enriched_context(workbook: &Workbook, options: &ConvertOptions, keys: &Keys) -> Value {
    let sample_rows = options.row_limit.unwrap_or(columns::DEFAULT_SAMPLE_ROWS);
    let mut context_map = Map::new();

    // column types, per sheet
    let mut column_types = Map::new();
    for sheet in &workbook.sheets {
        let types = columns::sheet_column_types(sheet, sample_rows);
        if !types.is_empty() {
            let sheet_types: Map<String, Value> = types
                .into_iter()
                .map(|(letter, ty)| (letter, json!(ty.as_str())))
                .collect();
            column_types.insert(sheet.name.clone(), Value::Object(sheet_types));
        }
    }
    context_map.insert(
        keys.key("column_types").to_string(),
        Value::Object(column_types),
    );

    // repeated formula shapes, counted across the whole workbook
    let formulas = workbook
        .sheets
        .iter()
        .flat_map(|s| s.cells.values())
        .filter_map(|c| c.formula.as_deref());
    let mut pattern_map = Map::new();
    for pattern in patterns::extract_patterns(formulas) {
        let mut entry = Map::new();
        entry.insert(keys.key("count").to_string(), json!(pattern.count));
        entry.insert(keys.key("example").to_string(), json!(pattern.example));
        pattern_map.insert(pattern.pattern, Value::Object(entry));
    }
    context_map.insert(
        keys.key("formula_patterns").to_string(),
        Value::Object(pattern_map),
    );

    // tables with inferred column types
    let mut tables = Map::new();
    for table in context::table_contexts(workbook, sample_rows) {
        let columns: Vec<Value> = table
            .columns
            .iter()
            .map(|col| {
                let mut c = Map::new();
                c.insert(keys.key("name").to_string(), json!(col.name));
                c.insert("col".to_string(), json!(col.letter));
                if let Some(ty) = col.column_type {
                    c.insert(keys.key("type").to_string(), json!(ty.as_str()));
                }
                Value::Object(c)
            })
            .collect();
        let mut entry = Map::new();
        entry.insert(keys.key("range").to_string(), json!(table.range));
        entry.insert(keys.key("header_row").to_string(), json!(table.header_row));
        entry.insert(keys.key("columns").to_string(), Value::Array(columns));
        tables.insert(table.name.clone(), Value::Object(entry));
    }
    context_map.insert(keys.key("tables").to_string(), Value::Object(tables));

    // pivot tables, grouped by anchor sheet
    let mut pivots = Map::new();
    for sheet in &workbook.sheets {
        if sheet.pivot_tables.is_empty() {
            continue;
        }
        let list: Vec<Value> = sheet
            .pivot_tables
            .iter()
            .map(|pivot| {
                let fields: Vec<Value> = pivot
                    .fields
                    .iter()
                    .map(|field| {
                        let mut f = Map::new();
                        f.insert(keys.key("name").to_string(), json!(field.name));
                        f.insert(keys.key("role").to_string(), json!(field.role.as_str()));
                        if let Some(agg) = &field.aggregation {
                            f.insert(keys.key("function").to_string(), json!(agg));
                        }
                        Value::Object(f)
                    })
                    .collect();
                let mut p = Map::new();
                p.insert(keys.key("name").to_string(), json!(pivot.name));
                if let Some(location) = &pivot.location {
                    p.insert(keys.key("location").to_string(), json!(location));
                }
                if let Some(source) = &pivot.source {
                    p.insert(keys.key("source").to_string(), json!(source));
                }
                p.insert(keys.key("fields").to_string(), Value::Array(fields));
                Value::Object(p)
            })
            .collect();
        pivots.insert(sheet.name.clone(), Value::Array(list));
    }
    context_map.insert(keys.key("pivot_tables").to_string(), Value::Object(pivots));

    // implementation notes, including the reverse key map so abbreviated
    // documents stay self-describing
    let notes = context::implementation_notes(workbook);
    let mut notes_map = Map::new();
    if let Some(note) = notes.structured_references {
        notes_map.insert(keys.key("structured_references").to_string(), json!(note));
    }
    if let Some(note) = notes.pivot_tables {
        notes_map.insert(keys.key("pivot_tables").to_string(), json!(note));
    }
    if keys.abbreviated() {
        notes_map.insert(keys.key("key_map").to_string(), keys::reverse_map_json());
    }
    context_map.insert(
        keys.key("implementation_notes").to_string(),
        Value::Object(notes_map),
    );

    Value::Object(context_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::HeuristicTokenCounter;
    use crate::types::{Cell, CellValue};
    use pretty_assertions::assert_eq;

    fn scenario_workbook() -> Workbook {
        // the end-to-end scenario sheet: headers, two literals, one formula
        let mut sheet = Sheet::new("Sheet1");
        sheet.max_row = 2;
        sheet.max_col = 4;
        let data: Vec<(u32, u32, CellValue, Option<&str>)> = vec![
            (1, 1, CellValue::Text("Project".into()), None),
            (1, 2, CellValue::Text("Amount".into()), None),
            (2, 1, CellValue::Text("A".into()), None),
            (2, 2, CellValue::Number(100.0), None),
            (2, 3, CellValue::Number(15.0), None),
            (2, 4, CellValue::Number(115.0), Some("=B2+C2")),
        ];
        for (row, col, value, formula) in data {
            sheet.cells.insert(
                (row, col),
                Cell {
                    row,
                    col,
                    value,
                    formula: formula.map(str::to_string),
                    style: None,
                },
            );
        }
        Workbook {
            file_name: "scenario.xlsx".to_string(),
            sheets: vec![sheet],
            named_ranges: vec![],
            tables: vec![],
        }
    }

    fn assemble_with(workbook: &Workbook, options: &ConvertOptions) -> AssembledDocument {
        let mut warnings = Vec::new();
        assemble(
            workbook,
            options,
            &HeuristicTokenCounter,
            "20250101_120000",
            &mut warnings,
        )
        .expect("assemble")
    }

    fn verbose_options() -> ConvertOptions {
        ConvertOptions {
            abbreviate: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_end_to_end_scenario() {
        let doc = assemble_with(&scenario_workbook(), &verbose_options());
        let d2 = &doc.json["sheets"]["Sheet1"]["cells"]["D2"];
        assert_eq!(d2["value"]["formula"], json!("=B2+C2"));
        assert_eq!(d2["value"]["calculated_value"], json!(115));
        assert_eq!(
            d2["dependencies"]["cell_references"],
            json!(["B2", "C2"])
        );
    }

    #[test]
    fn test_formulas_only_retains_only_d2() {
        let options = ConvertOptions {
            formulas_only: true,
            abbreviate: false,
            ..Default::default()
        };
        let doc = assemble_with(&scenario_workbook(), &options);
        let cells = doc.json["sheets"]["Sheet1"]["cells"].as_object().unwrap();
        assert_eq!(cells.keys().collect::<Vec<_>>(), vec!["D2"]);
    }

    #[test]
    fn test_row_limit_keeps_header_plus_n_rows() {
        let mut workbook = scenario_workbook();
        let sheet = &mut workbook.sheets[0];
        sheet.max_row = 12;
        for row in 3..=12u32 {
            sheet.cells.insert(
                (row, 2),
                Cell {
                    row,
                    col: 2,
                    value: CellValue::Number(row as f64),
                    formula: None,
                    style: None,
                },
            );
        }
        // a formula inside the window referencing beyond it
        sheet.cells.insert(
            (3, 4),
            Cell {
                row: 3,
                col: 4,
                value: CellValue::Number(0.0),
                formula: Some("=SUM(B3:B12)".to_string()),
                style: None,
            },
        );

        let options = ConvertOptions {
            row_limit: Some(2),
            abbreviate: false,
            ..Default::default()
        };
        let doc = assemble_with(&workbook, &options);
        let cells = doc.json["sheets"]["Sheet1"]["cells"].as_object().unwrap();

        // header row + data rows 2 and 3 survive, row 4+ does not
        assert!(cells.contains_key("A1"));
        assert!(cells.contains_key("B3"));
        assert!(!cells.contains_key("B4"));
        // dependencies beyond the window are still recorded
        assert_eq!(
            doc.json["sheets"]["Sheet1"]["cells"]["D3"]["dependencies"]["cell_references"],
            json!(["B3:B12"])
        );
        // sheet metadata keeps the untruncated bounds
        assert_eq!(doc.json["sheets"]["Sheet1"]["metadata"]["max_row"], json!(12));
    }

    #[test]
    fn test_idempotent_except_timestamp() {
        let workbook = scenario_workbook();
        let options = ConvertOptions::default();
        let mut w1 = Vec::new();
        let mut w2 = Vec::new();
        let a = assemble(&workbook, &options, &HeuristicTokenCounter, "20250101_000000", &mut w1)
            .unwrap();
        let b = assemble(&workbook, &options, &HeuristicTokenCounter, "20250102_000000", &mut w2)
            .unwrap();
        assert_eq!(a.token_count, b.token_count);
        let mut ja = a.json;
        let mut jb = b.json;
        ja["m"]["ts"] = json!("X");
        jb["m"]["ts"] = json!("X");
        assert_eq!(ja, jb);
    }

    #[test]
    fn test_formula_patterns_in_context() {
        let mut workbook = scenario_workbook();
        workbook.sheets[0].cells.insert(
            (3, 4),
            Cell {
                row: 3,
                col: 4,
                value: CellValue::Number(0.0),
                formula: Some("=B3+C3".to_string()),
                style: None,
            },
        );
        let doc = assemble_with(&workbook, &verbose_options());
        let pattern = &doc.json["enriched_context"]["formula_patterns"]["=B#+C#"];
        assert_eq!(pattern["count"], json!(2));
        assert_eq!(pattern["example"], json!("=B2+C2"));
    }

    #[test]
    fn test_circular_reference_warned() {
        let mut workbook = scenario_workbook();
        workbook.sheets[0].cells.insert(
            (5, 1),
            Cell {
                row: 5,
                col: 1,
                value: CellValue::Empty,
                formula: Some("=A5+1".to_string()),
                style: None,
            },
        );
        workbook.sheets[0].max_row = 5;
        let mut warnings = Vec::new();
        let _ = assemble(
            &workbook,
            &ConvertOptions::default(),
            &HeuristicTokenCounter,
            "20250101_000000",
            &mut warnings,
        )
        .unwrap();
        assert!(warnings.iter().any(|w| w.context == "Sheet1!A5"));
    }

    #[test]
    fn test_abbreviated_document_embeds_key_map() {
        let doc = assemble_with(&scenario_workbook(), &ConvertOptions::default());
        let key_map = &doc.json["ec"]["in"]["km"];
        assert_eq!(key_map["v"], json!("value"));
        assert_eq!(key_map["cv"], json!("calculated_value"));
    }

    #[test]
    fn test_metadata_attached_after_token_count() {
        let doc = assemble_with(&scenario_workbook(), &verbose_options());
        assert_eq!(doc.json["metadata"]["token_count"], json!(doc.token_count));
        assert_eq!(
            doc.json["metadata"]["conversion_timestamp"],
            json!("20250101_120000")
        );
        assert_eq!(
            doc.json["metadata"]["original_filename"],
            json!("scenario.xlsx")
        );
    }
}
