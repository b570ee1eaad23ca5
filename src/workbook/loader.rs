//! Workbook loading: calamine for cell data, the part reader for structure.

use crate::error::{ConvertError, ConvertResult, ExtractionWarning};
use crate::types::{Cell, CellStyle, CellValue, Sheet, Workbook};
use crate::workbook::parts::{self, SheetParts};
use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use chrono::{Duration, NaiveDate, NaiveTime};
use std::path::Path;

/// Open and snapshot a workbook.
///
/// Fatal conditions (missing file, unsupported extension, corrupt container)
/// return [`ConvertError::Unreadable`]; problems with optional structure are
/// pushed onto `warnings` and the load continues.
pub fn load_workbook(
    path: &Path,
    warnings: &mut Vec<ExtractionWarning>,
) -> ConvertResult<Workbook> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    if !matches!(extension.as_deref(), Some("xlsx") | Some("xlsm")) {
        return Err(ConvertError::unreadable(
            path,
            "unsupported extension (expected .xlsx or .xlsm)",
        ));
    }
    if !path.exists() {
        return Err(ConvertError::unreadable(path, "file not found"));
    }

    let mut xlsx: Xlsx<_> = open_workbook(path)
        .map_err(|e| ConvertError::unreadable(path, format!("not a readable workbook: {e}")))?;

    let workbook_parts = parts::read_parts(path, warnings).unwrap_or_default();

    let sheet_names = xlsx.sheet_names().to_vec();
    let mut sheets = Vec::with_capacity(sheet_names.len());
    for name in &sheet_names {
        let mut sheet = Sheet::new(name.clone());

        match xlsx.worksheet_range(name) {
            Ok(range) => populate_values(&mut sheet, &range),
            Err(e) => warnings.push(ExtractionWarning::new(
                name.clone(),
                format!("cannot read cell values: {e}"),
            )),
        }
        match xlsx.worksheet_formula(name) {
            Ok(formulas) => overlay_formulas(&mut sheet, &formulas),
            Err(e) => warnings.push(ExtractionWarning::new(
                name.clone(),
                format!("cannot read formulas: {e}"),
            )),
        }
        if let Some(sheet_parts) = workbook_parts.sheets.get(name) {
            apply_parts(&mut sheet, sheet_parts, &workbook_parts.styles);
        }

        sheets.push(sheet);
    }

    Ok(Workbook {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        sheets,
        named_ranges: workbook_parts.named_ranges,
        tables: workbook_parts.tables,
    })
}

/// Copy the used range into the sparse cell map. Values of formula cells are
/// the cached results saved in the file.
fn populate_values(sheet: &mut Sheet, range: &Range<Data>) {
    let Some((start_row, start_col)) = range.start() else {
        return;
    };
    let Some((end_row, end_col)) = range.end() else {
        return;
    };
    sheet.max_row = end_row + 1;
    sheet.max_col = end_col + 1;

    for (row_idx, row) in range.rows().enumerate() {
        let row_num = start_row + row_idx as u32 + 1;
        for (col_idx, data) in row.iter().enumerate() {
            let col_num = start_col + col_idx as u32 + 1;
            let value = match convert_data(data) {
                Some(v) => v,
                None => continue,
            };
            sheet.cells.insert(
                (row_num, col_num),
                Cell {
                    row: row_num,
                    col: col_num,
                    value,
                    formula: None,
                    style: None,
                },
            );
        }
    }
}

fn convert_data(data: &Data) -> Option<CellValue> {
    match data {
        Data::Empty => None,
        Data::String(s) => Some(CellValue::Text(s.clone())),
        Data::Float(f) => Some(CellValue::Number(*f)),
        Data::Int(i) => Some(CellValue::Number(*i as f64)),
        Data::Bool(b) => Some(CellValue::Bool(*b)),
        Data::Error(e) => Some(CellValue::Error(format!("#{e:?}"))),
        Data::DateTime(dt) => Some(CellValue::DateTime(serial_to_iso(dt.as_f64()))),
        Data::DateTimeIso(s) => Some(CellValue::DateTime(s.clone())),
        Data::DurationIso(s) => Some(CellValue::Text(s.clone())),
    }
}

/// Convert an Excel serial date to ISO-8601 text.
///
/// Assumes the 1900 date system; serials below 60 predate Excel's phantom
/// 1900-02-29 and need the shifted epoch.
fn serial_to_iso(serial: f64) -> String {
    let mut days = serial.floor() as i64;
    let mut secs = ((serial - serial.floor()) * 86_400.0).round() as i64;
    if secs >= 86_400 {
        days += 1;
        secs = 0;
    }

    if days == 0 {
        let time = NaiveTime::from_num_seconds_from_midnight_opt(secs as u32, 0)
            .unwrap_or(NaiveTime::MIN);
        return time.format("%H:%M:%S").to_string();
    }

    let epoch = if days < 60 {
        NaiveDate::from_ymd_opt(1899, 12, 31)
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)
    };
    let Some(epoch) = epoch else {
        return format!("{serial}");
    };
    let date = epoch + Duration::days(days);
    if secs == 0 {
        date.format("%Y-%m-%d").to_string()
    } else {
        let time = NaiveTime::from_num_seconds_from_midnight_opt(secs as u32, 0)
            .unwrap_or(NaiveTime::MIN);
        format!("{}T{}", date.format("%Y-%m-%d"), time.format("%H:%M:%S"))
    }
}

/// Attach formula text to cells. calamine strips the leading `=`; it is
/// restored here. A formula with no cached value still gets a cell, so the
/// formula-cell invariant holds.
fn overlay_formulas(sheet: &mut Sheet, formulas: &Range<String>) {
    let Some((start_row, start_col)) = formulas.start() else {
        return;
    };
    for (row_idx, row) in formulas.rows().enumerate() {
        let row_num = start_row + row_idx as u32 + 1;
        for (col_idx, text) in row.iter().enumerate() {
            if text.is_empty() {
                continue;
            }
            let col_num = start_col + col_idx as u32 + 1;
            let formula = if text.starts_with('=') {
                text.clone()
            } else {
                format!("={text}")
            };
            sheet
                .cells
                .entry((row_num, col_num))
                .or_insert_with(|| Cell {
                    row: row_num,
                    col: col_num,
                    value: CellValue::Empty,
                    formula: None,
                    style: None,
                })
                .formula = Some(formula);
            sheet.max_row = sheet.max_row.max(row_num);
            sheet.max_col = sheet.max_col.max(col_num);
        }
    }
}

/// Merge the XML-part structure into the sheet: merges, conditional
/// formatting, protection, view settings, pivots, and per-cell styles.
/// Styled-but-valueless cells are materialized so `--keep-formatting` can
/// encode them.
fn apply_parts(sheet: &mut Sheet, sheet_parts: &SheetParts, styles: &[CellStyle]) {
    sheet.merged = sheet_parts.merged.clone();
    sheet.conditional_formatting = sheet_parts.conditional_formatting.clone();
    sheet.protection = sheet_parts.protection.clone();
    sheet.view = sheet_parts.view.clone();
    sheet.pivot_tables = sheet_parts.pivot_tables.clone();

    for &(row, col, style_id) in &sheet_parts.cell_styles {
        let Some(style) = styles.get(style_id as usize) else {
            continue;
        };
        if style.is_default() {
            continue;
        }
        sheet
            .cells
            .entry((row, col))
            .or_insert_with(|| Cell {
                row,
                col,
                value: CellValue::Empty,
                formula: None,
                style: None,
            })
            .style = Some(style.clone());
    }
}
