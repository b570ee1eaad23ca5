//! Column-type inference over sampled cell values.

use crate::types::{Cell, CellValue, ColumnType, Sheet};
use std::collections::{BTreeMap, HashMap};

/// Rows sampled per column when no row limit is configured.
pub const DEFAULT_SAMPLE_ROWS: usize = 50;

/// Classify one value by its native type. `None` for empties and errors,
/// which never vote.
fn classify(cell: &Cell) -> Option<ColumnType> {
    match &cell.value {
        CellValue::DateTime(_) => Some(ColumnType::Date),
        CellValue::Number(_) => {
            if cell.style.as_ref().is_some_and(|s| s.currency) {
                Some(ColumnType::Currency)
            } else {
                Some(ColumnType::Number)
            }
        }
        CellValue::Text(_) => Some(ColumnType::String),
        CellValue::Bool(_) => Some(ColumnType::Boolean),
        CellValue::Error(_) | CellValue::Empty => None,
    }
}

/// Infer the dominant type of a set of sampled cells: the type held by a
/// strict majority (>50%) of non-empty values, else `Mixed`. Returns `None`
/// when nothing voted.
pub fn infer_type<'a, I>(cells: I) -> Option<ColumnType>
where
    I: IntoIterator<Item = &'a Cell>,
{
    let mut votes: HashMap<ColumnType, usize> = HashMap::new();
    let mut total = 0usize;
    for cell in cells {
        if let Some(ty) = classify(cell) {
            *votes.entry(ty).or_insert(0) += 1;
            total += 1;
        }
    }
    if total == 0 {
        return None;
    }
    let winner = votes
        .into_iter()
        .find(|(_, count)| count * 2 > total)
        .map(|(ty, _)| ty);
    Some(winner.unwrap_or(ColumnType::Mixed))
}

/// Infer a type for every populated column of a sheet, sampling the first
/// `sample_rows` data rows below the header row. Keyed by column letter.
pub fn sheet_column_types(sheet: &Sheet, sample_rows: usize) -> BTreeMap<String, ColumnType> {
    let mut by_col: BTreeMap<u32, Vec<&Cell>> = BTreeMap::new();
    let last_row = 1 + sample_rows as u32;
    for (&(row, col), cell) in &sheet.cells {
        // row 1 is treated as the header row
        if row >= 2 && row <= last_row {
            by_col.entry(col).or_default().push(cell);
        }
    }

    let mut types = BTreeMap::new();
    for (col, cells) in by_col {
        if let Some(ty) = infer_type(cells.into_iter()) {
            types.insert(crate::types::column_letter(col), ty);
        }
    }
    types
}

/// Infer a type for a table column: samples the table's data rows (header
/// excluded), bounded by `sample_rows`.
pub fn table_column_type(
    sheet: &Sheet,
    col: u32,
    header_row: u32,
    last_row: u32,
    sample_rows: usize,
) -> Option<ColumnType> {
    let sample_end = (header_row + sample_rows as u32).min(last_row);
    let cells = ((header_row + 1)..=sample_end)
        .filter_map(|row| sheet.cells.get(&(row, col)));
    infer_type(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CellStyle;

    fn cell(value: CellValue) -> Cell {
        Cell {
            row: 1,
            col: 1,
            value,
            formula: None,
            style: None,
        }
    }

    fn currency_cell(n: f64) -> Cell {
        Cell {
            style: Some(CellStyle {
                number_format: Some("$#,##0.00".to_string()),
                currency: true,
                ..Default::default()
            }),
            ..cell(CellValue::Number(n))
        }
    }

    #[test]
    fn test_majority_wins() {
        // 4 of 6 numeric → number
        let cells = vec![
            cell(CellValue::Number(1.0)),
            cell(CellValue::Number(2.0)),
            cell(CellValue::Number(3.0)),
            cell(CellValue::Number(4.0)),
            cell(CellValue::Text("a".into())),
            cell(CellValue::Text("b".into())),
        ];
        assert_eq!(infer_type(cells.iter()), Some(ColumnType::Number));
    }

    #[test]
    fn test_even_split_is_mixed() {
        let cells = vec![
            cell(CellValue::Number(1.0)),
            cell(CellValue::Number(2.0)),
            cell(CellValue::Number(3.0)),
            cell(CellValue::Text("a".into())),
            cell(CellValue::Text("b".into())),
            cell(CellValue::Text("c".into())),
        ];
        assert_eq!(infer_type(cells.iter()), Some(ColumnType::Mixed));
    }

    #[test]
    fn test_empties_do_not_vote() {
        let cells = vec![
            cell(CellValue::Number(1.0)),
            cell(CellValue::Empty),
            cell(CellValue::Empty),
            cell(CellValue::Empty),
        ];
        assert_eq!(infer_type(cells.iter()), Some(ColumnType::Number));
    }

    #[test]
    fn test_all_empty_is_none() {
        let cells = vec![cell(CellValue::Empty)];
        assert_eq!(infer_type(cells.iter()), None);
    }

    #[test]
    fn test_currency_format_beats_plain_number() {
        let cells = vec![currency_cell(10.0), currency_cell(20.0), cell(CellValue::Number(5.0))];
        assert_eq!(infer_type(cells.iter()), Some(ColumnType::Currency));
    }

    #[test]
    fn test_dates_and_booleans() {
        let dates = vec![
            cell(CellValue::DateTime("2024-01-01".into())),
            cell(CellValue::DateTime("2024-01-02".into())),
        ];
        assert_eq!(infer_type(dates.iter()), Some(ColumnType::Date));

        let bools = vec![cell(CellValue::Bool(true)), cell(CellValue::Bool(false))];
        assert_eq!(infer_type(bools.iter()), Some(ColumnType::Boolean));
    }

    #[test]
    fn test_sheet_column_types_skip_header() {
        let mut sheet = Sheet::new("Data");
        sheet.max_row = 4;
        sheet.max_col = 2;
        // header row: text labels
        for (col, label) in [(1, "Project"), (2, "Amount")] {
            sheet.cells.insert(
                (1, col),
                Cell {
                    row: 1,
                    col,
                    value: CellValue::Text(label.into()),
                    formula: None,
                    style: None,
                },
            );
        }
        for row in 2..=4u32 {
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
        let types = sheet_column_types(&sheet, DEFAULT_SAMPLE_ROWS);
        // column A has only a header, so it gets no vote at all
        assert!(!types.contains_key("A"));
        assert_eq!(types.get("B"), Some(&ColumnType::Number));
    }

    #[test]
    fn test_sampling_is_bounded() {
        let mut sheet = Sheet::new("Data");
        sheet.max_row = 100;
        sheet.max_col = 1;
        for row in 2..=100u32 {
            // numbers in the sample window, text beyond it
            let value = if row <= 11 {
                CellValue::Number(row as f64)
            } else {
                CellValue::Text("x".into())
            };
            sheet.cells.insert(
                (row, 1),
                Cell {
                    row,
                    col: 1,
                    value,
                    formula: None,
                    style: None,
                },
            );
        }
        let types = sheet_column_types(&sheet, 10);
        assert_eq!(types.get("A"), Some(&ColumnType::Number));
    }
}
