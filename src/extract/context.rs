//! Enriched-context descriptors: tables, pivot tables and implementation
//! notes for the consumer of the document.

use crate::extract::columns;
use crate::types::{parse_cell_ref, ColumnType, Sheet, TableInfo, Workbook};

/// A table descriptor ready for encoding: the source table plus inferred
/// per-column types.
#[derive(Debug, Clone, PartialEq)]
pub struct TableContext {
    pub name: String,
    pub sheet: String,
    pub range: String,
    pub header_row: u32,
    pub columns: Vec<TableColumnContext>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableColumnContext {
    pub name: String,
    pub letter: String,
    pub column_type: Option<ColumnType>,
}

/// Build descriptors for every recognized table, inferring column types from
/// the table's own data rows (header excluded).
pub fn table_contexts(workbook: &Workbook, sample_rows: usize) -> Vec<TableContext> {
    workbook
        .tables
        .iter()
        .map(|table| {
            let sheet = workbook.sheet(&table.sheet);
            TableContext {
                name: table.name.clone(),
                sheet: table.sheet.clone(),
                range: table.range.clone(),
                header_row: table.header_row,
                columns: table_columns(table, sheet, sample_rows),
            }
        })
        .collect()
}

fn table_columns(
    table: &TableInfo,
    sheet: Option<&Sheet>,
    sample_rows: usize,
) -> Vec<TableColumnContext> {
    let last_row = table
        .range
        .split_once(':')
        .and_then(|(_, end)| parse_cell_ref(end))
        .map(|(row, _)| row)
        .unwrap_or(table.header_row);

    table
        .columns
        .iter()
        .map(|(name, letter)| {
            let column_type = sheet.and_then(|s| {
                let (_, col) = parse_cell_ref(&format!("{letter}1"))?;
                columns::table_column_type(s, col, table.header_row, last_row, sample_rows)
            });
            TableColumnContext {
                name: name.clone(),
                letter: letter.clone(),
                column_type,
            }
        })
        .collect()
}

/// Static notes that help a consumer interpret the document. Data-driven:
/// only notes relevant to this workbook are emitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImplementationNotes {
    pub structured_references: Option<&'static str>,
    pub pivot_tables: Option<&'static str>,
}

pub fn implementation_notes(workbook: &Workbook) -> ImplementationNotes {
    let mut notes = ImplementationNotes::default();

    let has_structured_refs = workbook.sheets.iter().any(|sheet| {
        sheet
            .cells
            .values()
            .any(|cell| cell.formula.as_deref().is_some_and(|f| f.contains("[[#")))
    });
    if has_structured_refs {
        notes.structured_references = Some(
            "Table[[#This Row],[Column]] refers to the value in the current row \
             of the named column of that table",
        );
    }

    if workbook.sheets.iter().any(|s| !s.pivot_tables.is_empty()) {
        notes.pivot_tables = Some(
            "pivot tables are summary views over their source range; rebuild \
             them from the raw data when reproducing this workbook",
        );
    }

    notes
}
