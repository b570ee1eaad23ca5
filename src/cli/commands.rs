use crate::assemble::{assemble, AssembledDocument};
use crate::encode::Keys;
use crate::error::{ConvertError, ConvertResult, ExtractionWarning};
use crate::output::write_document;
use crate::tokens::{model_recommendation, HeuristicTokenCounter, TokenCounter};
use crate::types::{ConvertOptions, OutputConfig, Workbook};
use crate::workbook::load_workbook;
use colored::Colorize;
use regex::Regex;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Matches cross-workbook references like `[Budget.xlsx]Sheet1!A1` (also the
/// quoted form `'[Budget.xlsx]Sheet 1'!A1`; the quote lands in the sheet
/// group and is trimmed).
const CROSS_WB_REF: &str = r"\[([^\]]+)\]([^!]+)!(\$?[A-Za-z]{1,3}\$?[0-9]{1,7})";

fn print_info(message: &str) {
    println!("{}", message.cyan());
}

fn print_success(message: &str) {
    println!("{}", message.green());
}

fn print_warning(message: &str) {
    println!("{}", message.yellow());
}

fn print_error(message: &str) {
    eprintln!("{}", message.red());
}

fn timestamp_now() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// What one conversion produced, for per-run and batch reporting.
struct ConversionReport {
    output: PathBuf,
    token_count: usize,
    warnings: Vec<ExtractionWarning>,
}

/// Execute the convert command for a single workbook.
pub fn convert(
    file: PathBuf,
    options: ConvertOptions,
    config: OutputConfig,
    verbose: bool,
) -> ConvertResult<()> {
    println!("{}", "tokensheet - converting workbook".bold().green());
    println!("   File: {}", file.display());
    if let Some(limit) = options.row_limit {
        println!("   Row limit: {limit} data rows per sheet");
    }
    println!();

    let report = convert_one(&file, &options, &config, &HeuristicTokenCounter, verbose)?;

    report_warnings(&report.warnings);
    print_success(&format!(
        "✓ Saved {} ({} tokens)",
        report.output.display(),
        report.token_count
    ));
    print_info(&format!(
        "   Model fit: {}",
        model_recommendation(report.token_count)
    ));
    Ok(())
}

fn convert_one(
    file: &Path,
    options: &ConvertOptions,
    config: &OutputConfig,
    counter: &dyn TokenCounter,
    verbose: bool,
) -> ConvertResult<ConversionReport> {
    let mut warnings = Vec::new();

    if verbose {
        print_info(&format!("Loading workbook: {}", file.display()));
    }
    let workbook = load_workbook(file, &mut warnings)?;
    if verbose {
        print_info(&format!(
            "   {} sheets, {} named ranges, {} tables",
            workbook.sheets.len(),
            workbook.named_ranges.len(),
            workbook.tables.len()
        ));
    }

    let timestamp = timestamp_now();
    let document = assemble(&workbook, options, counter, &timestamp, &mut warnings)?;
    let output = write_document(&document, file, &timestamp, options, config)?;

    Ok(ConversionReport {
        output,
        token_count: document.token_count,
        warnings,
    })
}

fn report_warnings(warnings: &[ExtractionWarning]) {
    for warning in warnings {
        print_warning(&format!("⚠ {warning}"));
    }
    if !warnings.is_empty() {
        print_warning(&format!(
            "⚠ {} extraction warning(s); affected attributes were omitted",
            warnings.len()
        ));
    }
}

/// Execute the batch command: convert every workbook found under the given
/// paths, one at a time, then summarize.
pub fn batch(
    paths: Vec<PathBuf>,
    options: ConvertOptions,
    config: OutputConfig,
    verbose: bool,
) -> ConvertResult<()> {
    let files = find_workbooks(&paths);
    if files.is_empty() {
        return Err(ConvertError::Input(
            "no .xlsx/.xlsm workbooks found under the given paths".to_string(),
        ));
    }

    println!("{}", "tokensheet - batch conversion".bold().green());
    print_info(&format!("Found {} workbook(s) to process", files.len()));
    println!();

    let counter = HeuristicTokenCounter;
    let mut succeeded: Vec<ConversionReport> = Vec::new();
    let mut failed = 0usize;

    for file in &files {
        match convert_one(file, &options, &config, &counter, verbose) {
            Ok(report) => {
                print_success(&format!(
                    "✓ {} → {} ({} tokens)",
                    file.display(),
                    report.output.display(),
                    report.token_count
                ));
                report_warnings(&report.warnings);
                succeeded.push(report);
            }
            Err(e) => {
                print_error(&format!("✗ {}: {e}", file.display()));
                failed += 1;
            }
        }
    }

    println!();
    print_info("Batch summary:");
    print_info(&format!("   Converted: {}", succeeded.len()));
    if failed > 0 {
        print_warning(&format!("   Failed: {failed}"));
    }
    if !succeeded.is_empty() {
        let avg = succeeded.iter().map(|r| r.token_count).sum::<usize>() / succeeded.len();
        print_info(&format!("   Average tokens per workbook: {avg}"));
        print_info(&format!("   Model fit: {}", model_recommendation(avg)));
    }

    if succeeded.is_empty() {
        return Err(ConvertError::Input(
            "no workbook converted successfully".to_string(),
        ));
    }
    Ok(())
}

/// Collect workbooks from files, directories (recursive) and mixtures,
/// skipping Excel's `~$` lock files. Deterministic order.
fn find_workbooks(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            collect_dir(path, &mut files);
        } else if is_workbook(path) {
            files.push(path.clone());
        }
    }
    files.sort();
    files.dedup();
    files
}

fn collect_dir(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_dir(&path, files);
        } else if is_workbook(&path) {
            files.push(path);
        }
    }
}

fn is_workbook(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.starts_with("~$") {
        return false;
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    matches!(ext.as_deref(), Some("xlsx") | Some("xlsm"))
}

/// Execute the combine command: convert several workbooks into one
/// consolidated document with resolved cross-workbook references.
pub fn combine(
    paths: Vec<PathBuf>,
    options: ConvertOptions,
    config: OutputConfig,
    verbose: bool,
) -> ConvertResult<()> {
    let files = find_workbooks(&paths);
    if files.len() < 2 {
        return Err(ConvertError::Input(
            "combine needs at least two workbooks".to_string(),
        ));
    }

    println!("{}", "tokensheet - combining workbooks".bold().green());
    print_info(&format!("Combining {} workbooks", files.len()));
    println!();

    let counter = HeuristicTokenCounter;
    let timestamp = timestamp_now();
    let keys = Keys::new(options.abbreviate);
    let mut all_warnings = Vec::new();

    // convert each workbook in memory, keeping the model for reference
    // scanning
    let mut converted: Vec<(String, Workbook, AssembledDocument)> = Vec::new();
    for file in &files {
        let mut warnings = Vec::new();
        let workbook = load_workbook(file, &mut warnings)?;
        let document = assemble(&workbook, &options, &counter, &timestamp, &mut warnings)?;
        let id = workbook_id(&workbook.file_name);
        if verbose {
            print_info(&format!(
                "   {} → id {} ({} tokens)",
                workbook.file_name, id, document.token_count
            ));
        }
        all_warnings.extend(warnings);
        converted.push((id, workbook, document));
    }

    // file name (with and without extension) → workbook id
    let mut id_by_name: Map<String, Value> = Map::new();
    for (id, workbook, _) in &converted {
        id_by_name.insert(workbook.file_name.clone(), json!(id));
        if let Some(stem) = Path::new(&workbook.file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
        {
            id_by_name.insert(stem, json!(id));
        }
    }

    let cross_refs = collect_cross_references(&converted, &id_by_name);

    let mut doc = Map::new();
    let mut workbooks = Map::new();
    for (id, _, document) in &converted {
        workbooks.insert(id.clone(), document.json.clone());
    }
    doc.insert(keys.key("workbooks").to_string(), Value::Object(workbooks));
    doc.insert(
        keys.key("cross_references").to_string(),
        Value::Object(cross_refs),
    );

    let mut json = Value::Object(doc);
    let serialized = crate::assemble::serialize(&json, &options)?;
    let token_count = counter.count(&serialized);

    let mut metadata = Map::new();
    metadata.insert(keys.key("token_count").to_string(), json!(token_count));
    metadata.insert(
        keys.key("conversion_timestamp").to_string(),
        json!(timestamp),
    );
    if let Value::Object(ref mut obj) = json {
        obj.insert(keys.key("metadata").to_string(), Value::Object(metadata));
    }

    fs::create_dir_all(&config.dir)?;
    let filename = format!(
        "combined_{}workbooks_{token_count}tokens_{timestamp}.json",
        converted.len()
    );
    let path = config.dir.join(filename);
    fs::write(&path, crate::assemble::serialize(&json, &options)?)?;

    report_warnings(&all_warnings);
    print_success(&format!(
        "✓ Saved {} ({} tokens)",
        path.display(),
        token_count
    ));
    print_info(&format!("   Model fit: {}", model_recommendation(token_count)));
    Ok(())
}

/// Short stable id for a workbook: sanitized stem prefix + content hash of
/// the name.
fn workbook_id(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let clean: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect();
    let digest = Sha256::digest(stem.as_bytes());
    let short_hash: String = digest
        .iter()
        .take(3)
        .map(|b| format!("{b:02x}"))
        .collect();
    format!("{clean}_{short_hash}")
}

/// Source cell → resolved target cells for every `[Book]Sheet!A1` reference
/// found in the combined workbooks' formulas.
fn collect_cross_references(
    converted: &[(String, Workbook, AssembledDocument)],
    id_by_name: &Map<String, Value>,
) -> Map<String, Value> {
    let re = Regex::new(CROSS_WB_REF).unwrap();
    let mut refs = Map::new();

    for (id, workbook, _) in converted {
        for sheet in &workbook.sheets {
            for cell in sheet.cells.values() {
                let Some(formula) = cell.formula.as_deref() else {
                    continue;
                };
                let mut targets = Vec::new();
                for capture in re.captures_iter(formula) {
                    let book = capture[1].to_string();
                    let target_sheet = capture[2].trim_matches('\'').to_string();
                    let target_cell = capture[3].replace('$', "");
                    // unresolvable workbook names are kept verbatim
                    let target_id = id_by_name
                        .get(&book)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or(book);
                    targets.push(json!(format!("{target_id}_{target_sheet}_{target_cell}")));
                }
                if !targets.is_empty() {
                    let source = format!("{id}_{}_{}", sheet.name, cell.coord());
                    refs.insert(source, Value::Array(targets));
                }
            }
        }
    }
    refs
}
