//! Raw OOXML part reader.
//!
//! calamine covers values, cached formula results and formula text; the
//! rest of the structure the output schema needs lives in XML parts calamine
//! does not expose: styles.xml, per-cell style ids, merged regions,
//! conditional formatting, protection, view settings, defined names with
//! scope, table definitions, and pivot-table definitions. This module reads
//! those parts directly from the ZIP container.
//!
//! Everything here is best-effort: a missing or malformed part produces an
//! [`ExtractionWarning`] and an empty default, never a fatal error.

use crate::error::ExtractionWarning;
use crate::types::{
    column_letter, parse_cell_ref, CellStyle, CondFormatRule, NamedRange, PivotField, PivotRole,
    PivotTable, RangeScope, SheetProtection, TableInfo, ViewSettings,
};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

/// Per-sheet structure read from the sheet's own XML part.
#[derive(Debug, Clone, Default)]
pub struct SheetParts {
    pub merged: Vec<String>,
    pub conditional_formatting: Vec<CondFormatRule>,
    pub protection: Option<SheetProtection>,
    pub view: Option<ViewSettings>,
    /// (row, col, style id), 1-based coordinates. Ids index into
    /// [`WorkbookParts::styles`]; id 0 (the default style) is not recorded.
    pub cell_styles: Vec<(u32, u32, u32)>,
    pub pivot_tables: Vec<PivotTable>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkbookParts {
    pub named_ranges: Vec<NamedRange>,
    /// cellXfs index → resolved style.
    pub styles: Vec<CellStyle>,
    /// Keyed by sheet name.
    pub sheets: BTreeMap<String, SheetParts>,
    /// Excel tables (ListObjects) across all sheets, in part order.
    pub tables: Vec<TableInfo>,
}

/// Pivot cache metadata: field names in declaration order plus the source
/// range the cache was built over.
#[derive(Debug, Clone, Default)]
struct PivotCache {
    field_names: Vec<String>,
    source: Option<String>,
}

/// Read every part we care about. Returns `None` only when the container
/// itself cannot be opened (the caller has already opened it through
/// calamine, so in practice this means a warning, not an error).
pub fn read_parts(path: &Path, warnings: &mut Vec<ExtractionWarning>) -> Option<WorkbookParts> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            warnings.push(ExtractionWarning::new(
                path.display().to_string(),
                format!("cannot reopen container for part extraction: {e}"),
            ));
            return None;
        }
    };
    let mut archive = match ZipArchive::new(file) {
        Ok(a) => a,
        Err(e) => {
            warnings.push(ExtractionWarning::new(
                path.display().to_string(),
                format!("cannot read ZIP container: {e}"),
            ));
            return None;
        }
    };

    let mut parts = WorkbookParts::default();

    let workbook_xml = read_zip_text(&mut archive, "xl/workbook.xml").unwrap_or_default();
    let rels_xml = read_zip_text(&mut archive, "xl/_rels/workbook.xml.rels").unwrap_or_default();

    let (sheets, defined_names, pivot_cache_ids) = parse_workbook_xml(&workbook_xml);
    let rels = parse_relationships(&rels_xml);

    let sheet_names: Vec<String> = sheets.iter().map(|(name, _)| name.clone()).collect();
    parts.named_ranges = normalize_defined_names(defined_names, &sheet_names);

    if let Some(styles_xml) = read_zip_text(&mut archive, "xl/styles.xml") {
        parts.styles = parse_styles_xml(&styles_xml, warnings);
    } else {
        warnings.push(ExtractionWarning::new(
            "styles.xml",
            "missing styles part; formatting omitted",
        ));
    }

    // pivot caches are shared workbook-level parts, looked up by cacheId
    let mut caches: HashMap<String, PivotCache> = HashMap::new();
    for (cache_id, rid) in pivot_cache_ids {
        let Some(target) = rels.get(&rid) else {
            continue;
        };
        let cache_path = resolve_target("xl", target);
        match read_zip_text(&mut archive, &cache_path) {
            Some(xml) => {
                caches.insert(cache_id, parse_pivot_cache_xml(&xml));
            }
            None => warnings.push(ExtractionWarning::new(
                cache_path,
                "pivot cache part unreadable; field names omitted",
            )),
        }
    }

    for (sheet_name, rid) in &sheets {
        let Some(target) = rels.get(rid) else {
            continue;
        };
        if !target.contains("worksheet") {
            // chartsheets and friends carry no cell structure
            continue;
        }
        let sheet_path = resolve_target("xl", target);
        let mut sheet_parts = match read_zip_text(&mut archive, &sheet_path) {
            Some(xml) => parse_sheet_xml(&xml),
            None => {
                warnings.push(ExtractionWarning::new(
                    sheet_name.clone(),
                    "worksheet part unreadable; structure omitted",
                ));
                SheetParts::default()
            }
        };

        // tables and pivot tables anchor to sheets through the sheet's rels
        let rels_path = sheet_rels_path(&sheet_path);
        if let Some(rels_xml) = read_zip_text(&mut archive, &rels_path) {
            let sheet_dir = parent_dir(&sheet_path);
            for target in parse_relationships(&rels_xml).into_values() {
                let part_path = resolve_target(&sheet_dir, &target);
                if target.contains("pivotTable") {
                    match read_zip_text(&mut archive, &part_path) {
                        Some(xml) => {
                            sheet_parts
                                .pivot_tables
                                .push(parse_pivot_table_xml(&xml, sheet_name, &caches));
                        }
                        None => warnings.push(ExtractionWarning::new(
                            part_path,
                            "pivot table part unreadable; definition omitted",
                        )),
                    }
                } else if target.contains("tables/table") {
                    match read_zip_text(&mut archive, &part_path) {
                        Some(xml) => {
                            if let Some(table) = parse_table_xml(&xml, sheet_name) {
                                parts.tables.push(table);
                            }
                        }
                        None => warnings.push(ExtractionWarning::new(
                            part_path,
                            "table part unreadable; definition omitted",
                        )),
                    }
                }
            }
        }

        parts.sheets.insert(sheet_name.clone(), sheet_parts);
    }

    Some(parts)
}

//==============================================================================
// ZIP / path plumbing
//==============================================================================

fn read_zip_text<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    path: &str,
) -> Option<String> {
    let mut file = archive.by_name(path).ok()?;
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    Some(content)
}

/// Resolve a relationship target against the directory of the part that
/// declared it. Targets may be absolute (`/xl/...`) or relative (`../...`).
fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(stripped) = target.strip_prefix('/') {
        return stripped.to_string();
    }
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

/// `xl/worksheets/sheet1.xml` → `xl/worksheets/_rels/sheet1.xml.rels`
fn sheet_rels_path(sheet_path: &str) -> String {
    match sheet_path.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{sheet_path}.rels"),
    }
}

fn attr_value(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn attr_is_true(e: &BytesStart, name: &[u8]) -> bool {
    matches!(attr_value(e, name).as_deref(), Some("1") | Some("true"))
}

/// Unescape the predefined XML entities that appear in attribute values we
/// keep verbatim (format codes, defined-name targets).
fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

//==============================================================================
// workbook.xml
//==============================================================================

type DefinedName = (String, Option<usize>, String);

/// Returns (sheet name → rId pairs in file order, defined names as
/// (name, localSheetId, target), pivot caches as (cacheId, rId)).
fn parse_workbook_xml(
    xml: &str,
) -> (Vec<(String, String)>, Vec<DefinedName>, Vec<(String, String)>) {
    let mut sheets = Vec::new();
    let mut defined = Vec::new();
    let mut caches = Vec::new();

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current_name: Option<(String, Option<usize>)> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"sheet" => {
                    let name = attr_value(e, b"name");
                    let rid = attr_value(e, b"r:id");
                    if let (Some(name), Some(rid)) = (name, rid) {
                        sheets.push((unescape_xml(&name), rid));
                    }
                }
                b"pivotCache" => {
                    let cache_id = attr_value(e, b"cacheId");
                    let rid = attr_value(e, b"r:id");
                    if let (Some(cache_id), Some(rid)) = (cache_id, rid) {
                        caches.push((cache_id, rid));
                    }
                }
                b"definedName" => {
                    let name = attr_value(e, b"name");
                    let local = attr_value(e, b"localSheetId").and_then(|s| s.parse().ok());
                    if let Some(name) = name {
                        current_name = Some((name, local));
                    }
                }
                _ => {}
            },
            Ok(Event::Text(ref t)) => {
                if let Some((name, local)) = current_name.take() {
                    let target = t.xml_content().map(|c| c.into_owned()).unwrap_or_default();
                    defined.push((name, local, target));
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"definedName" => {
                current_name = None;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (sheets, defined, caches)
}

/// rId → target map from a .rels part.
fn parse_relationships(xml: &str) -> HashMap<String, String> {
    let mut rels = HashMap::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.name().as_ref() == b"Relationship" =>
            {
                let id = attr_value(e, b"Id");
                let target = attr_value(e, b"Target");
                if let (Some(id), Some(target)) = (id, target) {
                    rels.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    rels
}

/// Normalize defined names: drop `=` and `$`, qualify bare references with
/// their scope sheet, skip builtin print areas.
fn normalize_defined_names(defined: Vec<DefinedName>, sheet_names: &[String]) -> Vec<NamedRange> {
    let mut ranges = Vec::new();
    for (name, local, raw_target) in defined {
        if name.starts_with("_xlnm.") {
            continue;
        }
        let mut target = raw_target.trim().trim_start_matches('=').replace('$', "");
        let scope = match local.and_then(|idx| sheet_names.get(idx)) {
            Some(sheet) => RangeScope::Sheet(sheet.clone()),
            None => RangeScope::Workbook,
        };
        if !target.contains('!') {
            if let RangeScope::Sheet(ref sheet) = scope {
                target = format!("{sheet}!{target}");
            }
        }
        ranges.push(NamedRange {
            name,
            target,
            scope,
        });
    }
    ranges
}

//==============================================================================
// styles.xml
//==============================================================================

/// Builtin number-format ids that denote currency/accounting formats.
const CURRENCY_FORMAT_IDS: &[u32] = &[5, 6, 7, 8, 42, 44];

/// Builtin format codes for the ids that commonly appear; everything else
/// keeps its id-derived fallback.
fn builtin_format_code(id: u32) -> Option<&'static str> {
    match id {
        1 => Some("0"),
        2 => Some("0.00"),
        3 => Some("#,##0"),
        4 => Some("#,##0.00"),
        5 => Some("$#,##0"),
        6 => Some("$#,##0;[Red]($#,##0)"),
        7 => Some("$#,##0.00"),
        8 => Some("$#,##0.00;[Red]($#,##0.00)"),
        9 => Some("0%"),
        10 => Some("0.00%"),
        11 => Some("0.00E+00"),
        14 => Some("m/d/yyyy"),
        15 => Some("d-mmm-yy"),
        16 => Some("d-mmm"),
        17 => Some("mmm-yy"),
        18 => Some("h:mm AM/PM"),
        19 => Some("h:mm:ss AM/PM"),
        20 => Some("h:mm"),
        21 => Some("h:mm:ss"),
        22 => Some("m/d/yyyy h:mm"),
        37 => Some("#,##0;(#,##0)"),
        38 => Some("#,##0;[Red](#,##0)"),
        39 => Some("#,##0.00;(#,##0.00)"),
        40 => Some("#,##0.00;[Red](#,##0.00)"),
        42 => Some("_($* #,##0_);_($* (#,##0);_($* \"-\"_);_(@_)"),
        44 => Some("_($* #,##0.00_);_($* (#,##0.00);_($* \"-\"??_);_(@_)"),
        45 => Some("mm:ss"),
        46 => Some("[h]:mm:ss"),
        47 => Some("mm:ss.0"),
        49 => Some("@"),
        _ => None,
    }
}

fn format_is_currency(id: u32, code: Option<&str>) -> bool {
    if CURRENCY_FORMAT_IDS.contains(&id) {
        return true;
    }
    code.is_some_and(|c| c.contains('$') || c.contains('€') || c.contains('£') || c.contains('¥'))
}

#[derive(Debug, Clone, Default)]
struct ParsedFont {
    bold: bool,
    italic: bool,
    color: Option<String>,
}

/// Parse styles.xml into a cellXfs-indexed style table.
fn parse_styles_xml(xml: &str, warnings: &mut Vec<ExtractionWarning>) -> Vec<CellStyle> {
    let num_fmts = parse_num_fmts(xml);
    let fonts = parse_fonts(xml);
    let fills = parse_fills(xml);

    let mut styles = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_cell_xfs = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"cellXfs" => in_cell_xfs = true,
            Ok(Event::End(ref e)) if e.name().as_ref() == b"cellXfs" => break,
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if in_cell_xfs && e.name().as_ref() == b"xf" =>
            {
                let num_fmt_id: u32 = attr_value(e, b"numFmtId")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let font_id: usize = attr_value(e, b"fontId")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let fill_id: usize = attr_value(e, b"fillId")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);

                let font = fonts.get(font_id).cloned().unwrap_or_default();
                // the format reserves fills 0 and 1 for the none/gray125 defaults
                let fill_color = if fill_id >= 2 {
                    fills.get(fill_id).cloned().flatten()
                } else {
                    None
                };
                let number_format = if num_fmt_id == 0 {
                    None
                } else {
                    num_fmts
                        .get(&num_fmt_id)
                        .cloned()
                        .or_else(|| builtin_format_code(num_fmt_id).map(str::to_string))
                };
                let currency = format_is_currency(num_fmt_id, number_format.as_deref());

                styles.push(CellStyle {
                    bold: font.bold,
                    italic: font.italic,
                    font_color: font.color,
                    fill_color,
                    number_format,
                    currency,
                });
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warnings.push(ExtractionWarning::new(
                    "styles.xml",
                    format!("malformed styles part: {e}"),
                ));
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    styles
}

fn parse_num_fmts(xml: &str) -> HashMap<u32, String> {
    let mut map = HashMap::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.name().as_ref() == b"numFmt" =>
            {
                let id = attr_value(e, b"numFmtId").and_then(|v| v.parse().ok());
                let code = attr_value(e, b"formatCode").map(|c| unescape_xml(&c));
                if let (Some(id), Some(code)) = (id, code) {
                    map.insert(id, code);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    map
}

fn parse_fonts(xml: &str) -> Vec<ParsedFont> {
    let mut fonts = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut depth = 0; // 0 outside, 1 in <fonts>, 2 in <font>
    let mut current = ParsedFont::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"fonts" if depth == 0 => depth = 1,
                b"font" if depth == 1 => {
                    depth = 2;
                    current = ParsedFont::default();
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) if depth == 2 => match e.name().as_ref() {
                b"b" => current.bold = true,
                b"i" => current.italic = true,
                b"color" => current.color = parse_rgb_attr(e),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"font" if depth == 2 => {
                    fonts.push(current.clone());
                    depth = 1;
                }
                b"fonts" if depth == 1 => break,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    fonts
}

/// Per-fill solid foreground color; `None` for pattern/gradient fills.
fn parse_fills(xml: &str) -> Vec<Option<String>> {
    let mut fills = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut depth = 0; // 0 outside, 1 in <fills>, 2 in <fill>
    let mut solid = false;
    let mut current: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"fills" if depth == 0 => depth = 1,
                b"fill" if depth == 1 => {
                    depth = 2;
                    solid = false;
                    current = None;
                }
                b"patternFill" if depth == 2 => {
                    solid = attr_value(e, b"patternType").as_deref() == Some("solid");
                }
                b"fgColor" if depth == 2 && solid => {
                    current = parse_rgb_attr(e);
                }
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"fill" if depth == 2 => {
                    fills.push(current.take());
                    depth = 1;
                }
                b"fills" if depth == 1 => break,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    fills
}

/// `rgb="FFRRGGBB"` → `RRGGBB`. Indexed and theme colors are omitted rather
/// than approximated.
fn parse_rgb_attr(e: &BytesStart) -> Option<String> {
    let hex = attr_value(e, b"rgb")?;
    let trimmed = hex.trim_start_matches('#');
    let rgb = match trimmed.len() {
        8 => &trimmed[2..],
        6 => trimmed,
        _ => return None,
    };
    Some(rgb.to_ascii_uppercase())
}

//==============================================================================
// Worksheet XML
//==============================================================================

/// Protection attributes that are not restriction flags.
const PROTECTION_META_ATTRS: &[&[u8]] = &[
    b"sheet",
    b"password",
    b"algorithmName",
    b"hashValue",
    b"saltValue",
    b"spinCount",
];

fn parse_sheet_xml(xml: &str) -> SheetParts {
    let mut parts = SheetParts::default();
    let mut view = ViewSettings::default();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut current_sqref: Option<String> = None;
    let mut in_cf_formula = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                match e.name().as_ref() {
                    b"mergeCell" => {
                        if let Some(r) = attr_value(e, b"ref") {
                            parts.merged.push(r);
                        }
                    }
                    b"sheetView" => {
                        if let Some(z) = attr_value(e, b"zoomScale").and_then(|v| v.parse().ok()) {
                            view.zoom_scale = z;
                        }
                        if let Some(g) = attr_value(e, b"showGridLines") {
                            view.show_gridlines = g != "0" && g != "false";
                        }
                    }
                    b"pane" => {
                        if attr_value(e, b"state").as_deref() == Some("frozen") {
                            view.frozen_cols = attr_value(e, b"xSplit")
                                .and_then(|v| v.parse().ok())
                                .unwrap_or(0);
                            view.frozen_rows = attr_value(e, b"ySplit")
                                .and_then(|v| v.parse().ok())
                                .unwrap_or(0);
                        }
                    }
                    b"sheetProtection" => {
                        let mut protection = SheetProtection {
                            enabled: attr_is_true(e, b"sheet"),
                            password_protected: attr_value(e, b"password").is_some()
                                || attr_value(e, b"hashValue").is_some(),
                            options: BTreeMap::new(),
                        };
                        for attr in e.attributes().flatten() {
                            let key = attr.key.as_ref();
                            if PROTECTION_META_ATTRS.contains(&key) {
                                continue;
                            }
                            let name = String::from_utf8_lossy(key).into_owned();
                            let value = attr.value.as_ref() == b"1"
                                || attr.value.as_ref() == b"true";
                            protection.options.insert(name, value);
                        }
                        parts.protection = Some(protection);
                    }
                    b"conditionalFormatting" => {
                        current_sqref = attr_value(e, b"sqref");
                    }
                    b"cfRule" => {
                        parts.conditional_formatting.push(CondFormatRule {
                            range: current_sqref.clone().unwrap_or_default(),
                            rule_type: attr_value(e, b"type").unwrap_or_default(),
                            priority: attr_value(e, b"priority")
                                .and_then(|v| v.parse().ok())
                                .unwrap_or(0),
                            operator: attr_value(e, b"operator"),
                            formulas: Vec::new(),
                        });
                    }
                    b"formula" if current_sqref.is_some() => in_cf_formula = true,
                    b"row" => {
                        if attr_is_true(e, b"hidden") {
                            if let Some(r) = attr_value(e, b"r").and_then(|v| v.parse().ok()) {
                                view.hidden_rows.push(r);
                            }
                        }
                    }
                    b"col" => {
                        if attr_is_true(e, b"hidden") {
                            let min: Option<u32> =
                                attr_value(e, b"min").and_then(|v| v.parse().ok());
                            let max: Option<u32> =
                                attr_value(e, b"max").and_then(|v| v.parse().ok());
                            if let (Some(min), Some(max)) = (min, max) {
                                for col in min..=max.min(min + 64) {
                                    view.hidden_cols.push(column_letter(col));
                                }
                            }
                        }
                    }
                    b"c" => {
                        let style_id: Option<u32> =
                            attr_value(e, b"s").and_then(|v| v.parse().ok());
                        if let (Some(style_id), Some(r)) = (style_id, attr_value(e, b"r")) {
                            if style_id > 0 {
                                if let Some((row, col)) = crate::types::parse_cell_ref(&r) {
                                    parts.cell_styles.push((row, col, style_id));
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref t)) if in_cf_formula => {
                if let Some(rule) = parts.conditional_formatting.last_mut() {
                    let text = t.xml_content().map(|c| c.into_owned()).unwrap_or_default();
                    rule.formulas.push(text);
                }
                in_cf_formula = false;
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"conditionalFormatting" => current_sqref = None,
                b"formula" => in_cf_formula = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    if !view.is_default() {
        parts.view = Some(view);
    }
    parts
}

//==============================================================================
// Table parts
//==============================================================================

/// Parse an `xl/tables/tableN.xml` part into a [`TableInfo`]. The `ref`
/// range includes the header row unless `headerRowCount="0"`.
fn parse_table_xml(xml: &str, sheet_name: &str) -> Option<TableInfo> {
    let mut name = String::new();
    let mut range = String::new();
    let mut header_rows: u32 = 1;
    let mut column_names: Vec<String> = Vec::new();

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"table" => {
                    name = attr_value(e, b"displayName")
                        .or_else(|| attr_value(e, b"name"))
                        .map(|n| unescape_xml(&n))
                        .unwrap_or_default();
                    range = attr_value(e, b"ref").unwrap_or_default();
                    if let Some(count) = attr_value(e, b"headerRowCount") {
                        header_rows = count.parse().unwrap_or(1);
                    }
                }
                b"tableColumn" => {
                    if let Some(col_name) = attr_value(e, b"name") {
                        column_names.push(unescape_xml(&col_name));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    if name.is_empty() || range.is_empty() {
        return None;
    }
    let (start, _) = range.split_once(':').unwrap_or((range.as_str(), ""));
    let (start_row, start_col) = parse_cell_ref(start)?;
    let header_row = if header_rows > 0 { start_row } else { 0 };
    let columns = column_names
        .into_iter()
        .enumerate()
        .map(|(i, n)| (n, column_letter(start_col + i as u32)))
        .collect();

    Some(TableInfo {
        name,
        sheet: sheet_name.to_string(),
        range,
        header_row,
        columns,
    })
}

//==============================================================================
// Pivot parts
//==============================================================================

fn parse_pivot_cache_xml(xml: &str) -> PivotCache {
    let mut cache = PivotCache::default();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"worksheetSource" => {
                    let reference = attr_value(e, b"ref");
                    let sheet = attr_value(e, b"sheet");
                    cache.source = match (sheet, reference) {
                        (Some(sheet), Some(reference)) => Some(format!("{sheet}!{reference}")),
                        (None, Some(reference)) => Some(reference),
                        _ => None,
                    };
                }
                b"cacheField" => {
                    if let Some(name) = attr_value(e, b"name") {
                        cache.field_names.push(unescape_xml(&name));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    cache
}

fn parse_pivot_table_xml(
    xml: &str,
    sheet_name: &str,
    caches: &HashMap<String, PivotCache>,
) -> PivotTable {
    let mut pivot = PivotTable {
        name: String::new(),
        sheet: sheet_name.to_string(),
        location: None,
        source: None,
        fields: Vec::new(),
    };
    let mut cache = &PivotCache::default();

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    // which axis block we are inside, if any
    let mut axis: Option<PivotRole> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"pivotTableDefinition" => {
                    pivot.name = attr_value(e, b"name")
                        .map(|n| unescape_xml(&n))
                        .unwrap_or_default();
                    if let Some(id) = attr_value(e, b"cacheId") {
                        if let Some(found) = caches.get(&id) {
                            cache = found;
                        }
                    }
                    pivot.source = cache.source.clone();
                }
                b"location" => {
                    pivot.location = attr_value(e, b"ref");
                }
                b"rowFields" => axis = Some(PivotRole::Row),
                b"colFields" => axis = Some(PivotRole::Column),
                b"field" => {
                    if let (Some(role), Some(idx)) = (
                        axis,
                        attr_value(e, b"x").and_then(|v| v.parse::<i64>().ok()),
                    ) {
                        // negative indexes are the synthetic "values" column
                        if idx >= 0 {
                            pivot.fields.push(PivotField {
                                name: field_name(cache, idx as usize),
                                role,
                                aggregation: None,
                            });
                        }
                    }
                }
                b"pageField" => {
                    if let Some(idx) =
                        attr_value(e, b"fld").and_then(|v| v.parse::<i64>().ok())
                    {
                        if idx >= 0 {
                            pivot.fields.push(PivotField {
                                name: field_name(cache, idx as usize),
                                role: PivotRole::Filter,
                                aggregation: None,
                            });
                        }
                    }
                }
                b"dataField" => {
                    let name = attr_value(e, b"fld")
                        .and_then(|v| v.parse::<usize>().ok())
                        .map(|idx| field_name(cache, idx))
                        .or_else(|| attr_value(e, b"name").map(|n| unescape_xml(&n)))
                        .unwrap_or_else(|| "values".to_string());
                    // subtotal defaults to sum when the attribute is absent;
                    // unrecognized identifiers pass through verbatim
                    let aggregation =
                        attr_value(e, b"subtotal").unwrap_or_else(|| "sum".to_string());
                    pivot.fields.push(PivotField {
                        name,
                        role: PivotRole::Value,
                        aggregation: Some(aggregation),
                    });
                }
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"rowFields" | b"colFields" => axis = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    pivot
}

fn field_name(cache: &PivotCache, idx: usize) -> String {
    cache
        .field_names
        .get(idx)
        .cloned()
        .unwrap_or_else(|| format!("field_{idx}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_target() {
        assert_eq!(
            resolve_target("xl", "worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            resolve_target("xl/worksheets", "../pivotTables/pivotTable1.xml"),
            "xl/pivotTables/pivotTable1.xml"
        );
        assert_eq!(
            resolve_target("xl/worksheets", "/xl/styles.xml"),
            "xl/styles.xml"
        );
    }

    #[test]
    fn test_sheet_rels_path() {
        assert_eq!(
            sheet_rels_path("xl/worksheets/sheet1.xml"),
            "xl/worksheets/_rels/sheet1.xml.rels"
        );
    }

    #[test]
    fn test_parse_workbook_xml() {
        let xml = r#"<workbook>
            <sheets>
                <sheet name="Data" sheetId="1" r:id="rId1"/>
                <sheet name="Summary" sheetId="2" r:id="rId2"/>
            </sheets>
            <definedNames>
                <definedName name="TaxRate">Data!$B$1</definedName>
                <definedName name="Local" localSheetId="1">A1:A5</definedName>
                <definedName name="_xlnm.Print_Area" localSheetId="0">Data!$A$1:$C$5</definedName>
            </definedNames>
        </workbook>"#;
        let (sheets, defined, _caches) = parse_workbook_xml(xml);
        assert_eq!(
            sheets,
            vec![
                ("Data".to_string(), "rId1".to_string()),
                ("Summary".to_string(), "rId2".to_string())
            ]
        );
        let names = normalize_defined_names(defined, &["Data".into(), "Summary".into()]);
        assert_eq!(names.len(), 2);
        assert_eq!(names[0].name, "TaxRate");
        assert_eq!(names[0].target, "Data!B1");
        assert_eq!(names[0].scope, RangeScope::Workbook);
        assert_eq!(names[1].name, "Local");
        assert_eq!(names[1].target, "Summary!A1:A5");
        assert_eq!(names[1].scope, RangeScope::Sheet("Summary".to_string()));
    }

    #[test]
    fn test_parse_styles_xml_resolves_xfs() {
        let xml = r#"<styleSheet>
            <numFmts count="1"><numFmt numFmtId="164" formatCode="&quot;$&quot;#,##0.00"/></numFmts>
            <fonts count="2">
                <font><sz val="11"/><name val="Calibri"/></font>
                <font><b/><color rgb="FFFF0000"/></font>
            </fonts>
            <fills count="3">
                <fill><patternFill patternType="none"/></fill>
                <fill><patternFill patternType="gray125"/></fill>
                <fill><patternFill patternType="solid"><fgColor rgb="FFFFFF00"/></patternFill></fill>
            </fills>
            <cellXfs count="3">
                <xf numFmtId="0" fontId="0" fillId="0"/>
                <xf numFmtId="164" fontId="1" fillId="2" applyNumberFormat="1"/>
                <xf numFmtId="14" fontId="0" fillId="0" applyNumberFormat="1"/>
            </cellXfs>
        </styleSheet>"#;
        let mut warnings = Vec::new();
        let styles = parse_styles_xml(xml, &mut warnings);
        assert_eq!(styles.len(), 3);
        assert!(styles[0].is_default());
        assert!(styles[1].bold);
        assert_eq!(styles[1].font_color.as_deref(), Some("FF0000"));
        assert_eq!(styles[1].fill_color.as_deref(), Some("FFFF00"));
        assert_eq!(styles[1].number_format.as_deref(), Some("\"$\"#,##0.00"));
        assert!(styles[1].currency);
        assert_eq!(styles[2].number_format.as_deref(), Some("m/d/yyyy"));
        assert!(!styles[2].currency);
    }

    #[test]
    fn test_parse_sheet_xml_structure() {
        let xml = r#"<worksheet>
            <sheetViews><sheetView showGridLines="0" zoomScale="80" workbookViewId="0">
                <pane xSplit="1" ySplit="2" state="frozen"/>
            </sheetView></sheetViews>
            <cols><col min="3" max="4" hidden="1" width="9"/></cols>
            <sheetData>
                <row r="1"><c r="A1" s="2" t="s"><v>0</v></c><c r="B1"><v>5</v></c></row>
                <row r="5" hidden="1"><c r="A5"><v>1</v></c></row>
            </sheetData>
            <sheetProtection sheet="1" objects="1" scenarios="0" hashValue="abc"/>
            <mergeCells count="1"><mergeCell ref="A1:B2"/></mergeCells>
            <conditionalFormatting sqref="C1:C10">
                <cfRule type="cellIs" priority="1" operator="greaterThan"><formula>5</formula></cfRule>
            </conditionalFormatting>
        </worksheet>"#;
        let parts = parse_sheet_xml(xml);

        assert_eq!(parts.merged, vec!["A1:B2"]);
        assert_eq!(parts.cell_styles, vec![(1, 1, 2)]);

        let view = parts.view.expect("view settings");
        assert_eq!(view.zoom_scale, 80);
        assert!(!view.show_gridlines);
        assert_eq!(view.frozen_rows, 2);
        assert_eq!(view.frozen_cols, 1);
        assert_eq!(view.hidden_rows, vec![5]);
        assert_eq!(view.hidden_cols, vec!["C", "D"]);

        let protection = parts.protection.expect("protection");
        assert!(protection.enabled);
        assert!(protection.password_protected);
        assert_eq!(protection.options.get("objects"), Some(&true));
        assert_eq!(protection.options.get("scenarios"), Some(&false));

        assert_eq!(parts.conditional_formatting.len(), 1);
        let rule = &parts.conditional_formatting[0];
        assert_eq!(rule.range, "C1:C10");
        assert_eq!(rule.rule_type, "cellIs");
        assert_eq!(rule.operator.as_deref(), Some("greaterThan"));
        assert_eq!(rule.formulas, vec!["5"]);
    }

    #[test]
    fn test_parse_table_xml() {
        let xml = r#"<table id="1" name="Projects_1" displayName="Projects" ref="B2:D6" headerRowCount="1">
            <autoFilter ref="B2:D6"/>
            <tableColumns count="3">
                <tableColumn id="1" name="Project"/>
                <tableColumn id="2" name="Amount"/>
                <tableColumn id="3" name="Owner"/>
            </tableColumns>
        </table>"#;
        let table = parse_table_xml(xml, "Data").expect("table");
        assert_eq!(table.name, "Projects");
        assert_eq!(table.sheet, "Data");
        assert_eq!(table.range, "B2:D6");
        assert_eq!(table.header_row, 2);
        assert_eq!(
            table.columns,
            vec![
                ("Project".to_string(), "B".to_string()),
                ("Amount".to_string(), "C".to_string()),
                ("Owner".to_string(), "D".to_string())
            ]
        );
    }

    #[test]
    fn test_parse_pivot_parts() {
        let cache_xml = r#"<pivotCacheDefinition>
            <cacheSource type="worksheet"><worksheetSource ref="A1:C10" sheet="Data"/></cacheSource>
            <cacheFields count="3">
                <cacheField name="Region"/><cacheField name="Month"/><cacheField name="Amount"/>
            </cacheFields>
        </pivotCacheDefinition>"#;
        let cache = parse_pivot_cache_xml(cache_xml);
        assert_eq!(cache.source.as_deref(), Some("Data!A1:C10"));
        assert_eq!(cache.field_names, vec!["Region", "Month", "Amount"]);

        let mut caches = HashMap::new();
        caches.insert("7".to_string(), cache);

        let pivot_xml = r#"<pivotTableDefinition name="SalesPivot" cacheId="7">
            <location ref="E3:G20" firstHeaderRow="1"/>
            <pivotFields count="3"/>
            <rowFields count="1"><field x="0"/></rowFields>
            <colFields count="1"><field x="1"/></colFields>
            <pageFields count="1"><pageField fld="1" hier="-1"/></pageFields>
            <dataFields count="2">
                <dataField name="Sum of Amount" fld="2"/>
                <dataField name="Custom agg" fld="2" subtotal="stdDev"/>
            </dataFields>
        </pivotTableDefinition>"#;
        let pivot = parse_pivot_table_xml(pivot_xml, "Summary", &caches);

        assert_eq!(pivot.name, "SalesPivot");
        assert_eq!(pivot.sheet, "Summary");
        assert_eq!(pivot.location.as_deref(), Some("E3:G20"));
        assert_eq!(pivot.source.as_deref(), Some("Data!A1:C10"));
        assert_eq!(pivot.fields.len(), 5);
        assert_eq!(pivot.fields[0].name, "Region");
        assert_eq!(pivot.fields[0].role, PivotRole::Row);
        assert_eq!(pivot.fields[1].role, PivotRole::Column);
        assert_eq!(pivot.fields[2].role, PivotRole::Filter);
        assert_eq!(pivot.fields[3].name, "Amount");
        assert_eq!(pivot.fields[3].role, PivotRole::Value);
        assert_eq!(pivot.fields[3].aggregation.as_deref(), Some("sum"));
        // unrecognized aggregation identifiers pass through verbatim
        assert_eq!(pivot.fields[4].aggregation.as_deref(), Some("stdDev"));
    }
}
