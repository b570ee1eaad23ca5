//! The fixed key-abbreviation table.
//!
//! Abbreviated keys are how the output stays cheap: `"value"` costs more
//! tokens than `"v"` on every single cell. The table is bidirectional and
//! injective both ways, so a consumer can mechanically expand an abbreviated
//! document back to verbose keys (and tests hold us to that). When enriched
//! context is enabled the reverse map is embedded in the document itself
//! under `implementation_notes`.

/// (verbose, abbreviated) pairs. Grouped by where the key appears.
pub const PROPERTY_MAP: &[(&str, &str)] = &[
    // cell records
    ("value", "v"),
    ("formula", "f"),
    ("calculated_value", "cv"),
    ("dependencies", "d"),
    ("cell_references", "cr"),
    ("named_references", "nref"),
    ("unresolved", "ur"),
    ("circular", "circ"),
    ("style", "s"),
    ("bold", "b"),
    ("italic", "i"),
    ("font_color", "fc"),
    ("fill_color", "bg"),
    ("number_format", "nf"),
    // sheet blocks
    ("cells", "cl"),
    ("merged_cells", "mc"),
    ("conditional_formatting", "cf"),
    ("protection", "p"),
    ("view_settings", "vs"),
    ("metadata", "m"),
    ("title", "t"),
    ("dimensions", "dim"),
    ("max_row", "mr"),
    ("max_column", "mcol"),
    ("hidden_rows", "hrw"),
    ("hidden_columns", "hcl"),
    ("frozen_rows", "fr"),
    ("frozen_cols", "fcol"),
    ("zoom_scale", "z"),
    ("show_gridlines", "gl"),
    ("enabled", "en"),
    ("password_protected", "pw"),
    ("options", "opt"),
    ("priority", "pri"),
    ("operator", "op"),
    ("formulas", "fs"),
    ("type", "ty"),
    // document top level
    ("file_name", "fn"),
    ("sheets", "sh"),
    ("named_ranges", "nr"),
    ("scope", "sc"),
    ("token_count", "tc"),
    ("conversion_timestamp", "ts"),
    ("original_filename", "of"),
    // enriched context
    ("enriched_context", "ec"),
    ("tables", "tb"),
    ("pivot_tables", "pt"),
    ("column_types", "ct"),
    ("formula_patterns", "fp"),
    ("implementation_notes", "in"),
    ("range", "rg"),
    ("columns", "cols"),
    ("header_row", "hr"),
    ("name", "nm"),
    ("count", "n"),
    ("example", "ex"),
    ("source", "src"),
    ("location", "loc"),
    ("fields", "fld"),
    ("role", "rl"),
    ("function", "agg"),
    ("structured_references", "sr"),
    ("key_map", "km"),
    // combined documents
    ("workbooks", "wb"),
    ("cross_references", "xr"),
];

/// Key chooser bound to the active abbreviation setting.
#[derive(Debug, Clone, Copy)]
pub struct Keys {
    abbreviate: bool,
}

impl Keys {
    pub fn new(abbreviate: bool) -> Self {
        Self { abbreviate }
    }

    /// The active form of a verbose key name. Unknown names pass through
    /// unchanged so callers can't silently emit an untranslatable key.
    pub fn key<'a>(&self, verbose: &'a str) -> &'a str {
        if !self.abbreviate {
            return verbose;
        }
        abbreviate(verbose).unwrap_or(verbose)
    }

    pub fn abbreviated(&self) -> bool {
        self.abbreviate
    }
}

pub fn abbreviate(verbose: &str) -> Option<&'static str> {
    PROPERTY_MAP
        .iter()
        .find(|(long, _)| *long == verbose)
        .map(|(_, short)| *short)
}

pub fn expand(abbreviated: &str) -> Option<&'static str> {
    PROPERTY_MAP
        .iter()
        .find(|(_, short)| *short == abbreviated)
        .map(|(long, _)| *long)
}

/// The abbreviated→verbose map as a JSON object, for embedding in the
/// document so abbreviated output stays self-describing.
pub fn reverse_map_json() -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (long, short) in PROPERTY_MAP {
        map.insert((*short).to_string(), serde_json::Value::String((*long).to_string()));
    }
    serde_json::Value::Object(map)
}
