//! Output file naming and writing.
//!
//! The file is written only after the document is fully assembled and
//! serialized, so a failing conversion never leaves a partial artifact.

use crate::error::ConvertResult;
use crate::types::{ConvertOptions, OutputConfig};
use crate::assemble::{serialize, AssembledDocument};
use std::fs;
use std::path::{Path, PathBuf};

/// `{base}{_efficient?}_{tokens}tokens_{timestamp}.json`
pub fn output_filename(
    source: &Path,
    token_count: usize,
    timestamp: &str,
    abbreviated: bool,
) -> String {
    let base = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workbook".to_string());
    let mode = if abbreviated { "_efficient" } else { "" };
    format!("{base}{mode}_{token_count}tokens_{timestamp}.json")
}

/// Serialize and write the assembled document; returns the written path.
pub fn write_document(
    document: &AssembledDocument,
    source: &Path,
    timestamp: &str,
    options: &ConvertOptions,
    config: &OutputConfig,
) -> ConvertResult<PathBuf> {
    let text = serialize(&document.json, options)?;
    fs::create_dir_all(&config.dir)?;
    let path = config.dir.join(output_filename(
        source,
        document.token_count,
        timestamp,
        options.abbreviate,
    ));
    fs::write(&path, text)?;
    Ok(path)
}
