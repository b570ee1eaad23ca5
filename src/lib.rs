//! tokensheet - Excel workbooks as token-efficient JSON for LLMs
//!
//! This library reads a workbook's structural elements (cells, formulas,
//! named ranges, tables, pivot tables) and re-encodes them into a compact,
//! self-describing JSON schema with inferred column types and formula
//! dependency lists.
//!
//! # Features
//!
//! - Abbreviated key mode with a documented, reversible key map
//! - Formula dependency extraction (cells, ranges, named ranges)
//! - Repeated-formula pattern detection
//! - Column-type inference (string/number/date/currency/boolean/mixed)
//! - Table and pivot-table descriptors
//! - Token counting with model-suitability hints
//!
//! # Example
//!
//! ```no_run
//! use tokensheet::assemble::assemble;
//! use tokensheet::tokens::HeuristicTokenCounter;
//! use tokensheet::types::ConvertOptions;
//! use tokensheet::workbook::load_workbook;
//! use std::path::Path;
//!
//! let mut warnings = Vec::new();
//! let workbook = load_workbook(Path::new("budget.xlsx"), &mut warnings)?;
//! let options = ConvertOptions::default();
//! let document = assemble(
//!     &workbook,
//!     &options,
//!     &HeuristicTokenCounter,
//!     "20250101_120000",
//!     &mut warnings,
//! )?;
//!
//! println!("{} tokens", document.token_count);
//! # Ok::<(), tokensheet::error::ConvertError>(())
//! ```

pub mod assemble;
pub mod cli;
pub mod encode;
pub mod error;
pub mod extract;
pub mod output;
pub mod tokens;
pub mod types;
pub mod workbook;

// Re-export commonly used types
pub use error::{ConvertError, ConvertResult, ExtractionWarning};
pub use types::{Cell, CellValue, ConvertOptions, OutputConfig, Sheet, Workbook};
