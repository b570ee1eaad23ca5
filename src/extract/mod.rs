//! Structural extraction over the loaded workbook model: formula
//! dependencies, repeated formula patterns, column types, and table/pivot
//! context.

pub mod columns;
pub mod context;
pub mod dependencies;
pub mod patterns;

pub use columns::DEFAULT_SAMPLE_ROWS;
pub use dependencies::FormulaDeps;
pub use patterns::FormulaPattern;
