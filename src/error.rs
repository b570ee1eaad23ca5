use std::path::PathBuf;
use thiserror::Error;

pub type ConvertResult<T> = Result<T, ConvertError>;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("cannot read workbook {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("failed to assemble output document: {0}")]
    Assembly(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    Input(String),
}

impl ConvertError {
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ConvertError::Unreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// A non-fatal problem hit while extracting an optional attribute.
///
/// Warnings are accumulated in order during a run and summarized at the end;
/// they never abort the conversion. Fatal conditions use [`ConvertError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionWarning {
    /// Where the problem occurred, e.g. `Sheet1!B2` or `styles.xml`.
    pub context: String,
    pub message: String,
}

impl ExtractionWarning {
    pub fn new(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.context, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_display() {
        let err = ConvertError::unreadable("missing.xlsx", "file not found");
        assert_eq!(
            err.to_string(),
            "cannot read workbook missing.xlsx: file not found"
        );
    }

    #[test]
    fn test_warning_display() {
        let warn = ExtractionWarning::new("Sheet1!B2", "unreadable style");
        assert_eq!(warn.to_string(), "Sheet1!B2: unreadable style");
    }
}
