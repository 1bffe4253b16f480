//! Error types.
//!
//! Two layers: `CellError` lives inside a cell's result slot and is never
//! returned as `Err`; `EngineError` is what engine operations fail with.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a per-cell failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Formula text could not be parsed.
    Parse,
    /// A reference points nowhere: missing cell, unknown label, `#REF!`.
    Reference,
    /// An operand or argument had the wrong type or arity.
    Value,
    /// Numeric failure such as division by zero.
    Arithmetic,
}

/// A failure stored in a cell's result slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CellError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn reference(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Reference, message)
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value, message)
    }

    pub fn arithmetic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Arithmetic, message)
    }

    pub fn unknown_cell(cell: impl fmt::Display) -> Self {
        Self::reference(format!("Unknown Cell: {}", cell))
    }

    pub fn unknown_label(name: &str) -> Self {
        Self::reference(format!("Unknown Label: {}", name))
    }

    pub fn invalid_reference() -> Self {
        Self::reference("Invalid Reference")
    }

    pub fn division_by_zero() -> Self {
        Self::arithmetic("Division by zero")
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CellError {}

/// Failure of an engine operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid format pattern {pattern:?}: {reason}")]
    FormatPattern { pattern: String, reason: String },

    #[error("row/column count must be at least 1")]
    InvalidCount,

    #[error("{count} row(s)/column(s) at {at} do not fit a grid of {limit}")]
    OutOfGrid { at: usize, count: usize, limit: usize },

    #[error("invalid label name: {0}")]
    InvalidLabel(String),

    #[error("unknown label: {0}")]
    UnknownLabel(String),

    #[error("fill of {cells} cells exceeds the limit of {limit}")]
    FillTooLarge { cells: usize, limit: usize },

    #[error("settings: {0}")]
    Settings(String),
}

impl From<cellflow_config::settings::SettingsError> for EngineError {
    fn from(err: cellflow_config::settings::SettingsError) -> Self {
        EngineError::Settings(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_error_messages() {
        assert_eq!(CellError::unknown_cell("B2").message, "Unknown Cell: B2");
        assert_eq!(CellError::unknown_label("Total").message, "Unknown Label: Total");
        assert_eq!(CellError::invalid_reference().message, "Invalid Reference");
        assert_eq!(CellError::invalid_reference().kind, ErrorKind::Reference);
        assert_eq!(CellError::division_by_zero().kind, ErrorKind::Arithmetic);
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::FillTooLarge { cells: 10, limit: 5 };
        assert_eq!(err.to_string(), "fill of 10 cells exceeds the limit of 5");

        let err = EngineError::FormatPattern {
            pattern: "0.0.0".to_string(),
            reason: "more than one decimal point".to_string(),
        };
        assert!(err.to_string().contains("0.0.0"));
    }
}
