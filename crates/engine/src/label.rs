//! Label definitions.
//!
//! A label gives a name to a cell or a range so formulas can say
//! `=SUM(Revenue)` instead of `=SUM(A1:A100)`. Names are case-insensitive:
//! stores key them by `label_key`, the mapping keeps the original case.

use serde::{Deserialize, Serialize};

use crate::cell_ref::{parse_a1, CellRange, CellRef};
use crate::formula::functions::is_known_function;

/// A label bound to a cell or a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMapping {
    /// Name as the user wrote it.
    pub name: String,
    pub target: LabelTarget,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelTarget {
    Cell(CellRef),
    Range(CellRange),
}

impl LabelMapping {
    pub fn cell(name: impl Into<String>, cell: CellRef) -> Self {
        Self {
            name: name.into(),
            target: LabelTarget::Cell(cell.normalized()),
            description: None,
        }
    }

    pub fn range(name: impl Into<String>, range: CellRange) -> Self {
        Self {
            name: name.into(),
            target: LabelTarget::Range(range.normalized()),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_target(&self, target: LabelTarget) -> Self {
        Self { target, ..self.clone() }
    }

    pub fn key(&self) -> String {
        label_key(&self.name)
    }

    /// Target in A1 notation (`B2` or `A1:B10`).
    pub fn reference_string(&self) -> String {
        match &self.target {
            LabelTarget::Cell(cell) => cell.to_string(),
            LabelTarget::Range(range) => range.to_string(),
        }
    }

    /// True if the label's target covers `cell`.
    pub fn references_cell(&self, cell: &CellRef) -> bool {
        match &self.target {
            LabelTarget::Cell(target) => target.same_address(cell),
            LabelTarget::Range(range) => range.contains(cell),
        }
    }
}

/// Store key for a label name.
pub fn label_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Validate a label name.
/// Rules:
/// - Must start with letter or underscore
/// - Can contain letters, numbers, underscores, and dots
/// - Cannot be a cell reference (A1, BC23) or a range (A1:B2)
/// - Cannot be a function name (SUM, IF, VLOOKUP)
/// - Cannot be a boolean or error literal (TRUE, FALSE, REF)
pub fn is_valid_name(name: &str) -> Result<(), String> {
    let name = name.trim();

    let first = match name.chars().next() {
        Some(c) => c,
        None => return Err("Name cannot be empty".into()),
    };

    if first.is_ascii_digit() {
        return Err("Name must start with a letter or underscore, not a digit".into());
    }
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err("Name must start with a letter or underscore".into());
    }

    // Dots allow namespaces like ACME.Revenue
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return Err("Name can only contain letters, numbers, underscores, and dots".into());
    }
    if name.ends_with('.') {
        return Err("Name cannot end with a dot".into());
    }
    if name.contains("..") {
        return Err("Name cannot have consecutive dots".into());
    }

    if parse_a1(name).is_some() {
        return Err(format!(
            "'{}' looks like a cell reference (e.g., A1, BC23). Choose a different name.",
            name
        ));
    }

    let upper = name.to_uppercase();

    if upper == "TRUE" || upper == "FALSE" {
        return Err(format!("'{}' is a reserved boolean value. Choose a different name.", name));
    }

    const ERROR_LITERALS: &[&str] = &["REF", "DIV", "NAME", "VALUE", "NUM", "NA", "NULL", "ERROR"];
    if ERROR_LITERALS.contains(&upper.as_str()) {
        return Err(format!("'{}' conflicts with an error value. Choose a different name.", name));
    }

    if is_known_function(&upper) || RESERVED_FUNCTIONS.contains(&upper.as_str()) {
        return Err(format!(
            "'{}' is a function name. Choose a different name to avoid confusion.",
            name
        ));
    }

    Ok(())
}

// Common spreadsheet functions outside the builtin set. Names that collide with
// these would break if the function library grows.
const RESERVED_FUNCTIONS: &[&str] = &[
    "SUMIF", "SUMIFS", "SUMPRODUCT", "AVERAGEIF", "AVERAGEIFS",
    "COUNTA", "COUNTBLANK", "COUNTIF", "COUNTIFS", "MEDIAN", "MODE",
    "ROUNDUP", "ROUNDDOWN", "TRUNC", "INT", "FLOOR", "CEILING",
    "MOD", "POWER", "SQRT", "EXP", "LN", "LOG", "LOG10", "PI", "RAND",
    "PRODUCT", "LEFT", "RIGHT", "MID", "FIND", "SEARCH", "CONCATENATE",
    "TEXTJOIN", "PROPER", "TRIM", "SUBSTITUTE", "REPLACE", "REPT", "TEXT",
    "IFS", "IFERROR", "IFNA", "XOR", "SWITCH", "CHOOSE",
    "VLOOKUP", "HLOOKUP", "XLOOKUP", "LOOKUP", "INDEX", "MATCH", "XMATCH",
    "INDIRECT", "OFFSET", "ADDRESS", "ROW", "ROWS", "COLUMN", "COLUMNS",
    "TIME", "NOW", "TODAY", "YEAR", "MONTH", "DAY", "HOUR", "MINUTE", "SECOND",
    "WEEKDAY", "EDATE", "EOMONTH", "DATEDIF",
    "STDEV", "VAR", "LARGE", "SMALL", "RANK",
    "NPV", "IRR", "PMT", "FV", "PV", "NPER", "RATE",
    "ISBLANK", "ISERROR", "ISTEXT", "ISNUMBER",
];
