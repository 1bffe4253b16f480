use cellflow_config::Color;
use serde::{Deserialize, Serialize};

use crate::cell_ref::CellRef;
use crate::error::{CellError, EngineError};
use crate::format::Formatter;
use crate::formula::eval::Value;
use crate::formula::expr::Expr;
use crate::formula::parser::Node;

/// Horizontal text alignment
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Alignment {
    /// Numbers right, text left
    #[default]
    General,
    Left,
    Center,
    Right,
}

/// Visual style of a cell
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Style {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strikethrough: bool,
    pub alignment: Alignment,
    pub color: Option<Color>,       // None = default text color
    pub background: Option<Color>,  // None = no fill
}

/// A partial style: only the properties that are set get applied.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct StylePatch {
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub underline: Option<bool>,
    pub strikethrough: Option<bool>,
    pub alignment: Option<Alignment>,
    pub color: Option<Color>,
    pub background: Option<Color>,
}

impl StylePatch {
    /// `base` with every set property of the patch overlaid.
    pub fn apply(&self, base: &Style) -> Style {
        Style {
            bold: self.bold.unwrap_or(base.bold),
            italic: self.italic.unwrap_or(base.italic),
            underline: self.underline.unwrap_or(base.underline),
            strikethrough: self.strikethrough.unwrap_or(base.strikethrough),
            alignment: self.alignment.unwrap_or(base.alignment),
            color: self.color.or(base.color),
            background: self.background.or(base.background),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == StylePatch::default()
    }
}

/// Final display output of a cell
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Rendered {
    pub text: String,
    pub style: Style,
}

/// A cell's format pattern and its lazily compiled formatter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatPattern {
    pattern: String,
    #[serde(skip)]
    compiled: Option<Formatter>,
}

impl FormatPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), compiled: None }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// The compiled formatter, compiling on first use.
    pub fn formatter(&mut self) -> Result<&Formatter, EngineError> {
        if self.compiled.is_none() {
            self.compiled = Some(Formatter::compile(&self.pattern)?);
        }
        self.compiled
            .as_ref()
            .ok_or_else(|| EngineError::FormatPattern {
                pattern: self.pattern.clone(),
                reason: "not compiled".to_string(),
            })
    }
}

// Two patterns are the same if their text is; the compiled cache is incidental.
impl PartialEq for FormatPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

/// Result slot of a formula.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum Outcome {
    #[default]
    Empty,
    Value(Value),
    Error(CellError),
}

impl Outcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&CellError> {
        match self {
            Outcome::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }
}

impl From<Result<Value, CellError>> for Outcome {
    fn from(result: Result<Value, CellError>) -> Self {
        match result {
            Ok(v) => Outcome::Value(v),
            Err(e) => Outcome::Error(e),
        }
    }
}

/// Cell input text with its cached trees and last result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Formula {
    pub text: String,
    #[serde(skip)]
    pub ast: Option<Node>,
    #[serde(skip)]
    pub expr: Option<Expr>,
    pub result: Outcome,
}

impl Formula {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Self::default() }
    }

    /// True for `=` formulas, false for literal input.
    pub fn is_expression(&self) -> bool {
        self.text.trim_start().starts_with('=')
    }

    pub fn clear_caches(&mut self) {
        self.ast = None;
        self.expr = None;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cell {
    /// Normalized address
    pub address: CellRef,
    pub formula: Formula,
    pub format: Option<FormatPattern>,
    pub style: Style,
    /// Recomputed by the engine whenever value, style, format or a matching
    /// conditional rule changes.
    pub rendered: Option<Rendered>,
}

impl Cell {
    pub fn new(address: CellRef, text: impl Into<String>) -> Self {
        Self {
            address: address.normalized(),
            formula: Formula::new(text),
            format: None,
            style: Style::default(),
            rendered: None,
        }
    }

    /// Same cell with new input text. Result and caches start over.
    pub fn with_formula(&self, text: impl Into<String>) -> Self {
        Self {
            formula: Formula::new(text),
            rendered: None,
            ..self.clone()
        }
    }

    /// Same cell with a rewritten syntax tree and the text that goes with it.
    /// The result is kept until the next evaluation.
    pub fn with_ast(&self, text: String, ast: Node) -> Self {
        let mut cell = self.clone();
        cell.formula.text = text;
        cell.formula.ast = Some(ast);
        cell.formula.expr = None;
        cell
    }

    pub fn with_style(&self, style: Style) -> Self {
        Self { style, rendered: None, ..self.clone() }
    }

    pub fn with_format(&self, pattern: Option<&str>) -> Self {
        Self {
            format: pattern.map(FormatPattern::new),
            rendered: None,
            ..self.clone()
        }
    }

    /// Same cell at another address.
    pub fn at(&self, address: CellRef) -> Self {
        Self { address: address.normalized(), ..self.clone() }
    }

    pub fn text(&self) -> &str {
        &self.formula.text
    }

    pub fn result(&self) -> &Outcome {
        &self.formula.result
    }

    pub fn value(&self) -> Option<&Value> {
        self.formula.result.value()
    }

    pub fn error(&self) -> Option<&CellError> {
        self.formula.result.error()
    }

    /// Rendered text, or "" if the cell has not been rendered yet.
    pub fn display_text(&self) -> &str {
        self.rendered.as_ref().map(|r| r.text.as_str()).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_defaults() {
        let style = Style::default();
        assert!(!style.bold);
        assert!(!style.italic);
        assert!(!style.underline);
        assert!(!style.strikethrough);
        assert_eq!(style.alignment, Alignment::General);
        assert_eq!(style.color, None);
        assert_eq!(style.background, None);
    }

    #[test]
    fn test_patch_overlays_only_set_properties() {
        let base = Style { italic: true, color: Some(Color::BLUE), ..Style::default() };
        let patch = StylePatch { bold: Some(true), color: Some(Color::RED), ..StylePatch::default() };

        let styled = patch.apply(&base);
        assert!(styled.bold);
        assert!(styled.italic);
        assert_eq!(styled.color, Some(Color::RED));
        assert!(StylePatch::default().is_empty());
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_cells_are_values() {
        let cell = Cell::new("$B$2".parse().unwrap(), "=1+2");
        assert_eq!(cell.address, CellRef::new(1, 1));
        assert!(cell.formula.is_expression());

        let edited = cell.with_formula("hello");
        assert_eq!(cell.text(), "=1+2");
        assert_eq!(edited.text(), "hello");
        assert!(!edited.formula.is_expression());

        let moved = edited.at(CellRef::new(0, 0));
        assert_eq!(moved.address, CellRef::new(0, 0));
        assert_eq!(moved.text(), "hello");
    }

    #[test]
    fn test_format_pattern_compiles_lazily() {
        let mut pattern = FormatPattern::new("0.00");
        assert!(!pattern.is_compiled());
        pattern.formatter().unwrap();
        assert!(pattern.is_compiled());
        assert_eq!(pattern, FormatPattern::new("0.00"));

        let mut bad = FormatPattern::new("0.0.0");
        assert!(bad.formatter().is_err());
    }

    #[test]
    fn test_outcome_from_result() {
        assert_eq!(Outcome::from(Ok(Value::Number(1.0))).value(), Some(&Value::Number(1.0)));
        assert!(Outcome::from(Err(CellError::invalid_reference())).is_error());
    }
}
