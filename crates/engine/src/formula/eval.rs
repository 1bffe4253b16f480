// Formula evaluator - evaluates expression trees against a reference resolver

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cell_ref::{CellRange, CellRef};
use crate::error::CellError;
use crate::label::LabelTarget;
use super::expr::{Expr, Symbol};
use super::functions;
use super::parser::Op;

/// Resolves symbolic references while an expression is evaluated.
///
/// Methods take `&mut self` because resolving a reference may evaluate (and
/// cache) the referenced cell.
pub trait ReferenceResolver {
    /// Value of a single cell. A missing cell is an error, not an empty value.
    fn resolve_cell(&mut self, cell: CellRef) -> Result<Value, CellError>;

    /// Values of every stored cell in the range, row-major. Empty addresses
    /// are skipped.
    fn resolve_range(&mut self, range: &CellRange) -> Result<Vec<Value>, CellError>;

    /// Target of a label, None if no such label exists.
    fn resolve_label(&mut self, name: &str) -> Option<LabelTarget>;

    /// Dispatch a named function over already evaluated arguments.
    fn call_function(&mut self, name: &str, args: Vec<Arg>) -> Result<Value, CellError> {
        functions::call(name, args)
    }
}

// =============================================================================
// Value: the scalar primitive for all cell values
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    /// Literal cell input: a number if it parses as one, else text.
    pub fn from_input(input: &str) -> Value {
        let trimmed = input.trim();
        match trimmed.parse::<f64>() {
            Ok(n) if !trimmed.is_empty() && n.is_finite() => Value::Number(n),
            _ => Value::Text(input.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn to_number(&self) -> Result<f64, CellError> {
        match self {
            Value::Empty => Ok(0.0),
            Value::Number(n) => Ok(*n),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) if s.trim().is_empty() => Ok(0.0),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| CellError::value(format!("Expected a number, got \"{}\"", s))),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Value::Empty => String::new(),
            Value::Number(n) => format_general(*n),
            Value::Text(s) => s.clone(),
            Value::Boolean(b) => if *b { "TRUE".to_string() } else { "FALSE".to_string() },
        }
    }

    pub fn to_bool(&self) -> Result<bool, CellError> {
        match self {
            Value::Empty => Ok(false),
            Value::Number(n) => Ok(*n != 0.0),
            Value::Boolean(b) => Ok(*b),
            Value::Text(s) => {
                if s.eq_ignore_ascii_case("TRUE") {
                    Ok(true)
                } else if s.eq_ignore_ascii_case("FALSE") {
                    Ok(false)
                } else {
                    Err(CellError::value(format!("Expected TRUE or FALSE, got \"{}\"", s)))
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Integers print without a fraction, everything else uses the shortest
/// round-trip form.
pub fn format_general(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Spreadsheet ordering: numbers < text < booleans; text compares
/// case-insensitively. Empty takes the type of the other side.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Number(_) | Value::Empty => 0,
            Value::Text(_) => 1,
            Value::Boolean(_) => 2,
        }
    }

    match (a, b) {
        (Value::Empty, Value::Text(s)) => "".cmp(s.to_lowercase().as_str()),
        (Value::Text(s), Value::Empty) => s.to_lowercase().as_str().cmp(""),
        (Value::Empty, Value::Boolean(b)) => false.cmp(b),
        (Value::Boolean(b), Value::Empty) => b.cmp(&false),
        (Value::Text(x), Value::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::Number(_) | Value::Empty, Value::Number(_) | Value::Empty) => {
            let x = a.to_number().unwrap_or(0.0);
            let y = b.to_number().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// A function argument: a scalar, or the values of a range.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Scalar(Value),
    List(Vec<Value>),
}

/// Evaluate an expression to a single value.
pub fn evaluate<R: ReferenceResolver + ?Sized>(expr: &Expr, resolver: &mut R) -> Result<Value, CellError> {
    scalar(expr, resolver)
}

fn scalar<R: ReferenceResolver + ?Sized>(expr: &Expr, resolver: &mut R) -> Result<Value, CellError> {
    match operand(expr, resolver)? {
        Arg::Scalar(value) => Ok(value),
        Arg::List(_) => Err(CellError::value("Range used where a single value is expected")),
    }
}

fn operand<R: ReferenceResolver + ?Sized>(expr: &Expr, resolver: &mut R) -> Result<Arg, CellError> {
    match expr {
        Expr::Literal(value) => Ok(Arg::Scalar(value.clone())),
        Expr::Empty => Ok(Arg::Scalar(Value::Empty)),
        Expr::RefError => Err(CellError::invalid_reference()),
        Expr::Symbol(Symbol::Cell(cell)) => resolver.resolve_cell(*cell).map(Arg::Scalar),
        Expr::Symbol(Symbol::Range(range)) => resolver.resolve_range(range).map(Arg::List),
        Expr::Symbol(Symbol::Label(name)) => match resolver.resolve_label(name) {
            Some(LabelTarget::Cell(cell)) => resolver.resolve_cell(cell).map(Arg::Scalar),
            Some(LabelTarget::Range(range)) => resolver.resolve_range(&range).map(Arg::List),
            None => Err(CellError::unknown_label(name)),
        },
        Expr::Negate(inner) => {
            let n = scalar(inner, resolver)?.to_number()?;
            Ok(Arg::Scalar(Value::Number(-n)))
        }
        Expr::Percent(inner) => {
            let n = scalar(inner, resolver)?.to_number()?;
            Ok(Arg::Scalar(Value::Number(n / 100.0)))
        }
        Expr::Binary { op, left, right } => {
            let left = scalar(left, resolver)?;
            let right = scalar(right, resolver)?;
            binary(*op, &left, &right).map(Arg::Scalar)
        }
        Expr::Call { name, args } if name == "IF" => eval_if(args, resolver).map(Arg::Scalar),
        Expr::Call { name, args } => {
            let mut evaluated = Vec::with_capacity(args.len());
            for arg in args {
                evaluated.push(operand(arg, resolver)?);
            }
            resolver.call_function(name, evaluated).map(Arg::Scalar)
        }
    }
}

// IF only evaluates the branch it takes
fn eval_if<R: ReferenceResolver + ?Sized>(args: &[Expr], resolver: &mut R) -> Result<Value, CellError> {
    if args.len() < 2 || args.len() > 3 {
        return Err(CellError::value("Wrong number of arguments to IF"));
    }
    let condition = scalar(&args[0], resolver)?.to_bool()?;
    let branch = if condition { args.get(1) } else { args.get(2) };
    match branch {
        None => Ok(Value::Boolean(false)),
        Some(Expr::Empty) => Ok(Value::Number(0.0)),
        Some(expr) => scalar(expr, resolver),
    }
}

fn binary(op: Op, left: &Value, right: &Value) -> Result<Value, CellError> {
    let result = match op {
        Op::Concat => return Ok(Value::Text(format!("{}{}", left.to_text(), right.to_text()))),
        Op::Lt => return Ok(Value::Boolean(compare_values(left, right) == Ordering::Less)),
        Op::Gt => return Ok(Value::Boolean(compare_values(left, right) == Ordering::Greater)),
        Op::Eq => return Ok(Value::Boolean(compare_values(left, right) == Ordering::Equal)),
        Op::LtEq => return Ok(Value::Boolean(compare_values(left, right) != Ordering::Greater)),
        Op::GtEq => return Ok(Value::Boolean(compare_values(left, right) != Ordering::Less)),
        Op::NotEq => return Ok(Value::Boolean(compare_values(left, right) != Ordering::Equal)),
        Op::Add => left.to_number()? + right.to_number()?,
        Op::Sub => left.to_number()? - right.to_number()?,
        Op::Mul => left.to_number()? * right.to_number()?,
        Op::Div => {
            let divisor = right.to_number()?;
            if divisor == 0.0 {
                return Err(CellError::division_by_zero());
            }
            left.to_number()? / divisor
        }
        Op::Pow => left.to_number()?.powf(right.to_number()?),
    };
    finite(result)
}

pub(crate) fn finite(n: f64) -> Result<Value, CellError> {
    if n.is_finite() {
        Ok(Value::Number(n))
    } else {
        Err(CellError::arithmetic("Result is not a finite number"))
    }
}
