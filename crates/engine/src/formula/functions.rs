// Built-in spreadsheet functions

use chrono::{Datelike, NaiveDate};

use crate::error::CellError;
use super::eval::{finite, Arg, Value};

/// Check if a function name is a known built-in function.
/// Function names must be uppercase (as produced by the parser).
pub fn is_known_function(name: &str) -> bool {
    matches!(name,
        // Math
        "SUM" | "AVERAGE" | "MIN" | "MAX" | "COUNT" | "ABS" | "ROUND" |
        // Logic
        "IF" | "AND" | "OR" | "NOT" |
        // Text
        "LEN" | "UPPER" | "LOWER" | "CONCAT" |
        // Date
        "DATE"
    )
}

/// Call a built-in function. IF never reaches here, the evaluator handles it
/// so that only the taken branch is evaluated.
pub fn call(name: &str, args: Vec<Arg>) -> Result<Value, CellError> {
    match name {
        "SUM" => sum(&args),
        "AVERAGE" => average(&args),
        "MIN" => min(&args),
        "MAX" => max(&args),
        "COUNT" => Ok(Value::Number(count(&args) as f64)),
        "ABS" => {
            let [x] = fixed::<1>(name, args)?;
            finite(number(&x)?.abs())
        }
        "ROUND" => round(name, args),
        "AND" => {
            let bools = booleans(name, &args)?;
            Ok(Value::Boolean(bools.iter().all(|b| *b)))
        }
        "OR" => {
            let bools = booleans(name, &args)?;
            Ok(Value::Boolean(bools.iter().any(|b| *b)))
        }
        "NOT" => {
            let [x] = fixed::<1>(name, args)?;
            Ok(Value::Boolean(!scalar(&x)?.to_bool()?))
        }
        "LEN" => {
            let [x] = fixed::<1>(name, args)?;
            Ok(Value::Number(scalar(&x)?.to_text().chars().count() as f64))
        }
        "UPPER" => {
            let [x] = fixed::<1>(name, args)?;
            Ok(Value::Text(scalar(&x)?.to_text().to_uppercase()))
        }
        "LOWER" => {
            let [x] = fixed::<1>(name, args)?;
            Ok(Value::Text(scalar(&x)?.to_text().to_lowercase()))
        }
        "CONCAT" => {
            let mut out = String::new();
            for arg in &args {
                match arg {
                    Arg::Scalar(v) => out.push_str(&v.to_text()),
                    Arg::List(values) => values.iter().for_each(|v| out.push_str(&v.to_text())),
                }
            }
            Ok(Value::Text(out))
        }
        "DATE" => date(name, args),
        _ => Err(CellError::value(format!("Unknown function: {}", name))),
    }
}

fn arity_error(name: &str) -> CellError {
    CellError::value(format!("Wrong number of arguments to {}", name))
}

/// Exactly N arguments.
fn fixed<const N: usize>(name: &str, args: Vec<Arg>) -> Result<[Arg; N], CellError> {
    args.try_into().map_err(|_| arity_error(name))
}

fn scalar(arg: &Arg) -> Result<&Value, CellError> {
    match arg {
        Arg::Scalar(v) => Ok(v),
        Arg::List(_) => Err(CellError::value("Range used where a single value is expected")),
    }
}

fn number(arg: &Arg) -> Result<f64, CellError> {
    scalar(arg)?.to_number()
}

/// Numbers for aggregation. Scalars are coerced; range values contribute only
/// if they are numbers.
fn numbers(args: &[Arg]) -> Result<Vec<f64>, CellError> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Arg::Scalar(Value::Empty) => {}
            Arg::Scalar(v) => out.push(v.to_number()?),
            Arg::List(values) => out.extend(values.iter().filter_map(|v| match v {
                Value::Number(n) => Some(*n),
                _ => None,
            })),
        }
    }
    Ok(out)
}

fn booleans(name: &str, args: &[Arg]) -> Result<Vec<bool>, CellError> {
    if args.is_empty() {
        return Err(arity_error(name));
    }
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Arg::Scalar(v) => out.push(v.to_bool()?),
            Arg::List(values) => {
                for v in values {
                    match v {
                        Value::Number(n) => out.push(*n != 0.0),
                        Value::Boolean(b) => out.push(*b),
                        _ => {}
                    }
                }
            }
        }
    }
    Ok(out)
}

fn sum(args: &[Arg]) -> Result<Value, CellError> {
    finite(numbers(args)?.iter().sum())
}

fn average(args: &[Arg]) -> Result<Value, CellError> {
    let values = numbers(args)?;
    if values.is_empty() {
        return Err(CellError::division_by_zero());
    }
    finite(values.iter().sum::<f64>() / values.len() as f64)
}

fn min(args: &[Arg]) -> Result<Value, CellError> {
    let values = numbers(args)?;
    Ok(Value::Number(values.into_iter().reduce(f64::min).unwrap_or(0.0)))
}

fn max(args: &[Arg]) -> Result<Value, CellError> {
    let values = numbers(args)?;
    Ok(Value::Number(values.into_iter().reduce(f64::max).unwrap_or(0.0)))
}

fn count(args: &[Arg]) -> usize {
    args.iter()
        .map(|arg| match arg {
            Arg::Scalar(v) => usize::from(v.to_number().is_ok() && !v.is_empty()),
            Arg::List(values) => values.iter().filter(|v| matches!(v, Value::Number(_))).count(),
        })
        .sum()
}

fn round(name: &str, args: Vec<Arg>) -> Result<Value, CellError> {
    let (x, digits) = match args.len() {
        1 => (number(&args[0])?, 0.0),
        2 => (number(&args[0])?, number(&args[1])?.trunc()),
        _ => return Err(arity_error(name)),
    };
    // Half away from zero, as f64::round does
    if digits >= 0.0 {
        let factor = 10f64.powi(digits as i32);
        finite((x * factor).round() / factor)
    } else {
        let factor = 10f64.powi(-digits as i32);
        finite((x / factor).round() * factor)
    }
}

/// DATE(year, month, day) as a serial day number counted from 1899-12-30.
/// Months outside 1..=12 roll into adjacent years.
fn date(name: &str, args: Vec<Arg>) -> Result<Value, CellError> {
    let [y, m, d] = fixed::<3>(name, args)?;
    let (year, month, day) = (number(&y)?.trunc(), number(&m)?.trunc(), number(&d)?.trunc());
    if year.abs() > 9999.0 || month.abs() > 120_000.0 || day.abs() > 3_650_000.0 {
        return Err(CellError::value("Invalid date"));
    }

    let total_months = year * 12.0 + (month - 1.0);
    let year = (total_months / 12.0).floor();
    let month = total_months - year * 12.0 + 1.0;

    let first = NaiveDate::from_ymd_opt(year as i32, month as u32, 1)
        .ok_or_else(|| CellError::value("Invalid date"))?;
    let date = first
        .checked_add_signed(chrono::Duration::days(day as i64 - 1))
        .ok_or_else(|| CellError::value("Invalid date"))?;
    if date.year() < 1900 {
        return Err(CellError::value("Invalid date"));
    }

    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30).ok_or_else(|| CellError::value("Invalid date"))?;
    Ok(Value::Number((date - epoch).num_days() as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn n(x: f64) -> Arg {
        Arg::Scalar(Value::Number(x))
    }

    fn list(values: Vec<Value>) -> Arg {
        Arg::List(values)
    }

    #[test]
    fn test_aggregates() {
        let range = list(vec![Value::Number(1.0), Value::Text("x".into()), Value::Number(3.0)]);
        assert_eq!(call("SUM", vec![range.clone(), n(2.0)]).unwrap(), Value::Number(6.0));
        assert_eq!(call("AVERAGE", vec![range.clone()]).unwrap(), Value::Number(2.0));
        assert_eq!(call("MIN", vec![range.clone()]).unwrap(), Value::Number(1.0));
        assert_eq!(call("MAX", vec![range.clone(), n(7.0)]).unwrap(), Value::Number(7.0));
        assert_eq!(call("COUNT", vec![range]).unwrap(), Value::Number(2.0));
        assert_eq!(call("MAX", vec![]).unwrap(), Value::Number(0.0));
    }

    #[test]
    fn test_average_of_nothing() {
        let err = call("AVERAGE", vec![list(vec![])]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Arithmetic);
    }

    #[test]
    fn test_round_and_abs() {
        assert_eq!(call("ROUND", vec![n(2.346), n(2.0)]).unwrap(), Value::Number(2.35));
        assert_eq!(call("ROUND", vec![n(2.5)]).unwrap(), Value::Number(3.0));
        assert_eq!(call("ROUND", vec![n(1234.0), n(-2.0)]).unwrap(), Value::Number(1200.0));
        assert_eq!(call("ABS", vec![n(-4.0)]).unwrap(), Value::Number(4.0));
        assert!(call("ABS", vec![]).is_err());
    }

    #[test]
    fn test_logic() {
        let t = Arg::Scalar(Value::Boolean(true));
        let f = Arg::Scalar(Value::Boolean(false));
        assert_eq!(call("AND", vec![t.clone(), f.clone()]).unwrap(), Value::Boolean(false));
        assert_eq!(call("OR", vec![t.clone(), f.clone()]).unwrap(), Value::Boolean(true));
        assert_eq!(call("NOT", vec![f]).unwrap(), Value::Boolean(true));
        assert!(call("AND", vec![]).is_err());
    }

    #[test]
    fn test_text() {
        let s = Arg::Scalar(Value::Text("MiXed".into()));
        assert_eq!(call("LEN", vec![s.clone()]).unwrap(), Value::Number(5.0));
        assert_eq!(call("UPPER", vec![s.clone()]).unwrap(), Value::Text("MIXED".into()));
        assert_eq!(call("LOWER", vec![s.clone()]).unwrap(), Value::Text("mixed".into()));
        assert_eq!(
            call("CONCAT", vec![s, n(1.0), list(vec![Value::Text("a".into()), Value::Boolean(true)])]).unwrap(),
            Value::Text("MiXed1aTRUE".into())
        );
    }

    #[test]
    fn test_date() {
        assert_eq!(call("DATE", vec![n(1900.0), n(1.0), n(1.0)]).unwrap(), Value::Number(2.0));
        assert_eq!(call("DATE", vec![n(2024.0), n(1.0), n(15.0)]).unwrap(), Value::Number(45306.0));
        // Month 13 rolls into January of the next year
        assert_eq!(
            call("DATE", vec![n(2023.0), n(13.0), n(15.0)]).unwrap(),
            Value::Number(45306.0)
        );
        let err = call("DATE", vec![n(1800.0), n(1.0), n(1.0)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Value);
    }

    #[test]
    fn test_unknown_function() {
        let err = call("FROB", vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Value);
        assert_eq!(err.message, "Unknown function: FROB");
    }
}
