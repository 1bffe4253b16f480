//! Number/text format patterns.
//!
//! A pattern has up to four `;`-separated sections: positive, negative, zero
//! and text. Each section may carry a `[Color]` tag, `0`/`#` digit
//! placeholders with `,` grouping and a `.` decimal point, `%` scaling,
//! quoted or backslash-escaped literals, and `@` for the text value.
//! `General` prints numbers in their shortest form.

use cellflow_config::Color;

use crate::error::EngineError;
use crate::formula::eval::{format_general, Value};

/// Formatter output: text plus an optional color from a `[Color]` tag.
#[derive(Debug, Clone, PartialEq)]
pub struct StyledText {
    pub text: String,
    pub color: Option<Color>,
}

/// A compiled format pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Formatter {
    pattern: String,
    sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq)]
struct Section {
    color: Option<Color>,
    parts: Vec<Part>,
    digits: Option<Digits>,
    /// Each `%` multiplies by 100.
    percent: u32,
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    /// Where the number goes.
    Number,
    General,
    /// `@`
    Text,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Digits {
    /// `0`s before the decimal point.
    int_min: usize,
    /// `0`s after the decimal point.
    frac_min: usize,
    /// `0`s and `#`s after the decimal point.
    frac_max: usize,
    grouping: bool,
}

impl Formatter {
    pub fn compile(pattern: &str) -> Result<Formatter, EngineError> {
        let fail = |reason: String| EngineError::FormatPattern {
            pattern: pattern.to_string(),
            reason,
        };

        let raw_sections = split_sections(pattern).map_err(&fail)?;
        if raw_sections.len() > 4 {
            return Err(fail("more than four sections".to_string()));
        }
        let sections = raw_sections
            .iter()
            .map(|s| compile_section(s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(fail)?;

        Ok(Formatter { pattern: pattern.to_string(), sections })
    }

    /// The `General` pattern, without going through the compiler.
    pub fn general() -> Formatter {
        Formatter {
            pattern: "General".to_string(),
            sections: vec![Section { color: None, parts: vec![Part::General], digits: None, percent: 0 }],
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn format(&self, value: &Value) -> StyledText {
        match value {
            Value::Empty => StyledText { text: String::new(), color: None },
            Value::Number(n) => self.format_number(*n),
            Value::Text(s) => self.format_text(s),
            Value::Boolean(b) => StyledText {
                text: if *b { "TRUE".to_string() } else { "FALSE".to_string() },
                color: None,
            },
        }
    }

    fn format_number(&self, n: f64) -> StyledText {
        let numeric = &self.sections[..self.sections.len().min(3)];
        let (section, value, sign) = match numeric.len() {
            1 => (&numeric[0], n.abs(), n < 0.0),
            2 if n < 0.0 => (&numeric[1], n.abs(), false),
            2 => (&numeric[0], n, false),
            _ if n < 0.0 => (&numeric[1], n.abs(), false),
            _ if n == 0.0 => (&numeric[2], 0.0, false),
            _ => (&numeric[0], n, false),
        };

        let scaled = value * 100f64.powi(section.percent as i32);
        let mut text = String::new();
        if sign && !rounds_to_zero(section, scaled) {
            text.push('-');
        }
        for part in &section.parts {
            match part {
                Part::Literal(s) => text.push_str(s),
                Part::Number => text.push_str(&render_digits(section.digits.as_ref(), scaled)),
                Part::General => text.push_str(&format_general(scaled)),
                Part::Text => {}
            }
        }
        StyledText { text, color: section.color }
    }

    fn format_text(&self, s: &str) -> StyledText {
        let Some(section) = self.sections.get(3).or_else(|| {
            // A single section containing @ applies to text as well
            self.sections.first().filter(|sec| sec.parts.contains(&Part::Text))
        }) else {
            return StyledText { text: s.to_string(), color: None };
        };

        let mut text = String::new();
        for part in &section.parts {
            match part {
                Part::Literal(lit) => text.push_str(lit),
                Part::Text => text.push_str(s),
                Part::Number | Part::General => {}
            }
        }
        StyledText { text, color: section.color }
    }
}

fn rounds_to_zero(section: &Section, value: f64) -> bool {
    match &section.digits {
        Some(d) => {
            let factor = 10f64.powi(d.frac_max as i32);
            (value * factor).round() == 0.0
        }
        None => value == 0.0,
    }
}

fn split_sections(pattern: &str) -> Result<Vec<String>, String> {
    let mut sections = vec![String::new()];
    let mut chars = pattern.chars();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        let current = sections.last_mut().ok_or_else(|| "empty pattern".to_string())?;
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\\' if !in_quotes => {
                current.push(c);
                match chars.next() {
                    Some(next) => current.push(next),
                    None => return Err("dangling escape at end of pattern".to_string()),
                }
            }
            ';' if !in_quotes => sections.push(String::new()),
            _ => current.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted literal".to_string());
    }
    Ok(sections)
}

fn compile_section(source: &str) -> Result<Section, String> {
    let mut section = Section { color: None, parts: Vec::new(), digits: None, percent: 0 };
    let mut literal = String::new();
    let mut digits = Digits::default();
    let mut seen_digit = false;
    let mut seen_point = false;
    let mut chars = source.chars().peekable();

    fn flush(literal: &mut String, parts: &mut Vec<Part>) {
        if !literal.is_empty() {
            parts.push(Part::Literal(std::mem::take(literal)));
        }
    }

    while let Some(c) = chars.next() {
        match c {
            '[' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(ch) => name.push(ch),
                        None => return Err("unterminated [ tag".to_string()),
                    }
                }
                let color = Color::named(&name).ok_or_else(|| format!("unknown color [{}]", name))?;
                section.color = Some(color);
            }
            '"' => {
                for ch in chars.by_ref() {
                    if ch == '"' {
                        break;
                    }
                    literal.push(ch);
                }
            }
            '\\' => {
                if let Some(ch) = chars.next() {
                    literal.push(ch);
                }
            }
            '0' | '#' => {
                if !seen_digit {
                    flush(&mut literal, &mut section.parts);
                    section.parts.push(Part::Number);
                    seen_digit = true;
                }
                match (seen_point, c) {
                    (false, '0') => digits.int_min += 1,
                    (false, _) => {}
                    (true, '0') => {
                        digits.frac_min += 1;
                        digits.frac_max += 1;
                    }
                    (true, _) => digits.frac_max += 1,
                }
            }
            ',' if seen_digit && !seen_point => digits.grouping = true,
            '.' if seen_digit || matches!(chars.peek(), Some('0' | '#')) => {
                if seen_point {
                    return Err("more than one decimal point".to_string());
                }
                if !seen_digit {
                    flush(&mut literal, &mut section.parts);
                    section.parts.push(Part::Number);
                    seen_digit = true;
                }
                seen_point = true;
            }
            '%' => {
                section.percent += 1;
                literal.push('%');
            }
            '@' => {
                flush(&mut literal, &mut section.parts);
                section.parts.push(Part::Text);
            }
            'G' | 'g' => {
                let rest: String = chars.by_ref().take(6).collect();
                if !rest.eq_ignore_ascii_case("eneral") {
                    return Err("expected General".to_string());
                }
                flush(&mut literal, &mut section.parts);
                section.parts.push(Part::General);
            }
            '$' | '-' | '+' | '(' | ')' | ' ' | ':' | '/' | ',' | '.' => literal.push(c),
            other => return Err(format!("unsupported character '{}'", other)),
        }
    }
    flush(&mut literal, &mut section.parts);

    if seen_digit {
        section.digits = Some(digits);
    }
    Ok(section)
}

fn render_digits(digits: Option<&Digits>, value: f64) -> String {
    let Some(d) = digits else {
        return format_general(value);
    };

    // Half away from zero; `{:.N}` alone would round ties to even
    let factor = 10f64.powi(d.frac_max as i32);
    let rounded = (value * factor).round() / factor;
    let fixed = format!("{:.*}", d.frac_max, rounded);
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i.to_string(), f.to_string()),
        None => (fixed, String::new()),
    };

    let mut frac = frac_part;
    while frac.len() > d.frac_min && frac.ends_with('0') {
        frac.pop();
    }

    let mut int = int_part.trim_start_matches('0').to_string();
    while int.len() < d.int_min {
        int.insert(0, '0');
    }
    if d.grouping {
        int = group_thousands(&int);
    }

    if frac.is_empty() {
        int
    } else {
        format!("{}.{}", int, frac)
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    let len = digits.len();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
