// Formula parser - converts formula text into a syntax tree and back
// Supports: numbers, strings, booleans, cell refs (A1, $A$1), ranges (A1:B5), labels,
// functions, unary +/-, postfix %, parentheses, arithmetic, comparison and concatenation (&)

use serde::{Deserialize, Serialize};

use crate::cell_ref::{parse_a1, CellRef};

/// Syntax tree produced by `parse`.
///
/// The tree keeps everything needed to print the formula back in canonical
/// form: parentheses, unary plus and the kinds of every reference axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Number(f64),
    Text(String),
    Boolean(bool),
    /// Single cell reference, as written.
    Cell(CellRef),
    /// Range reference with its corners in written order.
    Range(CellRef, CellRef),
    /// Label reference, original case.
    Label(String),
    /// A reference removed by a structural edit (`#REF!`).
    RefError,
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    /// Postfix percent (`A1%`).
    Percent(Box<Node>),
    Binary {
        op: Op,
        left: Box<Node>,
        right: Box<Node>,
    },
    Paren(Box<Node>),
    Function {
        name: String,
        args: Vec<Node>,
    },
    /// Omitted argument (`IF(a,b,)`).
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    // Comparison
    Lt,
    Gt,
    Eq,
    LtEq,
    GtEq,
    NotEq,
    // String
    Concat,
}

impl Op {
    pub fn symbol(&self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Pow => "^",
            Op::Lt => "<",
            Op::Gt => ">",
            Op::Eq => "=",
            Op::LtEq => "<=",
            Op::GtEq => ">=",
            Op::NotEq => "<>",
            Op::Concat => "&",
        }
    }
}

const REF_ERROR: &str = "#REF!";

/// Parse formula text (with its leading '=') into a syntax tree.
pub fn parse(formula: &str) -> Result<Node, String> {
    let formula = formula.trim();
    let input = formula
        .strip_prefix('=')
        .ok_or_else(|| "Formula must start with =".to_string())?;

    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("Empty formula".to_string());
    }
    let (node, pos) = parse_comparison(&tokens, 0)?;
    if pos < tokens.len() {
        return Err(format!("Unexpected token at position {}", pos));
    }
    Ok(node)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    StringLit(String),
    CellRef(CellRef),
    RefError,
    Ident(String),
    /// Identifier immediately followed by '('
    FunctionName(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Colon,
    Comma,
    Lt,
    Gt,
    Eq,
    LtEq,
    GtEq,
    NotEq,
    Ampersand,
    Caret,
    Percent,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => { chars.next(); }
            '+' => { tokens.push(Token::Plus); chars.next(); }
            '-' => { tokens.push(Token::Minus); chars.next(); }
            '*' => { tokens.push(Token::Star); chars.next(); }
            '/' => { tokens.push(Token::Slash); chars.next(); }
            '(' => { tokens.push(Token::LParen); chars.next(); }
            ')' => { tokens.push(Token::RParen); chars.next(); }
            ':' => { tokens.push(Token::Colon); chars.next(); }
            ',' => { tokens.push(Token::Comma); chars.next(); }
            '&' => { tokens.push(Token::Ampersand); chars.next(); }
            '^' => { tokens.push(Token::Caret); chars.next(); }
            '%' => { tokens.push(Token::Percent); chars.next(); }
            '=' => { tokens.push(Token::Eq); chars.next(); }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('=') => { tokens.push(Token::LtEq); chars.next(); }
                    Some('>') => { tokens.push(Token::NotEq); chars.next(); }
                    _ => tokens.push(Token::Lt),
                }
            }
            '>' => {
                chars.next();
                if let Some(&'=') = chars.peek() {
                    tokens.push(Token::GtEq);
                    chars.next();
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '"' => {
                // String literal, "" inside is an escaped quote
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => {
                            if chars.peek() == Some(&'"') {
                                chars.next();
                                s.push('"');
                            } else {
                                break;
                            }
                        }
                        Some(ch) => s.push(ch),
                        None => return Err("Unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::StringLit(s));
            }
            '#' => {
                let mut word = String::new();
                for _ in 0..REF_ERROR.len() {
                    match chars.next() {
                        Some(ch) => word.push(ch),
                        None => break,
                    }
                }
                if word.eq_ignore_ascii_case(REF_ERROR) {
                    tokens.push(Token::RefError);
                } else {
                    return Err(format!("Unexpected error literal: {}", word));
                }
            }
            'A'..='Z' | 'a'..='z' | '_' | '$' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' || ch == '.' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }

                if chars.peek() == Some(&'(') && !ident.contains('$') {
                    tokens.push(Token::FunctionName(ident.to_uppercase()));
                } else if let Some(cell) = parse_a1(&ident) {
                    tokens.push(Token::CellRef(cell));
                } else if ident.contains('$') {
                    return Err(format!("Invalid cell reference: {}", ident));
                } else {
                    tokens.push(Token::Ident(ident));
                }
            }
            '0'..='9' | '.' => {
                let mut num_str = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num_str.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let num: f64 = num_str.parse().map_err(|_| format!("Invalid number: {}", num_str))?;
                tokens.push(Token::Number(num));
            }
            _ => return Err(format!("Unexpected character: {}", c)),
        }
    }

    Ok(tokens)
}

// Lowest precedence: comparison operators
fn parse_comparison(tokens: &[Token], pos: usize) -> Result<(Node, usize), String> {
    let (mut left, mut pos) = parse_concat(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Lt => Op::Lt,
            Token::Gt => Op::Gt,
            Token::Eq => Op::Eq,
            Token::LtEq => Op::LtEq,
            Token::GtEq => Op::GtEq,
            Token::NotEq => Op::NotEq,
            _ => break,
        };
        let (right, new_pos) = parse_concat(tokens, pos + 1)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_concat(tokens: &[Token], pos: usize) -> Result<(Node, usize), String> {
    let (mut left, mut pos) = parse_add_sub(tokens, pos)?;

    while pos < tokens.len() && tokens[pos] == Token::Ampersand {
        let (right, new_pos) = parse_add_sub(tokens, pos + 1)?;
        left = binary(Op::Concat, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_add_sub(tokens: &[Token], pos: usize) -> Result<(Node, usize), String> {
    let (mut left, mut pos) = parse_mul_div(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Plus => Op::Add,
            Token::Minus => Op::Sub,
            _ => break,
        };
        let (right, new_pos) = parse_mul_div(tokens, pos + 1)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_mul_div(tokens: &[Token], pos: usize) -> Result<(Node, usize), String> {
    let (mut left, mut pos) = parse_power(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Star => Op::Mul,
            Token::Slash => Op::Div,
            _ => break,
        };
        let (right, new_pos) = parse_power(tokens, pos + 1)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

// Exponentiation (^) - right-associative
fn parse_power(tokens: &[Token], pos: usize) -> Result<(Node, usize), String> {
    let (base, pos) = parse_percent(tokens, pos)?;

    if pos < tokens.len() && tokens[pos] == Token::Caret {
        let (exponent, new_pos) = parse_power(tokens, pos + 1)?;
        return Ok((binary(Op::Pow, base, exponent), new_pos));
    }

    Ok((base, pos))
}

fn parse_percent(tokens: &[Token], pos: usize) -> Result<(Node, usize), String> {
    let (mut node, mut pos) = parse_primary(tokens, pos)?;

    while pos < tokens.len() && tokens[pos] == Token::Percent {
        node = Node::Percent(Box::new(node));
        pos += 1;
    }

    Ok((node, pos))
}

fn parse_primary(tokens: &[Token], pos: usize) -> Result<(Node, usize), String> {
    if pos >= tokens.len() {
        return Err("Unexpected end of expression".to_string());
    }

    match &tokens[pos] {
        Token::Number(n) => Ok((Node::Number(*n), pos + 1)),
        Token::StringLit(s) => Ok((Node::Text(s.clone()), pos + 1)),
        Token::RefError => {
            // A collapsed range may still carry a dangling `:corner`
            if let (Some(Token::Colon), Some(Token::CellRef(_) | Token::RefError)) =
                (tokens.get(pos + 1), tokens.get(pos + 2))
            {
                return Ok((Node::RefError, pos + 3));
            }
            Ok((Node::RefError, pos + 1))
        }
        Token::CellRef(start) => {
            if let (Some(Token::Colon), Some(next)) = (tokens.get(pos + 1), tokens.get(pos + 2)) {
                match next {
                    Token::CellRef(end) => return Ok((Node::Range(*start, *end), pos + 3)),
                    Token::RefError => return Ok((Node::RefError, pos + 3)),
                    _ => return Err("Range must end with a cell reference".to_string()),
                }
            }
            Ok((Node::Cell(*start), pos + 1))
        }
        Token::Ident(name) => {
            if name.eq_ignore_ascii_case("TRUE") {
                return Ok((Node::Boolean(true), pos + 1));
            }
            if name.eq_ignore_ascii_case("FALSE") {
                return Ok((Node::Boolean(false), pos + 1));
            }
            // Not a function call - a label, resolved at evaluation time
            Ok((Node::Label(name.clone()), pos + 1))
        }
        Token::FunctionName(name) => {
            // FunctionName is only produced when '(' follows
            let (args, new_pos) = parse_function_args(tokens, pos + 2)?;
            Ok((Node::Function { name: name.clone(), args }, new_pos))
        }
        Token::LParen => {
            let (inner, pos) = parse_comparison(tokens, pos + 1)?;
            match tokens.get(pos) {
                Some(Token::RParen) => Ok((Node::Paren(Box::new(inner)), pos + 1)),
                Some(_) => Err("Expected closing parenthesis".to_string()),
                None => Err("Missing closing parenthesis".to_string()),
            }
        }
        Token::Plus => {
            let (operand, pos) = parse_primary(tokens, pos + 1)?;
            Ok((Node::Unary { op: UnaryOp::Plus, operand: Box::new(operand) }, pos))
        }
        Token::Minus => {
            let (operand, pos) = parse_primary(tokens, pos + 1)?;
            Ok((Node::Unary { op: UnaryOp::Minus, operand: Box::new(operand) }, pos))
        }
        _ => Err(format!("Unexpected token at position {}", pos)),
    }
}

fn parse_function_args(tokens: &[Token], pos: usize) -> Result<(Vec<Node>, usize), String> {
    let mut args = Vec::new();
    let mut pos = pos;

    // SUM()
    if let Some(Token::RParen) = tokens.get(pos) {
        return Ok((args, pos + 1));
    }

    loop {
        // Empty argument: next token is , or ) immediately
        match tokens.get(pos) {
            Some(Token::RParen) => {
                args.push(Node::Empty);
                return Ok((args, pos + 1));
            }
            Some(Token::Comma) => {
                args.push(Node::Empty);
                pos += 1;
                continue;
            }
            _ => {}
        }

        let (arg, new_pos) = parse_comparison(tokens, pos)?;
        args.push(arg);
        pos = new_pos;

        match tokens.get(pos) {
            Some(Token::RParen) => return Ok((args, pos + 1)),
            Some(Token::Comma) => pos += 1,
            Some(_) => return Err("Expected comma or closing parenthesis".to_string()),
            None => return Err("Missing closing parenthesis in function call".to_string()),
        }
    }
}

fn binary(op: Op, left: Node, right: Node) -> Node {
    Node::Binary { op, left: Box::new(left), right: Box::new(right) }
}

// =============================================================================
// Formula Printing
// =============================================================================

/// Canonical formula text for a syntax tree (with leading '=').
pub fn render(node: &Node) -> String {
    let mut out = String::from("=");
    render_into(node, &mut out);
    out
}

/// Canonical text without the leading '='.
pub fn render_inner(node: &Node) -> String {
    let mut out = String::new();
    render_into(node, &mut out);
    out
}

fn render_into(node: &Node, out: &mut String) {
    match node {
        Node::Empty => {}
        Node::Number(n) => out.push_str(&format_number_literal(*n)),
        Node::Text(s) => {
            out.push('"');
            out.push_str(&s.replace('"', "\"\""));
            out.push('"');
        }
        Node::Boolean(b) => out.push_str(if *b { "TRUE" } else { "FALSE" }),
        Node::Cell(cell) => out.push_str(&cell.to_string()),
        Node::Range(start, end) => {
            out.push_str(&start.to_string());
            out.push(':');
            out.push_str(&end.to_string());
        }
        Node::Label(name) => out.push_str(name),
        Node::RefError => out.push_str(REF_ERROR),
        Node::Unary { op, operand } => {
            out.push(match op {
                UnaryOp::Plus => '+',
                UnaryOp::Minus => '-',
            });
            render_into(operand, out);
        }
        Node::Percent(inner) => {
            render_into(inner, out);
            out.push('%');
        }
        Node::Binary { op, left, right } => {
            render_into(left, out);
            out.push_str(op.symbol());
            render_into(right, out);
        }
        Node::Paren(inner) => {
            out.push('(');
            render_into(inner, out);
            out.push(')');
        }
        Node::Function { name, args } => {
            out.push_str(name);
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                render_into(arg, out);
            }
            out.push(')');
        }
    }
}

/// Shortest text that parses back to the same f64.
fn format_number_literal(n: f64) -> String {
    format!("{}", n)
}

// =============================================================================
// Tree queries
// =============================================================================

/// True if the tree contains a `#REF!` leaf.
pub fn has_ref_error(node: &Node) -> bool {
    match node {
        Node::RefError => true,
        Node::Unary { operand, .. } => has_ref_error(operand),
        Node::Percent(inner) | Node::Paren(inner) => has_ref_error(inner),
        Node::Binary { left, right, .. } => has_ref_error(left) || has_ref_error(right),
        Node::Function { args, .. } => args.iter().any(has_ref_error),
        _ => false,
    }
}
