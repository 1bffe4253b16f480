// Expression tree - the evaluation form of a formula
//
// Lowered from the syntax tree: parentheses and unary plus disappear, literals become
// values, and reference leaves become unresolved symbols keyed the way the reference
// stores key them (normalized cells and ranges). Label names keep their written case;
// stores key them by `label::label_key`.

use rustc_hash::FxHashSet;

use crate::cell_ref::{CellRange, CellRef};
use super::eval::Value;
use super::parser::{Node, Op, UnaryOp};

/// An unresolved reference inside an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Symbol {
    Cell(CellRef),
    Range(CellRange),
    Label(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Symbol(Symbol),
    /// Reference invalidated by a structural delete.
    RefError,
    Negate(Box<Expr>),
    Percent(Box<Expr>),
    Binary {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// Omitted function argument.
    Empty,
}

impl Expr {
    /// Lower a syntax tree.
    pub fn lower(node: &Node) -> Expr {
        match node {
            Node::Number(n) => Expr::Literal(Value::Number(*n)),
            Node::Text(s) => Expr::Literal(Value::Text(s.clone())),
            Node::Boolean(b) => Expr::Literal(Value::Boolean(*b)),
            Node::Cell(cell) => Expr::Symbol(Symbol::Cell(cell.normalized())),
            Node::Range(start, end) => {
                Expr::Symbol(Symbol::Range(CellRange::new(*start, *end).normalized()))
            }
            Node::Label(name) => Expr::Symbol(Symbol::Label(name.clone())),
            Node::RefError => Expr::RefError,
            Node::Unary { op: UnaryOp::Plus, operand } => Expr::lower(operand),
            Node::Unary { op: UnaryOp::Minus, operand } => {
                Expr::Negate(Box::new(Expr::lower(operand)))
            }
            Node::Percent(inner) => Expr::Percent(Box::new(Expr::lower(inner))),
            Node::Paren(inner) => Expr::lower(inner),
            Node::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: Box::new(Expr::lower(left)),
                right: Box::new(Expr::lower(right)),
            },
            Node::Function { name, args } => Expr::Call {
                name: name.clone(),
                args: args.iter().map(Expr::lower).collect(),
            },
            Node::Empty => Expr::Empty,
        }
    }

    /// Every distinct symbol mentioned by the expression.
    pub fn symbols(&self) -> FxHashSet<Symbol> {
        let mut out = FxHashSet::default();
        collect_symbols(self, &mut out);
        out
    }
}

fn collect_symbols(expr: &Expr, out: &mut FxHashSet<Symbol>) {
    match expr {
        Expr::Symbol(symbol) => {
            out.insert(symbol.clone());
        }
        Expr::Negate(inner) | Expr::Percent(inner) => collect_symbols(inner, out),
        Expr::Binary { left, right, .. } => {
            collect_symbols(left, out);
            collect_symbols(right, out);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_symbols(arg, out);
            }
        }
        Expr::Literal(_) | Expr::RefError | Expr::Empty => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parser::parse;

    fn lower(text: &str) -> Expr {
        Expr::lower(&parse(text).unwrap())
    }

    #[test]
    fn test_lower_drops_parens_and_unary_plus() {
        assert_eq!(lower("=(+1)"), Expr::Literal(Value::Number(1.0)));
        assert_eq!(
            lower("=-A1"),
            Expr::Negate(Box::new(Expr::Symbol(Symbol::Cell(CellRef::new(0, 0)))))
        );
    }

    #[test]
    fn test_symbols_are_normalized() {
        let symbols = lower("=$A$1+A1+SUM(B2:$A$1)+Rate").symbols();
        assert_eq!(symbols.len(), 3);
        assert!(symbols.contains(&Symbol::Cell(CellRef::new(0, 0))));
        assert!(symbols.contains(&Symbol::Range(CellRange::from_coords(0, 0, 1, 1))));
        assert!(symbols.contains(&Symbol::Label("Rate".to_string())));
    }

    #[test]
    fn test_ref_error_has_no_symbols() {
        let expr = lower("=#REF!+1");
        assert!(expr.symbols().is_empty());
    }
}
