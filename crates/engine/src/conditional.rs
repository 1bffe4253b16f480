// Conditional formatting rules
//
// A rule is a boolean formula written for the top-left cell of its range plus a
// style patch. Checked against another cell of the range, the formula's
// relative references move by that cell's offset from the top-left.

use std::collections::BTreeMap;

use crate::cell::{Formula, StylePatch};
use crate::cell_ref::{CellRange, CellRef};
use crate::error::CellError;
use crate::formula::expr::Expr;
use crate::formula::parser::{parse, render, Node};
use crate::formula::rewrite::{self, Shift};

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalRule {
    /// Lower priorities are applied first, so higher ones win.
    pub priority: i32,
    pub condition: Formula,
    pub patch: StylePatch,
}

impl ConditionalRule {
    /// Build a rule from condition text such as `=A1>10`.
    pub fn new(priority: i32, condition: &str, patch: StylePatch) -> Result<Self, CellError> {
        let ast = parse(condition).map_err(CellError::parse)?;
        let mut formula = Formula::new(condition);
        formula.ast = Some(ast);
        Ok(Self { priority, condition: formula, patch })
    }

    pub fn condition_text(&self) -> &str {
        &self.condition.text
    }

    /// The condition as seen from `cell`, a cell of `range`.
    pub fn condition_at(&self, range: &CellRange, cell: &CellRef) -> Option<Expr> {
        let ast = self.condition.ast.as_ref()?;
        let dx = cell.col() as i64 - range.start.col() as i64;
        let dy = cell.row() as i64 - range.start.row() as i64;
        Some(Expr::lower(&rewrite::offset(ast, dx, dy)))
    }

    fn shifted(&self, shift: &Shift) -> Self {
        let Some(ast) = &self.condition.ast else {
            return self.clone();
        };
        let ast: Node = rewrite::shift(ast, shift);
        let mut condition = Formula::new(render(&ast));
        condition.ast = Some(ast);
        Self { condition, ..self.clone() }
    }
}

/// Rules grouped by the range they cover.
#[derive(Debug, Clone, Default)]
pub struct ConditionalRules {
    by_range: BTreeMap<CellRange, Vec<ConditionalRule>>,
}

impl ConditionalRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, range: CellRange, rule: ConditionalRule) {
        self.by_range.entry(range.normalized()).or_default().push(rule);
    }

    /// Remove every rule on exactly this range.
    pub fn remove(&mut self, range: &CellRange) -> Vec<ConditionalRule> {
        self.by_range.remove(&range.normalized()).unwrap_or_default()
    }

    pub fn rules_for(&self, range: &CellRange) -> &[ConditionalRule] {
        self.by_range
            .get(&range.normalized())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.by_range.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CellRange, &[ConditionalRule])> + '_ {
        self.by_range.iter().map(|(range, rules)| (range, rules.as_slice()))
    }

    /// Every rule whose range contains `cell`, in ascending priority. Ties
    /// keep range order, then insertion order.
    pub fn matching(&self, cell: &CellRef) -> Vec<(CellRange, ConditionalRule)> {
        let mut out: Vec<(CellRange, ConditionalRule)> = self
            .by_range
            .iter()
            .filter(|(range, _)| range.contains(cell))
            .flat_map(|(range, rules)| rules.iter().map(move |rule| (*range, rule.clone())))
            .collect();
        out.sort_by_key(|(_, rule)| rule.priority);
        out
    }

    /// Move rule ranges and conditions for a row/column insert or delete.
    /// Rules whose range is deleted entirely are dropped.
    pub fn apply_shift(&mut self, shift: &Shift) {
        let old = std::mem::take(&mut self.by_range);
        for (range, rules) in old {
            let Some(moved) = shift.map_range(&range) else {
                log::debug!("dropping {} conditional rule(s) on deleted range {}", rules.len(), range);
                continue;
            };
            let entry = self.by_range.entry(moved).or_default();
            entry.extend(rules.iter().map(|rule| rule.shifted(shift)));
        }
    }
}
