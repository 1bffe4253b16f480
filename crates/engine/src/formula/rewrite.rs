// Reference rewriting - pure transforms over the syntax tree
//
// `offset` moves relative references for copy/fill. `shift` adjusts references for a
// row/column insert or delete. Both rebuild the tree; references that end up pointing
// outside the grid, or into a deleted span, become `#REF!` leaves.

use crate::cell_ref::{Axis, CellRange, CellRef, RefKind, MAX_COLS, MAX_ROWS};
use super::parser::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftAxis {
    Row,
    Column,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    Insert,
    Delete,
}

/// A structural edit: `count` rows or columns inserted or deleted at `at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shift {
    pub axis: ShiftAxis,
    pub at: usize,
    pub count: usize,
    pub kind: ShiftKind,
}

impl Shift {
    pub fn insert_rows(at: usize, count: usize) -> Self {
        Self { axis: ShiftAxis::Row, at, count, kind: ShiftKind::Insert }
    }

    pub fn delete_rows(at: usize, count: usize) -> Self {
        Self { axis: ShiftAxis::Row, at, count, kind: ShiftKind::Delete }
    }

    pub fn insert_columns(at: usize, count: usize) -> Self {
        Self { axis: ShiftAxis::Column, at, count, kind: ShiftKind::Insert }
    }

    pub fn delete_columns(at: usize, count: usize) -> Self {
        Self { axis: ShiftAxis::Column, at, count, kind: ShiftKind::Delete }
    }

    /// Grid size along the shifted axis.
    pub fn limit(&self) -> usize {
        match self.axis {
            ShiftAxis::Row => MAX_ROWS,
            ShiftAxis::Column => MAX_COLS,
        }
    }

    // One past the last index of the edited span
    fn end(&self) -> usize {
        self.at.saturating_add(self.count)
    }

    /// True if `index` lies inside a deleted span.
    pub fn deletes(&self, index: usize) -> bool {
        self.kind == ShiftKind::Delete && index >= self.at && index < self.end()
    }

    /// Where an index on the shifted axis ends up. None if it was deleted or
    /// pushed off the grid.
    pub fn map_index(&self, index: usize) -> Option<usize> {
        let moved = match self.kind {
            ShiftKind::Insert if index >= self.at => index.saturating_add(self.count),
            ShiftKind::Insert => index,
            ShiftKind::Delete if index < self.at => index,
            ShiftKind::Delete if index < self.end() => return None,
            ShiftKind::Delete => index - self.count,
        };
        (moved < self.limit()).then_some(moved)
    }

    /// Re-address a stored cell. Axis kinds are ignored: the cell itself moves.
    pub fn map_cell(&self, cell: &CellRef) -> Option<CellRef> {
        let mut moved = *cell;
        match self.axis {
            ShiftAxis::Row => moved.row.index = self.map_index(cell.row.index)?,
            ShiftAxis::Column => moved.col.index = self.map_index(cell.col.index)?,
        }
        Some(moved)
    }

    /// Adjust an address range (label or rule target): shifted, expanded by
    /// an insert strictly inside it, shrunk by a delete overlapping one end,
    /// None when a delete covers it entirely.
    pub fn map_range(&self, range: &CellRange) -> Option<CellRange> {
        let (lo, hi) = self.span_of(range);
        let (lo, hi) = self.map_span(lo, hi, Axis::relative(lo), Axis::relative(hi))?;
        Some(self.with_span(range, lo, hi))
    }

    fn span_of(&self, range: &CellRange) -> (usize, usize) {
        match self.axis {
            ShiftAxis::Row => (range.start.row.index, range.end.row.index),
            ShiftAxis::Column => (range.start.col.index, range.end.col.index),
        }
    }

    fn with_span(&self, range: &CellRange, lo: Axis, hi: Axis) -> CellRange {
        let mut out = *range;
        match self.axis {
            ShiftAxis::Row => {
                out.start.row = lo;
                out.end.row = hi;
            }
            ShiftAxis::Column => {
                out.start.col = lo;
                out.end.col = hi;
            }
        }
        out
    }

    // Endpoints of a range on the shifted axis. Relative endpoints move,
    // absolute ones stay put unless the deleted span swallows them.
    fn map_span(&self, lo_index: usize, hi_index: usize, lo: Axis, hi: Axis) -> Option<(Axis, Axis)> {
        let end = self.end();
        let (new_lo, new_hi) = match self.kind {
            ShiftKind::Insert => (self.move_axis(lo), self.move_axis(hi)),
            ShiftKind::Delete => {
                if lo_index >= self.at && hi_index < end {
                    return None;
                }
                let new_lo = if self.deletes(lo_index) {
                    lo.with_index(self.at)
                } else {
                    self.move_axis(lo)
                };
                let new_hi = if self.deletes(hi_index) {
                    hi.with_index(self.at - 1)
                } else {
                    self.move_axis(hi)
                };
                (new_lo, new_hi)
            }
        };
        let limit = self.limit();
        if new_lo.index > new_hi.index || new_hi.index >= limit {
            return None;
        }
        Some((new_lo, new_hi))
    }

    // Axis outside any deleted span
    fn move_axis(&self, axis: Axis) -> Axis {
        if axis.is_absolute() {
            return axis;
        }
        match self.kind {
            ShiftKind::Insert if axis.index >= self.at => {
                axis.with_index(axis.index.saturating_add(self.count))
            }
            ShiftKind::Delete if axis.index >= self.end() => {
                axis.with_index(axis.index - self.count)
            }
            _ => axis,
        }
    }

    fn shift_cell_ref(&self, cell: &CellRef) -> Option<CellRef> {
        let axis = match self.axis {
            ShiftAxis::Row => cell.row,
            ShiftAxis::Column => cell.col,
        };
        if self.deletes(axis.index) {
            return None;
        }
        let moved = self.move_axis(axis);
        if moved.index >= self.limit() {
            return None;
        }
        let mut out = *cell;
        match self.axis {
            ShiftAxis::Row => out.row = moved,
            ShiftAxis::Column => out.col = moved,
        }
        Some(out)
    }

    fn shift_range_ref(&self, start: &CellRef, end: &CellRef) -> Option<CellRange> {
        let range = CellRange::new(*start, *end);
        let (lo_index, hi_index) = self.span_of(&range);
        let (lo, hi) = match self.axis {
            ShiftAxis::Row => (range.start.row, range.end.row),
            ShiftAxis::Column => (range.start.col, range.end.col),
        };
        let (lo, hi) = self.map_span(lo_index, hi_index, lo, hi)?;
        Some(self.with_span(&range, lo, hi))
    }
}

/// Rewrite every reference leaf for a structural edit.
pub fn shift(node: &Node, shift: &Shift) -> Node {
    map_refs(node, &mut |leaf| match leaf {
        Node::Cell(cell) => shift.shift_cell_ref(cell).map(Node::Cell),
        Node::Range(start, end) => shift
            .shift_range_ref(start, end)
            .map(|range| Node::Range(range.start, range.end)),
        other => Some(other.clone()),
    })
}

/// Move every relative axis by (dx, dy), as when a formula is copied from one
/// cell to another. Absolute axes are unchanged.
pub fn offset(node: &Node, dx: i64, dy: i64) -> Node {
    if dx == 0 && dy == 0 {
        return node.clone();
    }
    map_refs(node, &mut |leaf| match leaf {
        Node::Cell(cell) => offset_cell(cell, dx, dy).map(Node::Cell),
        Node::Range(start, end) => {
            let start = offset_cell(start, dx, dy)?;
            let end = offset_cell(end, dx, dy)?;
            Some(Node::Range(start, end))
        }
        other => Some(other.clone()),
    })
}

fn offset_cell(cell: &CellRef, dx: i64, dy: i64) -> Option<CellRef> {
    let col = offset_axis(cell.col, dx, MAX_COLS)?;
    let row = offset_axis(cell.row, dy, MAX_ROWS)?;
    Some(CellRef::from_axes(col, row))
}

fn offset_axis(axis: Axis, delta: i64, limit: usize) -> Option<Axis> {
    match axis.kind {
        RefKind::Absolute => Some(axis),
        RefKind::Relative => axis.shifted(delta).filter(|a| a.index < limit),
    }
}

/// Rebuild the tree, passing every reference leaf through `f`. A leaf mapped
/// to None becomes `#REF!`.
fn map_refs<F>(node: &Node, f: &mut F) -> Node
where
    F: FnMut(&Node) -> Option<Node>,
{
    match node {
        Node::Cell(_) | Node::Range(..) => f(node).unwrap_or(Node::RefError),
        Node::Unary { op, operand } => Node::Unary {
            op: *op,
            operand: Box::new(map_refs(operand, f)),
        },
        Node::Percent(inner) => Node::Percent(Box::new(map_refs(inner, f))),
        Node::Paren(inner) => Node::Paren(Box::new(map_refs(inner, f))),
        Node::Binary { op, left, right } => Node::Binary {
            op: *op,
            left: Box::new(map_refs(left, f)),
            right: Box::new(map_refs(right, f)),
        },
        Node::Function { name, args } => Node::Function {
            name: name.clone(),
            args: args.iter().map(|arg| map_refs(arg, f)).collect(),
        },
        Node::Number(_)
        | Node::Text(_)
        | Node::Boolean(_)
        | Node::Label(_)
        | Node::RefError
        | Node::Empty => node.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parser::{parse, render};
    use proptest::prelude::*;

    fn shifted(text: &str, s: Shift) -> String {
        render(&shift(&parse(text).unwrap(), &s))
    }

    fn offsetted(text: &str, dx: i64, dy: i64) -> String {
        render(&offset(&parse(text).unwrap(), dx, dy))
    }

    #[test]
    fn test_offset_relative_and_absolute() {
        assert_eq!(offsetted("=A1+$B$2+$C3+D$4", 1, 2), "=B3+$B$2+$C5+E$4");
        assert_eq!(offsetted("=SUM(A1:B2)", 0, 3), "=SUM(A4:B5)");
    }

    #[test]
    fn test_offset_below_zero_is_ref_error() {
        assert_eq!(offsetted("=A1+1", -1, 0), "=#REF!+1");
        assert_eq!(offsetted("=SUM(A2:B3)", 0, -2), "=SUM(#REF!)");
        assert_eq!(offsetted("=$A$1", -5, -5), "=$A$1");
    }

    #[test]
    fn test_insert_rows() {
        let s = Shift::insert_rows(2, 2);
        assert_eq!(shifted("=A1+A3", s), "=A1+A5");
        assert_eq!(shifted("=$A$3", s), "=$A$3");
        // Strictly inside expands, at the start moves
        assert_eq!(shifted("=SUM(A2:A5)", s), "=SUM(A2:A7)");
        assert_eq!(shifted("=SUM(A3:A5)", s), "=SUM(A5:A7)");
        assert_eq!(shifted("=SUM(A1:A2)", s), "=SUM(A1:A2)");
    }

    #[test]
    fn test_delete_columns() {
        let s = Shift::delete_columns(1, 1);
        assert_eq!(shifted("=A1+C1", s), "=A1+B1");
        assert_eq!(shifted("=B1*2", s), "=#REF!*2");
        assert_eq!(shifted("=$B$1*2", s), "=#REF!*2");
        assert_eq!(shifted("=$C$1", s), "=$C$1");
        assert_eq!(shifted("=Rate+C1", s), "=Rate+B1");
    }

    #[test]
    fn test_delete_shrinks_ranges() {
        let s = Shift::delete_rows(2, 2); // rows 3-4
        assert_eq!(shifted("=SUM(A1:A10)", s), "=SUM(A1:A8)");
        assert_eq!(shifted("=SUM(A3:A10)", s), "=SUM(A3:A8)");
        assert_eq!(shifted("=SUM(A1:A4)", s), "=SUM(A1:A2)");
        assert_eq!(shifted("=SUM(A3:A4)", s), "=SUM(#REF!)");
        assert_eq!(shifted("=SUM(A6:B7)", s), "=SUM(A4:B5)");
    }

    #[test]
    fn test_shift_preserves_shape() {
        assert_eq!(
            shifted("=-(A5+1)%*IF(A5>0,\"x\",)", Shift::delete_rows(0, 1)),
            "=-(A4+1)%*IF(A4>0,\"x\",)"
        );
    }

    #[test]
    fn test_map_index() {
        let s = Shift::delete_rows(3, 2);
        assert_eq!(s.map_index(2), Some(2));
        assert_eq!(s.map_index(3), None);
        assert_eq!(s.map_index(4), None);
        assert_eq!(s.map_index(5), Some(3));

        let s = Shift::insert_columns(1, 3);
        assert_eq!(s.map_index(0), Some(0));
        assert_eq!(s.map_index(1), Some(4));
        assert_eq!(s.map_index(MAX_COLS - 1), None);
    }

    #[test]
    fn test_huge_counts_saturate() {
        let s = Shift::insert_rows(1, usize::MAX);
        assert_eq!(s.map_index(0), Some(0));
        assert_eq!(s.map_index(1), None);
        assert_eq!(shifted("=A2+A1", s), "=#REF!+A1");

        let s = Shift::delete_rows(usize::MAX - 1, usize::MAX);
        assert!(s.deletes(usize::MAX - 1));
        assert_eq!(s.map_index(5), Some(5));
    }

    #[test]
    fn test_map_range() {
        let range: CellRange = "B2:D4".parse().unwrap();
        assert_eq!(
            Shift::delete_columns(0, 1).map_range(&range),
            Some("A2:C4".parse().unwrap())
        );
        assert_eq!(
            Shift::delete_columns(2, 1).map_range(&range),
            Some("B2:C4".parse().unwrap())
        );
        assert_eq!(Shift::delete_columns(1, 3).map_range(&range), None);
        assert_eq!(
            Shift::insert_rows(2, 1).map_range(&range),
            Some("B2:D5".parse().unwrap())
        );
    }

    // Formula text built so that binary operands are always parenthesized,
    // which keeps every generated tree in the shape the parser produces.
    fn formula_text() -> impl Strategy<Value = String> {
        let cell = (0usize..30, 0usize..30, any::<bool>(), any::<bool>()).prop_map(|(c, r, ca, ra)| {
            let col = if ca { Axis::absolute(c) } else { Axis::relative(c) };
            let row = if ra { Axis::absolute(r) } else { Axis::relative(r) };
            CellRef::from_axes(col, row).to_string()
        });
        let leaf = prop_oneof![
            (0u32..1000).prop_map(|n| n.to_string()),
            cell.clone(),
            (cell.clone(), cell).prop_map(|(a, b)| format!("{}:{}", a, b)),
            Just("Rate".to_string()),
            Just("\"txt\"".to_string()),
        ];
        leaf.prop_recursive(4, 24, 3, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone(), prop_oneof![Just("+"), Just("*"), Just("&"), Just("<=")])
                    .prop_map(|(a, b, op)| format!("({}{}{})", a, op, b)),
                inner.clone().prop_map(|a| format!("-{}", a)),
                inner.clone().prop_map(|a| format!("{}%", a)),
                prop::collection::vec(inner, 0..3).prop_map(|args| format!("SUM({})", args.join(","))),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_offset_zero_is_identity(text in formula_text()) {
            let node = parse(&format!("={}", text)).unwrap();
            prop_assert_eq!(offset(&node, 0, 0), node);
        }

        #[test]
        fn prop_offset_round_trips_through_text(
            text in formula_text(),
            dx in -10i64..10,
            dy in -10i64..10,
        ) {
            let moved = offset(&parse(&format!("={}", text)).unwrap(), dx, dy);
            prop_assert_eq!(parse(&render(&moved)).unwrap(), moved);
        }

        #[test]
        fn prop_shift_round_trips_through_text(
            text in formula_text(),
            at in 0usize..20,
            count in 1usize..5,
            delete in any::<bool>(),
            rows in any::<bool>(),
        ) {
            let s = match (delete, rows) {
                (true, true) => Shift::delete_rows(at, count),
                (true, false) => Shift::delete_columns(at, count),
                (false, true) => Shift::insert_rows(at, count),
                (false, false) => Shift::insert_columns(at, count),
            };
            let moved = shift(&parse(&format!("={}", text)).unwrap(), &s);
            prop_assert_eq!(parse(&render(&moved)).unwrap(), moved);
        }
    }
}
