//! Cell addressing.
//!
//! A `CellRef` names one grid address. Each axis carries a 0-based index and a
//! kind: `$A$1` is absolute on both axes, `A$1` only on the row, `A1` on neither.
//! Two refs with equal indices but different kinds denote the same address;
//! `normalized()` maps a ref onto its relative form, which is what stores and
//! dependency edges are keyed by.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Widest column A1 notation addresses (XFD).
pub const MAX_COLS: usize = 16_384;
/// Deepest row A1 notation addresses.
pub const MAX_ROWS: usize = 1_048_576;

/// Whether an axis is pinned (`$`) or moves when a formula is copied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RefKind {
    #[default]
    Relative,
    Absolute,
}

/// One coordinate of a cell reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Axis {
    pub index: usize,
    pub kind: RefKind,
}

impl Axis {
    #[inline]
    pub fn relative(index: usize) -> Self {
        Self { index, kind: RefKind::Relative }
    }

    #[inline]
    pub fn absolute(index: usize) -> Self {
        Self { index, kind: RefKind::Absolute }
    }

    #[inline]
    pub fn is_absolute(&self) -> bool {
        self.kind == RefKind::Absolute
    }

    /// Same kind, different index.
    #[inline]
    pub fn with_index(&self, index: usize) -> Self {
        Self { index, kind: self.kind }
    }

    /// Shift the index by `delta`. Returns None if it would go below zero.
    pub fn shifted(&self, delta: i64) -> Option<Self> {
        let moved = self.index as i64 + delta;
        if moved < 0 {
            None
        } else {
            Some(self.with_index(moved as usize))
        }
    }
}

/// A (column, row) grid address.
///
/// Ordering is row-major on the address, then by axis kinds, so ordered
/// collections keyed by normalized refs iterate top-to-bottom, left-to-right.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRef {
    pub col: Axis,
    pub row: Axis,
}

impl CellRef {
    /// Relative reference to (col, row).
    #[inline]
    pub fn new(col: usize, row: usize) -> Self {
        Self { col: Axis::relative(col), row: Axis::relative(row) }
    }

    /// Fully absolute reference (`$A$1`) to (col, row).
    #[inline]
    pub fn absolute(col: usize, row: usize) -> Self {
        Self { col: Axis::absolute(col), row: Axis::absolute(row) }
    }

    #[inline]
    pub fn from_axes(col: Axis, row: Axis) -> Self {
        Self { col, row }
    }

    #[inline]
    pub fn col(&self) -> usize {
        self.col.index
    }

    #[inline]
    pub fn row(&self) -> usize {
        self.row.index
    }

    /// The relative form of this reference. `$A$1`, `A$1` and `A1` all
    /// normalize to `A1`.
    #[inline]
    pub fn normalized(&self) -> Self {
        Self::new(self.col.index, self.row.index)
    }

    /// True if both refs denote the same address, whatever their kinds.
    #[inline]
    pub fn same_address(&self, other: &CellRef) -> bool {
        self.col.index == other.col.index && self.row.index == other.row.index
    }

    /// Row-major address order (row first, then column).
    pub fn cmp_row_major(&self, other: &CellRef) -> Ordering {
        self.row.index
            .cmp(&other.row.index)
            .then(self.col.index.cmp(&other.col.index))
    }

    /// Column-major address order (column first, then row).
    pub fn cmp_column_major(&self, other: &CellRef) -> Ordering {
        self.col.index
            .cmp(&other.col.index)
            .then(self.row.index.cmp(&other.row.index))
    }
}

impl Ord for CellRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_row_major(other)
            .then(self.col.kind.cmp(&other.col.kind))
            .then(self.row.kind.cmp(&other.row.kind))
    }
}

impl PartialOrd for CellRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.col.is_absolute() {
            f.write_str("$")?;
        }
        f.write_str(&col_to_letters(self.col.index))?;
        if self.row.is_absolute() {
            f.write_str("$")?;
        }
        write!(f, "{}", self.row.index + 1)
    }
}

impl FromStr for CellRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_a1(s).ok_or_else(|| format!("Invalid cell reference: {}", s))
    }
}

/// Parse an A1-style reference with optional `$` markers (`B7`, `$B7`, `b$7`).
///
/// Columns past XFD and rows past 1048576 are not references, so names like
/// `XGA1` or `Revenue1` stay available as labels.
pub fn parse_a1(s: &str) -> Option<CellRef> {
    let s = s.trim();
    let mut rest = s;

    let col_abs = rest.starts_with('$');
    if col_abs {
        rest = &rest[1..];
    }
    let letters_len = rest.chars().take_while(|c| c.is_ascii_alphabetic()).count();
    if letters_len == 0 || letters_len > 3 {
        return None;
    }
    let col = letters_to_col(&rest[..letters_len])?;
    if col >= MAX_COLS {
        return None;
    }
    rest = &rest[letters_len..];

    let row_abs = rest.starts_with('$');
    if row_abs {
        rest = &rest[1..];
    }
    if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let row: usize = rest.parse().ok()?;
    if row == 0 || row > MAX_ROWS {
        return None;
    }

    let col = if col_abs { Axis::absolute(col) } else { Axis::relative(col) };
    let row = if row_abs { Axis::absolute(row - 1) } else { Axis::relative(row - 1) };
    Some(CellRef { col, row })
}

/// Convert a 0-based column index to letters: 0 -> A, 25 -> Z, 26 -> AA.
pub fn col_to_letters(col: usize) -> String {
    let mut result = String::new();
    let mut n = col + 1;
    while n > 0 {
        n -= 1;
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        n /= 26;
    }
    result
}

/// Convert column letters (any case) to a 0-based index. None on overflow or
/// non-letters.
pub fn letters_to_col(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut acc: usize = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as usize) - ('A' as usize) + 1;
        acc = acc.checked_mul(26)?.checked_add(digit)?;
    }
    Some(acc - 1)
}

/// An inclusive rectangle of cells.
///
/// Always stored with `start` at the top-left and `end` at the bottom-right.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    /// Build a range from two corners in any order. Each axis keeps the kind
    /// of the corner it came from.
    pub fn new(a: CellRef, b: CellRef) -> Self {
        let (c0, c1) = if a.col.index <= b.col.index { (a.col, b.col) } else { (b.col, a.col) };
        let (r0, r1) = if a.row.index <= b.row.index { (a.row, b.row) } else { (b.row, a.row) };
        Self {
            start: CellRef::from_axes(c0, r0),
            end: CellRef::from_axes(c1, r1),
        }
    }

    pub fn single(cell: CellRef) -> Self {
        Self { start: cell, end: cell }
    }

    /// Range spanning (start_col, start_row) .. (end_col, end_row), relative.
    pub fn from_coords(start_col: usize, start_row: usize, end_col: usize, end_row: usize) -> Self {
        Self::new(CellRef::new(start_col, start_row), CellRef::new(end_col, end_row))
    }

    pub fn normalized(&self) -> Self {
        Self { start: self.start.normalized(), end: self.end.normalized() }
    }

    pub fn contains(&self, cell: &CellRef) -> bool {
        cell.col.index >= self.start.col.index
            && cell.col.index <= self.end.col.index
            && cell.row.index >= self.start.row.index
            && cell.row.index <= self.end.row.index
    }

    pub fn width(&self) -> usize {
        self.end.col.index - self.start.col.index + 1
    }

    pub fn height(&self) -> usize {
        self.end.row.index - self.start.row.index + 1
    }

    pub fn len(&self) -> usize {
        self.width() * self.height()
    }

    /// Ranges always hold at least one cell.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Every address in the range, row-major, normalized.
    pub fn cells(&self) -> impl Iterator<Item = CellRef> + '_ {
        let (c0, c1) = (self.start.col.index, self.end.col.index);
        (self.start.row.index..=self.end.row.index)
            .flat_map(move |row| (c0..=c1).map(move |col| CellRef::new(col, row)))
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

impl FromStr for CellRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((a, b)) => Ok(CellRange::new(a.parse()?, b.parse()?)),
            None => Ok(CellRange::single(s.parse()?)),
        }
    }
}
