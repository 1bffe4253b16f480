// In-memory stores
//
// Cells live in a BTreeMap keyed by normalized address, so ordered iteration
// is row-major for free. The reference store keeps both edge directions in
// hash maps and never keeps an empty set around.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell::Cell;
use crate::cell_ref::{CellRange, CellRef};
use crate::label::{label_key, LabelMapping};
use super::{CellStore, HiddenStore, LabelStore, ReferenceStore, StoreEvent, Watchers};

// =============================================================================
// Cells
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryCellStore {
    cells: BTreeMap<CellRef, Cell>,
    watchers: Watchers,
}

impl MemoryCellStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl CellStore for MemoryCellStore {
    fn load(&self, cell: &CellRef) -> Option<Cell> {
        self.cells.get(&cell.normalized()).cloned()
    }

    fn save(&mut self, cell: Cell) -> Cell {
        let cell = cell.at(cell.address);
        self.cells.insert(cell.address, cell.clone());
        self.watchers.notify(&StoreEvent::CellSaved(cell.clone()));
        cell
    }

    fn delete(&mut self, cell: &CellRef) -> Option<Cell> {
        let address = cell.normalized();
        let removed = self.cells.remove(&address)?;
        self.watchers.notify(&StoreEvent::CellDeleted(address));
        Some(removed)
    }

    fn watchers(&self) -> &Watchers {
        &self.watchers
    }

    fn cells_in_range(&self, range: &CellRange) -> Vec<Cell> {
        let range = range.normalized();
        // Tall ranges (whole columns) are cheaper to answer by filtering.
        if range.height() > self.cells.len() {
            return self
                .cells
                .values()
                .filter(|cell| range.contains(&cell.address))
                .cloned()
                .collect();
        }
        let mut out = Vec::new();
        for row in range.start.row()..=range.end.row() {
            let from = CellRef::new(range.start.col(), row);
            let to = CellRef::new(range.end.col(), row);
            out.extend(self.cells.range(from..=to).map(|(_, cell)| cell.clone()));
        }
        out
    }

    fn all_refs(&self) -> Vec<CellRef> {
        self.cells.keys().copied().collect()
    }

    fn max_row(&self) -> Option<usize> {
        self.cells.keys().next_back().map(|cell| cell.row())
    }

    fn max_column(&self) -> Option<usize> {
        self.cells.keys().map(|cell| cell.col()).max()
    }

    fn max_row_in_column(&self, col: usize) -> Option<usize> {
        self.cells
            .keys()
            .rev()
            .find(|cell| cell.col() == col)
            .map(|cell| cell.row())
    }

    fn max_column_in_row(&self, row: usize) -> Option<usize> {
        let from = CellRef::new(0, row);
        let to = CellRef::new(crate::cell_ref::MAX_COLS - 1, row);
        self.cells
            .range(from..=to)
            .next_back()
            .map(|(cell, _)| cell.col())
    }
}

// =============================================================================
// Labels
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryLabelStore {
    labels: BTreeMap<String, LabelMapping>,
    watchers: Watchers,
}

impl MemoryLabelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LabelStore for MemoryLabelStore {
    fn load(&self, name: &str) -> Option<LabelMapping> {
        self.labels.get(&label_key(name)).cloned()
    }

    fn save(&mut self, mapping: LabelMapping) -> LabelMapping {
        self.labels.insert(mapping.key(), mapping.clone());
        self.watchers.notify(&StoreEvent::LabelSaved(mapping.clone()));
        mapping
    }

    fn delete(&mut self, name: &str) -> Option<LabelMapping> {
        let key = label_key(name);
        let removed = self.labels.remove(&key)?;
        self.watchers.notify(&StoreEvent::LabelDeleted(key));
        Some(removed)
    }

    fn all(&self) -> Vec<LabelMapping> {
        self.labels.values().cloned().collect()
    }

    fn watchers(&self) -> &Watchers {
        &self.watchers
    }
}

// =============================================================================
// Dependency edges
// =============================================================================

/// Bidirectional edge map from source cells to targets.
///
/// Invariants:
/// 1. `targets[s]` contains `t` iff `referrers[t]` contains `s`
/// 2. No empty sets are stored
#[derive(Debug, Clone)]
pub struct MemoryReferenceStore<T> {
    /// source -> what it references
    targets: FxHashMap<CellRef, FxHashSet<T>>,
    /// target -> who references it
    referrers: FxHashMap<T, FxHashSet<CellRef>>,
}

impl<T> Default for MemoryReferenceStore<T> {
    fn default() -> Self {
        Self {
            targets: FxHashMap::default(),
            referrers: FxHashMap::default(),
        }
    }
}

impl<T: Clone + Eq + Hash + Ord> MemoryReferenceStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cells with at least one outgoing edge.
    pub fn source_count(&self) -> usize {
        self.targets.len()
    }

    /// Check all invariants. Panics if any are violated.
    #[cfg(test)]
    pub fn assert_consistent(&self)
    where
        T: std::fmt::Debug,
    {
        for (source, targets) in &self.targets {
            assert!(!targets.is_empty(), "Empty target set stored for {:?}", source);
            for target in targets {
                assert!(
                    self.referrers.get(target).is_some_and(|s| s.contains(source)),
                    "Missing referrer edge: {:?} should list {:?}",
                    target,
                    source
                );
            }
        }
        for (target, referrers) in &self.referrers {
            assert!(!referrers.is_empty(), "Empty referrer set stored for {:?}", target);
            for source in referrers {
                assert!(
                    self.targets.get(source).is_some_and(|s| s.contains(target)),
                    "Missing target edge: {:?} should list {:?}",
                    source,
                    target
                );
            }
        }
    }
}

impl<T: Clone + Eq + Hash + Ord> ReferenceStore<T> for MemoryReferenceStore<T> {
    fn save_edge(&mut self, source: CellRef, target: T) {
        let source = source.normalized();
        self.referrers.entry(target.clone()).or_default().insert(source);
        self.targets.entry(source).or_default().insert(target);
    }

    fn remove_edge(&mut self, source: &CellRef, target: &T) {
        let source = source.normalized();
        if let Some(targets) = self.targets.get_mut(&source) {
            targets.remove(target);
            if targets.is_empty() {
                self.targets.remove(&source);
            }
        }
        if let Some(referrers) = self.referrers.get_mut(target) {
            referrers.remove(&source);
            if referrers.is_empty() {
                self.referrers.remove(target);
            }
        }
    }

    fn targets_of(&self, source: &CellRef) -> Vec<T> {
        let mut out: Vec<T> = self
            .targets
            .get(&source.normalized())
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    fn referrers_of(&self, target: &T) -> Vec<CellRef> {
        let mut out: Vec<CellRef> = self
            .referrers
            .get(target)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    fn delete_all_edges_from(&mut self, source: &CellRef) {
        let source = source.normalized();
        let Some(targets) = self.targets.remove(&source) else {
            return;
        };
        for target in targets {
            if let Some(referrers) = self.referrers.get_mut(&target) {
                referrers.remove(&source);
                if referrers.is_empty() {
                    self.referrers.remove(&target);
                }
            }
        }
    }

    fn targets(&self) -> Vec<T> {
        let mut out: Vec<T> = self.referrers.keys().cloned().collect();
        out.sort();
        out
    }
}

// =============================================================================
// Hidden flags
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryHiddenStore {
    hidden: BTreeSet<usize>,
}

impl MemoryHiddenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HiddenStore for MemoryHiddenStore {
    fn is_hidden(&self, index: usize) -> bool {
        self.hidden.contains(&index)
    }

    fn set_hidden(&mut self, index: usize, hidden: bool) {
        if hidden {
            self.hidden.insert(index);
        } else {
            self.hidden.remove(&index);
        }
    }

    fn hidden(&self) -> Vec<usize> {
        self.hidden.iter().copied().collect()
    }

    fn replace_all(&mut self, hidden: Vec<usize>) {
        self.hidden = hidden.into_iter().collect();
    }
}
