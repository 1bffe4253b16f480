//! Change propagation scope.
//!
//! One scope covers one top-level engine operation. While open it listens on
//! the cell and label store channels and collects what happened: which cells
//! were saved (and with what state), which were deleted, and which addresses
//! still need a recompute. The engine feeds events through
//! [`Engine`](crate::Engine) to keep dependency edges current and drains the
//! worklist before closing the scope into a [`ChangeSet`].
//!
//! Every address is recomputed at most once per scope, which is what makes
//! propagation terminate when formulas reference each other in a cycle.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::cell::Cell;
use crate::cell_ref::CellRef;
use crate::store::{StoreEvent, Subscription, Watchers};

/// How much work evaluating a cell may do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvalMode {
    /// Return the stored cell as is.
    SkipEvaluate,
    /// Reuse cached trees, evaluate unless the stored result is an error.
    #[default]
    ComputeIfNecessary,
    /// Drop cached trees, re-parse and evaluate.
    ForceRecompute,
}

/// Cells whose stored state changed during one operation.
///
/// Apply `deleted` first, then upsert `cells`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    /// Row-major by address.
    pub cells: Vec<Cell>,
    pub deleted: Vec<CellRef>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.deleted.is_empty()
    }

    /// The changed cell at `address`, if any.
    pub fn get(&self, address: &CellRef) -> Option<&Cell> {
        self.cells.iter().find(|cell| cell.address.same_address(address))
    }
}

pub struct PropagationScope {
    inbox: Rc<RefCell<VecDeque<StoreEvent>>>,
    // Held for their Drop: unsubscribes on every exit path.
    _subscriptions: [Subscription; 2],

    updated: BTreeMap<CellRef, Cell>,
    deleted: BTreeSet<CellRef>,
    queue: VecDeque<CellRef>,
    queued: BTreeSet<CellRef>,
    /// Must be force-recomputed before the scope closes.
    forced: BTreeSet<CellRef>,
    /// Evaluated at least once in this scope.
    evaluated: FxHashSet<CellRef>,
    /// Currently on the evaluation stack.
    evaluating: FxHashSet<CellRef>,
    recomputes: usize,
}

impl PropagationScope {
    /// Open a scope listening on both channels.
    pub fn open(cells: &Watchers, labels: &Watchers) -> Self {
        let inbox = Rc::new(RefCell::new(VecDeque::new()));
        let cell_sink = Rc::clone(&inbox);
        let label_sink = Rc::clone(&inbox);
        let subscriptions = [
            cells.subscribe(move |event| cell_sink.borrow_mut().push_back(event.clone())),
            labels.subscribe(move |event| label_sink.borrow_mut().push_back(event.clone())),
        ];
        log::debug!("propagation scope opened");
        Self {
            inbox,
            _subscriptions: subscriptions,
            updated: BTreeMap::new(),
            deleted: BTreeSet::new(),
            queue: VecDeque::new(),
            queued: BTreeSet::new(),
            forced: BTreeSet::new(),
            evaluated: FxHashSet::default(),
            evaluating: FxHashSet::default(),
            recomputes: 0,
        }
    }

    /// Next store event not yet handled.
    pub fn next_event(&self) -> Option<StoreEvent> {
        self.inbox.borrow_mut().pop_front()
    }

    pub fn record_saved(&mut self, cell: Cell) {
        self.updated.insert(cell.address, cell);
    }

    pub fn record_deleted(&mut self, address: CellRef) {
        let address = address.normalized();
        self.updated.remove(&address);
        self.deleted.insert(address);
    }

    pub fn enqueue(&mut self, address: CellRef) {
        let address = address.normalized();
        if self.queued.insert(address) {
            self.queue.push_back(address);
        }
    }

    /// Require a forced recompute of `address` before the scope closes.
    pub fn force(&mut self, address: CellRef) {
        let address = address.normalized();
        self.evaluated.remove(&address);
        self.forced.insert(address);
    }

    /// Next address to force-recompute. Forced addresses go first, then the
    /// worklist; addresses already handled in this scope are skipped.
    pub fn next_pending(&mut self) -> Option<CellRef> {
        while let Some(address) = self.forced.pop_first() {
            if !self.evaluated.contains(&address) {
                return Some(address);
            }
        }
        while let Some(address) = self.queue.pop_front() {
            self.queued.remove(&address);
            if self.updated.contains_key(&address) || self.evaluated.contains(&address) {
                continue;
            }
            return Some(address);
        }
        None
    }

    /// Mode for loading a referenced cell in the middle of an evaluation.
    pub fn mode_for(&self, address: &CellRef) -> EvalMode {
        let address = address.normalized();
        if self.evaluated.contains(&address) {
            EvalMode::SkipEvaluate
        } else if self.forced.contains(&address)
            || (self.queued.contains(&address) && !self.updated.contains_key(&address))
        {
            EvalMode::ForceRecompute
        } else {
            EvalMode::ComputeIfNecessary
        }
    }

    /// Mark `address` as on the evaluation stack. False if it already was,
    /// meaning the caller has hit a reference cycle.
    pub fn begin_evaluation(&mut self, address: CellRef) -> bool {
        self.evaluating.insert(address.normalized())
    }

    /// Take `address` off the evaluation stack. `SkipEvaluate` means the
    /// stored result was kept, so the address stays eligible for a recompute
    /// later in the scope.
    pub fn end_evaluation(&mut self, address: CellRef, mode: EvalMode) {
        let address = address.normalized();
        self.evaluating.remove(&address);
        if mode == EvalMode::SkipEvaluate {
            return;
        }
        self.evaluated.insert(address);
        if mode == EvalMode::ForceRecompute {
            self.forced.remove(&address);
            self.recomputes += 1;
        }
    }

    pub fn is_evaluating(&self, address: &CellRef) -> bool {
        self.evaluating.contains(&address.normalized())
    }

    /// Close the scope. Subscriptions are released here.
    pub fn finish(self) -> ChangeSet {
        log::debug!(
            "propagation scope closed: {} updated, {} deleted, {} recomputed",
            self.updated.len(),
            self.deleted.len(),
            self.recomputes
        );
        ChangeSet {
            cells: self.updated.into_values().collect(),
            deleted: self.deleted.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CellStore, MemoryCellStore};

    fn a1(s: &str) -> CellRef {
        s.parse().unwrap()
    }

    #[test]
    fn test_scope_collects_store_events() {
        let mut cells = MemoryCellStore::new();
        let labels = Watchers::new();
        let scope = PropagationScope::open(cells.watchers(), &labels);
        assert_eq!(cells.watchers().len(), 1);

        cells.save(Cell::new(a1("A1"), "1"));
        cells.delete(&a1("A1"));

        assert!(matches!(scope.next_event(), Some(StoreEvent::CellSaved(_))));
        assert_eq!(scope.next_event(), Some(StoreEvent::CellDeleted(a1("A1"))));
        assert_eq!(scope.next_event(), None);

        scope.finish();
        assert!(cells.watchers().is_empty());
        assert!(labels.is_empty());
    }

    #[test]
    fn test_worklist_skips_handled_addresses() {
        let cells = Watchers::new();
        let labels = Watchers::new();
        let mut scope = PropagationScope::open(&cells, &labels);

        scope.record_saved(Cell::new(a1("A1"), "1"));
        scope.enqueue(a1("A1"));
        scope.enqueue(a1("B1"));
        scope.enqueue(a1("$B$1"));
        scope.enqueue(a1("C1"));

        assert_eq!(scope.mode_for(&a1("B1")), EvalMode::ForceRecompute);
        assert_eq!(scope.mode_for(&a1("A1")), EvalMode::ComputeIfNecessary);

        assert_eq!(scope.next_pending(), Some(a1("B1")));
        scope.begin_evaluation(a1("B1"));
        scope.end_evaluation(a1("B1"), EvalMode::ForceRecompute);
        assert_eq!(scope.mode_for(&a1("B1")), EvalMode::SkipEvaluate);

        assert_eq!(scope.next_pending(), Some(a1("C1")));
        assert_eq!(scope.next_pending(), None);
    }

    #[test]
    fn test_forced_addresses_come_first() {
        let cells = Watchers::new();
        let labels = Watchers::new();
        let mut scope = PropagationScope::open(&cells, &labels);

        scope.enqueue(a1("A1"));
        scope.force(a1("B2"));
        assert_eq!(scope.mode_for(&a1("B2")), EvalMode::ForceRecompute);
        assert_eq!(scope.next_pending(), Some(a1("B2")));
        assert_eq!(scope.next_pending(), Some(a1("A1")));
    }

    #[test]
    fn test_kept_result_stays_pending() {
        let cells = Watchers::new();
        let labels = Watchers::new();
        let mut scope = PropagationScope::open(&cells, &labels);

        scope.begin_evaluation(a1("B3"));
        scope.end_evaluation(a1("B3"), EvalMode::SkipEvaluate);
        assert_eq!(scope.mode_for(&a1("B3")), EvalMode::ComputeIfNecessary);

        scope.enqueue(a1("B3"));
        assert_eq!(scope.next_pending(), Some(a1("B3")));
    }

    #[test]
    fn test_cycle_detection_flag() {
        let cells = Watchers::new();
        let labels = Watchers::new();
        let mut scope = PropagationScope::open(&cells, &labels);

        assert!(scope.begin_evaluation(a1("A1")));
        assert!(!scope.begin_evaluation(a1("$A$1")));
        assert!(scope.is_evaluating(&a1("A1")));
        scope.end_evaluation(a1("A1"), EvalMode::ComputeIfNecessary);
        assert!(!scope.is_evaluating(&a1("A1")));
    }

    #[test]
    fn test_change_set_reports_deletes_and_saves() {
        let cells = Watchers::new();
        let labels = Watchers::new();
        let mut scope = PropagationScope::open(&cells, &labels);

        scope.record_saved(Cell::new(a1("B1"), "x"));
        scope.record_deleted(a1("B1"));
        scope.record_deleted(a1("A1"));
        scope.record_saved(Cell::new(a1("A1"), "y"));

        let changes = scope.finish();
        assert_eq!(changes.deleted, vec![a1("A1"), a1("B1")]);
        assert_eq!(changes.cells.len(), 1);
        assert_eq!(changes.get(&a1("A1")).map(|c| c.text()), Some("y"));
    }
}
