//! Storage interfaces consumed by the engine.
//!
//! The engine never owns cell data directly: cells, labels, dependency edges
//! and hidden flags live behind these traits. Cell and label stores announce
//! every save and delete on a [`Watchers`] channel; the propagation scope
//! listens there to keep dependency edges in sync and to find what needs
//! recomputing. `memory` has the default in-memory implementations.

pub mod memory;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::cell::Cell;
use crate::cell_ref::{CellRange, CellRef};
use crate::label::LabelMapping;

pub use memory::{
    MemoryCellStore, MemoryHiddenStore, MemoryLabelStore, MemoryReferenceStore,
};

/// A change announced by a cell or label store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    CellSaved(Cell),
    CellDeleted(CellRef),
    LabelSaved(LabelMapping),
    /// Carries the label key.
    LabelDeleted(String),
}

type Listener = Rc<dyn Fn(&StoreEvent)>;
type ListenerList = RefCell<Vec<(u64, Listener)>>;

/// Listener registry for one store.
///
/// Listeners are plain `Fn`s; ones that need to record something use their
/// own interior mutability. Notification iterates over a snapshot, so a
/// listener may subscribe or drop a subscription while being called.
#[derive(Default)]
pub struct Watchers {
    listeners: Rc<ListenerList>,
    next_id: RefCell<u64>,
}

impl Watchers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays registered until the returned guard is
    /// dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(&self, listener: impl Fn(&StoreEvent) + 'static) -> Subscription {
        let id = {
            let mut next = self.next_id.borrow_mut();
            *next += 1;
            *next
        };
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        Subscription {
            id,
            listeners: Rc::downgrade(&self.listeners),
        }
    }

    pub fn notify(&self, event: &StoreEvent) {
        let snapshot: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Watchers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchers").field("listeners", &self.len()).finish()
    }
}

/// Guard for a registered listener. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.borrow_mut().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Cells keyed by normalized address.
pub trait CellStore {
    fn load(&self, cell: &CellRef) -> Option<Cell>;

    /// Insert or replace the cell at its address and notify watchers.
    fn save(&mut self, cell: Cell) -> Cell;

    /// Remove the cell and notify watchers. None if nothing was stored.
    fn delete(&mut self, cell: &CellRef) -> Option<Cell>;

    fn watchers(&self) -> &Watchers;

    /// Stored cells inside the range, row-major.
    fn cells_in_range(&self, range: &CellRange) -> Vec<Cell>;

    /// Every stored address, row-major.
    fn all_refs(&self) -> Vec<CellRef>;

    fn max_row(&self) -> Option<usize>;

    fn max_column(&self) -> Option<usize>;

    fn max_row_in_column(&self, col: usize) -> Option<usize>;

    fn max_column_in_row(&self, row: usize) -> Option<usize>;
}

/// Label mappings keyed by `label::label_key`.
pub trait LabelStore {
    fn load(&self, name: &str) -> Option<LabelMapping>;

    fn save(&mut self, mapping: LabelMapping) -> LabelMapping;

    fn delete(&mut self, name: &str) -> Option<LabelMapping>;

    /// Every mapping, ordered by key.
    fn all(&self) -> Vec<LabelMapping>;

    fn watchers(&self) -> &Watchers;
}

/// Dependency edges from source cells to targets of one kind.
///
/// `targets_of` and `referrers_of` must always be exact inverses.
pub trait ReferenceStore<T> {
    fn save_edge(&mut self, source: CellRef, target: T);

    fn remove_edge(&mut self, source: &CellRef, target: &T);

    /// What `source` references, sorted.
    fn targets_of(&self, source: &CellRef) -> Vec<T>;

    /// Cells that reference `target`, sorted.
    fn referrers_of(&self, target: &T) -> Vec<CellRef>;

    fn delete_all_edges_from(&mut self, source: &CellRef);

    /// Every target with at least one referrer, sorted.
    fn targets(&self) -> Vec<T>;
}

/// Hidden flags for one axis (rows or columns).
pub trait HiddenStore {
    fn is_hidden(&self, index: usize) -> bool;

    fn set_hidden(&mut self, index: usize, hidden: bool);

    /// Hidden indices, ascending.
    fn hidden(&self) -> Vec<usize>;

    fn replace_all(&mut self, hidden: Vec<usize>);
}

/// Every store the engine works against.
pub struct Stores {
    pub cells: Box<dyn CellStore>,
    pub labels: Box<dyn LabelStore>,
    pub cell_refs: Box<dyn ReferenceStore<CellRef>>,
    /// Keyed by label key.
    pub label_refs: Box<dyn ReferenceStore<String>>,
    pub range_refs: Box<dyn ReferenceStore<CellRange>>,
    pub hidden_columns: Box<dyn HiddenStore>,
    pub hidden_rows: Box<dyn HiddenStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            cells: Box::new(MemoryCellStore::new()),
            labels: Box::new(MemoryLabelStore::new()),
            cell_refs: Box::new(MemoryReferenceStore::new()),
            label_refs: Box::new(MemoryReferenceStore::new()),
            range_refs: Box::new(MemoryReferenceStore::new()),
            hidden_columns: Box::new(MemoryHiddenStore::new()),
            hidden_rows: Box::new(MemoryHiddenStore::new()),
        }
    }
}

impl Default for Stores {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_drop_unsubscribes() {
        let watchers = Watchers::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&seen);
        let subscription = watchers.subscribe(move |event| sink.borrow_mut().push(event.clone()));
        assert_eq!(watchers.len(), 1);

        watchers.notify(&StoreEvent::LabelDeleted("x".to_string()));
        drop(subscription);
        assert!(watchers.is_empty());
        watchers.notify(&StoreEvent::LabelDeleted("y".to_string()));

        assert_eq!(*seen.borrow(), vec![StoreEvent::LabelDeleted("x".to_string())]);
    }

    #[test]
    fn test_listener_may_unsubscribe_during_notify() {
        let watchers = Watchers::new();
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let inner = Rc::clone(&slot);
        let subscription = watchers.subscribe(move |_| {
            inner.borrow_mut().take();
        });
        *slot.borrow_mut() = Some(subscription);

        watchers.notify(&StoreEvent::CellDeleted(CellRef::new(0, 0)));
        assert!(watchers.is_empty());
    }

    #[test]
    fn test_subscription_outliving_watchers() {
        let watchers = Watchers::new();
        let subscription = watchers.subscribe(|_| {});
        drop(watchers);
        drop(subscription);
    }
}
