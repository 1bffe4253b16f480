use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use cellflow_config::settings::EngineSettings;

use crate::cell::{Cell, Outcome, Rendered, Style};
use crate::cell_ref::{CellRange, CellRef};
use crate::conditional::{ConditionalRule, ConditionalRules};
use crate::error::{CellError, EngineError};
use crate::format::Formatter;
use crate::formula::eval::{evaluate, ReferenceResolver, Value};
use crate::formula::expr::{Expr, Symbol};
use crate::formula::parser::{parse, render, Node};
use crate::formula::rewrite::{self, Shift, ShiftAxis};
use crate::label::{is_valid_name, label_key, LabelMapping, LabelTarget};
use crate::propagation::{ChangeSet, EvalMode, PropagationScope};
use crate::store::{StoreEvent, Stores};

/// Result of a row/column insert or delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuralChange {
    pub cells: Vec<Cell>,
    pub deleted: Vec<CellRef>,
    /// Labels whose target moved or shrank, as saved.
    pub labels_changed: Vec<LabelMapping>,
    /// Names of labels whose target was deleted.
    pub labels_removed: Vec<String>,
}

/// The formula engine.
///
/// Every public mutation runs inside one propagation scope and returns the
/// cells whose stored state changed. Methods take `&mut self`; one operation
/// finishes before the next starts.
pub struct Engine {
    stores: Stores,
    settings: EngineSettings,
    default_formatter: Formatter,
    rules: ConditionalRules,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// In-memory engine with default settings.
    pub fn new() -> Self {
        Self {
            stores: Stores::in_memory(),
            settings: EngineSettings::default(),
            default_formatter: Formatter::general(),
            rules: ConditionalRules::new(),
        }
    }

    /// In-memory engine. Fails if the default format pattern does not compile.
    pub fn with_settings(settings: EngineSettings) -> Result<Self, EngineError> {
        Self::with_stores(Stores::in_memory(), settings)
    }

    /// In-memory engine configured from a settings file (`.json` or `.toml`).
    pub fn from_settings_file(path: &Path) -> Result<Self, EngineError> {
        let settings = EngineSettings::load_from(path)?;
        Self::with_settings(settings)
    }

    pub fn with_stores(stores: Stores, settings: EngineSettings) -> Result<Self, EngineError> {
        let default_formatter = Formatter::compile(&settings.default_format).map_err(|e| {
            log::warn!("default format pattern rejected: {}", e);
            e
        })?;
        Ok(Self {
            stores,
            settings,
            default_formatter,
            rules: ConditionalRules::new(),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    // =========================================================================
    // Cells
    // =========================================================================

    /// Peek at the stored cell without evaluating anything.
    pub fn cell(&self, address: &CellRef) -> Option<Cell> {
        self.stores.cells.load(address)
    }

    /// Evaluate the stored cell at `address`. The change set always holds
    /// the loaded cell, plus anything its evaluation rewrote.
    pub fn load_cell(&mut self, address: CellRef, mode: EvalMode) -> Result<ChangeSet, EngineError> {
        let mut scope = self.open_scope();
        if let Some(cell) = self.stores.cells.load(&address) {
            let cell = self.compute(&mut scope, cell, mode)?;
            scope.record_saved(cell);
            self.drain(&mut scope)?;
        }
        Ok(scope.finish())
    }

    /// Run a cell through parse, evaluate and format, writing it back if it
    /// changed. Referrers of the cell are refreshed as well.
    pub fn evaluate_and_format(&mut self, cell: Cell, mode: EvalMode) -> Result<Cell, EngineError> {
        let mut scope = self.open_scope();
        let cell = self.compute(&mut scope, cell, mode)?;
        self.drain(&mut scope)?;
        scope.finish();
        Ok(self.stores.cells.load(&cell.address).unwrap_or(cell))
    }

    /// Store a cell, recompute it and everything that depends on it.
    pub fn save_cell(&mut self, cell: Cell) -> Result<ChangeSet, EngineError> {
        let mut cell = cell.at(cell.address);
        let address = cell.address;
        if let Some(pattern) = cell.format.as_mut() {
            pattern.formatter().map_err(|e| {
                log::warn!("rejecting {}: {}", address, e);
                e
            })?;
        }
        cell.formula.clear_caches();

        let mut scope = self.open_scope();
        self.save_raw(&mut scope, cell);
        scope.force(address);
        self.drain(&mut scope)?;
        Ok(scope.finish())
    }

    pub fn delete_cell(&mut self, address: CellRef) -> Result<ChangeSet, EngineError> {
        let mut scope = self.open_scope();
        self.delete_raw(&mut scope, &address);
        self.drain(&mut scope)?;
        Ok(scope.finish())
    }

    // =========================================================================
    // Structural edits
    // =========================================================================

    pub fn insert_rows(&mut self, at: usize, count: usize) -> Result<StructuralChange, EngineError> {
        self.apply_shift(Shift::insert_rows(at, count))
    }

    pub fn delete_rows(&mut self, at: usize, count: usize) -> Result<StructuralChange, EngineError> {
        self.apply_shift(Shift::delete_rows(at, count))
    }

    pub fn insert_columns(&mut self, at: usize, count: usize) -> Result<StructuralChange, EngineError> {
        self.apply_shift(Shift::insert_columns(at, count))
    }

    pub fn delete_columns(&mut self, at: usize, count: usize) -> Result<StructuralChange, EngineError> {
        self.apply_shift(Shift::delete_columns(at, count))
    }

    fn apply_shift(&mut self, shift: Shift) -> Result<StructuralChange, EngineError> {
        if shift.count == 0 {
            return Err(EngineError::InvalidCount);
        }
        let limit = shift.limit();
        if shift.at >= limit || shift.count > limit {
            return Err(EngineError::OutOfGrid { at: shift.at, count: shift.count, limit });
        }
        log::info!(
            "{:?} {} {:?}(s) at {}",
            shift.kind,
            shift.count,
            shift.axis,
            shift.at
        );

        let mut scope = self.open_scope();

        // Collect first, write after: moved cells must not land on cells
        // that have not been read yet.
        let mut vacated = Vec::new();
        let mut rewritten = Vec::new();
        for address in self.stores.cells.all_refs() {
            let Some(cell) = self.stores.cells.load(&address) else {
                continue;
            };
            let Some(target) = shift.map_cell(&address) else {
                vacated.push(address);
                continue;
            };
            let ast = syntax_tree(&cell);
            let shifted = ast.as_ref().map(|ast| rewrite::shift(ast, &shift));
            let moved = target != address;
            let changed = shifted != ast;
            if moved {
                vacated.push(address);
            }
            if moved || changed {
                let mut cell = cell.at(target);
                if let (true, Some(shifted)) = (changed, shifted) {
                    cell = cell.with_ast(render(&shifted), shifted);
                }
                rewritten.push(cell);
            }
        }

        for address in &vacated {
            self.delete_raw(&mut scope, address);
        }
        for cell in rewritten {
            let address = cell.address;
            self.save_raw(&mut scope, cell);
            scope.force(address);
        }

        let (labels_changed, labels_removed) = self.shift_labels(&mut scope, &shift);

        let hidden = match shift.axis {
            ShiftAxis::Row => &mut self.stores.hidden_rows,
            ShiftAxis::Column => &mut self.stores.hidden_columns,
        };
        let flags: Vec<usize> = hidden
            .hidden()
            .into_iter()
            .filter_map(|index| shift.map_index(index))
            .collect();
        hidden.replace_all(flags);

        self.rules.apply_shift(&shift);

        self.drain(&mut scope)?;
        let changes = scope.finish();
        Ok(StructuralChange {
            cells: changes.cells,
            deleted: changes.deleted,
            labels_changed,
            labels_removed,
        })
    }

    fn shift_labels(&mut self, scope: &mut PropagationScope, shift: &Shift) -> (Vec<LabelMapping>, Vec<String>) {
        let mut changed = Vec::new();
        let mut removed = Vec::new();
        for mapping in self.stores.labels.all() {
            let target = match mapping.target {
                LabelTarget::Cell(cell) => shift.map_cell(&cell).map(LabelTarget::Cell),
                LabelTarget::Range(range) => shift.map_range(&range).map(LabelTarget::Range),
            };
            match target {
                None => {
                    log::info!(
                        "removing label {}: {} was deleted",
                        mapping.name,
                        mapping.reference_string()
                    );
                    self.stores.labels.delete(&mapping.name);
                    removed.push(mapping.name);
                }
                Some(target) if target != mapping.target => {
                    changed.push(self.stores.labels.save(mapping.with_target(target)));
                }
                Some(_) => {}
            }
            self.pump(scope);
        }
        (changed, removed)
    }

    // =========================================================================
    // Fill
    // =========================================================================

    /// Tile `source_range` over `dest_range`, shifting relative references
    /// by each destination's distance from its source cell.
    ///
    /// `source_cells` is the snapshot to copy from, so source and destination
    /// may overlap. A source address with no cell clears the destination.
    pub fn fill_cells(
        &mut self,
        source_cells: &[Cell],
        source_range: CellRange,
        dest_range: CellRange,
    ) -> Result<ChangeSet, EngineError> {
        let source_range = source_range.normalized();
        let dest_range = dest_range.normalized();
        let limit = self.settings.max_fill_cells;
        if dest_range.len() > limit {
            return Err(EngineError::FillTooLarge { cells: dest_range.len(), limit });
        }
        log::info!("fill {} -> {}", source_range, dest_range);

        let sources: BTreeMap<CellRef, &Cell> = source_cells
            .iter()
            .filter(|cell| source_range.contains(&cell.address))
            .map(|cell| (cell.address.normalized(), cell))
            .collect();

        let mut filled = Vec::new();
        let mut cleared = Vec::new();
        for dest in dest_range.cells() {
            let col = source_range.start.col() + (dest.col() - dest_range.start.col()) % source_range.width();
            let row = source_range.start.row() + (dest.row() - dest_range.start.row()) % source_range.height();
            match sources.get(&CellRef::new(col, row)) {
                Some(source) => filled.push(filled_cell(source, dest)),
                None => cleared.push(dest),
            }
        }

        let mut scope = self.open_scope();
        for address in &cleared {
            self.delete_raw(&mut scope, address);
        }
        for cell in filled {
            let address = cell.address;
            self.save_raw(&mut scope, cell);
            scope.force(address);
        }
        self.drain(&mut scope)?;
        Ok(scope.finish())
    }

    // =========================================================================
    // Labels
    // =========================================================================

    pub fn label(&self, name: &str) -> Option<LabelMapping> {
        self.stores.labels.load(name)
    }

    pub fn labels(&self) -> Vec<LabelMapping> {
        self.stores.labels.all()
    }

    /// Define or redefine a label. Cells using it are recomputed.
    pub fn save_label(&mut self, mapping: LabelMapping) -> Result<ChangeSet, EngineError> {
        is_valid_name(&mapping.name).map_err(EngineError::InvalidLabel)?;
        let target = match mapping.target {
            LabelTarget::Cell(cell) => LabelTarget::Cell(cell.normalized()),
            LabelTarget::Range(range) => LabelTarget::Range(range.normalized()),
        };
        let mapping = LabelMapping { name: mapping.name.trim().to_string(), ..mapping.with_target(target) };

        let mut scope = self.open_scope();
        self.stores.labels.save(mapping);
        self.pump(&mut scope);
        self.drain(&mut scope)?;
        Ok(scope.finish())
    }

    pub fn remove_label(&mut self, name: &str) -> Result<ChangeSet, EngineError> {
        if self.stores.labels.load(name).is_none() {
            return Err(EngineError::UnknownLabel(name.to_string()));
        }
        let mut scope = self.open_scope();
        self.stores.labels.delete(name);
        self.pump(&mut scope);
        self.drain(&mut scope)?;
        Ok(scope.finish())
    }

    // =========================================================================
    // Conditional formatting
    // =========================================================================

    pub fn conditional_rules(&self) -> &ConditionalRules {
        &self.rules
    }

    /// Attach a rule to a range and re-render the cells it covers.
    pub fn add_conditional_rule(&mut self, range: CellRange, rule: ConditionalRule) -> Result<ChangeSet, EngineError> {
        self.rules.add(range, rule);
        self.rerender(&range)
    }

    /// Drop every rule on exactly `range` and re-render its cells.
    pub fn remove_conditional_rules(&mut self, range: CellRange) -> Result<ChangeSet, EngineError> {
        let removed = self.rules.remove(&range);
        if removed.is_empty() {
            return Ok(ChangeSet::default());
        }
        self.rerender(&range)
    }

    fn rerender(&mut self, range: &CellRange) -> Result<ChangeSet, EngineError> {
        let mut scope = self.open_scope();
        for cell in self.stores.cells.cells_in_range(range) {
            scope.force(cell.address);
        }
        self.drain(&mut scope)?;
        Ok(scope.finish())
    }

    // =========================================================================
    // Hidden rows and columns
    // =========================================================================

    pub fn set_column_hidden(&mut self, col: usize, hidden: bool) {
        self.stores.hidden_columns.set_hidden(col, hidden);
    }

    pub fn set_row_hidden(&mut self, row: usize, hidden: bool) {
        self.stores.hidden_rows.set_hidden(row, hidden);
    }

    pub fn is_column_hidden(&self, col: usize) -> bool {
        self.stores.hidden_columns.is_hidden(col)
    }

    pub fn is_row_hidden(&self, row: usize) -> bool {
        self.stores.hidden_rows.is_hidden(row)
    }

    pub fn hidden_columns(&self) -> Vec<usize> {
        self.stores.hidden_columns.hidden()
    }

    pub fn hidden_rows(&self) -> Vec<usize> {
        self.stores.hidden_rows.hidden()
    }

    // =========================================================================
    // Dependency introspection
    // =========================================================================

    /// What the cell's formula references, as recorded edges.
    pub fn precedents(&self, address: &CellRef) -> Vec<Symbol> {
        let mut out: Vec<Symbol> = self
            .stores
            .cell_refs
            .targets_of(address)
            .into_iter()
            .map(Symbol::Cell)
            .collect();
        out.extend(self.stores.range_refs.targets_of(address).into_iter().map(Symbol::Range));
        out.extend(self.stores.label_refs.targets_of(address).into_iter().map(Symbol::Label));
        out.sort();
        out
    }

    /// Cells whose formulas reference this address directly, through a
    /// label, or through a range.
    pub fn dependents(&self, address: &CellRef) -> Vec<CellRef> {
        self.referrers(address).into_iter().collect()
    }

    fn referrers(&self, address: &CellRef) -> BTreeSet<CellRef> {
        let address = address.normalized();
        let mut out: BTreeSet<CellRef> = self.stores.cell_refs.referrers_of(&address).into_iter().collect();
        for mapping in self.stores.labels.all() {
            if mapping.references_cell(&address) {
                out.extend(self.stores.label_refs.referrers_of(&mapping.key()));
            }
        }
        for range in self.stores.range_refs.targets() {
            if range.contains(&address) {
                out.extend(self.stores.range_refs.referrers_of(&range));
            }
        }
        out
    }

    // =========================================================================
    // Propagation
    // =========================================================================

    fn open_scope(&self) -> PropagationScope {
        PropagationScope::open(self.stores.cells.watchers(), self.stores.labels.watchers())
    }

    fn save_raw(&mut self, scope: &mut PropagationScope, cell: Cell) {
        self.stores.cells.save(cell);
        self.pump(scope);
    }

    fn delete_raw(&mut self, scope: &mut PropagationScope, address: &CellRef) {
        self.stores.cells.delete(address);
        self.pump(scope);
    }

    /// Handle store events: refresh edges and queue referrers.
    fn pump(&mut self, scope: &mut PropagationScope) {
        while let Some(event) = scope.next_event() {
            match event {
                StoreEvent::CellSaved(cell) => {
                    let address = cell.address;
                    self.clear_edges(&address);
                    for symbol in symbols_of(&cell) {
                        match symbol {
                            Symbol::Cell(target) => self.stores.cell_refs.save_edge(address, target),
                            Symbol::Range(range) => self.stores.range_refs.save_edge(address, range),
                            Symbol::Label(name) => self.stores.label_refs.save_edge(address, label_key(&name)),
                        }
                    }
                    scope.record_saved(cell);
                    for referrer in self.referrers(&address) {
                        scope.enqueue(referrer);
                    }
                    for reader in self.rule_readers(|symbol| self.symbol_reads(symbol, &address)) {
                        scope.enqueue(reader);
                    }
                }
                StoreEvent::CellDeleted(address) => {
                    self.clear_edges(&address);
                    scope.record_deleted(address);
                    for referrer in self.referrers(&address) {
                        scope.enqueue(referrer);
                    }
                    for reader in self.rule_readers(|symbol| self.symbol_reads(symbol, &address)) {
                        scope.enqueue(reader);
                    }
                }
                StoreEvent::LabelSaved(mapping) => {
                    self.enqueue_label_users(scope, &mapping.key());
                }
                StoreEvent::LabelDeleted(key) => {
                    self.enqueue_label_users(scope, &key);
                }
            }
        }
    }

    fn enqueue_label_users(&self, scope: &mut PropagationScope, key: &str) {
        for referrer in self.stores.label_refs.referrers_of(&key.to_string()) {
            scope.enqueue(referrer);
        }
        let readers = self.rule_readers(|symbol| matches!(symbol, Symbol::Label(name) if label_key(name) == key));
        for reader in readers {
            scope.enqueue(reader);
        }
    }

    /// Stored cells covered by a conditional rule whose condition, as seen
    /// from that cell, reads a symbol accepted by `reads`.
    fn rule_readers(&self, reads: impl Fn(&Symbol) -> bool) -> BTreeSet<CellRef> {
        let mut out = BTreeSet::new();
        for (range, rules) in self.rules.iter() {
            for cell in self.stores.cells.cells_in_range(range) {
                let address = cell.address;
                let hit = rules
                    .iter()
                    .filter_map(|rule| rule.condition_at(range, &address))
                    .any(|condition| condition.symbols().iter().any(|symbol| reads(symbol)));
                if hit {
                    out.insert(address);
                }
            }
        }
        out
    }

    fn symbol_reads(&self, symbol: &Symbol, address: &CellRef) -> bool {
        match symbol {
            Symbol::Cell(cell) => cell.same_address(address),
            Symbol::Range(range) => range.contains(address),
            Symbol::Label(name) => self
                .stores
                .labels
                .load(name)
                .is_some_and(|mapping| mapping.references_cell(address)),
        }
    }

    fn clear_edges(&mut self, address: &CellRef) {
        self.stores.cell_refs.delete_all_edges_from(address);
        self.stores.range_refs.delete_all_edges_from(address);
        self.stores.label_refs.delete_all_edges_from(address);
    }

    /// Recompute everything still pending in the scope.
    fn drain(&mut self, scope: &mut PropagationScope) -> Result<(), EngineError> {
        while let Some(address) = scope.next_pending() {
            let Some(cell) = self.stores.cells.load(&address) else {
                continue;
            };
            log::trace!("recomputing {}", address);
            self.compute(scope, cell, EvalMode::ForceRecompute)?;
        }
        Ok(())
    }

    // =========================================================================
    // Parse, evaluate, format
    // =========================================================================

    fn compute(&mut self, scope: &mut PropagationScope, mut cell: Cell, mode: EvalMode) -> Result<Cell, EngineError> {
        if mode == EvalMode::SkipEvaluate {
            return Ok(cell);
        }
        let address = cell.address;
        // Re-entered through a reference cycle: keep what is stored
        if !scope.begin_evaluation(address) {
            return Ok(cell);
        }
        let result = self.compute_in_place(scope, &mut cell, mode);
        let done = match result {
            Ok(true) => mode,
            _ => EvalMode::SkipEvaluate,
        };
        scope.end_evaluation(address, done);
        result?;

        let stored = self.stores.cells.load(&address);
        if stored.as_ref() != Some(&cell) {
            self.save_raw(scope, cell.clone());
        }
        Ok(cell)
    }

    /// Evaluate and render `cell`. Returns false if the stored error result
    /// was kept instead of evaluating.
    fn compute_in_place(&mut self, scope: &mut PropagationScope, cell: &mut Cell, mode: EvalMode) -> Result<bool, EngineError> {
        if mode == EvalMode::ForceRecompute {
            cell.formula.clear_caches();
        }
        let sticky = mode == EvalMode::ComputeIfNecessary && cell.formula.result.is_error();
        if !sticky {
            cell.formula.result = match prepare(cell) {
                Ok(expr) => {
                    let mut resolver = Resolver { engine: &mut *self, scope: &mut *scope, current: None };
                    Outcome::from(evaluate(&expr, &mut resolver))
                }
                Err(error) => Outcome::Error(error),
            };
        }
        cell.rendered = Some(self.render(scope, cell)?);
        Ok(!sticky)
    }

    fn render(&mut self, scope: &mut PropagationScope, cell: &mut Cell) -> Result<Rendered, EngineError> {
        let value = match &cell.formula.result {
            Outcome::Error(error) => {
                return Ok(Rendered { text: error.message.clone(), style: Style::default() });
            }
            Outcome::Empty => return Ok(Rendered { text: String::new(), style: cell.style }),
            Outcome::Value(value) => value.clone(),
        };

        let address = cell.address;
        let styled = match cell.format.as_mut() {
            Some(pattern) => pattern
                .formatter()
                .map_err(|e| {
                    log::warn!("format pattern of {} rejected: {}", address, e);
                    e
                })?
                .format(&value),
            None => self.default_formatter.format(&value),
        };

        let mut style = cell.style;
        if style.color.is_none() {
            style.color = styled.color;
        }
        for (range, rule) in self.rules.matching(&address) {
            let Some(condition) = rule.condition_at(&range, &address) else {
                continue;
            };
            let mut resolver = Resolver {
                engine: &mut *self,
                scope: &mut *scope,
                current: Some((address, cell.formula.result.clone())),
            };
            let holds = evaluate(&condition, &mut resolver).and_then(|v| v.to_bool());
            if matches!(holds, Ok(true)) {
                style = rule.patch.apply(&style);
            }
        }
        Ok(Rendered { text: styled.text, style })
    }
}

/// The cell's expression tree, parsing and lowering as needed. Caches what
/// it builds in the cell.
fn prepare(cell: &mut Cell) -> Result<Expr, CellError> {
    let formula = &mut cell.formula;
    if let Some(expr) = &formula.expr {
        return Ok(expr.clone());
    }
    let expr = if formula.text.is_empty() {
        Expr::Literal(Value::Text(String::new()))
    } else if formula.is_expression() {
        let ast = match formula.ast.take() {
            Some(ast) => ast,
            None => parse(&formula.text).map_err(|message| {
                log::debug!("parse error in {}: {}", cell.address, message);
                CellError::parse(message)
            })?,
        };
        let expr = Expr::lower(&ast);
        formula.ast = Some(ast);
        expr
    } else {
        Expr::Literal(Value::from_input(&formula.text))
    };
    formula.expr = Some(expr.clone());
    Ok(expr)
}

/// Syntax tree of a formula cell: the cached one, or a fresh parse.
fn syntax_tree(cell: &Cell) -> Option<Node> {
    match &cell.formula.ast {
        Some(ast) => Some(ast.clone()),
        None if cell.formula.is_expression() => parse(&cell.formula.text).ok(),
        None => None,
    }
}

/// References in the cell's current formula.
fn symbols_of(cell: &Cell) -> Vec<Symbol> {
    let symbols = match (&cell.formula.expr, syntax_tree(cell)) {
        (Some(expr), _) => expr.symbols(),
        (None, Some(ast)) => Expr::lower(&ast).symbols(),
        (None, None) => return Vec::new(),
    };
    let mut symbols: Vec<Symbol> = symbols.into_iter().collect();
    symbols.sort();
    symbols
}

/// A copy of `source` placed at `dest`, relative references moved along.
fn filled_cell(source: &Cell, dest: CellRef) -> Cell {
    let dx = dest.col() as i64 - source.address.col() as i64;
    let dy = dest.row() as i64 - source.address.row() as i64;
    let mut cell = Cell::new(dest, source.text()).with_style(source.style);
    cell.format = source.format.clone();
    if let Some(ast) = syntax_tree(source) {
        let moved = rewrite::offset(&ast, dx, dy);
        cell = cell.with_ast(render(&moved), moved);
    }
    cell
}

/// Resolves references by loading cells through the engine, inside the
/// current propagation scope.
struct Resolver<'a> {
    engine: &'a mut Engine,
    scope: &'a mut PropagationScope,
    /// The cell being rendered, whose fresh result is not stored yet.
    current: Option<(CellRef, Outcome)>,
}

impl Resolver<'_> {
    fn value_of(&mut self, cell: Cell) -> Result<Value, CellError> {
        // A stored error may be stale: its cause can change in this scope
        let mode = match self.scope.mode_for(&cell.address) {
            EvalMode::ComputeIfNecessary if cell.formula.result.is_error() => EvalMode::ForceRecompute,
            mode => mode,
        };
        let cell = self
            .engine
            .compute(self.scope, cell, mode)
            .map_err(|e| CellError::value(e.to_string()))?;
        outcome_value(cell.formula.result)
    }
}

fn outcome_value(outcome: Outcome) -> Result<Value, CellError> {
    match outcome {
        Outcome::Empty => Ok(Value::Empty),
        Outcome::Value(value) => Ok(value),
        Outcome::Error(error) => Err(error),
    }
}

impl ReferenceResolver for Resolver<'_> {
    fn resolve_cell(&mut self, cell: CellRef) -> Result<Value, CellError> {
        let address = cell.normalized();
        if let Some((current, outcome)) = &self.current {
            if *current == address {
                return outcome_value(outcome.clone());
            }
        }
        let stored = self
            .engine
            .stores
            .cells
            .load(&address)
            .ok_or_else(|| CellError::unknown_cell(address))?;
        self.value_of(stored)
    }

    fn resolve_range(&mut self, range: &CellRange) -> Result<Vec<Value>, CellError> {
        let addresses: Vec<CellRef> = self
            .engine
            .stores
            .cells
            .cells_in_range(range)
            .into_iter()
            .map(|cell| cell.address)
            .collect();
        let mut values = Vec::with_capacity(addresses.len());
        for address in addresses {
            if let Some((current, outcome)) = &self.current {
                if *current == address {
                    values.push(outcome_value(outcome.clone())?);
                    continue;
                }
            }
            // Reload: evaluating an earlier cell may have rewritten this one
            let Some(cell) = self.engine.stores.cells.load(&address) else {
                continue;
            };
            values.push(self.value_of(cell)?);
        }
        Ok(values)
    }

    fn resolve_label(&mut self, name: &str) -> Option<LabelTarget> {
        self.engine.stores.labels.load(name).map(|mapping| mapping.target)
    }
}
