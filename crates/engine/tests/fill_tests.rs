// Fill/copy through the public engine API.
// Run with: cargo test -p cellflow-engine --test fill_tests

use cellflow_engine::{Cell, CellRange, CellRef, Engine, ErrorKind, Style, Value};

fn a1(s: &str) -> CellRef {
    s.parse().unwrap()
}

fn range(s: &str) -> CellRange {
    s.parse().unwrap()
}

fn save(engine: &mut Engine, address: &str, text: &str) {
    engine.save_cell(Cell::new(a1(address), text)).unwrap();
}

fn text(engine: &Engine, address: &str) -> Option<String> {
    engine.cell(&a1(address)).map(|c| c.text().to_string())
}

fn value(engine: &Engine, address: &str) -> Option<Value> {
    engine.cell(&a1(address)).and_then(|c| c.value().cloned())
}

fn snapshot(engine: &Engine, source: &str) -> Vec<Cell> {
    engine.stores().cells.cells_in_range(&range(source))
}

#[test]
fn test_fill_down_shifts_relative_references() {
    let mut engine = Engine::new();
    save(&mut engine, "A1", "1");
    save(&mut engine, "A2", "=A1+1");

    let source = snapshot(&engine, "A2");
    let changes = engine.fill_cells(&source, range("A2"), range("A3:A5")).unwrap();

    assert_eq!(text(&engine, "A3").as_deref(), Some("=A2+1"));
    assert_eq!(text(&engine, "A5").as_deref(), Some("=A4+1"));
    assert_eq!(value(&engine, "A5"), Some(Value::Number(5.0)));
    assert_eq!(changes.cells.len(), 3);
    assert!(changes.deleted.is_empty());
}

#[test]
fn test_fill_tiles_the_source() {
    let mut engine = Engine::new();
    save(&mut engine, "A1", "1");
    save(&mut engine, "B1", "=A1*10");

    let source = snapshot(&engine, "A1:B1");
    engine.fill_cells(&source, range("A1:B1"), range("A2:D2")).unwrap();

    assert_eq!(text(&engine, "A2").as_deref(), Some("1"));
    assert_eq!(text(&engine, "B2").as_deref(), Some("=A2*10"));
    assert_eq!(text(&engine, "C2").as_deref(), Some("1"));
    assert_eq!(text(&engine, "D2").as_deref(), Some("=C2*10"));
    assert_eq!(value(&engine, "D2"), Some(Value::Number(10.0)));
}

#[test]
fn test_fill_keeps_absolute_references_and_style() {
    let mut engine = Engine::new();
    save(&mut engine, "A1", "3");
    save(&mut engine, "B1", "4");
    let style = Style { italic: true, ..Style::default() };
    let cell = Cell::new(a1("C1"), "=$A$1*B1").with_style(style).with_format(Some("0.0"));
    engine.save_cell(cell).unwrap();
    save(&mut engine, "B2", "5");

    let source = snapshot(&engine, "C1");
    engine.fill_cells(&source, range("C1"), range("C2")).unwrap();

    let filled = engine.cell(&a1("C2")).unwrap();
    assert_eq!(filled.text(), "=$A$1*B2");
    assert_eq!(filled.display_text(), "15.0");
    assert!(filled.style.italic);
    assert_eq!(filled.format.as_ref().map(|p| p.pattern()), Some("0.0"));
}

#[test]
fn test_missing_source_clears_destination() {
    let mut engine = Engine::new();
    save(&mut engine, "A1", "1");
    save(&mut engine, "C2", "old");
    save(&mut engine, "D1", "=C2");

    let source = snapshot(&engine, "A1:A2");
    let changes = engine.fill_cells(&source, range("A1:A2"), range("C1:C2")).unwrap();

    assert_eq!(text(&engine, "C1").as_deref(), Some("1"));
    assert!(engine.cell(&a1("C2")).is_none());
    assert_eq!(changes.deleted, vec![a1("C2")]);
    let err = engine.cell(&a1("D1")).unwrap().error().cloned().unwrap();
    assert_eq!(err.message, "Unknown Cell: C2");
}

#[test]
fn test_fill_off_the_grid_is_ref_error() {
    let mut engine = Engine::new();
    save(&mut engine, "A1", "1");
    save(&mut engine, "B2", "=A1");

    let source = snapshot(&engine, "B2");
    engine.fill_cells(&source, range("B2"), range("A1")).unwrap();

    let filled = engine.cell(&a1("A1")).unwrap();
    assert_eq!(filled.text(), "=#REF!");
    assert_eq!(filled.error().unwrap().kind, ErrorKind::Reference);
}

#[test]
fn test_fill_refreshes_referrers() {
    let mut engine = Engine::new();
    save(&mut engine, "A1", "2");
    save(&mut engine, "B1", "=SUM(A1:A3)");
    assert_eq!(value(&engine, "B1"), Some(Value::Number(2.0)));

    let source = snapshot(&engine, "A1");
    let changes = engine.fill_cells(&source, range("A1"), range("A2:A3")).unwrap();

    assert!(changes.cells.iter().any(|c| c.address == a1("B1")));
    assert_eq!(value(&engine, "B1"), Some(Value::Number(6.0)));
}
