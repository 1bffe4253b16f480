// Row/column insert and delete through the public engine API.
// Run with: cargo test -p cellflow-engine --test structural_tests

use std::collections::BTreeMap;

use cellflow_engine::{Cell, CellRange, CellRef, Engine, EngineError, ErrorKind, LabelMapping, LabelTarget, Value};

fn a1(s: &str) -> CellRef {
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

fn snapshot(engine: &Engine) -> BTreeMap<String, (String, String)> {
    engine
        .stores()
        .cells
        .all_refs()
        .into_iter()
        .filter_map(|address| engine.cell(&address))
        .map(|cell| (cell.address.to_string(), (cell.text().to_string(), cell.display_text().to_string())))
        .collect()
}

fn sample() -> Engine {
    let mut engine = Engine::new();
    save(&mut engine, "A1", "=D1*2");
    save(&mut engine, "B1", "1");
    save(&mut engine, "C1", "2");
    save(&mut engine, "D1", "=SUM(B1:C1)+E1");
    save(&mut engine, "E1", "3");
    save(&mut engine, "F1", "=$E$1+A1");
    save(&mut engine, "A2", "=F1&\"!\"");
    engine
}

#[test]
fn test_insert_row_moves_cells_and_references() {
    let mut engine = Engine::new();
    save(&mut engine, "A1", "=A2*2");
    save(&mut engine, "A2", "5");
    save(&mut engine, "B1", "=SUM(A1:A3)");

    let change = engine.insert_rows(1, 1).unwrap();
    assert_eq!(text(&engine, "A1").as_deref(), Some("=A3*2"));
    assert_eq!(text(&engine, "A3").as_deref(), Some("5"));
    assert_eq!(text(&engine, "B1").as_deref(), Some("=SUM(A1:A4)"));
    assert!(engine.cell(&a1("A2")).is_none());
    assert_eq!(value(&engine, "A1"), Some(Value::Number(10.0)));
    assert_eq!(value(&engine, "B1"), Some(Value::Number(15.0)));
    assert_eq!(change.deleted, vec![a1("A2")]);
}

#[test]
fn test_insert_before_everything() {
    let mut engine = Engine::new();
    save(&mut engine, "A1", "7");
    save(&mut engine, "B1", "=A1+1");

    engine.insert_columns(0, 2).unwrap();
    assert!(engine.cell(&a1("A1")).is_none());
    assert_eq!(text(&engine, "D1").as_deref(), Some("=C1+1"));
    assert_eq!(value(&engine, "D1"), Some(Value::Number(8.0)));
}

#[test]
fn test_absolute_references_outside_delete_are_untouched() {
    let mut engine = Engine::new();
    save(&mut engine, "A5", "1");
    save(&mut engine, "B1", "=$A$5+A5");

    engine.delete_rows(1, 2).unwrap();
    assert_eq!(text(&engine, "B1").as_deref(), Some("=$A$5+A3"));
}

#[test]
fn test_references_into_deleted_span_become_ref_errors() {
    let mut engine = Engine::new();
    save(&mut engine, "B1", "4");
    save(&mut engine, "C1", "=B1");
    save(&mut engine, "D1", "=$B$1*2");

    let change = engine.delete_columns(1, 1).unwrap();
    assert_eq!(text(&engine, "B1").as_deref(), Some("=#REF!"));
    assert_eq!(text(&engine, "C1").as_deref(), Some("=#REF!*2"));
    for address in ["B1", "C1"] {
        let err = engine.cell(&a1(address)).unwrap().error().cloned().unwrap();
        assert_eq!(err.kind, ErrorKind::Reference);
    }
    assert_eq!(change.deleted, vec![a1("B1"), a1("C1"), a1("D1")]);
    assert!(engine.cell(&a1("D1")).is_none());
}

#[test]
fn test_ranges_shrink_and_collapse() {
    let mut engine = Engine::new();
    for (address, text) in [("A1", "1"), ("A2", "2"), ("A3", "3"), ("A4", "4")] {
        save(&mut engine, address, text);
    }
    save(&mut engine, "B1", "=SUM(A2:A4)");
    save(&mut engine, "C1", "=SUM(A3:A3)");

    engine.delete_rows(2, 1).unwrap();
    assert_eq!(text(&engine, "B1").as_deref(), Some("=SUM(A2:A3)"));
    assert_eq!(text(&engine, "C1").as_deref(), Some("=SUM(#REF!)"));
    assert_eq!(value(&engine, "B1"), Some(Value::Number(6.0)));
}

#[test]
fn test_column_deletes_compose() {
    let mut one_by_one = sample();
    one_by_one.delete_columns(1, 1).unwrap();
    one_by_one.delete_columns(1, 1).unwrap();

    let mut at_once = sample();
    at_once.delete_columns(1, 2).unwrap();

    assert_eq!(snapshot(&one_by_one), snapshot(&at_once));
    assert_eq!(text(&at_once, "A1").as_deref(), Some("=B1*2"));
    assert_eq!(text(&at_once, "B1").as_deref(), Some("=SUM(#REF!)+C1"));
    assert_eq!(text(&at_once, "D1").as_deref(), Some("=$E$1+A1"));
}

#[test]
fn test_labels_follow_structural_edits() {
    let mut engine = Engine::new();
    save(&mut engine, "C5", "9");
    save(&mut engine, "A1", "=Gone");
    save(&mut engine, "A3", "=Total");
    save(&mut engine, "A4", "=SUM(Block)");
    engine.save_label(LabelMapping::cell("Total", a1("C5"))).unwrap();
    engine.save_label(LabelMapping::cell("Gone", a1("D2"))).unwrap();
    engine.save_label(LabelMapping::range("Block", "C4:C6".parse().unwrap())).unwrap();
    assert_eq!(value(&engine, "A3"), Some(Value::Number(9.0)));

    let change = engine.delete_rows(1, 1).unwrap();

    assert_eq!(change.labels_removed, vec!["Gone".to_string()]);
    let changed: Vec<&str> = change.labels_changed.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(changed, vec!["Block", "Total"]);
    assert!(engine.label("gone").is_none());
    assert_eq!(engine.label("total").unwrap().target, LabelTarget::Cell(a1("C4")));
    assert_eq!(
        engine.label("block").unwrap().target,
        LabelTarget::Range("C3:C5".parse::<CellRange>().unwrap())
    );

    let err = engine.cell(&a1("A1")).unwrap().error().cloned().unwrap();
    assert_eq!(err.message, "Unknown Label: Gone");
    assert_eq!(value(&engine, "A2"), Some(Value::Number(9.0)));
    assert_eq!(value(&engine, "A3"), Some(Value::Number(9.0)));
}

#[test]
fn test_conditional_ranges_follow_shifts() {
    use cellflow_engine::{ConditionalRule, StylePatch};

    let mut engine = Engine::new();
    save(&mut engine, "C1", "50");
    let patch = StylePatch { bold: Some(true), ..StylePatch::default() };
    engine
        .add_conditional_rule("C1:C3".parse().unwrap(), ConditionalRule::new(0, "=C1>10", patch).unwrap())
        .unwrap();
    assert!(engine.cell(&a1("C1")).unwrap().rendered.unwrap().style.bold);

    engine.insert_columns(0, 1).unwrap();
    assert!(engine.conditional_rules().rules_for(&"C1:C3".parse().unwrap()).is_empty());
    let rules = engine.conditional_rules().rules_for(&"D1:D3".parse().unwrap());
    assert_eq!(rules[0].condition_text(), "=D1>10");
    assert!(engine.cell(&a1("D1")).unwrap().rendered.unwrap().style.bold);
}

#[test]
fn test_edits_past_the_grid_are_rejected() {
    let mut engine = sample();
    let before = snapshot(&engine);

    assert!(matches!(engine.insert_rows(1, usize::MAX), Err(EngineError::OutOfGrid { .. })));
    assert!(matches!(engine.delete_columns(usize::MAX, 1), Err(EngineError::OutOfGrid { .. })));
    assert!(matches!(engine.insert_columns(16_384, 1), Err(EngineError::OutOfGrid { .. })));
    assert_eq!(snapshot(&engine), before);

    // The whole grid is still a valid span
    engine.delete_rows(1, 1_048_575).unwrap();
    assert_eq!(text(&engine, "A2"), None);
    assert_eq!(value(&engine, "F1"), Some(Value::Number(15.0)));
}
