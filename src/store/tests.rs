//! Tests for the table materializer

use super::*;
use crate::flatten::Flattener;
use crate::types::RawRecord;
use pretty_assertions::assert_eq;
use serde_json::json;

fn record(value: serde_json::Value) -> RawRecord {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("fixture must be an object, got {other:?}"),
    }
}

fn materialize_all(
    flattener: &mut Flattener,
    store: &mut Materializer,
    records: Vec<serde_json::Value>,
    root: &str,
) {
    for raw in records {
        let rows = flattener.flatten(record(raw), root).unwrap();
        for row in rows {
            let schema = flattener.schema(&row.table).unwrap().clone();
            store.append_rows(&schema, &[row]).unwrap();
        }
    }
}

#[test]
fn test_create_and_append() {
    let mut flattener = Flattener::new();
    let mut store = Materializer::open_in_memory().unwrap();

    materialize_all(
        &mut flattener,
        &mut store,
        vec![
            json!({"id": 1, "label": "PKG-1", "quantity": 2.5}),
            json!({"id": 2, "label": "PKG-2", "quantity": 4.0}),
        ],
        "packages",
    );

    assert_eq!(store.row_count("packages").unwrap(), 2);
    let rows = store.fetch_all("packages").unwrap();
    assert_eq!(rows[0]["id"], json!(1));
    assert_eq!(rows[0]["label"], json!("PKG-1"));
    assert_eq!(rows[1]["quantity"], json!(4.0));
}

#[test]
fn test_round_trip_nested_fixture() {
    let mut flattener = Flattener::new();
    let mut store = Materializer::open_in_memory().unwrap();

    materialize_all(
        &mut flattener,
        &mut store,
        vec![json!({
            "id": 10,
            "label": "PKG-10",
            "location": {"name": "Vault A", "capacity": 12},
            "labTests": [
                {"analyte": "THC", "result": 17.2},
                {"analyte": "CBD", "result": 0.4}
            ]
        })],
        "packages",
    );

    // Every scalar present in the input reads back from its table.
    let packages = store.fetch_all("packages").unwrap();
    assert_eq!(packages.len(), 1);
    assert_eq!(packages[0]["id"], json!(10));
    assert_eq!(packages[0]["label"], json!("PKG-10"));

    let locations = store.fetch_all("packages_location").unwrap();
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0]["name"], json!("Vault A"));
    assert_eq!(locations[0]["capacity"], json!(12));
    // Foreign key resolves to the stored parent row.
    assert_eq!(locations[0]["packages_id"], packages[0]["id"]);

    let tests = store.fetch_all("packages_labtests").unwrap();
    assert_eq!(tests.len(), 2);
    assert_eq!(tests[0]["analyte"], json!("THC"));
    assert_eq!(tests[1]["result"], json!(0.4));
    assert!(tests.iter().all(|t| t["packages_id"] == json!(10)));
}

#[test]
fn test_schema_drift_materializes_without_error() {
    let mut flattener = Flattener::new();
    let mut store = Materializer::open_in_memory().unwrap();

    materialize_all(
        &mut flattener,
        &mut store,
        vec![
            json!({"x": 1}),
            json!({"x": "str", "y": true}),
        ],
        "drifty",
    );

    let rows = store.fetch_all("drifty").unwrap();
    assert_eq!(rows.len(), 2);
    // x was widened to text; stored values stay readable.
    assert_eq!(rows[0]["x"], json!("1"));
    assert_eq!(rows[1]["x"], json!("str"));
    // The row written before y existed reads back NULL for it.
    assert_eq!(rows[0]["y"], json!(null));
    assert_eq!(rows[1]["y"], json!(true));
}

#[test]
fn test_columns_are_added_never_dropped() {
    let mut flattener = Flattener::new();
    let mut store = Materializer::open_in_memory().unwrap();

    materialize_all(&mut flattener, &mut store, vec![json!({"a": 1})], "items");
    materialize_all(
        &mut flattener,
        &mut store,
        vec![json!({"b": "two"})],
        "items",
    );

    let summary = store
        .table_summaries()
        .unwrap()
        .into_iter()
        .find(|s| s.name == "items")
        .unwrap();
    let names: Vec<&str> = summary.columns.iter().map(|(n, _)| n.as_str()).collect();
    assert!(names.contains(&"a"));
    assert!(names.contains(&"b"));
    assert_eq!(summary.rows, 2);
}

#[test]
fn test_table_summaries() {
    let mut flattener = Flattener::new();
    let mut store = Materializer::open_in_memory().unwrap();

    materialize_all(
        &mut flattener,
        &mut store,
        vec![json!({"id": 1, "location": {"name": "A"}})],
        "packages",
    );

    let summaries = store.table_summaries().unwrap();
    let names: Vec<&str> = summaries.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["packages", "packages_location"]);
    assert!(summaries.iter().all(|s| s.rows == 1));
}

#[test]
fn test_schema_report_with_relationships() {
    let mut flattener = Flattener::new();
    let mut store = Materializer::open_in_memory().unwrap();

    materialize_all(
        &mut flattener,
        &mut store,
        vec![json!({
            "id": 1,
            "item": {"id": 500, "dataModel": "ITEM", "name": "Flower"}
        })],
        "packages",
    );

    let report = store.schema_report().unwrap();
    assert!(report.contains("Table: packages"));
    assert!(report.contains("Table: item"));
    assert!(report.contains("Inferred Relationships:"));
    assert!(
        report.contains("packages.item_id \u{2192} item.id"),
        "report was:\n{report}"
    );
}

#[test]
fn test_empty_rows_are_noop() {
    let mut store = Materializer::open_in_memory().unwrap();
    let schema = crate::flatten::TableSchema::new("empty");
    assert_eq!(store.append_rows(&schema, &[]).unwrap(), 0);
    assert!(store.list_tables().unwrap().is_empty());
}
