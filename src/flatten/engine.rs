//! Record flattening engine

use super::types::{
    ColumnType, FlatRow, ParentLink, RowKey, SchemaChange, TableSchema,
};
use crate::error::{Error, Result};
use crate::types::{JsonObject, JsonValue, RawRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

/// Column carrying the synthetic key of rows without a natural `id`
pub(crate) const ROW_ID_COLUMN: &str = "_row_id";

/// Policy for arrays of scalar values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalarArrayMode {
    /// Serialize the whole array into one JSON text column
    #[default]
    Serialize,
    /// Normalize into a child table with one `value` row per element
    ChildTable,
}

/// Flattening configuration
#[derive(Debug, Clone, Default)]
pub struct FlattenConfig {
    /// How arrays of scalars are handled
    pub scalar_arrays: ScalarArrayMode,
}

/// Reference from a child row back to the row being flattened
struct ParentRef {
    table: String,
    key: RowKey,
}

/// Decomposes raw records into flat rows across evolving table schemas.
///
/// The flattener owns every schema discovered during a run. Schemas are
/// additive-only: new fields append nullable columns, conflicting types
/// widen, and nothing is ever removed. Rows come out parent-first, so a
/// child's foreign key always references a row emitted earlier.
#[derive(Default)]
pub struct Flattener {
    config: FlattenConfig,
    schemas: BTreeMap<String, TableSchema>,
    counters: HashMap<String, u64>,
    /// Natural keys already emitted per extracted data-model table
    extracted: HashMap<String, HashSet<RowKey>>,
}

impl Flattener {
    /// Create a flattener with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a flattener with the given configuration
    pub fn with_config(config: FlattenConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// All schemas discovered so far, by table name
    pub fn schemas(&self) -> impl Iterator<Item = &TableSchema> {
        self.schemas.values()
    }

    /// Look up one schema
    pub fn schema(&self, table: &str) -> Option<&TableSchema> {
        self.schemas.get(table)
    }

    /// Flatten one record into rows for `root_table` and its children.
    ///
    /// Row order is deterministic: the root row first, then child rows
    /// in field order, depth-first.
    pub fn flatten(&mut self, record: RawRecord, root_table: &str) -> Result<Vec<FlatRow>> {
        let root = sanitize_table_name(root_table)?;
        let mut rows = Vec::new();
        self.flatten_object(record, &root, None, &mut rows)?;
        Ok(rows)
    }

    fn flatten_object(
        &mut self,
        object: JsonObject,
        table: &str,
        parent: Option<&ParentRef>,
        rows: &mut Vec<FlatRow>,
    ) -> Result<RowKey> {
        self.ensure_schema(table, parent);

        let key = self.row_key(table, &object);
        let mut values: Vec<(String, JsonValue)> = Vec::new();
        let mut child_rows: Vec<FlatRow> = Vec::new();

        if let Some(parent) = parent {
            let fk = fk_column(&parent.table);
            self.observe(table, &fk, parent.key.column_type());
            values.push((fk, parent.key.as_value()));
        }
        if let RowKey::Synthetic(id) = &key {
            self.observe(table, ROW_ID_COLUMN, ColumnType::Integer);
            values.push((ROW_ID_COLUMN.to_string(), JsonValue::from(*id)));
        }

        for (field, value) in object {
            match value {
                JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_)
                | JsonValue::String(_) => {
                    let column_type = ColumnType::of_value(&value);
                    self.observe(table, &field, column_type);
                    values.push((field, value));
                }
                JsonValue::Object(child) => {
                    if let Some((model, child_key)) = data_model_of(&child) {
                        // A shared data-model object: extract into its own
                        // table, dedupe by id, and keep a reference column
                        // on this row.
                        let child_table = sanitize_table_name(&model)?;
                        let ref_column = format!("{child_table}_id");
                        self.observe(table, &ref_column, child_key.column_type());
                        values.push((ref_column, child_key.as_value()));

                        let unseen = self
                            .extracted
                            .entry(child_table.clone())
                            .or_default()
                            .insert(child_key);
                        if unseen {
                            self.flatten_object(child, &child_table, None, &mut child_rows)?;
                        }
                    } else {
                        let child_table = child_table_name(table, &field)?;
                        let parent_ref = ParentRef {
                            table: table.to_string(),
                            key: key.clone(),
                        };
                        self.flatten_object(
                            child,
                            &child_table,
                            Some(&parent_ref),
                            &mut child_rows,
                        )?;
                    }
                }
                JsonValue::Array(items) => {
                    let all_objects =
                        !items.is_empty() && items.iter().all(JsonValue::is_object);
                    if all_objects {
                        let child_table = child_table_name(table, &field)?;
                        let parent_ref = ParentRef {
                            table: table.to_string(),
                            key: key.clone(),
                        };
                        for item in items {
                            let JsonValue::Object(child) = item else {
                                unreachable!("checked all_objects")
                            };
                            self.flatten_object(
                                child,
                                &child_table,
                                Some(&parent_ref),
                                &mut child_rows,
                            )?;
                        }
                    } else {
                        match self.config.scalar_arrays {
                            ScalarArrayMode::Serialize => {
                                let serialized = serde_json::to_string(&items)?;
                                self.observe(table, &field, ColumnType::Json);
                                values.push((field, JsonValue::String(serialized)));
                            }
                            ScalarArrayMode::ChildTable => {
                                let child_table = child_table_name(table, &field)?;
                                let parent_ref = ParentRef {
                                    table: table.to_string(),
                                    key: key.clone(),
                                };
                                for item in items {
                                    let mut element = JsonObject::new();
                                    element.insert("value".to_string(), item);
                                    self.flatten_object(
                                        element,
                                        &child_table,
                                        Some(&parent_ref),
                                        &mut child_rows,
                                    )?;
                                }
                            }
                        }
                    }
                }
            }
        }

        let present: Vec<&str> = values.iter().map(|(name, _)| name.as_str()).collect();
        self.schemas
            .get_mut(table)
            .expect("schema ensured above")
            .note_row(&present);

        rows.push(FlatRow {
            table: table.to_string(),
            key: key.clone(),
            values,
        });
        rows.extend(child_rows);
        Ok(key)
    }

    fn ensure_schema(&mut self, table: &str, parent: Option<&ParentRef>) {
        if !self.schemas.contains_key(table) {
            let schema = match parent {
                Some(parent) => TableSchema::child_of(
                    table,
                    ParentLink {
                        table: parent.table.clone(),
                        fk_column: fk_column(&parent.table),
                    },
                ),
                None => TableSchema::new(table),
            };
            self.schemas.insert(table.to_string(), schema);
        }
    }

    fn observe(&mut self, table: &str, column: &str, column_type: ColumnType) {
        let schema = self
            .schemas
            .get_mut(table)
            .expect("schema ensured before observation");
        if let SchemaChange::Widened { from, to } = schema.observe(column, column_type) {
            warn!("column {table}.{column} widened from {from} to {to}");
        }
    }

    /// Pick the row key: the record's own `id` when it carries one,
    /// otherwise the table's next synthetic sequence number.
    fn row_key(&mut self, table: &str, object: &JsonObject) -> RowKey {
        if let Some(key) = natural_key(object) {
            return key;
        }
        let counter = self.counters.entry(table.to_string()).or_insert(0);
        *counter += 1;
        RowKey::Synthetic(*counter)
    }
}

impl std::fmt::Debug for Flattener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flattener")
            .field("tables", &self.schemas.len())
            .finish_non_exhaustive()
    }
}

/// Foreign-key column name referencing `table`
fn fk_column(table: &str) -> String {
    format!("{table}_id")
}

/// Natural key of an object, when its `id` field is int or text
fn natural_key(object: &JsonObject) -> Option<RowKey> {
    match object.get("id") {
        Some(JsonValue::Number(n)) => n.as_i64().map(RowKey::NaturalInt),
        Some(JsonValue::String(s)) => Some(RowKey::NaturalText(s.clone())),
        _ => None,
    }
}

/// Data-model extraction probe: objects carrying both `dataModel` and a
/// natural `id` are shared entities, not record-private nesting.
fn data_model_of(object: &JsonObject) -> Option<(String, RowKey)> {
    let model = object.get("dataModel")?.as_str()?;
    let key = natural_key(object)?;
    Some((model.to_string(), key))
}

static INVALID_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]+").expect("valid identifier regex"));

/// Normalize a table name to a safe lowercase SQL identifier
fn sanitize_table_name(name: &str) -> Result<String> {
    let cleaned = INVALID_IDENT
        .replace_all(name.trim(), "_")
        .trim_matches('_')
        .to_ascii_lowercase();
    if cleaned.is_empty() {
        return Err(Error::InvalidTableName {
            name: name.to_string(),
            message: "no identifier characters left after sanitizing".to_string(),
        });
    }
    if cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        return Ok(format!("t_{cleaned}"));
    }
    Ok(cleaned)
}

/// Table name for an anonymous nested field
fn child_table_name(parent: &str, field: &str) -> Result<String> {
    sanitize_table_name(&format!("{parent}_{field}"))
}
