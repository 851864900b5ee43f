//! Schema and row types for flattening

use crate::types::JsonValue;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// Column Type
// ============================================================================

/// Inferred semantic type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Only nulls observed so far
    Null,
    Boolean,
    Integer,
    Float,
    /// ISO 8601 date-time strings
    Timestamp,
    Text,
    /// Serialized JSON (scalar arrays and other opaque values)
    Json,
}

static DATETIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}").expect("valid datetime regex")
});

impl ColumnType {
    /// Infer the column type of a scalar JSON value
    pub fn of_value(value: &JsonValue) -> ColumnType {
        match value {
            JsonValue::Null => ColumnType::Null,
            JsonValue::Bool(_) => ColumnType::Boolean,
            JsonValue::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    ColumnType::Integer
                } else {
                    ColumnType::Float
                }
            }
            JsonValue::String(s) => {
                if DATETIME_RE.is_match(s) {
                    ColumnType::Timestamp
                } else {
                    ColumnType::Text
                }
            }
            // Containers are flattened away before inference; anything
            // left is stored serialized.
            JsonValue::Array(_) | JsonValue::Object(_) => ColumnType::Json,
        }
    }

    /// Merge with another observed type, widening on conflict.
    ///
    /// Widening is permissive and total: no pair of types errors, and
    /// the result can always represent values of both inputs.
    pub fn widen(self, other: ColumnType) -> ColumnType {
        use ColumnType::{Float, Integer, Json, Null, Text, Timestamp};
        match (self, other) {
            (a, b) if a == b => a,
            (Null, t) | (t, Null) => t,
            (Integer, Float) | (Float, Integer) => Float,
            (Timestamp, Text) | (Text, Timestamp) => Text,
            (Json, _) | (_, Json) => Text,
            _ => Text,
        }
    }

    /// The DuckDB type this column materializes as
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "BIGINT",
            ColumnType::Float => "DOUBLE",
            ColumnType::Timestamp => "TIMESTAMP",
            // Null-only columns materialize as VARCHAR until a typed
            // value shows up in a later run.
            ColumnType::Null | ColumnType::Text | ColumnType::Json => "VARCHAR",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Null => "null",
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Text => "text",
            ColumnType::Json => "json",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// Schema
// ============================================================================

/// One column of a table schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Inferred semantic type
    pub column_type: ColumnType,
    /// Whether any observed row lacked this column
    pub nullable: bool,
}

/// Foreign-key linkage to a parent table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    /// Parent table name
    pub table: String,
    /// Column on this table holding the parent key
    pub fk_column: String,
}

/// Result of observing a value against a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaChange {
    /// Column already matched
    Unchanged,
    /// A new column was added
    Added,
    /// An existing column's type was widened
    Widened {
        /// Type before widening
        from: ColumnType,
        /// Type after widening
        to: ColumnType,
    },
}

/// Additive-only schema of one materialized table.
///
/// Columns are kept in first-seen order. Once a column exists it is
/// never removed or narrowed; conflicting observations widen its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name
    pub name: String,
    columns: Vec<ColumnDef>,
    /// Linkage to the parent table, for child tables
    pub parent: Option<ParentLink>,
    /// Rows observed so far; drives nullability of late-arriving columns
    #[serde(default)]
    rows_seen: u64,
}

impl TableSchema {
    /// Create an empty root-table schema
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            parent: None,
            rows_seen: 0,
        }
    }

    /// Create an empty child-table schema linked to `parent`
    pub fn child_of(name: impl Into<String>, parent: ParentLink) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            parent: Some(parent),
            rows_seen: 0,
        }
    }

    /// Columns in first-seen order
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Record an observation of `column_type` for `name`.
    ///
    /// Unknown columns are appended (nullable, since earlier rows did
    /// not carry them); known columns widen as needed.
    pub fn observe(&mut self, name: &str, column_type: ColumnType) -> SchemaChange {
        if let Some(column) = self.columns.iter_mut().find(|c| c.name == name) {
            if column.column_type == column_type || column_type == ColumnType::Null {
                if column_type == ColumnType::Null {
                    column.nullable = true;
                }
                return SchemaChange::Unchanged;
            }
            let widened = column.column_type.widen(column_type);
            if widened == column.column_type {
                return SchemaChange::Unchanged;
            }
            let from = column.column_type;
            column.column_type = widened;
            return SchemaChange::Widened { from, to: widened };
        }

        // A column first seen after rows already exist is nullable by
        // construction: those earlier rows have no value for it.
        let nullable = self.rows_seen > 0 || column_type == ColumnType::Null;
        self.columns.push(ColumnDef {
            name: name.to_string(),
            column_type,
            nullable,
        });
        SchemaChange::Added
    }

    /// Record a completed row, marking columns it lacked as nullable
    pub fn note_row(&mut self, present: &[&str]) {
        self.rows_seen += 1;
        for column in &mut self.columns {
            if !present.contains(&column.name.as_str()) {
                column.nullable = true;
            }
        }
    }
}

// ============================================================================
// Rows
// ============================================================================

/// Identity of one flat row
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowKey {
    /// Natural integer key from the record's own `id` field
    NaturalInt(i64),
    /// Natural text key
    NaturalText(String),
    /// Synthetic per-table sequence number
    Synthetic(u64),
}

impl RowKey {
    /// The key as a storable cell value
    pub fn as_value(&self) -> JsonValue {
        match self {
            RowKey::NaturalInt(id) => JsonValue::from(*id),
            RowKey::NaturalText(id) => JsonValue::from(id.clone()),
            RowKey::Synthetic(id) => JsonValue::from(*id),
        }
    }

    /// The column type a key of this shape needs
    pub fn column_type(&self) -> ColumnType {
        match self {
            RowKey::NaturalInt(_) | RowKey::Synthetic(_) => ColumnType::Integer,
            RowKey::NaturalText(_) => ColumnType::Text,
        }
    }
}

/// One row belonging to exactly one table
#[derive(Debug, Clone)]
pub struct FlatRow {
    /// Table this row belongs to
    pub table: String,
    /// Row identity (natural `id` or synthetic)
    pub key: RowKey,
    /// Cells in column order, scalar values only
    pub values: Vec<(String, JsonValue)>,
}

impl FlatRow {
    /// Look up a cell by column name
    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }
}
