//! DuckDB-backed table materializer

use crate::error::{Error, Result};
use crate::flatten::{FlatRow, TableSchema};
use crate::types::JsonValue;
use duckdb::types::{TimeUnit, Value, ValueRef};
use duckdb::Connection;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Read-back summary of one materialized table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    /// Table name
    pub name: String,
    /// Rows currently stored
    pub rows: u64,
    /// Columns as (name, storage type) pairs
    pub columns: Vec<(String, String)>,
}

/// Materializes flattened rows into DuckDB tables.
///
/// The materializer is the single writer of a run: calls are `&mut self`
/// and all schema mutation is serialized through it, which keeps the
/// additive-only evolution race-free.
pub struct Materializer {
    conn: Connection,
    /// Storage type per ensured column, keyed by table
    ensured: HashMap<String, HashMap<String, String>>,
}

impl Materializer {
    /// Open an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            ensured: HashMap::new(),
        })
    }

    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            conn: Connection::open(path)?,
            ensured: HashMap::new(),
        })
    }

    /// Ensure the backing table exists with at least the schema's columns.
    ///
    /// Missing columns are added; existing columns whose stored type is
    /// narrower than the schema's are widened in place. Columns are never
    /// dropped or narrowed.
    pub fn ensure_table(&mut self, schema: &TableSchema) -> Result<()> {
        if schema.columns().is_empty() {
            return Ok(());
        }

        if !self.ensured.contains_key(&schema.name) {
            let columns: Vec<String> = schema
                .columns()
                .iter()
                .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql_type()))
                .collect();
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quote_ident(&schema.name),
                columns.join(", ")
            );
            debug!("{sql}");
            self.conn.execute_batch(&sql)?;
            let existing = self.read_columns(&schema.name)?;
            self.ensured.insert(schema.name.clone(), existing);
        }

        for column in schema.columns() {
            let wanted = column.column_type.sql_type();
            let known = self
                .ensured
                .get(&schema.name)
                .and_then(|cols| cols.get(&column.name))
                .cloned();
            match known {
                None => {
                    let sql = format!(
                        "ALTER TABLE {} ADD COLUMN {} {wanted}",
                        quote_ident(&schema.name),
                        quote_ident(&column.name)
                    );
                    debug!("{sql}");
                    self.conn.execute_batch(&sql)?;
                }
                Some(stored) if is_widening(&stored, wanted) => {
                    // Type drift within or across runs: widen the stored
                    // column rather than failing the insert.
                    let sql = format!(
                        "ALTER TABLE {} ALTER COLUMN {} SET DATA TYPE {wanted}",
                        quote_ident(&schema.name),
                        quote_ident(&column.name)
                    );
                    debug!("{sql}");
                    self.conn.execute_batch(&sql)?;
                }
                // Equal, or already wider than the schema asks for:
                // values cast into the stored type on insert.
                Some(_) => continue,
            }
            self.ensured
                .entry(schema.name.clone())
                .or_default()
                .insert(column.name.clone(), wanted.to_string());
        }

        Ok(())
    }

    /// Append rows to the schema's table, creating/evolving it first.
    ///
    /// Rows are inserted in input order; cells for columns a row lacks
    /// are left NULL. Returns the number of rows written.
    pub fn append_rows(&mut self, schema: &TableSchema, rows: &[FlatRow]) -> Result<usize> {
        self.ensure_table(schema)?;
        if rows.is_empty() {
            return Ok(0);
        }

        // Rows of one table can carry different column subsets; group by
        // signature so each distinct shape is prepared once.
        let mut written = 0;
        let mut group: Vec<&FlatRow> = Vec::new();
        let mut signature: Vec<&str> = Vec::new();
        for row in rows {
            let columns: Vec<&str> = row.values.iter().map(|(name, _)| name.as_str()).collect();
            if columns != signature && !group.is_empty() {
                written += self.insert_group(&schema.name, &signature, &group)?;
                group.clear();
            }
            signature = columns;
            group.push(row);
        }
        if !group.is_empty() {
            written += self.insert_group(&schema.name, &signature, &group)?;
        }

        debug!("appended {written} row(s) to {}", schema.name);
        Ok(written)
    }

    fn insert_group(&mut self, table: &str, columns: &[&str], rows: &[&FlatRow]) -> Result<usize> {
        if columns.is_empty() {
            return Ok(0);
        }
        let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            column_list.join(", "),
            placeholders.join(", ")
        );

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| Error::materialize(table, e.to_string()))?;
        for row in rows {
            let params: Vec<Value> = row
                .values
                .iter()
                .map(|(_, value)| to_sql_value(value))
                .collect();
            stmt.execute(duckdb::params_from_iter(params))
                .map_err(|e| Error::materialize(table, e.to_string()))?;
        }
        Ok(rows.len())
    }

    /// Rows currently stored in `table`
    pub fn row_count(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Read a whole table back as JSON objects, in storage order
    pub fn fetch_all(&self, table: &str) -> Result<Vec<crate::types::JsonObject>> {
        let column_names: Vec<String> = self
            .read_columns_ordered(table)?
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        let column_list: Vec<String> = column_names.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "SELECT {} FROM {}",
            column_list.join(", "),
            quote_ident(table)
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = crate::types::JsonObject::new();
            for (i, name) in column_names.iter().enumerate() {
                record.insert(name.clone(), from_sql_value(row.get_ref(i)?));
            }
            records.push(record);
        }
        Ok(records)
    }

    /// Summaries of every materialized table
    pub fn table_summaries(&self) -> Result<Vec<TableSummary>> {
        let mut summaries = Vec::new();
        for name in self.list_tables()? {
            let columns = self.read_columns_ordered(&name)?;
            let rows = self.row_count(&name)?;
            summaries.push(TableSummary {
                name,
                rows,
                columns,
            });
        }
        Ok(summaries)
    }

    /// Human-readable schema dump with inferred relationships.
    ///
    /// Columns named `<table>_id` whose referenced table exists are
    /// reported as foreign keys onto that table's `id`.
    pub fn schema_report(&self) -> Result<String> {
        let tables = self.list_tables()?;
        let mut output = Vec::new();

        for table in &tables {
            output.push(format!("Table: {table}"));
            for (column, column_type) in self.read_columns_ordered(table)? {
                output.push(format!("  - {column}: {column_type}"));
            }
            output.push(String::new());
        }

        let mut relations = Vec::new();
        for table in &tables {
            for (column, _) in self.read_columns_ordered(table)? {
                if let Some(referenced) = column.strip_suffix("_id") {
                    if referenced != table && tables.iter().any(|t| t == referenced) {
                        relations.push(format!(
                            "  - Inferred relation: {table}.{column} \u{2192} {referenced}.id"
                        ));
                    }
                }
            }
        }
        if !relations.is_empty() {
            output.push("Inferred Relationships:".to_string());
            output.extend(relations);
        }

        Ok(output.join("\n"))
    }

    /// Names of all materialized tables
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name FROM duckdb_tables() WHERE schema_name = 'main' ORDER BY table_name",
        )?;
        let tables = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(tables)
    }

    fn read_columns(&self, table: &str) -> Result<HashMap<String, String>> {
        Ok(self.read_columns_ordered(table)?.into_iter().collect())
    }

    fn read_columns_ordered(&self, table: &str) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT column_name, data_type FROM duckdb_columns()
             WHERE schema_name = 'main' AND table_name = ? ORDER BY column_index",
        )?;
        let columns = stmt
            .query_map([table], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<(String, String)>, _>>()?;
        Ok(columns)
    }
}

impl std::fmt::Debug for Materializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Materializer")
            .field("tables", &self.ensured.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Whether replacing `stored` with `wanted` widens the column.
///
/// Narrowing never happens: a stored VARCHAR stays VARCHAR even when a
/// later run only observed integers.
fn is_widening(stored: &str, wanted: &str) -> bool {
    fn rank(sql_type: &str) -> u8 {
        match sql_type.to_ascii_uppercase().as_str() {
            "BOOLEAN" => 0,
            "BIGINT" => 1,
            "DOUBLE" => 2,
            "TIMESTAMP" => 1,
            "VARCHAR" => 3,
            _ => 3,
        }
    }
    // BOOLEAN/TIMESTAMP only ever widen to VARCHAR, BIGINT also to DOUBLE.
    let stored_rank = rank(stored);
    let wanted_rank = rank(wanted);
    if wanted_rank <= stored_rank {
        return false;
    }
    match stored.to_ascii_uppercase().as_str() {
        "BOOLEAN" | "TIMESTAMP" => wanted.eq_ignore_ascii_case("VARCHAR"),
        _ => true,
    }
}

/// Quote a SQL identifier
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Convert a JSON cell into a DuckDB parameter
fn to_sql_value(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Boolean(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::BigInt(i)
            } else if let Some(f) = n.as_f64() {
                Value::Double(f)
            } else {
                Value::Text(n.to_string())
            }
        }
        JsonValue::String(s) => Value::Text(s.clone()),
        // Containers are flattened away; anything left goes in serialized.
        other => Value::Text(other.to_string()),
    }
}

/// Convert a DuckDB cell back into JSON
fn from_sql_value(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Boolean(b) => JsonValue::from(b),
        ValueRef::TinyInt(i) => JsonValue::from(i),
        ValueRef::SmallInt(i) => JsonValue::from(i),
        ValueRef::Int(i) => JsonValue::from(i),
        ValueRef::BigInt(i) => JsonValue::from(i),
        ValueRef::UTinyInt(i) => JsonValue::from(i),
        ValueRef::USmallInt(i) => JsonValue::from(i),
        ValueRef::UInt(i) => JsonValue::from(i),
        ValueRef::UBigInt(i) => JsonValue::from(i),
        ValueRef::Float(f) => JsonValue::from(f),
        ValueRef::Double(f) => JsonValue::from(f),
        ValueRef::Text(bytes) => JsonValue::from(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Timestamp(unit, raw) => JsonValue::from(format_timestamp(unit, raw)),
        other => JsonValue::from(format!("{other:?}")),
    }
}

/// Render a raw DuckDB timestamp as ISO 8601 UTC
fn format_timestamp(unit: TimeUnit, raw: i64) -> String {
    let micros = match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    };
    chrono::DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
        .unwrap_or_else(|| micros.to_string())
}
