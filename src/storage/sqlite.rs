//! SQLite storage implementation

use std::collections::HashSet;
use std::path::Path;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use crate::model::{EntityDescription, Schema};
use crate::record::Record;
use crate::query::{Predicate, Query};
use crate::uri::ObjectId;
use crate::value::Value;
use crate::{Error, Result};
use super::filter::{compile_count, compile_select, select_columns};
use super::schema::{self, quote, PK_COLUMN};
use super::{StoreDescription, StoreType};

/// SQLite-backed storage for schema-defined records
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        // WAL keeps readers in other processes off the writer's back
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!("Opened {} (journal_mode={})", path.display(), mode);
        Ok(Self { conn })
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Open whatever medium `description` selects
    pub fn open_description(description: &StoreDescription) -> Result<Self> {
        match description.store_type {
            StoreType::Memory => Self::open_in_memory(),
            StoreType::Sqlite => {
                let path = description
                    .path
                    .as_deref()
                    .ok_or_else(|| Error::Config("sqlite store requires a database path".to_string()))?;
                Self::open(path)
            }
        }
    }

    /// Create missing tables and add columns introduced since the file was
    /// last opened
    pub fn initialize_schema(&self, schema: &Schema) -> Result<()> {
        for stmt in schema::all_schema_statements(schema) {
            self.conn.execute(&stmt, [])?;
        }

        for entity in &schema.entities {
            let existing = self.table_columns(&entity.name)?;
            for attribute in &entity.attributes {
                if !existing.contains(&attribute.name) {
                    tracing::info!("Adding column {}.{}", entity.name, attribute.name);
                    self.conn.execute(&schema::add_column_sql(entity, attribute), [])?;
                }
            }
        }
        Ok(())
    }

    fn table_columns(&self, table: &str) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(columns)
    }

    // ========== Record Operations ==========

    /// Insert a record and return its primary key
    pub fn insert(&self, entity: &EntityDescription, record: &Record) -> Result<i64> {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for attribute in &entity.attributes {
            if let Some(value) = record.get(&attribute.name) {
                columns.push(quote(&attribute.name));
                values.push(value);
            }
        }

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote(&entity.name))
        } else {
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(&entity.name),
                columns.join(", "),
                placeholders.join(", ")
            )
        };

        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Overwrite every attribute column of an existing record.
    /// Returns the number of rows changed.
    pub fn update(&self, entity: &EntityDescription, pk: i64, record: &Record) -> Result<usize> {
        if entity.attributes.is_empty() {
            return Ok(self.exists(entity, pk)? as usize);
        }

        let mut assignments = Vec::with_capacity(entity.attributes.len());
        let mut values = Vec::with_capacity(entity.attributes.len() + 1);
        for (i, attribute) in entity.attributes.iter().enumerate() {
            assignments.push(format!("{} = ?{}", quote(&attribute.name), i + 1));
            values.push(record.get(&attribute.name).cloned().unwrap_or(Value::Null));
        }
        values.push(Value::Integer(pk));

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            quote(&entity.name),
            assignments.join(", "),
            PK_COLUMN,
            values.len()
        );
        Ok(self.conn.execute(&sql, params_from_iter(values))?)
    }

    /// Delete a record by primary key. Returns the number of rows removed.
    pub fn delete(&self, entity: &EntityDescription, pk: i64) -> Result<usize> {
        let sql = format!("DELETE FROM {} WHERE {} = ?1", quote(&entity.name), PK_COLUMN);
        Ok(self.conn.execute(&sql, [pk])?)
    }

    fn exists(&self, entity: &EntityDescription, pk: i64) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE {} = ?1", quote(&entity.name), PK_COLUMN);
        let found: Option<i64> = self.conn.query_row(&sql, [pk], |row| row.get(0)).optional()?;
        Ok(found.is_some())
    }

    /// Get a record by primary key
    pub fn get(&self, entity: &EntityDescription, pk: i64) -> Result<Option<Record>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            select_columns(entity),
            quote(&entity.name),
            PK_COLUMN
        );
        self.conn
            .query_row(&sql, [pk], |row| row_to_record(entity, row))
            .optional()
            .map_err(Into::into)
    }

    /// Run a query and return matching records in query order
    pub fn select(&self, entity: &EntityDescription, query: &Query) -> Result<Vec<Record>> {
        let compiled = compile_select(entity, query)?;
        tracing::debug!("select: {} {:?}", compiled.sql, compiled.params);

        let mut stmt = self.conn.prepare(&compiled.sql)?;
        let records = stmt
            .query_map(params_from_iter(compiled.params.iter()), |row| row_to_record(entity, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Count records matching `predicate`
    pub fn count(&self, entity: &EntityDescription, predicate: &Predicate) -> Result<usize> {
        let compiled = compile_count(entity, predicate)?;
        let count: i64 = self.conn.query_row(
            &compiled.sql,
            params_from_iter(compiled.params.iter()),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ========== Pending Context ==========

    /// True while a transaction holds unsaved changes
    pub fn has_pending(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Open the pending transaction if one is not already open
    pub fn begin_pending(&self) -> Result<()> {
        if !self.has_pending() {
            self.conn.execute("BEGIN TRANSACTION", [])?;
        }
        Ok(())
    }

    /// Commit pending changes
    pub fn commit(&self) -> Result<()> {
        self.conn.execute("COMMIT", [])?;
        Ok(())
    }

    /// Discard pending changes
    pub fn rollback(&self) -> Result<()> {
        self.conn.execute("ROLLBACK", [])?;
        Ok(())
    }

    /// Get per-kind record counts
    pub fn stats(&self, schema: &Schema) -> Result<StoreStats> {
        let mut counts = Vec::with_capacity(schema.entities.len());
        for entity in &schema.entities {
            counts.push((entity.name.clone(), self.count(entity, &Predicate::True)?));
        }
        Ok(StoreStats {
            counts,
            pending: self.has_pending(),
        })
    }
}

/// Helper to convert a row to a Record.
///
/// Columns come in `select_columns` order; null attributes are left out.
fn row_to_record(entity: &EntityDescription, row: &rusqlite::Row) -> rusqlite::Result<Record> {
    let pk: i64 = row.get(0)?;
    let mut record = Record::new(entity.name.clone());
    record.id = Some(ObjectId::new(entity.name.clone(), pk));

    for (i, attribute) in entity.attributes.iter().enumerate() {
        let value = Value::from_sql_ref(row.get_ref(i + 1)?, attribute.attribute_type);
        if !value.is_null() {
            record.values.insert(attribute.name.clone(), value);
        }
    }
    Ok(record)
}

/// Record counts per entity kind
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub counts: Vec<(String, usize)>,
    pub pending: bool,
}

impl StoreStats {
    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, c)| c).sum()
    }
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Store Statistics:")?;
        for (kind, count) in &self.counts {
            writeln!(f, "  {}: {}", kind, count)?;
        }
        write!(f, "  Total: {}", self.total())
    }
}
