use crate::config::WarehouseConfig;
use crate::models::CanonicalRow;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use duckdb::{params, Connection};
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

// ── Table reference ───────────────────────────────────────────────────────────

/// Fully-qualified `project.dataset.table`. Dataset and table are validated
/// SQL identifiers; the project is a namespace label only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(project: &str, dataset: &str, table: &str) -> Result<Self> {
        validate_ident(dataset).with_context(|| format!("bad dataset name {:?}", dataset))?;
        validate_ident(table).with_context(|| format!("bad table name {:?}", table))?;
        Ok(Self {
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        })
    }

    pub fn from_config(config: &WarehouseConfig) -> Result<Self> {
        Self::new(&config.project_id, &config.dataset, &config.table)
    }

    /// `"dataset"."table"` for use in SQL.
    fn sql_name(&self) -> String {
        format!("\"{}\".\"{}\"", self.dataset, self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

pub fn validate_ident(s: &str) -> Result<()> {
    let mut chars = s.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !ok {
        anyhow::bail!("identifier must match [A-Za-z_][A-Za-z0-9_]*");
    }
    Ok(())
}

// ── Warehouse trait ───────────────────────────────────────────────────────────

/// "Append rows to named table." Never truncates or replaces.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn append(&self, table: &TableRef, value_column: &str, rows: &[CanonicalRow]) -> Result<usize>;
}

// ── DuckDB ────────────────────────────────────────────────────────────────────

pub struct DuckDbWarehouse {
    conn: Mutex<Connection>,
}

impl DuckDbWarehouse {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("warehouse connection poisoned"))
    }

    /// Create the dataset schema and table on first use.
    fn ensure_table(conn: &Connection, table: &TableRef, value_column: &str) -> Result<()> {
        validate_ident(value_column)
            .with_context(|| format!("bad value column {:?}", value_column))?;

        let ddl = format!(
            r#"
            CREATE SCHEMA IF NOT EXISTS "{schema}";
            CREATE TABLE IF NOT EXISTS {table} (
                date      DATE   NOT NULL,
                "{col}"   DOUBLE NOT NULL
            );
            "#,
            schema = table.dataset,
            table = table.sql_name(),
            col = value_column,
        );
        conn.execute_batch(&ddl)
            .with_context(|| format!("Failed to create {}", table))?;
        Ok(())
    }

    pub fn row_count(&self, table: &TableRef) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare(&format!("SELECT COUNT(*) FROM {}", table.sql_name()))?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn date_range(&self, table: &TableRef) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let conn = self.conn()?;
        let mut s = conn.prepare(&format!(
            "SELECT MIN(date), MAX(date) FROM {}",
            table.sql_name()
        ))?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    pub fn table_exists(&self, table: &TableRef) -> Result<bool> {
        let conn = self.conn()?;
        let mut s = conn.prepare(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
        )?;
        let n: i64 = s.query_row(params![table.dataset, table.table], |r| r.get(0))?;
        Ok(n > 0)
    }
}

#[async_trait]
impl Warehouse for DuckDbWarehouse {
    /// Plain INSERT inside one transaction; no conflict handling, no dedup.
    async fn append(&self, table: &TableRef, value_column: &str, rows: &[CanonicalRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let conn = self.conn()?;
        Self::ensure_table(&conn, table, value_column)?;

        let sql = format!(
            "INSERT INTO {} (date, \"{}\") VALUES (?, ?)",
            table.sql_name(),
            value_column
        );

        let tx = conn.unchecked_transaction()?;
        for row in rows {
            tx.execute(&sql, params![row.date, row.metric_value])
                .with_context(|| format!("insert {} {}", table, row.date))?;
        }
        tx.commit()?;

        debug!("Appended {} rows to {}", rows.len(), table);
        info!("{}: +{} rows", table, rows.len());
        Ok(rows.len())
    }
}
