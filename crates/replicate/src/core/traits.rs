//! The two seams between the replication engine and a database.
//!
//! - [`SourceReader`]: catalog discovery, table metadata and batched row reads
//! - [`TargetWriter`]: destination DDL and bulk inserts
//!
//! Both are object safe and shared across workers as `Arc<dyn ...>`; an
//! implementation must be safe to call from many tasks at once (in practice
//! it wraps a connection pool).

use async_trait::async_trait;

use crate::error::Result;

use super::schema::{CatalogRow, Table};
use super::value::{Batch, KeyValue};

/// How consecutive batches of one table are delimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStrategy {
    /// `WHERE key > ? ORDER BY key LIMIT n` on a single unique column.
    Keyset { column: String },
    /// `ORDER BY k1, k2 LIMIT n OFFSET m` on a unique (possibly composite) key.
    OrderedOffset { columns: Vec<String> },
    /// `LIMIT n OFFSET m` with no ordering. Rows may be seen twice or missed
    /// if the table changes while it is being read.
    Unordered,
}

impl ReadStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            ReadStrategy::Keyset { .. } => "keyset",
            ReadStrategy::OrderedOffset { .. } => "ordered-offset",
            ReadStrategy::Unordered => "unordered",
        }
    }
}

/// One batch read.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Columns to read, in the order they will be inserted.
    pub columns: Vec<String>,
    pub strategy: ReadStrategy,
    /// Exclusive lower bound for keyset reads; `None` reads from the start.
    pub after: Option<KeyValue>,
    /// Rows to skip for offset-based strategies.
    pub offset: u64,
    /// Maximum number of rows to return.
    pub limit: usize,
}

/// Read metadata and rows from the source database.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// List base tables of `schema` with their size and row estimates.
    ///
    /// The outer `Err` means the catalog query itself failed; an inner `Err`
    /// is a single row that could not be decoded.
    async fn scan_catalog(&self, schema: &str) -> Result<Vec<Result<CatalogRow>>>;

    /// Exact `COUNT(*)` of a table.
    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64>;

    /// Load columns and primary key of a table.
    async fn load_table(&self, schema: &str, table: &str) -> Result<Table>;

    /// The source's `CREATE TABLE` statement for a table, unqualified.
    async fn show_create_table(&self, schema: &str, table: &str) -> Result<String>;

    /// Read one batch. Keyset reads fill [`Batch::last_key`] when the last
    /// row's key can be used as the next bound.
    async fn read_batch(&self, request: &BatchRequest) -> Result<Batch>;

    /// Close the underlying pool.
    async fn close(&self);
}

/// Write DDL and rows to the destination database.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// `CREATE DATABASE IF NOT EXISTS`.
    async fn ensure_database(&self, schema: &str) -> Result<()>;

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool>;

    /// Create `schema.table` from the source's unqualified `CREATE TABLE` statement.
    /// An existing table is left alone.
    async fn create_table(&self, schema: &str, table: &str, ddl: &str) -> Result<()>;

    async fn truncate_table(&self, schema: &str, table: &str) -> Result<()>;

    /// `DROP TABLE IF EXISTS`.
    async fn drop_table(&self, schema: &str, table: &str) -> Result<()>;

    /// Insert all rows of a batch atomically: on error none of them persist.
    /// Returns the number of rows written.
    async fn write_batch(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        batch: &Batch,
    ) -> Result<u64>;

    /// Close the underlying pool.
    async fn close(&self);
}
