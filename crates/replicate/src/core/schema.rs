//! Table metadata: catalog-level descriptors and column-level definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One candidate unit of work, as reported by the source catalog.
///
/// Created by the catalog reader and never mutated afterwards. The identity of
/// a descriptor is its `(schema, name)` pair, rendered by [`TableDescriptor::key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    /// On-disk size estimate; may be stale.
    pub estimated_size_bytes: u64,
    /// Row estimate. Zero has been replaced by an exact count where one could be taken.
    pub estimated_row_count: u64,
}

impl TableDescriptor {
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        estimated_size_bytes: u64,
        estimated_row_count: u64,
    ) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            estimated_size_bytes,
            estimated_row_count,
        }
    }

    /// `schema.name`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A raw catalog row before zero-count disambiguation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    pub table_name: String,
    pub size_estimate: Option<u64>,
    pub row_estimate: Option<u64>,
}

/// Column-level table metadata, loaded just before a table is transferred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<Column>,

    /// Primary key column names in key order.
    pub primary_key: Vec<String>,

    /// Columns with a single-column unique index of their own.
    #[serde(default)]
    pub unique_columns: Vec<String>,
}

impl Table {
    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Check if the table has a single-column primary key.
    pub fn has_single_pk(&self) -> bool {
        self.primary_key.len() == 1
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether `name` alone identifies a row: a single-column primary key, or
    /// a `NOT NULL` column with a single-column unique index. A nullable
    /// unique column may hold any number of NULLs.
    pub fn is_unique_column(&self, name: &str) -> bool {
        if self.has_single_pk() && self.primary_key[0] == name {
            return true;
        }
        self.unique_columns.iter().any(|c| c == name)
            && self.column(name).is_some_and(|c| !c.is_nullable)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Data type as reported by `information_schema.COLUMNS.DATA_TYPE`.
    pub data_type: String,

    /// Whether the column is nullable.
    pub is_nullable: bool,

    /// Whether an integer column is declared `UNSIGNED`.
    pub is_unsigned: bool,

    /// Ordinal position in the table.
    pub ordinal_pos: u32,
}

impl Column {
    /// Whether this column's values can serve as a keyset cursor bound.
    pub fn is_keyset_type(&self) -> bool {
        is_integer_type(&self.data_type) || is_text_type(&self.data_type)
    }
}

pub(crate) fn is_integer_type(data_type: &str) -> bool {
    matches!(
        data_type.to_lowercase().as_str(),
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint"
    )
}

pub(crate) fn is_text_type(data_type: &str) -> bool {
    matches!(data_type.to_lowercase().as_str(), "char" | "varchar")
}
