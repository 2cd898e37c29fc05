//! MySQL SQL text: catalog queries, batch reads, bulk inserts and DDL rewriting.
//!
//! Every identifier is quoted through [`quote_mysql`]; values are always bound
//! as `?` parameters, never interpolated.

use crate::core::identifier::{qualify_mysql, quote_column_list, quote_mysql};
use crate::core::traits::{BatchRequest, ReadStrategy};
use crate::error::{ReplicateError, Result};

/// Maximum number of `?` placeholders MySQL accepts in one prepared statement.
pub const MYSQL_MAX_PLACEHOLDERS: usize = 65_535;

/// Base tables of one schema with their size and row estimates.
///
/// Views are excluded. Both estimates may be NULL (e.g. for some storage
/// engines) and are normalized to zero by the caller.
pub const CATALOG_QUERY: &str = r#"
    SELECT
        CAST(TABLE_NAME AS CHAR(255)) AS table_name,
        CAST(DATA_LENGTH AS UNSIGNED) AS size_estimate,
        CAST(TABLE_ROWS AS UNSIGNED) AS row_estimate
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
    ORDER BY TABLE_NAME
"#;

pub const COLUMNS_QUERY: &str = r#"
    SELECT
        CAST(COLUMN_NAME AS CHAR(255)) AS column_name,
        CAST(DATA_TYPE AS CHAR(64)) AS data_type,
        CAST(IF(IS_NULLABLE = 'YES', 1, 0) AS SIGNED) AS is_nullable,
        CAST(IF(COLUMN_TYPE LIKE '%unsigned%', 1, 0) AS SIGNED) AS is_unsigned,
        CAST(ORDINAL_POSITION AS UNSIGNED) AS ordinal_pos
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
"#;

pub const PRIMARY_KEY_QUERY: &str = r#"
    SELECT CAST(COLUMN_NAME AS CHAR(255)) AS column_name
    FROM information_schema.KEY_COLUMN_USAGE
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'
    ORDER BY ORDINAL_POSITION
"#;

/// Columns that on their own carry a unique index (the primary key included).
pub const UNIQUE_COLUMNS_QUERY: &str = r#"
    SELECT CAST(MIN(COLUMN_NAME) AS CHAR(255)) AS column_name
    FROM information_schema.STATISTICS
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND NON_UNIQUE = 0
    GROUP BY INDEX_NAME
    HAVING COUNT(*) = 1
"#;

pub const TABLE_EXISTS_QUERY: &str = r#"
    SELECT COUNT(*)
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
"#;

/// MySQL dialect helpers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    pub fn new() -> Self {
        Self
    }

    pub fn count_query(&self, schema: &str, table: &str) -> Result<String> {
        Ok(format!("SELECT COUNT(*) FROM {}", qualify_mysql(schema, table)?))
    }

    pub fn show_create_query(&self, schema: &str, table: &str) -> Result<String> {
        Ok(format!("SHOW CREATE TABLE {}", qualify_mysql(schema, table)?))
    }

    pub fn create_database_query(&self, schema: &str) -> Result<String> {
        Ok(format!(
            "CREATE DATABASE IF NOT EXISTS {}",
            quote_mysql(schema)?
        ))
    }

    pub fn truncate_query(&self, schema: &str, table: &str) -> Result<String> {
        Ok(format!("TRUNCATE TABLE {}", qualify_mysql(schema, table)?))
    }

    pub fn drop_query(&self, schema: &str, table: &str) -> Result<String> {
        Ok(format!("DROP TABLE IF EXISTS {}", qualify_mysql(schema, table)?))
    }

    /// Build the SELECT for one batch.
    ///
    /// A keyset read with a bound has exactly one `?` parameter (the bound);
    /// every other read has none.
    pub fn build_batch_query(&self, req: &BatchRequest) -> Result<String> {
        let table = qualify_mysql(&req.schema, &req.table)?;
        let cols = if req.columns.is_empty() {
            "*".to_string()
        } else {
            quote_column_list(&req.columns)?
        };

        let mut sql = format!("SELECT {} FROM {}", cols, table);

        match &req.strategy {
            ReadStrategy::Keyset { column } => {
                let key = quote_mysql(column)?;
                if req.after.is_some() {
                    sql.push_str(&format!(" WHERE {} > ?", key));
                }
                sql.push_str(&format!(" ORDER BY {} LIMIT {}", key, req.limit));
            }
            ReadStrategy::OrderedOffset { columns } => {
                sql.push_str(&format!(
                    " ORDER BY {} LIMIT {} OFFSET {}",
                    quote_column_list(columns)?,
                    req.limit,
                    req.offset
                ));
            }
            ReadStrategy::Unordered => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", req.limit, req.offset));
            }
        }

        Ok(sql)
    }

    /// Rows per INSERT statement so that `rows * columns` stays under the
    /// placeholder limit.
    pub fn rows_per_insert(&self, column_count: usize) -> usize {
        (MYSQL_MAX_PLACEHOLDERS / column_count.max(1)).max(1)
    }

    /// `INSERT INTO t (cols) VALUES (?, ?), (?, ?)` for `row_count` rows.
    pub fn build_insert(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        row_count: usize,
    ) -> Result<String> {
        let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
        let values = vec![placeholders.as_str(); row_count].join(", ");
        Ok(format!(
            "INSERT INTO {} ({}) VALUES {}",
            qualify_mysql(schema, table)?,
            quote_column_list(columns)?,
            values
        ))
    }

    /// Rewrite the output of `SHOW CREATE TABLE` into a schema-qualified
    /// `CREATE TABLE IF NOT EXISTS` for the destination.
    pub fn qualify_create_statement(&self, ddl: &str, schema: &str, table: &str) -> Result<String> {
        let ddl = ddl.trim();
        let quoted = quote_mysql(table)?;

        let rest = strip_prefix_ignore_case(ddl, "CREATE TABLE ")
            .map(|r| {
                strip_prefix_ignore_case(r.trim_start(), "IF NOT EXISTS ")
                    .unwrap_or(r)
                    .trim_start()
            })
            .and_then(|r| r.strip_prefix(quoted.as_str()))
            .ok_or_else(|| {
                ReplicateError::transfer(
                    format!("{}.{}", schema, table),
                    "unexpected SHOW CREATE TABLE output",
                )
            })?;

        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {}{}",
            qualify_mysql(schema, table)?,
            rest
        ))
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}
