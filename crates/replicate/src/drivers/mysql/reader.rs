//! MySQL source reader.
//!
//! Uses SQLx for connection pooling and async query execution. Row values are
//! decoded by the wire type reported for each result column.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::types::{MySqlTime, MySqlTimeSign};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column as _, Row, TypeInfo, ValueRef};
use tracing::{debug, info};

use super::dialect::{
    MysqlDialect, CATALOG_QUERY, COLUMNS_QUERY, PRIMARY_KEY_QUERY, UNIQUE_COLUMNS_QUERY,
};
use crate::config::ConnectionDescriptor;
use crate::core::schema::{CatalogRow, Column, Table};
use crate::core::traits::{BatchRequest, ReadStrategy, SourceReader};
use crate::core::value::{Batch, KeyValue, SqlValue, TimeValue};
use crate::error::{ReplicateError, Result};

/// Connection pool acquire timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// MySQL source reader.
pub struct MysqlReader {
    pool: MySqlPool,
    dialect: MysqlDialect,
}

impl MysqlReader {
    /// Open a pool to the source server and check that it answers.
    ///
    /// No default database is selected; every statement is schema-qualified.
    pub async fn connect(desc: &ConnectionDescriptor, max_conns: usize) -> Result<Self> {
        let mut options = MySqlConnectOptions::new()
            .host(&desc.host)
            .port(desc.port)
            .username(&desc.user)
            .charset("utf8mb4")
            .ssl_mode(MySqlSslMode::Preferred);
        if let Some(password) = &desc.password {
            options = options.password(password);
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns.max(1) as u32)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| ReplicateError::connection(desc.address(), e))?;

        if let Err(e) = sqlx::query("SELECT 1").fetch_one(&pool).await {
            pool.close().await;
            return Err(ReplicateError::connection(desc.address(), e));
        }

        info!("Connected to MySQL source: {}", desc);

        Ok(Self {
            pool,
            dialect: MysqlDialect::new(),
        })
    }

    async fn load_columns(&self, schema: &str, table: &str) -> Result<Vec<Column>> {
        let rows: Vec<MySqlRow> = sqlx::query(COLUMNS_QUERY)
            .bind(schema)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| table_error(schema, table, "loading columns", e))?;

        rows.iter()
            .map(|row| -> std::result::Result<Column, sqlx::Error> {
                Ok(Column {
                    name: row.try_get("column_name")?,
                    data_type: row.try_get("data_type")?,
                    is_nullable: row.try_get::<i64, _>("is_nullable")? == 1,
                    is_unsigned: row.try_get::<i64, _>("is_unsigned")? == 1,
                    ordinal_pos: row.try_get::<u64, _>("ordinal_pos")? as u32,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| decode_error(schema, table, "decoding columns", e))
    }

    async fn load_primary_key(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let rows: Vec<MySqlRow> = sqlx::query(PRIMARY_KEY_QUERY)
            .bind(schema)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| table_error(schema, table, "loading primary key", e))?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("column_name"))
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| decode_error(schema, table, "decoding primary key", e))
    }

    async fn load_unique_columns(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let rows: Vec<MySqlRow> = sqlx::query(UNIQUE_COLUMNS_QUERY)
            .bind(schema)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| table_error(schema, table, "loading unique indexes", e))?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("column_name"))
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| decode_error(schema, table, "decoding unique indexes", e))
    }

    /// Convert a result row to owned values.
    ///
    /// A value that cannot be decoded is an error, never a silent NULL.
    fn row_to_values(row: &MySqlRow) -> std::result::Result<Vec<SqlValue>, String> {
        let mut values = Vec::with_capacity(row.columns().len());

        for (i, col) in row.columns().iter().enumerate() {
            let is_null = row.try_get_raw(i).map(|r| r.is_null()).unwrap_or(false);
            if is_null {
                values.push(SqlValue::Null);
                continue;
            }

            let type_name = col.type_info().name();
            let value = decode_value(row, i, type_name)
                .map_err(|e| format!("column '{}' ({}): {}", col.name(), type_name, e))?;
            values.push(value);
        }

        Ok(values)
    }
}

fn decode_value(
    row: &MySqlRow,
    i: usize,
    type_name: &str,
) -> std::result::Result<SqlValue, sqlx::Error> {
    let value = match type_name {
        "BOOLEAN" => SqlValue::Bool(row.try_get::<bool, _>(i)?),

        "TINYINT" => SqlValue::I64(row.try_get::<i8, _>(i)? as i64),
        "SMALLINT" => SqlValue::I64(row.try_get::<i16, _>(i)? as i64),
        "MEDIUMINT" | "INT" => SqlValue::I64(row.try_get::<i32, _>(i)? as i64),
        "BIGINT" => SqlValue::I64(row.try_get::<i64, _>(i)?),
        "TINYINT UNSIGNED" => SqlValue::I64(row.try_get::<u8, _>(i)? as i64),
        "SMALLINT UNSIGNED" | "YEAR" => SqlValue::I64(row.try_get::<u16, _>(i)? as i64),
        "MEDIUMINT UNSIGNED" | "INT UNSIGNED" => SqlValue::I64(row.try_get::<u32, _>(i)? as i64),
        "BIGINT UNSIGNED" | "BIT" => SqlValue::U64(row.try_get::<u64, _>(i)?),

        "FLOAT" => SqlValue::F32(row.try_get::<f32, _>(i)?),
        "DOUBLE" => SqlValue::F64(row.try_get::<f64, _>(i)?),
        "DECIMAL" => SqlValue::Decimal(row.try_get::<rust_decimal::Decimal, _>(i)?),

        "DATE" => SqlValue::Date(row.try_get::<chrono::NaiveDate, _>(i)?),
        "TIME" => SqlValue::Time(time_value(&row.try_get::<MySqlTime, _>(i)?)),
        "DATETIME" | "TIMESTAMP" => SqlValue::DateTime(row.try_get::<chrono::NaiveDateTime, _>(i)?),

        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB"
        | "GEOMETRY" => SqlValue::Bytes(row.try_get::<Vec<u8>, _>(i)?),

        // CHAR, VARCHAR, TEXT variants, ENUM, SET, JSON
        _ => match row.try_get::<String, _>(i) {
            Ok(s) => SqlValue::Text(s),
            Err(_) => SqlValue::Bytes(row.try_get::<Vec<u8>, _>(i)?),
        },
    };
    Ok(value)
}

/// TIME keeps its sign and may run past 24 hours.
fn time_value(t: &MySqlTime) -> TimeValue {
    TimeValue {
        negative: matches!(t.sign(), MySqlTimeSign::Negative),
        hours: t.hours(),
        minutes: t.minutes(),
        seconds: t.seconds(),
        microseconds: t.microseconds(),
    }
}

fn scan_catalog_row(row: &MySqlRow) -> std::result::Result<CatalogRow, sqlx::Error> {
    Ok(CatalogRow {
        table_name: row.try_get("table_name")?,
        size_estimate: row.try_get("size_estimate")?,
        row_estimate: row.try_get("row_estimate")?,
    })
}

fn table_error(
    schema: &str,
    table: &str,
    action: &str,
    e: impl std::fmt::Display,
) -> ReplicateError {
    ReplicateError::transfer(
        format!("{}.{}", schema, table),
        format!("{}: {}", action, e),
    )
}

fn decode_error(
    schema: &str,
    table: &str,
    action: &str,
    e: impl std::fmt::Display,
) -> ReplicateError {
    ReplicateError::decode(
        format!("{}.{}", schema, table),
        format!("{}: {}", action, e),
    )
}

#[async_trait]
impl SourceReader for MysqlReader {
    async fn scan_catalog(&self, schema: &str) -> Result<Vec<Result<CatalogRow>>> {
        let rows: Vec<MySqlRow> = sqlx::query(CATALOG_QUERY)
            .bind(schema)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ReplicateError::catalog(schema, e))?;

        debug!("Catalog for {} returned {} rows", schema, rows.len());

        Ok(rows
            .iter()
            .map(|row| scan_catalog_row(row).map_err(|e| ReplicateError::row_scan(schema, e)))
            .collect())
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64> {
        let sql = self.dialect.count_query(schema, table)?;
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| table_error(schema, table, "counting rows", e))?;
        Ok(count.max(0) as u64)
    }

    async fn load_table(&self, schema: &str, table: &str) -> Result<Table> {
        let columns = self.load_columns(schema, table).await?;
        if columns.is_empty() {
            return Err(table_error(schema, table, "loading columns", "table has no columns"));
        }
        let primary_key = self.load_primary_key(schema, table).await?;
        let unique_columns = self.load_unique_columns(schema, table).await?;

        Ok(Table {
            schema: schema.to_string(),
            name: table.to_string(),
            columns,
            primary_key,
            unique_columns,
        })
    }

    async fn show_create_table(&self, schema: &str, table: &str) -> Result<String> {
        let sql = self.dialect.show_create_query(schema, table)?;
        let row: MySqlRow = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| table_error(schema, table, "SHOW CREATE TABLE", e))?;

        row.try_get::<String, _>(1)
            .map_err(|e| decode_error(schema, table, "decoding SHOW CREATE TABLE", e))
    }

    async fn read_batch(&self, request: &BatchRequest) -> Result<Batch> {
        let sql = self.dialect.build_batch_query(request)?;

        let mut query = sqlx::query(&sql);
        if let (ReadStrategy::Keyset { .. }, Some(after)) = (&request.strategy, &request.after) {
            query = match after {
                KeyValue::Int(v) => query.bind(*v),
                KeyValue::UInt(v) => query.bind(*v),
                KeyValue::Text(v) => query.bind(v.clone()),
            };
        }

        let rows: Vec<MySqlRow> = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| table_error(&request.schema, &request.table, "reading rows", e))?;

        let batch_rows = rows
            .iter()
            .map(Self::row_to_values)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| decode_error(&request.schema, &request.table, "decoding row", e))?;

        let last_key = match &request.strategy {
            ReadStrategy::Keyset { column } => request
                .columns
                .iter()
                .position(|c| c == column)
                .and_then(|idx| batch_rows.last().and_then(|row| row.get(idx)))
                .and_then(KeyValue::from_sql),
            _ => None,
        };

        Ok(Batch::new(batch_rows).with_last_key(last_key))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
