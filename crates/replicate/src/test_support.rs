//! In-memory source and destination with fault injection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::schema::{CatalogRow, Column, Table};
use crate::core::traits::{BatchRequest, ReadStrategy, SourceReader, TargetWriter};
use crate::core::value::{Batch, KeyValue, SqlValue};
use crate::error::{ReplicateError, Result};

/// A source table whose rows are `(id BIGINT, name VARCHAR)` with ids `1..=rows`.
#[derive(Debug, Clone)]
pub struct MockTable {
    schema: String,
    name: String,
    size: u64,
    row_estimate: u64,
    rows: u64,
    count: Option<u64>,
    null_estimates: bool,
    failing_count: bool,
    failing_load: bool,
    view: bool,
    primary_key: bool,
    last_key: bool,
    name_groups: Option<i64>,
}

impl MockTable {
    pub fn new(schema: &str, name: &str, size: u64, row_estimate: u64) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            size,
            row_estimate,
            rows: 0,
            count: None,
            null_estimates: false,
            failing_count: false,
            failing_load: false,
            view: false,
            primary_key: true,
            last_key: true,
            name_groups: None,
        }
    }

    pub fn with_rows(mut self, rows: u64) -> Self {
        self.rows = rows;
        self
    }

    /// `COUNT(*)` answer, when it should differ from the stored rows.
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_null_estimates(mut self) -> Self {
        self.null_estimates = true;
        self
    }

    pub fn failing_count(mut self) -> Self {
        self.failing_count = true;
        self
    }

    pub fn failing_load(mut self) -> Self {
        self.failing_load = true;
        self
    }

    pub fn as_view(mut self) -> Self {
        self.view = true;
        self
    }

    pub fn without_primary_key(mut self) -> Self {
        self.primary_key = false;
        self
    }

    /// Keyset batches come back without a usable bound.
    pub fn without_last_key(mut self) -> Self {
        self.last_key = false;
        self
    }

    /// `name` cycles through `groups` values, so it repeats across rows.
    pub fn with_repeated_names(mut self, groups: i64) -> Self {
        self.name_groups = Some(groups);
        self
    }

    fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    fn row(&self, id: i64, columns: &[String]) -> Vec<SqlValue> {
        columns
            .iter()
            .map(|c| match c.as_str() {
                "id" => SqlValue::I64(id),
                _ => match self.name_groups {
                    Some(groups) => SqlValue::Text(format!("group-{}", id % groups)),
                    None => SqlValue::Text(format!("row-{}", id)),
                },
            })
            .collect()
    }
}

/// In-memory [`SourceReader`].
#[derive(Default)]
pub struct MockSource {
    tables: Vec<MockTable>,
    malformed: HashSet<String>,
    failing_catalog: HashSet<String>,
    read_delay: Option<Duration>,
    count_calls: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: MockTable) -> Self {
        self.tables.push(table);
        self
    }

    /// Add a catalog row for `schema` that fails to decode.
    pub fn with_malformed_catalog_row(mut self, schema: &str) -> Self {
        self.malformed.insert(schema.to_string());
        self
    }

    pub fn failing_catalog(mut self, schema: &str) -> Self {
        self.failing_catalog.insert(schema.to_string());
        self
    }

    /// Sleep before every batch read.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Tables `COUNT(*)` was issued for, in call order.
    pub fn count_calls(&self) -> Vec<String> {
        self.count_calls.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn table(&self, schema: &str, name: &str) -> Result<&MockTable> {
        self.tables
            .iter()
            .find(|t| t.schema == schema && t.name == name && !t.view)
            .ok_or_else(|| ReplicateError::transfer(format!("{}.{}", schema, name), "no such table"))
    }
}

#[async_trait]
impl SourceReader for MockSource {
    async fn scan_catalog(&self, schema: &str) -> Result<Vec<Result<CatalogRow>>> {
        if self.failing_catalog.contains(schema) {
            return Err(ReplicateError::catalog(schema, "access denied"));
        }

        let mut rows: Vec<Result<CatalogRow>> = self
            .tables
            .iter()
            .filter(|t| t.schema == schema && !t.view)
            .map(|t| {
                Ok(CatalogRow {
                    table_name: t.name.clone(),
                    size_estimate: (!t.null_estimates).then_some(t.size),
                    row_estimate: (!t.null_estimates).then_some(t.row_estimate),
                })
            })
            .collect();

        if self.malformed.contains(schema) {
            rows.push(Err(ReplicateError::row_scan(schema, "invalid TABLE_NAME")));
        }

        Ok(rows)
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64> {
        self.count_calls
            .lock()
            .unwrap()
            .push(format!("{}.{}", schema, table));
        let t = self.table(schema, table)?;
        if t.failing_count {
            return Err(ReplicateError::catalog(schema, "lock wait timeout"));
        }
        Ok(t.count.unwrap_or(t.rows))
    }

    async fn load_table(&self, schema: &str, table: &str) -> Result<Table> {
        let t = self.table(schema, table)?;
        if t.failing_load {
            return Err(ReplicateError::transfer(t.key(), "lost connection"));
        }
        Ok(Table {
            schema: t.schema.clone(),
            name: t.name.clone(),
            columns: vec![
                Column {
                    name: "id".to_string(),
                    data_type: "bigint".to_string(),
                    is_nullable: false,
                    is_unsigned: false,
                    ordinal_pos: 1,
                },
                Column {
                    name: "name".to_string(),
                    data_type: "varchar".to_string(),
                    is_nullable: true,
                    is_unsigned: false,
                    ordinal_pos: 2,
                },
            ],
            primary_key: if t.primary_key {
                vec!["id".to_string()]
            } else {
                Vec::new()
            },
            unique_columns: if t.primary_key {
                vec!["id".to_string()]
            } else {
                Vec::new()
            },
        })
    }

    async fn show_create_table(&self, schema: &str, table: &str) -> Result<String> {
        let t = self.table(schema, table)?;
        Ok(format!(
            "CREATE TABLE `{}` (`id` bigint NOT NULL, `name` varchar(64), PRIMARY KEY (`id`))",
            t.name
        ))
    }

    async fn read_batch(&self, request: &BatchRequest) -> Result<Batch> {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }

        let t = self.table(&request.schema, &request.table)?;
        let all = 1..=t.rows as i64;

        let ids: Vec<i64> = match &request.strategy {
            ReadStrategy::Keyset { .. } => {
                let after = match &request.after {
                    Some(KeyValue::Int(v)) => *v,
                    Some(KeyValue::UInt(v)) => *v as i64,
                    Some(KeyValue::Text(_)) | None => 0,
                };
                all.filter(|id| *id > after).take(request.limit).collect()
            }
            ReadStrategy::OrderedOffset { .. } | ReadStrategy::Unordered => all
                .skip(request.offset as usize)
                .take(request.limit)
                .collect(),
        };

        let last_key = match (&request.strategy, t.last_key) {
            (ReadStrategy::Keyset { .. }, true) => ids.last().map(|id| KeyValue::Int(*id)),
            _ => None,
        };

        let rows = ids.iter().map(|id| t.row(*id, &request.columns)).collect();
        Ok(Batch::new(rows).with_last_key(last_key))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct WriterState {
    existing: HashSet<String>,
    created: Vec<String>,
    truncated: Vec<String>,
    dropped: Vec<String>,
    ensured: Vec<String>,
    batches: HashMap<String, Vec<usize>>,
    ids: HashMap<String, Vec<i64>>,
    failures_left: HashMap<String, u32>,
}

/// In-memory [`TargetWriter`] recording every call.
#[derive(Default)]
pub struct MockWriter {
    state: Mutex<WriterState>,
    always_failing: HashSet<String>,
    failing_databases: HashSet<String>,
    write_delay: Option<Duration>,
    closed: AtomicBool,
}

impl MockWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `times` batch writes to `key` fail.
    pub fn failing_writes(self, key: &str, times: u32) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures_left
            .insert(key.to_string(), times);
        self
    }

    /// Every batch write to `key` fails.
    pub fn always_failing(mut self, key: &str) -> Self {
        self.always_failing.insert(key.to_string());
        self
    }

    pub fn with_existing_table(self, key: &str) -> Self {
        self.state.lock().unwrap().existing.insert(key.to_string());
        self
    }

    pub fn failing_ensure_database(mut self, schema: &str) -> Self {
        self.failing_databases.insert(schema.to_string());
        self
    }

    /// Sleep before every batch write.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub fn rows_written(&self, key: &str) -> u64 {
        self.batch_sizes(key).iter().map(|n| *n as u64).sum()
    }

    pub fn batch_sizes(&self, key: &str) -> Vec<usize> {
        self.state
            .lock()
            .unwrap()
            .batches
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Distinct `id` values written to `key`.
    pub fn distinct_ids(&self, key: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .ids
            .get(key)
            .map(|ids| ids.iter().collect::<HashSet<_>>().len())
            .unwrap_or(0)
    }

    pub fn created_tables(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn truncated_tables(&self) -> Vec<String> {
        self.state.lock().unwrap().truncated.clone()
    }

    pub fn dropped_tables(&self) -> Vec<String> {
        self.state.lock().unwrap().dropped.clone()
    }

    pub fn ensured_databases(&self) -> Vec<String> {
        self.state.lock().unwrap().ensured.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetWriter for MockWriter {
    async fn ensure_database(&self, schema: &str) -> Result<()> {
        if self.failing_databases.contains(schema) {
            return Err(ReplicateError::catalog(schema, "CREATE DATABASE denied"));
        }
        self.state.lock().unwrap().ensured.push(schema.to_string());
        Ok(())
    }

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let key = format!("{}.{}", schema, table);
        Ok(self.state.lock().unwrap().existing.contains(&key))
    }

    async fn create_table(&self, schema: &str, table: &str, _ddl: &str) -> Result<()> {
        let key = format!("{}.{}", schema, table);
        let mut state = self.state.lock().unwrap();
        state.existing.insert(key.clone());
        state.created.push(key);
        Ok(())
    }

    async fn truncate_table(&self, schema: &str, table: &str) -> Result<()> {
        let key = format!("{}.{}", schema, table);
        let mut state = self.state.lock().unwrap();
        state.truncated.push(key.clone());
        state.batches.remove(&key);
        state.ids.remove(&key);
        Ok(())
    }

    async fn drop_table(&self, schema: &str, table: &str) -> Result<()> {
        let key = format!("{}.{}", schema, table);
        let mut state = self.state.lock().unwrap();
        state.existing.remove(&key);
        state.dropped.push(key);
        Ok(())
    }

    async fn write_batch(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        batch: &Batch,
    ) -> Result<u64> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        let key = format!("{}.{}", schema, table);
        if self.always_failing.contains(&key) {
            return Err(ReplicateError::transfer(key, "Deadlock found when trying to get lock"));
        }

        let mut state = self.state.lock().unwrap();
        if let Some(left) = state.failures_left.get_mut(&key) {
            if *left > 0 {
                *left -= 1;
                return Err(ReplicateError::transfer(key, "Lock wait timeout exceeded"));
            }
        }

        let id_idx = columns.iter().position(|c| c == "id");
        let ids: Vec<i64> = batch
            .rows
            .iter()
            .filter_map(|row| match id_idx.and_then(|i| row.get(i)) {
                Some(SqlValue::I64(id)) => Some(*id),
                _ => None,
            })
            .collect();

        state.ids.entry(key.clone()).or_default().extend(ids);
        state.batches.entry(key).or_default().push(batch.len());
        Ok(batch.len() as u64)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
