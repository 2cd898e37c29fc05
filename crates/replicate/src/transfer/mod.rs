//! Single-table transfer: destination preparation and batched copy.
//!
//! A [`TableTransfer`] copies one admitted table:
//! - `Counting`: load columns, resolve the read strategy, count rows and
//!   prepare the destination table
//! - `Transferring`: read a batch, insert it, advance progress, repeat
//!   until a short batch
//!
//! Every source and destination call is wrapped in the [`RetryPolicy`]. A
//! table that runs out of retries ends `Failed` with the rows copied so far
//! left in place.

mod retry;
mod strategy;

pub use retry::RetryPolicy;
pub use strategy::resolve_strategy;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admission::Admission;
use crate::config::{OrderingKey, ReplicationConfig, TargetMode};
use crate::core::schema::TableDescriptor;
use crate::core::traits::{BatchRequest, ReadStrategy, SourceReader, TargetWriter};
use crate::core::value::KeyValue;
use crate::error::{ErrorKind, ReplicateError, Result};
use crate::progress::{Phase, ProgressReporter, TransferProgress};

/// Per-table transfer settings.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Rows per batch read and insert.
    pub batch_size: usize,
    pub target_mode: TargetMode,
    pub retry: RetryPolicy,
    /// Ordering overrides keyed by `schema.table`.
    pub ordering: BTreeMap<String, OrderingKey>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::from_config(&ReplicationConfig::default())
    }
}

impl TransferConfig {
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            target_mode: config.target_mode,
            retry: RetryPolicy::from_config(config),
            ordering: config.ordering.clone(),
        }
    }
}

/// Final state of one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableOutcome {
    /// `schema.table`.
    pub key: String,
    pub phase: Phase,
    /// Read strategy used, once resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<&'static str>,
    pub rows_copied: u64,
    pub total_rows: u64,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<Admission>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl TableOutcome {
    fn from_progress(progress: &TransferProgress, duration: Duration) -> Self {
        Self {
            key: progress.table_key.clone(),
            phase: progress.phase,
            strategy: None,
            rows_copied: progress.completed_units,
            total_rows: progress.total_units,
            retries: progress.retries,
            skip_reason: None,
            error_kind: progress.last_error,
            error: None,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// A table the admission filter turned away.
    pub fn skipped(key: impl Into<String>, reason: Admission) -> Self {
        Self {
            key: key.into(),
            phase: Phase::Skipped,
            strategy: None,
            rows_copied: 0,
            total_rows: 0,
            retries: 0,
            skip_reason: Some(reason),
            error_kind: None,
            error: None,
            duration_ms: 0,
        }
    }

    /// A table that failed without being transferred by a worker.
    pub fn failed(key: impl Into<String>, err: &ReplicateError) -> Self {
        Self {
            key: key.into(),
            phase: Phase::Failed,
            strategy: None,
            rows_copied: 0,
            total_rows: 0,
            retries: 0,
            skip_reason: None,
            error_kind: Some(err.kind()),
            error: Some(err.to_string()),
            duration_ms: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.phase == Phase::Failed
    }
}

/// Cursor over a table's batches.
struct Cursor {
    strategy: ReadStrategy,
    after: Option<KeyValue>,
    rows_read: u64,
}

impl Cursor {
    fn new(strategy: ReadStrategy) -> Self {
        Self {
            strategy,
            after: None,
            rows_read: 0,
        }
    }

    /// Move past a batch of `len` rows.
    fn advance(&mut self, table_key: &str, len: usize, last_key: Option<KeyValue>, full: bool) {
        self.rows_read += len as u64;
        if let ReadStrategy::Keyset { column } = &self.strategy {
            match last_key {
                Some(key) => self.after = Some(key),
                None if full => {
                    // Key value not usable as a bound (NULL or undecodable);
                    // keep the same order and page by offset from here.
                    warn!(
                        "{}: keyset bound on {} unavailable after {} rows, continuing with ordered offset",
                        table_key, column, self.rows_read
                    );
                    self.strategy = ReadStrategy::OrderedOffset {
                        columns: vec![column.clone()],
                    };
                    self.after = None;
                }
                None => {}
            }
        }
    }
}

/// Copies one table from source to destination.
#[derive(Clone)]
pub struct TableTransfer {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    config: Arc<TransferConfig>,
}

impl TableTransfer {
    pub fn new(
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        config: Arc<TransferConfig>,
    ) -> Self {
        Self {
            source,
            target,
            config,
        }
    }

    /// Transfer `table` and drive `reporter` to a terminal phase.
    ///
    /// Never returns an error: failures end up in the outcome.
    pub async fn run(
        &self,
        table: &TableDescriptor,
        reporter: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> TableOutcome {
        let start = Instant::now();
        let key = table.key();
        let mut strategy = None;

        let result = self.execute(table, reporter, cancel, &mut strategy).await;

        let message = match result {
            Ok(()) => {
                reporter.done();
                let elapsed = start.elapsed();
                let copied = reporter.progress().completed_units;
                let rows_per_sec = if elapsed.as_secs_f64() > 0.0 {
                    (copied as f64 / elapsed.as_secs_f64()) as u64
                } else {
                    0
                };
                info!(
                    "{}: transferred {} rows in {:?} ({} rows/sec)",
                    key, copied, elapsed, rows_per_sec
                );
                None
            }
            Err(e) => {
                if e.kind() == ErrorKind::Cancelled {
                    info!(
                        "{}: cancelled after {} rows",
                        key,
                        reporter.progress().completed_units
                    );
                } else {
                    warn!(
                        "{}: failed after {} of {} rows: {}",
                        key,
                        reporter.progress().completed_units,
                        reporter.progress().total_units,
                        e
                    );
                }
                reporter.failed(e.kind());
                Some(e.to_string())
            }
        };

        let mut outcome = TableOutcome::from_progress(reporter.progress(), start.elapsed());
        outcome.strategy = strategy;
        outcome.error = message;
        outcome
    }

    async fn execute(
        &self,
        table: &TableDescriptor,
        reporter: &mut ProgressReporter,
        cancel: &CancellationToken,
        strategy_label: &mut Option<&'static str>,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ReplicateError::Cancelled);
        }

        let key = table.key();
        let schema = table.schema.as_str();
        let name = table.name.as_str();
        let retry = self.config.retry;

        reporter.counting();

        let meta = retry
            .run(&format!("{}: load table", key), cancel, || reporter.retried(), || {
                self.source.load_table(schema, name)
            })
            .await?;

        let strategy = resolve_strategy(&meta, self.config.ordering.get(&key))?;
        *strategy_label = Some(strategy.label());

        let total = retry
            .run(&format!("{}: count", key), cancel, || reporter.retried(), || {
                self.source.count_rows(schema, name)
            })
            .await?;

        retry
            .run(&format!("{}: prepare", key), cancel, || reporter.retried(), || {
                self.prepare_destination(schema, name)
            })
            .await?;

        info!(
            "Starting transfer for {} ({} rows, strategy: {}, mode: {})",
            key,
            total,
            strategy.label(),
            self.config.target_mode
        );
        reporter.transferring(total);

        let columns = meta.column_names();
        let batch_size = self.config.batch_size;
        let mut cursor = Cursor::new(strategy);

        loop {
            if cancel.is_cancelled() {
                return Err(ReplicateError::Cancelled);
            }

            let request = BatchRequest {
                schema: table.schema.clone(),
                table: table.name.clone(),
                columns: columns.clone(),
                strategy: cursor.strategy.clone(),
                after: cursor.after.clone(),
                offset: cursor.rows_read,
                limit: batch_size,
            };

            let batch = retry
                .run(&format!("{}: read batch", key), cancel, || reporter.retried(), || {
                    self.source.read_batch(&request)
                })
                .await?;

            if batch.is_empty() {
                break;
            }

            let written = retry
                .run(&format!("{}: write batch", key), cancel, || reporter.retried(), || {
                    self.target.write_batch(schema, name, &columns, &batch)
                })
                .await?;

            reporter.advance(written);

            let len = batch.len();
            let full = len >= batch_size;
            debug!("{}: batch of {} rows ({} read)", key, len, cursor.rows_read + len as u64);
            cursor.advance(&key, len, batch.last_key, full);

            if !full {
                break;
            }
        }

        Ok(())
    }

    /// Make the destination table exist and be empty.
    async fn prepare_destination(&self, schema: &str, table: &str) -> Result<()> {
        match self.config.target_mode {
            TargetMode::Truncate => {
                if self.target.table_exists(schema, table).await? {
                    self.target.truncate_table(schema, table).await
                } else {
                    let ddl = self.source.show_create_table(schema, table).await?;
                    self.target.create_table(schema, table, &ddl).await
                }
            }
            TargetMode::DropRecreate => {
                self.target.drop_table(schema, table).await?;
                let ddl = self.source.show_create_table(schema, table).await?;
                self.target.create_table(schema, table, &ddl).await
            }
        }
    }
}
