//! Replication orchestrator - discovery, queueing and the worker pool.
//!
//! One run:
//! 1. For each schema, list its tables and create the destination database
//!    if any table will be copied.
//! 2. Push every discovered table onto a bounded queue (`2 × workers`),
//!    announcing it as `Queued` first. The producer waits when the queue is
//!    full.
//! 3. Workers take one table at a time, skip it or transfer it, and report
//!    its outcome.
//! 4. Close the queue, wait for the workers, and give every discovered table
//!    that has no outcome yet a `Failed(Cancelled)` one.

mod workers;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::admission::{Admission, AdmissionPolicy};
use crate::catalog::CatalogReader;
use crate::config::{Config, ReplicationConfig};
use crate::core::schema::TableDescriptor;
use crate::core::traits::{SourceReader, TargetWriter};
use crate::drivers::{MysqlReader, MysqlWriter};
use crate::error::{
    ReplicateError, Result, EXIT_CANCELLED, EXIT_CATALOG_ERROR, EXIT_SUCCESS, EXIT_TABLES_FAILED,
};
use crate::progress::{NoopSink, Phase, ProgressReporter, ProgressSink};
use crate::transfer::{TableOutcome, TableTransfer, TransferConfig};

use workers::{spawn_workers, WorkerContext};

/// Replication orchestrator.
pub struct Orchestrator {
    schemas: Vec<String>,
    settings: ReplicationConfig,
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    progress: Arc<dyn ProgressSink>,
}

/// A schema whose tables could not be listed or whose destination database
/// could not be created.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogFailure {
    pub schema: String,
    pub error: String,
}

/// A table as seen by a dry run.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedTable {
    pub key: String,
    pub estimated_size_bytes: u64,
    pub estimated_row_count: u64,
    pub admission: Admission,
}

/// How a run ended, most severe condition first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    #[serde(rename = "completed")]
    Success,
    #[serde(rename = "failed")]
    TablesFailed,
    #[serde(rename = "catalog_failed")]
    CatalogFailed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl RunOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            RunOutcome::Success => EXIT_SUCCESS,
            RunOutcome::TablesFailed => EXIT_TABLES_FAILED,
            RunOutcome::CatalogFailed => EXIT_CATALOG_ERROR,
            RunOutcome::Cancelled => EXIT_CANCELLED,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Success => "completed",
            RunOutcome::TablesFailed => "failed",
            RunOutcome::CatalogFailed => "catalog_failed",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}

/// Result of a replication run.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: RunOutcome,

    /// Discovery and admission only.
    pub dry_run: bool,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    /// Tables discovered across all schemas.
    pub tables_total: usize,
    pub tables_done: usize,
    pub tables_skipped: usize,
    pub tables_failed: usize,

    /// Rows written to the destination.
    pub rows_transferred: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    /// Whether the run was cancelled.
    pub cancelled: bool,

    pub catalog_failures: Vec<CatalogFailure>,

    /// Per-table outcomes, ordered by key.
    pub tables: Vec<TableOutcome>,

    /// Dry run only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plan: Vec<PlannedTable>,
}

impl ReplicationResult {
    fn new(run_id: String, started_at: DateTime<Utc>, start: Instant) -> Self {
        Self {
            run_id,
            status: RunOutcome::Success,
            dry_run: false,
            started_at,
            completed_at: Utc::now(),
            duration_seconds: start.elapsed().as_secs_f64(),
            tables_total: 0,
            tables_done: 0,
            tables_skipped: 0,
            tables_failed: 0,
            rows_transferred: 0,
            rows_per_second: 0,
            cancelled: false,
            catalog_failures: Vec::new(),
            tables: Vec::new(),
            plan: Vec::new(),
        }
    }

    fn with_outcomes(mut self, mut outcomes: Vec<TableOutcome>) -> Self {
        outcomes.sort_by(|a, b| a.key.cmp(&b.key));

        self.tables_total = outcomes.len();
        self.tables_done = outcomes.iter().filter(|o| o.phase == Phase::Done).count();
        self.tables_skipped = outcomes.iter().filter(|o| o.phase == Phase::Skipped).count();
        self.tables_failed = outcomes.iter().filter(|o| o.is_failed()).count();
        self.rows_transferred = outcomes.iter().map(|o| o.rows_copied).sum();
        self.rows_per_second = if self.duration_seconds > 0.0 {
            (self.rows_transferred as f64 / self.duration_seconds) as u64
        } else {
            0
        };
        self.tables = outcomes;
        self
    }

    fn finish(mut self) -> Self {
        self.status = self.outcome();
        self
    }

    /// Failed tables only.
    pub fn failed_tables(&self) -> impl Iterator<Item = &TableOutcome> {
        self.tables.iter().filter(|o| o.is_failed())
    }

    /// Classify the run. Cancellation wins, then catalog failures, then
    /// failed tables.
    pub fn outcome(&self) -> RunOutcome {
        if self.cancelled {
            RunOutcome::Cancelled
        } else if !self.catalog_failures.is_empty() {
            RunOutcome::CatalogFailed
        } else if self.tables_failed > 0 {
            RunOutcome::TablesFailed
        } else {
            RunOutcome::Success
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.outcome().exit_code()
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Orchestrator {
    /// Open both pools. If the destination cannot be reached the source pool
    /// is closed before returning.
    pub async fn connect(config: Config) -> Result<Self> {
        let settings = config.replication.clone();

        let source =
            MysqlReader::connect(&config.source, settings.get_max_source_connections()).await?;

        let target =
            match MysqlWriter::connect(&config.target, settings.get_max_target_connections()).await
            {
                Ok(target) => target,
                Err(e) => {
                    source.close().await;
                    return Err(e);
                }
            };

        Ok(Self::from_parts(
            config.schemas,
            settings,
            Arc::new(source),
            Arc::new(target),
        ))
    }

    /// Build an orchestrator over any reader and writer.
    pub fn from_parts(
        schemas: Vec<String>,
        settings: ReplicationConfig,
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
    ) -> Self {
        Self {
            schemas,
            settings,
            source,
            target,
            progress: Arc::new(NoopSink),
        }
    }

    /// Send progress events to `sink`.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Discover and evaluate tables without copying anything.
    pub async fn plan(self, cancel: CancellationToken) -> ReplicationResult {
        let start = Instant::now();
        let mut result = ReplicationResult::new(uuid::Uuid::new_v4().to_string(), Utc::now(), start);
        result.dry_run = true;

        let catalog = CatalogReader::new(self.source.clone());
        let admission = AdmissionPolicy::new(self.settings.max_size_bytes);
        let mut seen = HashSet::new();

        for schema in &self.schemas {
            if cancel.is_cancelled() {
                break;
            }
            match catalog.list_tables(schema).await {
                Ok(tables) => {
                    for table in tables {
                        let key = table.key();
                        if !seen.insert(key.clone()) {
                            continue;
                        }
                        result.plan.push(PlannedTable {
                            key,
                            estimated_size_bytes: table.estimated_size_bytes,
                            estimated_row_count: table.estimated_row_count,
                            admission: admission.evaluate(&table),
                        });
                    }
                }
                Err(e) => {
                    error!("Catalog scan of {} failed: {}", schema, e);
                    result.catalog_failures.push(CatalogFailure {
                        schema: schema.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.close().await;

        result.plan.sort_by(|a, b| a.key.cmp(&b.key));
        result.tables_total = result.plan.len();
        result.tables_skipped = result
            .plan
            .iter()
            .filter(|p| !p.admission.is_admitted())
            .count();
        result.cancelled = cancel.is_cancelled();
        result.completed_at = Utc::now();
        result.duration_seconds = start.elapsed().as_secs_f64();

        info!(
            "Plan: {} tables, {} to copy, {} skipped",
            result.tables_total,
            result.tables_total - result.tables_skipped,
            result.tables_skipped
        );

        result.finish()
    }

    /// Run the replication.
    pub async fn run(self, cancel: CancellationToken) -> ReplicationResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let workers = self.settings.workers.max(1);

        info!(
            "Starting replication run {}: {} schemas, {} workers, batch size {}",
            run_id,
            self.schemas.len(),
            workers,
            self.settings.batch_size
        );

        let (queue_tx, queue_rx) = async_channel::bounded::<TableDescriptor>(2 * workers);
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();

        let ctx = Arc::new(WorkerContext {
            transfer: TableTransfer::new(
                self.source.clone(),
                self.target.clone(),
                Arc::new(TransferConfig::from_config(&self.settings)),
            ),
            admission: AdmissionPolicy::new(self.settings.max_size_bytes),
            progress: self.progress.clone(),
            cancel: cancel.clone(),
        });
        let handles = spawn_workers(workers, queue_rx.clone(), outcome_tx.clone(), ctx);
        drop(outcome_tx);

        let mut discovered: HashSet<String> = HashSet::new();
        let mut outcomes: Vec<TableOutcome> = Vec::new();
        let mut catalog_failures = Vec::new();

        self.produce(
            &queue_tx,
            &cancel,
            &mut discovered,
            &mut outcomes,
            &mut catalog_failures,
        )
        .await;

        // Closing is the only end-of-work signal the workers get.
        queue_tx.close();

        self.join_workers(handles, &cancel).await;

        while let Ok(outcome) = outcome_rx.try_recv() {
            outcomes.push(outcome);
        }

        let leftover = queue_rx.len();
        if leftover > 0 {
            info!("{} queued tables were never started", leftover);
        }

        let reported: HashSet<&str> = outcomes.iter().map(|o| o.key.as_str()).collect();
        let mut unreported: Vec<String> = discovered
            .iter()
            .filter(|k| !reported.contains(k.as_str()))
            .cloned()
            .collect();
        unreported.sort();
        for key in unreported {
            outcomes.push(self.unreported(key, &cancel));
        }

        self.close().await;

        let mut result = ReplicationResult::new(run_id, started_at, start).with_outcomes(outcomes);
        result.catalog_failures = catalog_failures;
        result.cancelled = cancel.is_cancelled();
        let result = result.finish();

        info!(
            "Replication {}: {} tables ({} done, {} skipped, {} failed), {} rows in {:.1}s ({} rows/s)",
            result.status.as_str(),
            result.tables_total,
            result.tables_done,
            result.tables_skipped,
            result.tables_failed,
            result.rows_transferred,
            result.duration_seconds,
            result.rows_per_second
        );

        result
    }

    /// Discover tables schema by schema and feed them to the queue.
    async fn produce(
        &self,
        queue: &async_channel::Sender<TableDescriptor>,
        cancel: &CancellationToken,
        discovered: &mut HashSet<String>,
        outcomes: &mut Vec<TableOutcome>,
        catalog_failures: &mut Vec<CatalogFailure>,
    ) {
        let catalog = CatalogReader::new(self.source.clone());
        let admission = AdmissionPolicy::new(self.settings.max_size_bytes);

        for schema in &self.schemas {
            if cancel.is_cancelled() {
                info!("Cancellation requested, not listing remaining schemas");
                return;
            }

            let listed = tokio::select! {
                _ = cancel.cancelled() => return,
                listed = catalog.list_tables(schema) => listed,
            };

            let tables = match listed {
                Ok(tables) => tables,
                Err(e) => {
                    error!("Catalog scan of {} failed: {}", schema, e);
                    catalog_failures.push(CatalogFailure {
                        schema: schema.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let tables: Vec<TableDescriptor> = tables
                .into_iter()
                .filter(|t| {
                    let fresh = discovered.insert(t.key());
                    if !fresh {
                        warn!("{}: listed more than once, ignoring duplicate", t.key());
                    }
                    fresh
                })
                .collect();

            info!("{}: found {} tables", schema, tables.len());

            if tables.iter().any(|t| admission.admits(t)) {
                if let Err(e) = self.target.ensure_database(schema).await {
                    error!("Could not create destination database {}: {}", schema, e);
                    for table in &tables {
                        outcomes.push(self.fail_unqueued(table.key(), &e));
                    }
                    catalog_failures.push(CatalogFailure {
                        schema: schema.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            }

            for table in tables {
                ProgressReporter::new(table.key(), self.progress.clone()).announce();

                let sent = tokio::select! {
                    _ = cancel.cancelled() => false,
                    sent = queue.send(table) => sent.is_ok(),
                };
                if !sent {
                    info!("Cancellation requested, stopping new transfers");
                    return;
                }
            }
        }
    }

    /// Wait for every worker. Once cancelled, wait at most the shutdown
    /// timeout, then abort whatever is still running.
    async fn join_workers(&self, handles: Vec<tokio::task::JoinHandle<()>>, cancel: &CancellationToken) {
        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let mut drain = Box::pin(futures::future::join_all(handles));
        let grace = self.settings.shutdown_timeout();

        let joined = tokio::select! {
            joined = &mut drain => joined,
            _ = cancel.cancelled() => {
                info!("Cancellation requested, waiting up to {:?} for in-flight tables", grace);
                match tokio::time::timeout(grace, &mut drain).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        let busy = abort_handles.iter().filter(|h| !h.is_finished()).count();
                        warn!("{} workers still busy after {:?}, aborting", busy, grace);
                        for handle in &abort_handles {
                            handle.abort();
                        }
                        drain.await
                    }
                }
            }
        };

        for result in joined {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("Worker panicked: {}", e);
                }
            }
        }
    }

    /// Terminal outcome for a table that was discovered but never reported
    /// by a worker: still queued, aborted mid-transfer, or lost to a panic.
    fn unreported(&self, key: String, cancel: &CancellationToken) -> TableOutcome {
        let err = if cancel.is_cancelled() {
            ReplicateError::Cancelled
        } else {
            ReplicateError::transfer(key.clone(), "worker exited before reporting")
        };
        self.fail_unqueued(key, &err)
    }

    /// Fail a table that no worker will see.
    fn fail_unqueued(&self, key: String, err: &ReplicateError) -> TableOutcome {
        ProgressReporter::new(key.clone(), self.progress.clone()).failed(err.kind());
        TableOutcome::failed(key, err)
    }

    async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetMode;
    use crate::error::ErrorKind;
    use crate::progress::tests::RecordingSink;
    use crate::progress::ProgressEvent;
    use crate::test_support::{MockSource, MockTable, MockWriter};
    use std::collections::HashMap;
    use std::time::Duration;

    fn settings(workers: usize) -> ReplicationConfig {
        ReplicationConfig {
            workers,
            batch_size: 200,
            retry_base_delay_ms: 0,
            retry_max_delay_ms: 0,
            ..Default::default()
        }
    }

    fn orchestrator(
        schemas: &[&str],
        settings: ReplicationConfig,
        source: MockSource,
        writer: Arc<MockWriter>,
    ) -> (Orchestrator, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let dyn_sink: Arc<dyn ProgressSink> = sink.clone();
        let orch = Orchestrator::from_parts(
            schemas.iter().map(|s| s.to_string()).collect(),
            settings,
            Arc::new(source),
            writer,
        )
        .with_progress(dyn_sink);
        (orch, sink)
    }

    fn shop() -> MockSource {
        MockSource::new()
            .with_table(MockTable::new("shop", "orders", 10_000_000, 500).with_rows(500))
            .with_table(MockTable::new("shop", "sessions", 80_000_000, 2_000_000))
            .with_table(MockTable::new("shop", "empty_cache", 1_000, 0))
    }

    fn terminal_events(events: &[ProgressEvent]) -> HashMap<String, Vec<Phase>> {
        let mut map: HashMap<String, Vec<Phase>> = HashMap::new();
        for e in events.iter().filter(|e| e.phase.is_terminal()) {
            map.entry(e.table_key.clone()).or_default().push(e.phase);
        }
        map
    }

    fn outcome<'a>(result: &'a ReplicationResult, key: &str) -> &'a TableOutcome {
        result.tables.iter().find(|o| o.key == key).unwrap()
    }

    #[tokio::test]
    async fn test_shop_scenario() {
        let writer = Arc::new(MockWriter::new());
        let (orch, sink) = orchestrator(&["shop"], settings(4), shop(), writer.clone());

        let result = orch.run(CancellationToken::new()).await;

        assert_eq!(result.outcome(), RunOutcome::Success);
        assert_eq!(result.exit_code(), 0);
        assert_eq!(outcome(&result, "shop.orders").phase, Phase::Done);
        assert_eq!(outcome(&result, "shop.orders").rows_copied, 500);
        assert_eq!(outcome(&result, "shop.sessions").phase, Phase::Skipped);
        assert_eq!(
            outcome(&result, "shop.sessions").skip_reason,
            Some(Admission::TooLarge)
        );
        assert_eq!(outcome(&result, "shop.empty_cache").phase, Phase::Skipped);
        assert_eq!(
            outcome(&result, "shop.empty_cache").skip_reason,
            Some(Admission::Empty)
        );
        assert_eq!(writer.rows_written("shop.orders"), 500);
        assert_eq!(writer.ensured_databases(), vec!["shop".to_string()]);

        let terminal = terminal_events(&sink.events());
        assert_eq!(terminal.len(), 3);
        assert!(terminal.values().all(|phases| phases.len() == 1));
    }

    #[tokio::test]
    async fn test_queued_announced_before_any_other_event() {
        let writer = Arc::new(MockWriter::new());
        let (orch, sink) = orchestrator(&["shop"], settings(2), shop(), writer);
        orch.run(CancellationToken::new()).await;

        let events = sink.events();
        for key in ["shop.orders", "shop.sessions", "shop.empty_cache"] {
            let first = events.iter().find(|e| e.table_key == key).unwrap();
            assert_eq!(first.phase, Phase::Queued, "{}", key);
        }
    }

    #[tokio::test]
    async fn test_write_fails_twice_then_done() {
        let source = MockSource::new()
            .with_table(MockTable::new("shop", "orders", 10_000_000, 500).with_rows(500));
        let writer = Arc::new(MockWriter::new().failing_writes("shop.orders", 2));
        let (orch, _) = orchestrator(&["shop"], settings(2), source, writer);

        let result = orch.run(CancellationToken::new()).await;
        let orders = outcome(&result, "shop.orders");

        assert_eq!(orders.phase, Phase::Done);
        assert_eq!(orders.rows_copied, orders.total_rows);
        assert_eq!(orders.retries, 2);
        assert_eq!(result.outcome(), RunOutcome::Success);
    }

    #[tokio::test]
    async fn test_one_of_five_tables_fails() {
        let source = MockSource::new()
            .with_table(MockTable::new("shop", "a", 100, 10).with_rows(10))
            .with_table(MockTable::new("shop", "b", 100, 10).with_rows(10))
            .with_table(MockTable::new("shop", "c", 100, 10).with_rows(10))
            .with_table(MockTable::new("shop", "d", 100, 0))
            .with_table(MockTable::new("shop", "e", 100, 10).with_rows(10));
        let writer = Arc::new(MockWriter::new().always_failing("shop.c"));
        let (orch, sink) = orchestrator(&["shop"], settings(3), source, writer);

        let result = orch.run(CancellationToken::new()).await;

        assert_eq!(result.tables_total, 5);
        assert_eq!(result.tables_failed, 1);
        assert_eq!(result.tables_done, 3);
        assert_eq!(result.tables_skipped, 1);
        assert_eq!(result.outcome(), RunOutcome::TablesFailed);
        assert_ne!(result.exit_code(), 0);
        assert_eq!(
            result.failed_tables().map(|o| o.key.as_str()).collect::<Vec<_>>(),
            vec!["shop.c"]
        );

        let terminal = terminal_events(&sink.events());
        assert_eq!(terminal.len(), 5);
        assert_eq!(terminal["shop.c"], vec![Phase::Failed]);
    }

    #[tokio::test]
    async fn test_n_tables_n_terminal_events_with_small_queue() {
        let mut source = MockSource::new();
        for i in 0..40 {
            source = source.with_table(MockTable::new("shop", &format!("t{:02}", i), 100, 3).with_rows(3));
        }
        let writer = Arc::new(MockWriter::new());
        let (orch, sink) = orchestrator(&["shop"], settings(2), source, writer);

        let result = orch.run(CancellationToken::new()).await;

        assert_eq!(result.tables_done, 40);
        let terminal = terminal_events(&sink.events());
        assert_eq!(terminal.len(), 40);
        assert!(terminal.values().all(|phases| phases.len() == 1));
    }

    #[tokio::test]
    async fn test_duplicate_tables_dispatched_once() {
        let source = MockSource::new()
            .with_table(MockTable::new("shop", "orders", 100, 50).with_rows(50))
            .with_table(MockTable::new("shop", "orders", 100, 50).with_rows(50));
        let writer = Arc::new(MockWriter::new());
        let (orch, sink) = orchestrator(&["shop", "shop"], settings(4), source, writer.clone());

        let result = orch.run(CancellationToken::new()).await;

        assert_eq!(result.tables_total, 1);
        assert_eq!(writer.rows_written("shop.orders"), 50);
        assert_eq!(terminal_events(&sink.events())["shop.orders"].len(), 1);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_per_table() {
        let source = MockSource::new()
            .with_table(MockTable::new("shop", "a", 100, 1_000).with_rows(1_000))
            .with_table(MockTable::new("shop", "b", 100, 700).with_rows(700));
        let writer = Arc::new(MockWriter::new());
        let (orch, sink) = orchestrator(&["shop"], settings(2), source, writer);
        orch.run(CancellationToken::new()).await;

        let events = sink.events();
        for key in ["shop.a", "shop.b"] {
            let per_key: Vec<&ProgressEvent> = events.iter().filter(|e| e.table_key == key).collect();
            assert!(per_key
                .windows(2)
                .all(|w| w[0].completed_units <= w[1].completed_units));
            assert!(per_key.iter().all(|e| e.completed_units <= e.total_units));
        }
    }

    #[tokio::test]
    async fn test_catalog_failure_continues_with_other_schemas() {
        let source = MockSource::new()
            .failing_catalog("billing")
            .with_table(MockTable::new("shop", "orders", 100, 5).with_rows(5));
        let writer = Arc::new(MockWriter::new());
        let (orch, _) = orchestrator(&["billing", "shop"], settings(2), source, writer);

        let result = orch.run(CancellationToken::new()).await;

        assert_eq!(result.catalog_failures.len(), 1);
        assert_eq!(result.catalog_failures[0].schema, "billing");
        assert_eq!(outcome(&result, "shop.orders").phase, Phase::Done);
        assert_eq!(result.outcome(), RunOutcome::CatalogFailed);
        assert_eq!(result.exit_code(), EXIT_CATALOG_ERROR);
    }

    #[tokio::test]
    async fn test_database_creation_failure_fails_schema_tables() {
        let source = MockSource::new()
            .with_table(MockTable::new("shop", "orders", 100, 5).with_rows(5))
            .with_table(MockTable::new("shop", "big", 100_000_000, 5).with_rows(5));
        let writer = Arc::new(MockWriter::new().failing_ensure_database("shop"));
        let (orch, sink) = orchestrator(&["shop"], settings(2), source, writer);

        let result = orch.run(CancellationToken::new()).await;

        assert_eq!(result.tables_failed, 2);
        assert_eq!(outcome(&result, "shop.orders").error_kind, Some(ErrorKind::Catalog));
        assert_eq!(terminal_events(&sink.events()).len(), 2);
        assert_eq!(result.outcome(), RunOutcome::CatalogFailed);
    }

    #[tokio::test]
    async fn test_no_database_created_when_nothing_admitted() {
        let source = MockSource::new().with_table(MockTable::new("shop", "empty_cache", 100, 0));
        let writer = Arc::new(MockWriter::new());
        let (orch, _) = orchestrator(&["shop"], settings(2), source, writer.clone());

        orch.run(CancellationToken::new()).await;

        assert!(writer.ensured_databases().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_reports_every_table_once() {
        let mut source = MockSource::new().with_read_delay(Duration::from_millis(20));
        for i in 0..6 {
            source = source.with_table(MockTable::new("shop", &format!("t{}", i), 100, 2_000).with_rows(2_000));
        }
        let writer = Arc::new(MockWriter::new());
        let config = ReplicationConfig {
            shutdown_timeout_secs: 5,
            ..settings(2)
        };
        let (orch, sink) = orchestrator(&["shop"], config, source, writer);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(10), orch.run(cancel))
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.outcome(), RunOutcome::Cancelled);
        assert_eq!(result.exit_code(), EXIT_CANCELLED);
        assert_eq!(result.tables_total, 6);
        assert!(result
            .tables
            .iter()
            .any(|o| o.error_kind == Some(ErrorKind::Cancelled)));

        let terminal = terminal_events(&sink.events());
        assert_eq!(terminal.len(), 6);
        assert!(terminal.values().all(|phases| phases.len() == 1));
    }

    #[tokio::test]
    async fn test_stuck_worker_aborted_after_shutdown_timeout() {
        let source = MockSource::new()
            .with_table(MockTable::new("shop", "orders", 100, 10).with_rows(10));
        let writer = Arc::new(MockWriter::new().with_write_delay(Duration::from_secs(3600)));
        let config = ReplicationConfig {
            shutdown_timeout_secs: 0,
            ..settings(1)
        };
        let (orch, sink) = orchestrator(&["shop"], config, source, writer);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(10), orch.run(cancel))
            .await
            .unwrap();

        let orders = outcome(&result, "shop.orders");
        assert_eq!(orders.phase, Phase::Failed);
        assert_eq!(orders.error_kind, Some(ErrorKind::Cancelled));
        assert_eq!(terminal_events(&sink.events())["shop.orders"], vec![Phase::Failed]);
    }

    #[tokio::test]
    async fn test_pools_closed_after_run() {
        let source = Arc::new(shop());
        let writer = Arc::new(MockWriter::new());
        let orch = Orchestrator::from_parts(
            vec!["shop".to_string()],
            settings(2),
            source.clone(),
            writer.clone(),
        );
        orch.run(CancellationToken::new()).await;

        assert!(source.is_closed());
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn test_plan_does_not_write() {
        let writer = Arc::new(MockWriter::new());
        let (orch, sink) = orchestrator(&["shop"], settings(2), shop(), writer.clone());

        let result = orch.plan(CancellationToken::new()).await;

        assert!(result.dry_run);
        assert_eq!(result.plan.len(), 3);
        assert_eq!(result.tables_skipped, 2);
        assert_eq!(writer.rows_written("shop.orders"), 0);
        assert!(writer.ensured_databases().is_empty());
        assert!(sink.events().is_empty());
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn test_drop_recreate_setting_reaches_transfer() {
        let source = MockSource::new()
            .with_table(MockTable::new("shop", "orders", 100, 5).with_rows(5));
        let writer = Arc::new(MockWriter::new().with_existing_table("shop.orders"));
        let config = ReplicationConfig {
            target_mode: TargetMode::DropRecreate,
            ..settings(1)
        };
        let (orch, _) = orchestrator(&["shop"], config, source, writer.clone());

        orch.run(CancellationToken::new()).await;

        assert_eq!(writer.dropped_tables(), vec!["shop.orders".to_string()]);
    }

    #[test]
    fn test_result_json() {
        let result = ReplicationResult::new("run-1".to_string(), Utc::now(), Instant::now())
            .with_outcomes(vec![TableOutcome::skipped("shop.sessions", Admission::TooLarge)])
            .finish();
        let json = result.to_json().unwrap();
        assert!(json.contains("\"status\": \"completed\""));
        assert!(json.contains("\"skip_reason\": \"too_large\""));
        assert!(!json.contains("\"plan\""));
    }
}
