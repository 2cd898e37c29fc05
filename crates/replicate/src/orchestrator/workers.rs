//! Fixed-size worker pool draining the table queue.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::admission::AdmissionPolicy;
use crate::core::schema::TableDescriptor;
use crate::progress::{ProgressReporter, ProgressSink};
use crate::transfer::{TableOutcome, TableTransfer};

/// Shared by every worker of one run.
pub(crate) struct WorkerContext {
    pub transfer: TableTransfer,
    pub admission: AdmissionPolicy,
    pub progress: Arc<dyn ProgressSink>,
    pub cancel: CancellationToken,
}

/// Spawn `count` workers pulling from `queue`. Each finished table's outcome
/// is sent on `outcomes` as soon as it is known.
pub(crate) fn spawn_workers(
    count: usize,
    queue: async_channel::Receiver<TableDescriptor>,
    outcomes: mpsc::UnboundedSender<TableOutcome>,
    ctx: Arc<WorkerContext>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| {
            let queue = queue.clone();
            let outcomes = outcomes.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { worker_loop(id, queue, outcomes, ctx).await })
        })
        .collect()
}

/// Take one table at a time until the queue is closed and empty, or the run
/// is cancelled. Items left in the queue on cancellation are drained by the
/// orchestrator.
async fn worker_loop(
    id: usize,
    queue: async_channel::Receiver<TableDescriptor>,
    outcomes: mpsc::UnboundedSender<TableOutcome>,
    ctx: Arc<WorkerContext>,
) {
    let mut handled = 0usize;

    loop {
        let table = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            next = queue.recv() => match next {
                Ok(table) => table,
                Err(_) => break,
            },
        };

        let key = table.key();
        let mut reporter = ProgressReporter::new(key.clone(), ctx.progress.clone());

        let admission = ctx.admission.evaluate(&table);
        let outcome = if admission.is_admitted() {
            debug!("Worker {}: starting {}", id, key);
            ctx.transfer.run(&table, &mut reporter, &ctx.cancel).await
        } else {
            info!(
                "{}: skipped, {} ({} bytes, {} rows)",
                key,
                admission.reason(),
                table.estimated_size_bytes,
                table.estimated_row_count
            );
            reporter.skipped();
            TableOutcome::skipped(key, admission)
        };

        handled += 1;
        // Orchestrator gone means the run was torn down; nothing left to report to.
        if outcomes.send(outcome).is_err() {
            break;
        }
    }

    debug!("Worker {} exiting after {} tables", id, handled);
}
