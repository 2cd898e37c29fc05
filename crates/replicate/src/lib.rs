//! # replicate
//!
//! Bounded-concurrency MySQL table replication library.
//!
//! Copies the schema and contents of every small, non-empty base table of a
//! set of schemas from one MySQL server to another:
//!
//! - **Catalog discovery** with exact counts for tables the catalog reports empty
//! - **Admission filtering** by estimated size and row count
//! - **Fixed worker pool** fed by a bounded queue
//! - **Batched, ordered reads** (keyset where possible) and multi-row inserts
//! - **Per-table progress events** for live display
//! - **Per-table retries** so one failing table does not stop the run
//!
//! ## Example
//!
//! ```rust,no_run
//! use replicate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("replicate.yaml")?;
//!     let orchestrator = Orchestrator::connect(config).await?;
//!     let result = orchestrator.run(CancellationToken::new()).await;
//!     println!("Copied {} rows", result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod catalog;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod transfer;

#[cfg(test)]
mod test_support;

// Re-exports for convenient access
pub use admission::{Admission, AdmissionPolicy};
pub use catalog::CatalogReader;
pub use config::{Config, ConnectionDescriptor, OrderingKey, ReplicationConfig, TargetMode};
pub use crate::core::{Batch, BatchRequest, ReadStrategy, SourceReader, TableDescriptor, TargetWriter};
pub use drivers::{MysqlReader, MysqlWriter};
pub use error::{ErrorKind, ReplicateError, Result};
pub use orchestrator::{Orchestrator, ReplicationResult, RunOutcome};
pub use progress::{
    ChannelSink, DisplayChange, NoopSink, Phase, ProgressAggregator, ProgressDisplay,
    ProgressEvent, ProgressLedger, ProgressSink, TransferProgress,
};
pub use transfer::{RetryPolicy, TableOutcome, TableTransfer, TransferConfig};
