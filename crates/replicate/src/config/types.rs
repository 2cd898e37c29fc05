//! Configuration type definitions.

use super::descriptor::ConnectionDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where rows are read from.
    pub source: ConnectionDescriptor,

    /// Where rows are written to.
    pub target: ConnectionDescriptor,

    /// Schemas to replicate. Each one is mirrored under the same name on the target.
    pub schemas: Vec<String>,

    /// Replication behavior.
    #[serde(default)]
    pub replication: ReplicationConfig,
}

/// Replication behavior configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationConfig {
    /// Number of concurrent table workers (default: 20).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Rows per batch (default: 2000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Tables whose estimated size exceeds this are skipped (default: 50,000,000 bytes).
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Retries per failed read or write before the table is marked failed (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry (default: 200ms). Doubles per attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff ceiling (default: 5000ms).
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// How existing destination tables are handled (default: truncate).
    #[serde(default)]
    pub target_mode: TargetMode,

    /// Source pool size. Defaults to workers + 2.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_source_connections: Option<usize>,

    /// Target pool size. Defaults to workers + 2.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_target_connections: Option<usize>,

    /// Grace period for in-flight tables after cancellation (default: 30s).
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Per-table ordering overrides, keyed by `schema.table`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ordering: BTreeMap<String, OrderingKey>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            max_size_bytes: default_max_size_bytes(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            target_mode: TargetMode::default(),
            max_source_connections: None,
            max_target_connections: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            ordering: BTreeMap::new(),
        }
    }
}

impl ReplicationConfig {
    pub fn get_max_source_connections(&self) -> usize {
        self.max_source_connections.unwrap_or(self.workers + 2)
    }

    pub fn get_max_target_connections(&self) -> usize {
        self.max_target_connections.unwrap_or(self.workers + 2)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Ordering override for a table, if one is configured.
    pub fn ordering_for(&self, table_key: &str) -> Option<&OrderingKey> {
        self.ordering.get(table_key)
    }
}

/// Destination table policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    /// Create the table if absent, truncate it if present.
    #[default]
    Truncate,

    /// Drop the table if present, then create it.
    DropRecreate,
}

impl std::fmt::Display for TargetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetMode::Truncate => f.write_str("truncate"),
            TargetMode::DropRecreate => f.write_str("drop_recreate"),
        }
    }
}

impl std::str::FromStr for TargetMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "truncate" => Ok(TargetMode::Truncate),
            "drop_recreate" => Ok(TargetMode::DropRecreate),
            other => Err(format!(
                "unknown target mode '{}' (expected truncate or drop_recreate)",
                other
            )),
        }
    }
}

/// How batches of a table are ordered.
///
/// ```yaml
/// ordering:
///   shop.orders: { by: primary_key }
///   shop.events: { by: column, name: created_at }
///   shop.audit_log: { by: unordered }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum OrderingKey {
    /// Order by the table's primary key.
    PrimaryKey,
    /// Order by a single named column. Only safe if the column is unique.
    Column { name: String },
    /// No ordering; offset paging with at-least-once semantics.
    Unordered,
}

fn default_workers() -> usize {
    20
}

fn default_batch_size() -> usize {
    2_000
}

fn default_max_size_bytes() -> u64 {
    50_000_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_retry_max_delay_ms() -> u64 {
    5_000
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}
