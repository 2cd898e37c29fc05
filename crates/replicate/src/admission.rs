//! Admission filter: which discovered tables are copied.

use serde::{Deserialize, Serialize};

use crate::core::schema::TableDescriptor;

/// Default size ceiling in bytes.
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 50_000_000;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    Admitted,
    /// Estimated size above the ceiling.
    TooLarge,
    /// No rows, after zero-count disambiguation.
    Empty,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        self == Admission::Admitted
    }

    /// Human-readable skip reason.
    pub fn reason(self) -> &'static str {
        match self {
            Admission::Admitted => "admitted",
            Admission::TooLarge => "exceeds size limit",
            Admission::Empty => "no rows",
        }
    }
}

/// Admits a table iff its estimated size is at most `max_size_bytes` and it
/// has at least one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    pub max_size_bytes: u64,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
        }
    }
}

impl AdmissionPolicy {
    pub fn new(max_size_bytes: u64) -> Self {
        Self { max_size_bytes }
    }

    pub fn evaluate(&self, table: &TableDescriptor) -> Admission {
        if table.estimated_size_bytes > self.max_size_bytes {
            Admission::TooLarge
        } else if table.estimated_row_count == 0 {
            Admission::Empty
        } else {
            Admission::Admitted
        }
    }

    pub fn admits(&self, table: &TableDescriptor) -> bool {
        self.evaluate(table).is_admitted()
    }
}
