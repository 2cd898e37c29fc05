//! Error types for the replication library.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exit code for a run where every table was handled.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code for invalid configuration or connection descriptors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when the source or destination cannot be reached.
pub const EXIT_CONNECTION_ERROR: u8 = 3;
/// Exit code when the catalog of at least one schema could not be read.
pub const EXIT_CATALOG_ERROR: u8 = 4;
/// Exit code when one or more tables ended in `Failed`.
pub const EXIT_TABLES_FAILED: u8 = 5;
/// Exit code for local I/O failures (config file not found, etc.).
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code after an operator interrupt.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for replication operations.
#[derive(Error, Debug)]
pub enum ReplicateError {
    /// Configuration error (bad descriptor, invalid YAML values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A connection pool could not be opened.
    #[error("Could not connect to {host}: {message}")]
    Connection { host: String, message: String },

    /// The catalog query for a whole schema failed.
    #[error("Catalog query failed for schema {schema}: {message}")]
    Catalog { schema: String, message: String },

    /// A single catalog row could not be decoded.
    #[error("Malformed catalog row in {schema}: {message}")]
    RowScan { schema: String, message: String },

    /// Reading or writing rows of a table failed.
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// A value read from a table could not be converted. Reading it again
    /// gives the same result.
    #[error("Could not decode a value of table {table}: {message}")]
    Decode { table: String, message: String },

    /// The run was cancelled (SIGINT, SIGTERM).
    #[error("Replication cancelled")]
    Cancelled,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse error classification recorded on a table's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Connection,
    Catalog,
    RowScan,
    Transfer,
    Decode,
    Cancelled,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Connection => "connection",
            ErrorKind::Catalog => "catalog",
            ErrorKind::RowScan => "row_scan",
            ErrorKind::Transfer => "transfer",
            ErrorKind::Decode => "decode",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl ReplicateError {
    /// Create a Connection error naming the unreachable host.
    pub fn connection(host: impl Into<String>, message: impl ToString) -> Self {
        ReplicateError::Connection {
            host: host.into(),
            message: message.to_string(),
        }
    }

    /// Create a Catalog error for a schema.
    pub fn catalog(schema: impl Into<String>, message: impl ToString) -> Self {
        ReplicateError::Catalog {
            schema: schema.into(),
            message: message.to_string(),
        }
    }

    /// Create a RowScan error for a schema.
    pub fn row_scan(schema: impl Into<String>, message: impl ToString) -> Self {
        ReplicateError::RowScan {
            schema: schema.into(),
            message: message.to_string(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl ToString) -> Self {
        ReplicateError::Transfer {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a Decode error
    pub fn decode(table: impl Into<String>, message: impl ToString) -> Self {
        ReplicateError::Decode {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReplicateError::Config(_) => ErrorKind::Config,
            ReplicateError::Connection { .. } => ErrorKind::Connection,
            ReplicateError::Catalog { .. } => ErrorKind::Catalog,
            ReplicateError::RowScan { .. } => ErrorKind::RowScan,
            ReplicateError::Transfer { .. } => ErrorKind::Transfer,
            ReplicateError::Decode { .. } => ErrorKind::Decode,
            ReplicateError::Cancelled => ErrorKind::Cancelled,
            ReplicateError::Io(_) => ErrorKind::Io,
            ReplicateError::Yaml(_) | ReplicateError::Json(_) => ErrorKind::Config,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Config => EXIT_CONFIG_ERROR,
            ErrorKind::Connection => EXIT_CONNECTION_ERROR,
            ErrorKind::Catalog | ErrorKind::RowScan => EXIT_CATALOG_ERROR,
            ErrorKind::Transfer | ErrorKind::Decode => EXIT_TABLES_FAILED,
            ErrorKind::Cancelled => EXIT_CANCELLED,
            ErrorKind::Io => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicateError>;
