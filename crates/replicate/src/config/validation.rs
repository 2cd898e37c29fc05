//! Configuration validation.

use super::{Config, OrderingKey, ReplicationConfig};
use crate::core::identifier::validate_identifier;
use crate::error::{ReplicateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.schemas.is_empty() {
        return Err(ReplicateError::Config(
            "at least one schema is required".into(),
        ));
    }
    for schema in &config.schemas {
        validate_identifier(schema)
            .map_err(|e| ReplicateError::Config(format!("schema '{}': {}", schema, e)))?;
    }

    // Replicating a schema onto itself would truncate the rows being read.
    if config.source.address() == config.target.address() {
        return Err(ReplicateError::Config(format!(
            "source and target cannot be the same server ({})",
            config.source.address()
        )));
    }

    validate_replication(&config.replication)
}

/// Validate the replication settings on their own (used for settings-only files).
pub fn validate_replication(r: &ReplicationConfig) -> Result<()> {
    if r.workers == 0 {
        return Err(ReplicateError::Config(
            "replication.workers must be at least 1".into(),
        ));
    }
    if r.batch_size == 0 {
        return Err(ReplicateError::Config(
            "replication.batch_size must be at least 1".into(),
        ));
    }
    if r.retry_base_delay_ms > r.retry_max_delay_ms {
        return Err(ReplicateError::Config(format!(
            "replication.retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
            r.retry_base_delay_ms, r.retry_max_delay_ms
        )));
    }
    if let Some(0) = r.max_source_connections {
        return Err(ReplicateError::Config(
            "replication.max_source_connections must be at least 1".into(),
        ));
    }
    if let Some(0) = r.max_target_connections {
        return Err(ReplicateError::Config(
            "replication.max_target_connections must be at least 1".into(),
        ));
    }

    for (key, ordering) in &r.ordering {
        let (schema, table) = key.split_once('.').ok_or_else(|| {
            ReplicateError::Config(format!(
                "replication.ordering key '{}' must be schema.table",
                key
            ))
        })?;
        validate_identifier(schema)?;
        validate_identifier(table)?;
        if let OrderingKey::Column { name } = ordering {
            validate_identifier(name).map_err(|e| {
                ReplicateError::Config(format!("replication.ordering '{}': {}", key, e))
            })?;
        }
    }

    Ok(())
}
