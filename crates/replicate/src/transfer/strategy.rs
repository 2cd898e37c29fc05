//! Choosing how a table is paged.

use tracing::warn;

use crate::config::OrderingKey;
use crate::core::schema::Table;
use crate::core::traits::ReadStrategy;
use crate::error::{ReplicateError, Result};

/// Pick the read strategy for `table`.
///
/// Without an override the primary key is used: keyset paging for a single
/// integer or short-text key, ordered offset paging for anything else.
/// Tables without a primary key are read unordered. An override column must
/// carry a single-column unique index and be NOT NULL, otherwise paging on it
/// could skip rows that share a value.
pub fn resolve_strategy(table: &Table, ordering: Option<&OrderingKey>) -> Result<ReadStrategy> {
    match ordering.unwrap_or(&OrderingKey::PrimaryKey) {
        OrderingKey::PrimaryKey => Ok(from_primary_key(table)),
        OrderingKey::Column { name } => {
            let column = table.column(name).ok_or_else(|| {
                ReplicateError::Config(format!(
                    "ordering column {} not found in {}",
                    name,
                    table.full_name()
                ))
            })?;
            if !table.is_unique_column(name) {
                return Err(ReplicateError::Config(format!(
                    "ordering column {} of {} is not unique",
                    name,
                    table.full_name()
                )));
            }
            if column.is_keyset_type() {
                Ok(ReadStrategy::Keyset {
                    column: column.name.clone(),
                })
            } else {
                Ok(ReadStrategy::OrderedOffset {
                    columns: vec![column.name.clone()],
                })
            }
        }
        OrderingKey::Unordered => Ok(ReadStrategy::Unordered),
    }
}

fn from_primary_key(table: &Table) -> ReadStrategy {
    if !table.has_pk() {
        warn!(
            "{}: no primary key, copying unordered (rows changed during the copy may be duplicated or missed)",
            table.full_name()
        );
        return ReadStrategy::Unordered;
    }

    if table.has_single_pk() {
        let pk = &table.primary_key[0];
        if table.column(pk).is_some_and(|c| c.is_keyset_type()) {
            return ReadStrategy::Keyset { column: pk.clone() };
        }
    }

    ReadStrategy::OrderedOffset {
        columns: table.primary_key.clone(),
    }
}
