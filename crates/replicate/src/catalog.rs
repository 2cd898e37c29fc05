//! Table discovery: catalog rows to table descriptors.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::schema::TableDescriptor;
use crate::core::traits::SourceReader;
use crate::error::Result;

/// Enumerates base tables of a schema and fixes up their row estimates.
pub struct CatalogReader {
    source: Arc<dyn SourceReader>,
}

impl CatalogReader {
    pub fn new(source: Arc<dyn SourceReader>) -> Self {
        Self { source }
    }

    /// List the base tables of `schema`.
    ///
    /// Fails only if the catalog query itself fails. Rows that cannot be
    /// decoded are dropped with a warning. Tables whose row estimate is zero
    /// get an exact `COUNT(*)`; if that count fails the estimate is kept.
    pub async fn list_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>> {
        let rows = self.source.scan_catalog(schema).await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!("{}", e);
                    continue;
                }
            };

            let mut descriptor = TableDescriptor::new(
                schema,
                row.table_name,
                row.size_estimate.unwrap_or(0),
                row.row_estimate.unwrap_or(0),
            );

            // InnoDB reports 0 for tables it has not sampled yet.
            if descriptor.estimated_row_count == 0 {
                match self.source.count_rows(schema, &descriptor.name).await {
                    Ok(count) => {
                        debug!("{}: estimate was 0, exact count {}", descriptor, count);
                        descriptor.estimated_row_count = count;
                    }
                    Err(e) => {
                        warn!("{}: keeping row estimate of 0, count failed: {}", descriptor, e);
                    }
                }
            }

            tables.push(descriptor);
        }

        Ok(tables)
    }
}
