//! Core types shared by the engine and the database drivers.
//!
//! - [`schema`]: table descriptors and column metadata
//! - [`value`]: row values, batches and keyset cursor bounds
//! - [`traits`]: the reader/writer seams the engine is written against
//! - [`identifier`]: identifier validation and quoting

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{CatalogRow, Column, Table, TableDescriptor};
pub use traits::{BatchRequest, ReadStrategy, SourceReader, TargetWriter};
pub use value::{Batch, KeyValue, SqlValue, TimeValue};
