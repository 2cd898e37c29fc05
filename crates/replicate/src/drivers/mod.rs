//! Database driver implementations of the core reader/writer traits.

pub mod mysql;

pub use mysql::{MysqlDialect, MysqlReader, MysqlWriter};
