//! MySQL/MariaDB driver.
//!
//! - [`MysqlDialect`]: SQL text for catalog queries, batch reads and DDL
//! - [`MysqlReader`]: source reader (SQLx pool)
//! - [`MysqlWriter`]: target writer (mysql_async pool)
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - MariaDB 10.2+

mod dialect;
mod reader;
mod writer;

pub use dialect::{MysqlDialect, MYSQL_MAX_PLACEHOLDERS};
pub use reader::MysqlReader;
pub use writer::MysqlWriter;
