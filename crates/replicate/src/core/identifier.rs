//! Identifier validation and quoting for dynamically built MySQL statements.
//!
//! Schema, table and column names cannot be bound as statement parameters, so
//! every identifier that ends up in SQL text goes through [`quote_mysql`]:
//! it is validated first, then wrapped in backticks with embedded backticks
//! doubled.

use crate::error::{ReplicateError, Result};

/// Maximum identifier length accepted by MySQL (in characters).
const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Validate an identifier.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers longer than MySQL allows.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ReplicateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(ReplicateError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(ReplicateError::Config(format!(
            "Identifier exceeds maximum length of {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a MySQL identifier.
///
/// ```ignore
/// assert_eq!(quote_mysql("users")?, "`users`");
/// assert_eq!(quote_mysql("table`name")?, "`table``name`");
/// ```
pub fn quote_mysql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name.replace('`', "``")))
}

/// Build a schema-qualified, quoted table reference.
pub fn qualify_mysql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mysql(schema)?, quote_mysql(table)?))
}

/// Quote a list of column names and join them with `", "`.
pub fn quote_column_list(columns: &[String]) -> Result<String> {
    let quoted = columns
        .iter()
        .map(|c| quote_mysql(c))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}
