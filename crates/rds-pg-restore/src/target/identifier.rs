//! Identifier quoting and table-name splitting for SQL statements.
//!
//! Identifiers cannot be passed as parameters in prepared statements, so
//! every dynamic statement quotes them through these helpers. The input can
//! be `SCHEMA.TABLE` or a bare `TABLE`; a malformed name with more than one
//! dot is passed through as a single quoted literal so the resulting SQL
//! fails visibly at execution time instead of silently targeting the wrong
//! object.

use tracing::error;

/// Quote a single PostgreSQL identifier, doubling embedded double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Sanitize a table name, optionally schema-qualified, for use in SQL text.
///
/// `schema.table` becomes `"schema"."table"` and `table` becomes `"table"`.
/// An input with more than one dot is reported and quoted whole.
pub fn sanitize_table_name(name: &str) -> String {
    if name.contains('.') {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() == 2 {
            return format!("{}.{}", quote_ident(parts[0]), quote_ident(parts[1]));
        }
        error!(
            table = name,
            "invalid identifier format, expected 'schema_name.table_name'"
        );
    }
    quote_ident(name)
}

/// Split a full table name into its schema and table components.
///
/// When no schema is present the schema comes back empty. Only the first dot
/// splits; the remainder stays in the table part.
pub fn split_table_name(full_table_name: &str) -> (&str, &str) {
    match full_table_name.split_once('.') {
        Some((schema, table)) => (schema, table),
        None => ("", full_table_name),
    }
}
