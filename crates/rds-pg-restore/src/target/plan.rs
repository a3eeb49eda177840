//! Per-table copy plan: column order, copy format, and the skip policy.

use std::fmt;

use crate::config::{Config, RestoreConfig};
use crate::manifest::{ColumnInfo, TableManifest};
use crate::target::identifier::quote_ident;
use crate::target::writer::DbWriter;

/// USER-DEFINED columns (HSTORE and friends) do not load through the binary
/// COPY protocol; a table holding one falls back to the CSV path.
const CSV_FALLBACK_TYPE: &str = "USER-DEFINED";

/// Why a table was skipped; surfaced to the caller as a non-error outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotInIncludeList,
    InExcludeList,
    NotEmpty,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotInIncludeList => "table is not listed in include-tables",
            SkipReason::InExcludeList => "table is listed in exclude-tables",
            SkipReason::NotEmpty => "table is not empty",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The loading strategy for one table, derived from its manifest entry.
#[derive(Debug, Clone)]
pub struct TablePlan {
    manifest: TableManifest,
}

impl TablePlan {
    pub fn new(manifest: TableManifest) -> Self {
        TablePlan { manifest }
    }

    pub fn table_name(&self) -> &str {
        &self.manifest.table_name
    }

    /// Ordered column descriptors; the order drives the copy column order.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.manifest.columns
    }

    /// Column names in manifest order.
    pub fn field_names(&self) -> Vec<String> {
        self.manifest
            .columns
            .iter()
            .map(|column| column.column_name.clone())
            .collect()
    }

    /// Quoted, comma-separated column list for COPY statements.
    pub fn quoted_column_list(&self) -> String {
        self.manifest
            .columns
            .iter()
            .map(|column| quote_ident(&column.column_name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Whether any column forces the CSV copy path.
    pub fn requires_csv(&self) -> bool {
        self.manifest
            .columns
            .iter()
            .any(|column| column.original_type == CSV_FALLBACK_TYPE)
    }

    /// Consult the configuration and the current table contents; `Some`
    /// means the table must be skipped for the returned reason.
    pub async fn should_skip(&self, writer: &DbWriter, config: &Config) -> Option<SkipReason> {
        let (found, not_empty) =
            RestoreConfig::table_in_set(&config.restore.include_tables, self.table_name());
        if !found && not_empty {
            return Some(SkipReason::NotInIncludeList);
        }
        let (found, not_empty) =
            RestoreConfig::table_in_set(&config.restore.exclude_tables, self.table_name());
        if found && not_empty {
            return Some(SkipReason::InExcludeList);
        }
        if config.restore.skip_not_empty && writer.table_size_of(self.table_name()).await > 0 {
            return Some(SkipReason::NotEmpty);
        }
        None
    }
}
