//! Configuration type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::target::identifier::split_table_name;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Snapshot source configuration (local directory or S3 bucket).
    #[serde(default)]
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Restore behavior configuration.
    #[serde(default)]
    pub restore: RestoreConfig,
}

/// Snapshot source configuration.
///
/// Exactly one of `local_dir` / `bucket_path` selects the source mode.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to the local directory containing the exported snapshot.
    #[serde(default)]
    pub local_dir: Option<String>,

    /// ARN of the S3 bucket plus the path to the exported snapshot.
    #[serde(default)]
    pub bucket_path: Option<String>,

    /// AWS access key (required when using the S3 bucket).
    #[serde(default)]
    pub aws_access_key: Option<String>,

    /// AWS secret key (required when using the S3 bucket).
    #[serde(default)]
    pub aws_secret_key: Option<String>,

    /// AWS region (required when using the S3 bucket).
    #[serde(default)]
    pub aws_region: Option<String>,

    /// Database instance (subfolder) inside the exported snapshot to restore.
    #[serde(default)]
    pub source_database: String,
}

impl SourceConfig {
    /// Whether the snapshot is read from the local filesystem.
    pub fn is_local(&self) -> bool {
        self.local_dir.is_some()
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("local_dir", &self.local_dir)
            .field("bucket_path", &self.bucket_path)
            .field("aws_access_key", &self.aws_access_key)
            .field("aws_secret_key", &"[REDACTED]")
            .field("aws_region", &self.aws_region)
            .field("source_database", &self.source_database)
            .finish()
    }
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// SSL mode: disable, require, verify-ca, verify-full (default: disable).
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig {
            host: default_host(),
            port: default_pg_port(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
            ssl_mode: default_ssl_mode(),
        }
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Restore behavior configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Table names to include in the operation (with or without schema names).
    /// An empty list includes every table.
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Table names to exclude from the operation (with or without schema names).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Table name prefixes to ignore when missing in the target database
    /// (useful for partitioned tables).
    #[serde(default)]
    pub ignore_missing_table_prefixes: Vec<String>,

    /// Skip tables that already contain rows, allowing incremental loading.
    #[serde(default)]
    pub skip_not_empty: bool,

    /// Truncate all non-empty tables in reverse dependency order before loading.
    #[serde(default)]
    pub truncate_all: bool,
}

impl RestoreConfig {
    /// Check whether `full_table_name` is listed in `tables`.
    ///
    /// Returns `(found, not_empty)` where `not_empty` reports whether the set
    /// holds any entries at all. The table name must match fully; the schema is
    /// optional and only compared when both sides specify one.
    pub fn table_in_set(tables: &[String], full_table_name: &str) -> (bool, bool) {
        let not_empty = !tables.is_empty();
        if !not_empty {
            return (false, false);
        }
        let (schema, table) = split_table_name(full_table_name);
        let found = tables.iter().any(|candidate| {
            let (candidate_schema, candidate_table) = split_table_name(candidate);
            candidate_table == table
                && (candidate_schema == schema || schema.is_empty() || candidate_schema.is_empty())
        });
        (found, not_empty)
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}
