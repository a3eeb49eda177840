//! # rds-pg-restore
//!
//! Restore a PostgreSQL database from an AWS RDS snapshot exported to Parquet
//! files with JSON manifests.
//!
//! The target database must already carry the complete schema; this library
//! repopulates it:
//!
//! - **FK-aware ordering**: referenced tables load before their referencers,
//!   computed from a directed graph of the foreign-key relations
//! - **Bulk transfers** over PostgreSQL's COPY protocol, binary by default
//!   with a CSV fallback for column types the binary format cannot carry
//! - **Per-table transactions** that drop secondary indexes and constraints
//!   for the duration of the copy and restore them before the commit
//! - **Row count validation** after every copied file
//!
//! ## Example
//!
//! ```rust,no_run
//! use rds_pg_restore::{Config, LocalSource, RestoreRunner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?;
//!     let source = LocalSource::new("/exports/export-test-01")?;
//!     let runner = RestoreRunner::new(config);
//!     let result = runner.run(&source).await?;
//!     println!("Loaded {} rows", result.rows_loaded);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod orchestrator;
pub mod source;
pub mod target;

// Re-exports for convenient access
pub use config::{Config, RestoreConfig, SourceConfig, TargetConfig};
pub use error::{RestoreError, Result};
pub use graph::{FkGraph, FkNode};
pub use manifest::{ColumnInfo, SourceReader, TableManifest};
pub use orchestrator::{RestoreResult, RestoreRunner};
pub use source::{FileInfo, LocalSource, ParquetRowReader, RowTransformer, S3Source, Source};
pub use target::{DbWriter, PgValue, SkipReason, TablePlan};
