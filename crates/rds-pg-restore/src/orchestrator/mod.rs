//! Restore orchestrator - the main workflow coordinator.
//!
//! Computes the FK-aware table order, optionally truncates, matches the
//! manifest tables to the database tables, and drives the loader one table at
//! a time. Already-committed tables stay loaded when a later table fails; the
//! failing table rolls back and the run stops.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::manifest::SourceReader;
use crate::source::Source;
use crate::target::{DbWriter, TablePlan};

/// Restore orchestrator.
pub struct RestoreRunner {
    config: Config,
}

/// Result of a restore run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the restore started.
    pub started_at: DateTime<Utc>,

    /// When the restore completed.
    pub completed_at: DateTime<Utc>,

    /// Tables present in the target database.
    pub tables_total: usize,

    /// Tables loaded from the snapshot.
    pub tables_loaded: usize,

    /// Tables skipped by the configuration.
    pub tables_skipped: usize,

    /// Tables truncated before loading.
    pub tables_truncated: usize,

    /// Total rows copied.
    pub rows_loaded: i64,

    /// Average throughput (rows/second).
    pub rows_per_second: i64,
}

impl RestoreRunner {
    pub fn new(config: Config) -> Self {
        RestoreRunner { config }
    }

    /// List database instances (subfolders) in the exported cluster.
    pub fn list_databases(&self, source: &dyn Source) -> Result<Vec<String>> {
        SourceReader::new(&self.config, source).list_databases()
    }

    /// Run the restore against the given snapshot source.
    pub async fn run(&self, source: &dyn Source) -> Result<RestoreResult> {
        let started_at = Utc::now();
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(run_id = %run_id, "starting the restore");

        let writer = DbWriter::connect(&self.config.target).await?;

        // The order is derived from the FK relations and is load-bearing:
        // referenced tables must be populated before their referencers.
        let order_started = Instant::now();
        let tables = writer.tables_ordered().await?;
        info!(
            count = tables.len(),
            elapsed = ?order_started.elapsed(),
            "retrieved ordered tables from the database"
        );

        let mut tables_truncated = 0;
        if self.config.restore.truncate_all {
            let truncate_started = Instant::now();
            tables_truncated = writer.truncate_all_tables(&tables).await?;
            info!(
                truncated = tables_truncated,
                elapsed = ?truncate_started.elapsed(),
                "truncated all non-empty tables"
            );
        }

        // The snapshot only has data for the tables its manifests describe.
        let reader = SourceReader::new(&self.config, source);
        let manifests = reader.iterate_over_tables(&tables)?;
        info!(count = manifests.len(), "parsed the snapshot manifests");

        let by_name: HashMap<&str, &crate::manifest::TableManifest> = manifests
            .iter()
            .map(|manifest| (manifest.table_name.as_str(), manifest))
            .collect();

        let mut tables_loaded = 0usize;
        let mut tables_skipped = 0usize;
        let mut rows_loaded = 0i64;

        for table in &tables {
            let Some(manifest) = by_name.get(table.as_str()) else {
                continue;
            };
            let plan = TablePlan::new((*manifest).clone());

            if let Some(reason) = plan.should_skip(&writer, &self.config).await {
                info!(table = %table, reason = %reason, "skipping table");
                tables_skipped += 1;
                continue;
            }

            let table_started = Instant::now();
            match writer.write_table(source, &plan, &self.config).await {
                Ok(rows) => {
                    let elapsed = table_started.elapsed();
                    let per_second = if elapsed.as_secs_f64() > 0.0 {
                        (rows as f64 / elapsed.as_secs_f64()) as i64
                    } else {
                        0
                    };
                    info!(
                        table = %table,
                        rows,
                        elapsed = ?elapsed,
                        rows_per_second = per_second,
                        "loaded table data"
                    );
                    tables_loaded += 1;
                    rows_loaded += rows;
                }
                Err(e) => {
                    // The failing table has rolled back; earlier tables stay.
                    error!(table = %table, error = %e, "error writing data for table");
                    return Err(e);
                }
            }
        }

        let completed_at = Utc::now();
        let duration_seconds = started.elapsed().as_secs_f64();
        let rows_per_second = if duration_seconds > 0.0 {
            (rows_loaded as f64 / duration_seconds) as i64
        } else {
            0
        };
        info!(
            tables_loaded,
            tables_skipped,
            rows_loaded,
            duration_seconds,
            "finished processing all tables"
        );

        Ok(RestoreResult {
            run_id,
            status: "completed".to_string(),
            duration_seconds,
            started_at,
            completed_at,
            tables_total: tables.len(),
            tables_loaded,
            tables_skipped,
            tables_truncated,
            rows_loaded,
            rows_per_second,
        })
    }
}

impl RestoreResult {
    /// Convert to a pretty JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
