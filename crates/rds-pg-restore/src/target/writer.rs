//! PostgreSQL target writer.
//!
//! [`DbWriter`] owns the connection pool and carries the whole target-side
//! surface: schema introspection, FK-aware table ordering, reverse-order
//! truncation, and the per-table transactional load pipeline. Each table
//! loads inside one transaction covering the constraint drop, the data copy,
//! and the constraint restore; the transaction rolls back on drop, so an
//! early return or a panic inside the pipeline leaves the table untouched.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use futures::{pin_mut, SinkExt};
use regex::Regex;
use rustls::ClientConfig;
use tokio::io::AsyncReadExt;
use tokio_postgres::{Client, Config as PgConfig, GenericClient, Transaction};
use tokio_postgres_rustls::MakeRustlsConnect;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, TargetConfig};
use crate::error::{Result, RestoreError};
use crate::graph::FkGraph;
use crate::source::{ParquetRowReader, RowTransformer, Source};
use crate::target::csv::spawn_csv_pipeline;
use crate::target::identifier::{quote_ident, sanitize_table_name, split_table_name};
use crate::target::plan::TablePlan;
use crate::target::queries;
use crate::target::value::{write_binary_cell, write_binary_header, write_binary_trailer};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// The loader runs one table at a time; a handful of connections suffices.
const POOL_MAX_SIZE: usize = 4;

/// Flush the binary COPY buffer once it grows past this size.
const COPY_FLUSH_BYTES: usize = 256 * 1024;

/// Read-chunk size when draining the CSV pipeline into the copy sink.
const COPY_READ_CHUNK: usize = 8 * 1024;

/// Constraint definitions matching this pattern are retained during the load.
const PRIMARY_KEY_PATTERN: &str = ".*PRIMARY KEY.*";

/// Index definitions matching this pattern back the primary key and are
/// retained during the load.
const UNIQUE_ID_INDEX_PATTERN: &str = ".*UNIQUE INDEX.*(id).*";

/// Unique constraints come back as their backing unique indexes, not as
/// constraints, so the restore pass skips definitions matching this pattern.
const UNIQUE_CONSTRAINT_PATTERN: &str = ".*UNIQUE.*";

/// Metadata about a table index.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    /// Name of the index.
    pub name: String,
    /// Full CREATE INDEX statement.
    pub def: String,
}

/// A table constraint and the definition used to recreate it.
#[derive(Debug, Clone)]
pub struct ConstraintInfo {
    /// Name of the constraint.
    pub name: String,
    /// Definition text from pg_get_constraintdef.
    pub command: String,
}

/// One foreign-key relation between two tables; the payload of graph edges.
/// A relation may also point from a table to itself.
#[derive(Debug, Clone)]
pub struct FkRelation {
    pub constraint_name: String,
    pub constraint_kind: char,
    pub self_schema: String,
    pub self_table: String,
    pub self_columns: String,
    pub foreign_schema: String,
    pub foreign_table: String,
    pub foreign_columns: String,
    pub definition: String,
}

/// Writes snapshot data into the target PostgreSQL database.
pub struct DbWriter {
    pool: Pool,
    re_primary: Regex,
    re_index: Regex,
    re_unique: Regex,
}

impl DbWriter {
    /// Connect to the target database and verify the connection.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode = config.ssl_mode.to_lowercase();
        let pool = match ssl_mode.as_str() {
            "disable" => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(POOL_MAX_SIZE)
                    .build()
                    .map_err(|e| RestoreError::pool(e, "creating the PostgreSQL pool"))?
            }
            _ => {
                let tls_config = build_tls_config(&ssl_mode)?;
                let tls_connector = MakeRustlsConnect::new(tls_config);
                let mgr = Manager::from_config(pg_config, tls_connector, mgr_config);
                Pool::builder(mgr)
                    .max_size(POOL_MAX_SIZE)
                    .build()
                    .map_err(|e| RestoreError::pool(e, "creating the PostgreSQL pool"))?
            }
        };

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| RestoreError::pool(e, "testing the PostgreSQL connection"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL target: {}:{}/{}",
            config.host, config.port, config.database
        );

        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| RestoreError::Config(format!("invalid pattern '{}': {}", pattern, e)))
        };

        Ok(DbWriter {
            pool,
            re_primary: compile(PRIMARY_KEY_PATTERN)?,
            re_index: compile(UNIQUE_ID_INDEX_PATTERN)?,
            re_unique: compile(UNIQUE_CONSTRAINT_PATTERN)?,
        })
    }

    /// The target database tables ordered by their load dependencies.
    ///
    /// The order comes from the FK graph; tables without FK participation are
    /// appended at the tail, and the combined order is validated against every
    /// edge before it is trusted.
    pub async fn tables_ordered(&self) -> Result<Vec<String>> {
        debug!("getting ordered tables");

        // This retrieves only the FK-connected tables, so some are missing.
        let mut graph = self.foreign_key_graph().await?;

        if !graph.is_acyclic() {
            return Err(RestoreError::Graph(
                "the graph is not acyclic - cannot continue processing".to_string(),
            ));
        }

        let mut ordered = graph.topological_sort()?;
        debug!(count = ordered.len(), "tables sorted");

        // The full table list, because all of them must be processed.
        let tables = self.list_tables().await?;
        debug!(count = tables.len(), "tables retrieved from the database");

        append_missing_tables(&mut ordered, &tables)?;

        for table in &ordered {
            let children = graph
                .get(table)
                .map(|node| node.children.keys().cloned().collect::<Vec<_>>().join(" "))
                .unwrap_or_default();
            debug!(table = %table, children = %children, "ordered table");
        }

        validate_table_order(&ordered, &graph)?;
        Ok(ordered)
    }

    /// Truncate the given tables in reverse order, skipping empty ones.
    /// Returns the number of tables actually truncated.
    pub async fn truncate_all_tables(&self, tables: &[String]) -> Result<usize> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| RestoreError::pool(e, "getting a connection for truncation"))?;
        let client: &Client = &conn;

        let mut truncated = 0;
        for table in tables.iter().rev() {
            let check = format!(
                "SELECT EXISTS (SELECT 1 FROM {})",
                sanitize_table_name(table)
            );
            let not_empty: bool = client
                .query_one(check.as_str(), &[])
                .await
                .map_err(|e| {
                    RestoreError::transfer(table, format!("checking if the table is not empty failed: {}", e))
                })?
                .get(0);
            if not_empty {
                info!(table = %table, "truncating table");
                client
                    .batch_execute(&format!("TRUNCATE TABLE {}", sanitize_table_name(table)))
                    .await
                    .map_err(|e| RestoreError::transfer(table, format!("truncating failed: {}", e)))?;
                truncated += 1;
            }
        }
        Ok(truncated)
    }

    /// Row count of a table via a pooled connection; -1 when it cannot be read.
    pub async fn table_size_of(&self, table: &str) -> i64 {
        match self.pool.get().await {
            Ok(conn) => {
                let client: &Client = &conn;
                table_size(client, table).await
            }
            Err(e) => {
                error!(table = %table, error = %e, "failed to get a connection for the size check");
                -1
            }
        }
    }

    /// Load one table from its Parquet files inside a single transaction.
    ///
    /// Indexes and constraints are captured before the transaction opens,
    /// dropped for the duration of the copy (primary keys and their backing
    /// unique indexes are retained), and restored before the commit. Returns
    /// the number of rows copied.
    pub async fn write_table(
        &self,
        source: &dyn Source,
        plan: &TablePlan,
        config: &Config,
    ) -> Result<i64> {
        let started = Instant::now();
        let table = plan.table_name();

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| RestoreError::pool(e, "getting a connection for the table load"))?;
        let client: &Client = &conn;
        let indexes = index_list(client, table).await?;
        let constraints = constraint_list(client, table).await?;

        let tx = conn.transaction().await?;
        tx.batch_execute(queries::DEFER_CONSTRAINTS).await?;
        tx.batch_execute(&format!(
            "ALTER TABLE {} DISABLE TRIGGER ALL",
            sanitize_table_name(table)
        ))
        .await?;

        self.drop_schema_objects(&tx, table, &constraints, &indexes)
            .await?;
        let rows_copied = self.write_table_data(&tx, source, plan, config).await?;
        self.restore_schema_objects(&tx, table, &indexes, &constraints)
            .await?;

        tx.batch_execute(&format!(
            "ALTER TABLE {} ENABLE TRIGGER ALL",
            sanitize_table_name(table)
        ))
        .await?;
        tx.commit().await?;

        let elapsed = started.elapsed();
        let rows_per_second = if elapsed.as_secs_f64() > 0.0 {
            (rows_copied as f64 / elapsed.as_secs_f64()) as i64
        } else {
            0
        };
        debug!(
            table = %table,
            rows_copied,
            elapsed = ?elapsed,
            rows_per_second,
            "table load committed"
        );
        Ok(rows_copied)
    }

    /// Drop the table's constraints, then its indexes, keeping primary keys
    /// and their backing unique indexes in place.
    async fn drop_schema_objects(
        &self,
        tx: &Transaction<'_>,
        table: &str,
        constraints: &[ConstraintInfo],
        indexes: &[IndexInfo],
    ) -> Result<()> {
        for constraint in constraints {
            if self.re_primary.is_match(&constraint.command) {
                debug!(command = %constraint.command, "keeping the primary key constraint");
                continue;
            }
            let drop_sql = format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                sanitize_table_name(table),
                quote_ident(&constraint.name)
            );
            info!(sql = %drop_sql, "dropping constraint");
            tx.batch_execute(&drop_sql).await?;
        }

        let (schema, _) = split_table_name(table);
        for index in indexes {
            if self.re_index.is_match(&index.def) {
                debug!(command = %index.def, "keeping the unique index");
                continue;
            }
            let drop_sql = if schema.is_empty() {
                format!("DROP INDEX IF EXISTS {}", quote_ident(&index.name))
            } else {
                format!(
                    "DROP INDEX IF EXISTS {}.{}",
                    quote_ident(schema),
                    quote_ident(&index.name)
                )
            };
            info!(sql = %drop_sql, "dropping index");
            tx.batch_execute(&drop_sql).await?;
        }
        Ok(())
    }

    /// Recreate the table's indexes, then its constraints, with the inverse
    /// of the drop-side skip rules.
    async fn restore_schema_objects(
        &self,
        tx: &Transaction<'_>,
        table: &str,
        indexes: &[IndexInfo],
        constraints: &[ConstraintInfo],
    ) -> Result<()> {
        for index in indexes {
            if self.re_index.is_match(&index.def) {
                debug!(command = %index.def, "skipping the retained unique index");
                continue;
            }
            info!(sql = %index.def, "restoring index");
            tx.batch_execute(&index.def).await?;
        }

        for constraint in constraints {
            let create_sql = format!(
                "ALTER TABLE {} ADD CONSTRAINT {} {}",
                sanitize_table_name(table),
                quote_ident(&constraint.name),
                constraint.command
            );
            if self.re_primary.is_match(&create_sql) || self.re_unique.is_match(&constraint.command)
            {
                debug!(command = %constraint.command, "skipping the retained constraint");
                continue;
            }
            info!(sql = %create_sql, "restoring constraint");
            tx.batch_execute(&create_sql).await?;
        }
        Ok(())
    }

    /// Enumerate the table's data files grouped by subfolder and copy each
    /// Parquet file. Every subfolder must carry a success marker.
    async fn write_table_data(
        &self,
        tx: &Transaction<'_>,
        source: &dyn Source,
        plan: &TablePlan,
        config: &Config,
    ) -> Result<i64> {
        if config.source.source_database.is_empty() {
            return Err(RestoreError::Config("source database is not set".to_string()));
        }
        let relative_path = format!("{}/{}", config.source.source_database, plan.table_name());
        let mut all_files = source.list_files_recursively(&relative_path)?;
        all_files.sort();

        // Group the files by their containing subfolder.
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for file in all_files {
            let subfolder = Path::new(&file)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            grouped.entry(subfolder).or_default().push(file);
        }

        let mut total = 0i64;
        for (subfolder, files) in &grouped {
            debug!(subfolder = %subfolder, "processing files in subfolder");

            let success_found = files
                .iter()
                .any(|file| matches!(base_name(file), "_success" | "_SUCCESS"));
            if !success_found {
                return Err(RestoreError::transfer(
                    plan.table_name(),
                    format!("missing _success file in subfolder: {}", subfolder),
                ));
            }

            for file in files {
                let base = base_name(file);
                if matches!(base, "_success" | "_SUCCESS") {
                    debug!("skipping the success marker");
                } else if base.ends_with(".parquet") {
                    debug!(file = %file, "processing file");
                    total += self.write_table_part(tx, source, plan, file).await?;
                } else {
                    warn!(file = %file, "skipping file with unsupported extension");
                }
            }
        }
        Ok(total)
    }

    /// Copy one Parquet file into the table and validate the row counts.
    async fn write_table_part(
        &self,
        tx: &Transaction<'_>,
        source: &dyn Source,
        plan: &TablePlan,
        relative_path: &str,
    ) -> Result<i64> {
        let file = source.get_file(relative_path)?;
        let transformer = RowTransformer::new(plan.columns().to_vec());
        let mut reader = ParquetRowReader::new(file, transformer);

        if reader.is_empty() {
            // Small partitioned tables legitimately produce empty shards.
            if let Some(e) = reader.take_error() {
                return Err(e);
            }
            debug!(file = %relative_path, "skipping empty Parquet file");
            return Ok(0);
        }

        let table = plan.table_name();
        let old_table_size = table_size(tx, table).await;
        if old_table_size < 0 {
            return Err(RestoreError::transfer(
                table,
                "failed to read the table row count before the load",
            ));
        }
        let file_row_count = reader.row_count();
        debug!(
            file = %relative_path,
            table = %table,
            old_table_size,
            file_row_count,
            "writing table part"
        );

        let copied = if plan.requires_csv() {
            // The binary protocol cannot carry these columns; see the plan.
            self.copy_from_csv(tx, plan, reader).await?
        } else {
            self.copy_from_binary(tx, plan, reader).await?
        };

        let new_table_size = table_size(tx, table).await;
        if new_table_size != old_table_size + file_row_count {
            return Err(RestoreError::RowCount {
                table: table.to_string(),
                expected: old_table_size + file_row_count,
                actual: new_table_size,
            });
        }
        Ok(copied)
    }

    /// Stream rows through the native binary COPY protocol.
    async fn copy_from_binary(
        &self,
        tx: &Transaction<'_>,
        plan: &TablePlan,
        mut reader: ParquetRowReader,
    ) -> Result<i64> {
        let table = plan.table_name();
        let copy_sql = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT binary)",
            sanitize_table_name(table),
            plan.quoted_column_list()
        );
        let sink = tx
            .copy_in(copy_sql.as_str())
            .await
            .map_err(|e| RestoreError::transfer(table, format!("initiating COPY: {}", e)))?;
        pin_mut!(sink);

        let columns = plan.columns();
        let mut buf = BytesMut::with_capacity(COPY_FLUSH_BYTES + 4 * 1024);
        write_binary_header(&mut buf);

        while reader.next().await {
            let row = reader.values();
            if row.len() != columns.len() {
                return Err(RestoreError::transfer(
                    table,
                    format!(
                        "row has {} values but the manifest declares {} columns",
                        row.len(),
                        columns.len()
                    ),
                ));
            }
            buf.put_i16(row.len() as i16);
            for (value, column) in row.iter().zip(columns) {
                write_binary_cell(&mut buf, value, column)?;
            }
            if buf.len() >= COPY_FLUSH_BYTES {
                sink.send(buf.split().freeze())
                    .await
                    .map_err(|e| RestoreError::transfer(table, format!("sending COPY data: {}", e)))?;
            }
        }
        if let Some(e) = reader.take_error() {
            return Err(e);
        }

        write_binary_trailer(&mut buf);
        sink.send(buf.split().freeze())
            .await
            .map_err(|e| RestoreError::transfer(table, format!("sending COPY data: {}", e)))?;
        let copied = sink
            .finish()
            .await
            .map_err(|e| RestoreError::transfer(table, format!("finishing COPY: {}", e)))?;
        Ok(copied as i64)
    }

    /// Stream rows through the CSV copy path via the placeholder bridge.
    async fn copy_from_csv(
        &self,
        tx: &Transaction<'_>,
        plan: &TablePlan,
        reader: ParquetRowReader,
    ) -> Result<i64> {
        let table = plan.table_name();
        let copy_sql = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT csv)",
            sanitize_table_name(table),
            plan.quoted_column_list()
        );
        let sink = tx
            .copy_in(copy_sql.as_str())
            .await
            .map_err(|e| RestoreError::transfer(table, format!("initiating CSV COPY: {}", e)))?;
        pin_mut!(sink);

        let cancel = CancellationToken::new();
        let mut csv_stream = spawn_csv_pipeline(reader, cancel.clone());
        let mut chunk = vec![0u8; COPY_READ_CHUNK];
        loop {
            let read = csv_stream.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            if let Err(e) = sink.send(Bytes::copy_from_slice(&chunk[..read])).await {
                cancel.cancel();
                return Err(RestoreError::transfer(
                    table,
                    format!("sending CSV COPY data: {}", e),
                ));
            }
        }
        let copied = sink
            .finish()
            .await
            .map_err(|e| RestoreError::transfer(table, format!("finishing CSV COPY: {}", e)))?;
        info!(table = %table, rows_copied = copied, "copied from CSV");
        Ok(copied as i64)
    }

    /// All user tables of the target database, schema-qualified.
    async fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| RestoreError::pool(e, "getting a connection for the table list"))?;
        let client: &Client = &conn;
        let started = Instant::now();
        let rows = client.query(queries::LIST_TABLES, &[]).await?;
        debug!(elapsed = ?started.elapsed(), "table list query executed");
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    /// Build the FK graph from the constraint catalog; only foreign-key
    /// constraints are retained, everything else is filtered out.
    async fn foreign_key_graph(&self) -> Result<FkGraph<FkRelation>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| RestoreError::pool(e, "getting a connection for the FK query"))?;
        let client: &Client = &conn;

        debug!("querying foreign keys");
        let started = Instant::now();
        let rows = client.query(queries::LIST_FKEYS, &[]).await?;
        debug!(elapsed = ?started.elapsed(), rows = rows.len(), "foreign keys query executed");

        let mut graph = FkGraph::new(rows.len());
        for row in &rows {
            let kind: i8 = row.get("constraint_type");
            let kind = char::from(kind as u8);
            if kind != 'f' {
                continue;
            }
            let relation = FkRelation {
                constraint_name: row.get("constraint_name"),
                constraint_kind: kind,
                self_schema: row.get("self_schema"),
                self_table: row.get("self_table"),
                self_columns: row
                    .get::<_, Option<String>>("self_columns")
                    .unwrap_or_default(),
                foreign_schema: row
                    .get::<_, Option<String>>("foreign_schema")
                    .unwrap_or_default(),
                foreign_table: row
                    .get::<_, Option<String>>("foreign_table")
                    .unwrap_or_default(),
                foreign_columns: row
                    .get::<_, Option<String>>("foreign_columns")
                    .unwrap_or_default(),
                definition: row.get("definition"),
            };

            let parent = format!("{}.{}", relation.self_schema, relation.self_table);
            let child = format!("{}.{}", relation.foreign_schema, relation.foreign_table);
            let index = match graph.index_of(&parent) {
                Some(index) => index,
                None => graph.add_node(&parent)?,
            };
            graph.node_mut(index).add_child(&child, relation);
        }
        debug!(
            nodes = graph.node_count(),
            names = graph.graph_size(),
            "foreign key graph built"
        );

        graph.calculate_in_degree();
        Ok(graph)
    }
}

/// Indexes of one table; unqualified names default to the public schema.
async fn index_list<C: GenericClient>(client: &C, table: &str) -> Result<Vec<IndexInfo>> {
    let (schema, bare) = split_table_name(table);
    let schema = if schema.is_empty() { "public" } else { schema };
    let rows = client
        .query(queries::FIND_INDEXES, &[&schema, &bare])
        .await?;
    Ok(rows
        .iter()
        .map(|row| IndexInfo {
            name: row.get(0),
            def: row.get(1),
        })
        .collect())
}

/// Constraints of one table.
async fn constraint_list<C: GenericClient>(client: &C, table: &str) -> Result<Vec<ConstraintInfo>> {
    let sanitized = sanitize_table_name(table);
    let rows = client
        .query(queries::FIND_CONSTRAINTS, &[&sanitized])
        .await?;
    Ok(rows
        .iter()
        .map(|row| ConstraintInfo {
            name: row.get(0),
            command: row.get(1),
        })
        .collect())
}

/// Row count of a table; -1 when the query fails. Callers validating
/// pre/post counts treat -1 as a hard error.
async fn table_size<C: GenericClient>(client: &C, table: &str) -> i64 {
    let query = format!("SELECT COUNT(*) FROM {}", sanitize_table_name(table));
    match client.query_one(query.as_str(), &[]).await {
        Ok(row) => row.get(0),
        Err(e) => {
            error!(table = %table, error = %e, "failed to fetch the table size");
            -1
        }
    }
}

/// Append tables that carry no FK relations to the tail of the order and
/// verify the combined list covers the whole database.
fn append_missing_tables(ordered: &mut Vec<String>, tables: &[String]) -> Result<()> {
    let known: HashSet<&str> = ordered.iter().map(String::as_str).collect();
    let missing: Vec<String> = tables
        .iter()
        .filter(|table| !known.contains(table.as_str()))
        .cloned()
        .collect();
    drop(known);
    ordered.extend(missing);

    if ordered.len() != tables.len() {
        return Err(RestoreError::Ordering(format!(
            "table count mismatch: sorted = {}, database = {}",
            ordered.len(),
            tables.len()
        )));
    }
    Ok(())
}

/// Verify that every referencing table comes strictly after every table it
/// references, self-references excepted.
fn validate_table_order<T>(order: &[String], graph: &FkGraph<T>) -> Result<()> {
    let positions: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(index, name)| (name.as_str(), index))
        .collect();

    let mut error_count = 0;
    for node in graph.nodes() {
        let Some(&parent_index) = positions.get(node.name.as_str()) else {
            warn!(parent = %node.name, "parent table not found in the order");
            continue;
        };
        for child in node.children.keys() {
            let Some(&child_index) = positions.get(child.as_str()) else {
                warn!(child = %child, "referenced table not found in the order");
                continue;
            };
            // Self-references are permitted.
            if parent_index <= child_index && node.name != *child {
                error_count += 1;
                error!(
                    parent = %node.name,
                    child = %child,
                    parent_index,
                    child_index,
                    "parent table is not ordered after its referenced table"
                );
            }
        }
    }
    if error_count > 0 {
        return Err(RestoreError::Ordering(format!(
            "table order validation failed with {} errors",
            error_count
        )));
    }
    Ok(())
}

fn base_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

/// Build the rustls client configuration for the requested ssl mode.
fn build_tls_config(ssl_mode: &str) -> Result<ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = match ssl_mode {
        "require" => {
            warn!("ssl_mode=require: TLS enabled but the server certificate is not verified.");
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth()
        }
        "verify-ca" | "verify-full" => {
            info!("ssl_mode={}: certificate verification enabled", ssl_mode);
            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        }
        other => {
            return Err(RestoreError::Config(format!(
                "Invalid ssl_mode '{}'. Valid options: disable, require, verify-ca, verify-full",
                other
            )));
        }
    };

    Ok(config)
}

/// Certificate verifier that accepts any server certificate.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn graph_from(edges: &[(&str, &[&str])]) -> FkGraph<&'static str> {
        let mut graph = FkGraph::new(10);
        for (name, children) in edges {
            let index = graph.add_node(name).unwrap();
            for child in *children {
                graph.node_mut(index).add_child(child, "");
            }
        }
        graph.calculate_in_degree();
        graph
    }

    #[test]
    fn test_append_missing_tables() {
        let mut ordered = strings(&["public.b", "public.a"]);
        let tables = strings(&["public.a", "public.b", "public.c", "public.d"]);
        append_missing_tables(&mut ordered, &tables).unwrap();
        assert_eq!(
            ordered,
            strings(&["public.b", "public.a", "public.c", "public.d"])
        );
    }

    #[test]
    fn test_append_missing_tables_count_mismatch() {
        // The order mentions a table the database does not have.
        let mut ordered = strings(&["public.ghost", "public.a"]);
        let tables = strings(&["public.a"]);
        assert!(append_missing_tables(&mut ordered, &tables).is_err());
    }

    #[test]
    fn test_validate_table_order_accepts_valid_order() {
        let graph = graph_from(&[("A", &["B"]), ("B", &["C"]), ("C", &[])]);
        let order = strings(&["C", "B", "A"]);
        assert!(validate_table_order(&order, &graph).is_ok());
    }

    #[test]
    fn test_validate_table_order_rejects_inverted_edge() {
        let graph = graph_from(&[("A", &["B"]), ("B", &[])]);
        let order = strings(&["A", "B"]);
        assert!(matches!(
            validate_table_order(&order, &graph),
            Err(RestoreError::Ordering(_))
        ));
    }

    #[test]
    fn test_validate_table_order_permits_self_reference() {
        let graph = graph_from(&[("A", &["A"])]);
        let order = strings(&["A"]);
        assert!(validate_table_order(&order, &graph).is_ok());
    }

    #[test]
    fn test_primary_key_pattern_matches_definitions() {
        let re = Regex::new(PRIMARY_KEY_PATTERN).unwrap();
        assert!(re.is_match("PRIMARY KEY (id)"));
        assert!(re.is_match("ALTER TABLE \"t\" ADD CONSTRAINT \"t_pkey\" PRIMARY KEY (id)"));
        assert!(!re.is_match("FOREIGN KEY (owner_id) REFERENCES users(id)"));
        assert!(!re.is_match("CHECK (price > 0)"));
    }

    #[test]
    fn test_unique_index_pattern_matches_pk_backing_index() {
        let re = Regex::new(UNIQUE_ID_INDEX_PATTERN).unwrap();
        assert!(re.is_match("CREATE UNIQUE INDEX users_pkey ON public.users USING btree (id)"));
        assert!(!re.is_match("CREATE INDEX users_name_idx ON public.users USING btree (name)"));
    }

    #[test]
    fn test_unique_constraint_pattern() {
        let re = Regex::new(UNIQUE_CONSTRAINT_PATTERN).unwrap();
        assert!(re.is_match("UNIQUE (email)"));
        assert!(!re.is_match("CHECK (price > 0)"));
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("appdb/public.users/part-0/_SUCCESS"), "_SUCCESS");
        assert_eq!(base_name("r0.parquet"), "r0.parquet");
    }
}
