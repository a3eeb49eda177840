//! End-to-end single-table load against a live PostgreSQL.
//!
//! Ignored by default: it needs a local PostgreSQL reachable with the
//! connection parameters below (override via PGHOST / PGPORT / PGUSER /
//! PGPASSWORD). The test creates its own database, loads five rows through
//! the binary copy path, validates the counts, and checks that the primary
//! key constraint survived the load.

use std::fs;
use std::sync::Arc;

use parquet::data_type::{ByteArray, ByteArrayType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;
use tempfile::TempDir;

use rds_pg_restore::{Config, LocalSource, RestoreRunner};

const SNAPSHOT: &str = "export-test-01";

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn write_rows_parquet(path: &std::path::Path, rows: &[(i64, &str)]) {
    let schema = Arc::new(
        parse_message_type(
            "message test_table { OPTIONAL INT64 id; OPTIONAL BYTE_ARRAY name (UTF8); }",
        )
        .unwrap(),
    );
    let props = Arc::new(WriterProperties::builder().build());
    let file = fs::File::create(path).unwrap();
    let mut writer = SerializedFileWriter::new(file, schema, props).unwrap();
    let mut group = writer.next_row_group().unwrap();

    let ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
    let defs = vec![1i16; rows.len()];
    let mut id_col = group.next_column().unwrap().unwrap();
    id_col
        .typed::<Int64Type>()
        .write_batch(&ids, Some(&defs), None)
        .unwrap();
    id_col.close().unwrap();

    let names: Vec<ByteArray> = rows.iter().map(|(_, name)| ByteArray::from(*name)).collect();
    let mut name_col = group.next_column().unwrap().unwrap();
    name_col
        .typed::<ByteArrayType>()
        .write_batch(&names, Some(&defs), None)
        .unwrap();
    name_col.close().unwrap();

    group.close().unwrap();
    writer.close().unwrap();
}

/// Lay out a minimal snapshot: summary manifest, per-range manifest, and one
/// Parquet shard with its success marker.
fn build_snapshot(root: &std::path::Path, database: &str) {
    fs::write(
        root.join(format!("export_info_{}.json", SNAPSHOT)),
        format!(
            r#"{{"exportTaskIdentifier": "{}", "status": "COMPLETE", "percentProgress": 100.0}}"#,
            SNAPSHOT
        ),
    )
    .unwrap();

    fs::write(
        root.join(format!("export_tables_info_{}_from_1_to_1.json", SNAPSHOT)),
        format!(
            r#"{{"perTableStatus": [{{
                "tableStatistics": {{"extractedRowCount": 5}},
                "status": "COMPLETE",
                "target": "{}.public.test_table",
                "schemaMetadata": {{"originalTypeMappings": [
                    {{"columnName": "id", "originalType": "bigint",
                      "expectedExportedType": "int64", "originalNumPrecision": 19}},
                    {{"columnName": "name", "originalType": "character varying",
                      "expectedExportedType": "binary (UTF8)", "originalCharMaxLength": 1000}}
                ]}}
            }}]}}"#,
            database
        ),
    )
    .unwrap();

    let data_dir = root.join(format!("{}/public.test_table/part-0", database));
    fs::create_dir_all(&data_dir).unwrap();
    write_rows_parquet(
        &data_dir.join("r0.parquet"),
        &[
            (72148587066687490, "Alice"),
            (72148596839153665, "Bob"),
            (72148675837231105, "Charlie"),
            (72148675837231106, "Dilan"),
            (72161148674375736, "Eve"),
        ],
    );
    fs::write(data_dir.join("_SUCCESS"), "").unwrap();
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL"]
async fn test_full_single_table_load() {
    let host = env_or("PGHOST", "localhost");
    let port: u16 = env_or("PGPORT", "5432").parse().unwrap();
    let user = env_or("PGUSER", "postgres");
    let password = env_or("PGPASSWORD", "postgres");

    // Administrative connection to create a scratch database.
    let admin_dsn = format!(
        "host={} port={} dbname=postgres user={} password={}",
        host, port, user, password
    );
    let (admin, admin_conn) = tokio_postgres::connect(&admin_dsn, tokio_postgres::NoTls)
        .await
        .unwrap();
    tokio::spawn(admin_conn);

    let test_db = format!("test_restore_{}", std::process::id());
    admin
        .batch_execute(&format!("CREATE DATABASE {}", test_db))
        .await
        .unwrap();

    let result = run_restore_in(&host, port, &user, &password, &test_db).await;

    admin
        .batch_execute(&format!("DROP DATABASE {} WITH (FORCE)", test_db))
        .await
        .unwrap();

    result.unwrap();
}

async fn run_restore_in(
    host: &str,
    port: u16,
    user: &str,
    password: &str,
    database: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let dsn = format!(
        "host={} port={} dbname={} user={} password={}",
        host, port, database, user, password
    );
    let (client, connection) = tokio_postgres::connect(&dsn, tokio_postgres::NoTls).await?;
    tokio::spawn(connection);

    client
        .batch_execute(
            "CREATE TABLE test_table (id BIGINT PRIMARY KEY, name VARCHAR(1000) NOT NULL)",
        )
        .await?;

    let dir = TempDir::new()?;
    let snapshot_root = dir.path().join(SNAPSHOT);
    fs::create_dir(&snapshot_root)?;
    build_snapshot(&snapshot_root, database);

    let mut config = Config::default();
    config.source.local_dir = Some(snapshot_root.to_string_lossy().into_owned());
    config.source.source_database = database.to_string();
    config.target.host = host.to_string();
    config.target.port = port;
    config.target.database = database.to_string();
    config.target.user = user.to_string();
    config.target.password = password.to_string();

    let source = LocalSource::new(&snapshot_root)?;
    let result = RestoreRunner::new(config).run(&source).await?;

    assert_eq!(result.tables_loaded, 1);
    assert_eq!(result.rows_loaded, 5);

    let count: i64 = client
        .query_one("SELECT COUNT(*) FROM test_table", &[])
        .await?
        .get(0);
    assert_eq!(count, 5);

    // The primary key constraint and its backing index must survive the load.
    let pk_exists: bool = client
        .query_one(
            "SELECT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'test_table_pkey')",
            &[],
        )
        .await?
        .get(0);
    assert!(pk_exists);
    let pk_index_exists: bool = client
        .query_one(
            "SELECT EXISTS (SELECT 1 FROM pg_indexes WHERE indexname = 'test_table_pkey')",
            &[],
        )
        .await?
        .get(0);
    assert!(pk_index_exists);

    Ok(())
}
