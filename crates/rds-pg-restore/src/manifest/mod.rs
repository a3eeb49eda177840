//! Snapshot manifest reading and validation.
//!
//! An exported snapshot carries a top-level `export_info_<snapshot>.json`
//! summary plus one or more `export_tables_info_<snapshot>_from_*.json`
//! per-range manifests. The summary must report a complete export; the
//! per-range manifests enumerate the tables, their column metadata, and any
//! warnings the exporter emitted.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;
use tracing::{debug, error};

use crate::config::Config;
use crate::error::{Result, RestoreError};
use crate::source::Source;

const STATUS_COMPLETE: &str = "COMPLETE";
const PROGRESS_TOLERANCE: f64 = 1e-6;

/// Column metadata from the manifest's `originalTypeMappings` list.
///
/// Column order is authoritative: it drives the copy column order.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub column_name: String,
    pub original_type: String,
    pub expected_exported_type: String,
    pub original_char_max_length: i32,
    pub original_num_precision: i32,
    pub original_date_time_precision: i32,
}

/// One table as described by the per-range manifests.
#[derive(Debug, Clone)]
pub struct TableManifest {
    /// Qualified table name with the database prefix already stripped.
    pub table_name: String,
    /// Manifest file the entry came from.
    pub manifest_path: PathBuf,
    /// Ordered column descriptors.
    pub columns: Vec<ColumnInfo>,
}

/// Reads and validates the snapshot manifests from the given [`Source`].
pub struct SourceReader<'a> {
    config: &'a Config,
    source: &'a dyn Source,
}

impl<'a> SourceReader<'a> {
    pub fn new(config: &'a Config, source: &'a dyn Source) -> Self {
        SourceReader { config, source }
    }

    /// List database instances (top-level subfolders) in the exported cluster.
    pub fn list_databases(&self) -> Result<Vec<String>> {
        self.source.list_files("", "*", true)
    }

    /// Validate the export summary and collect every table the snapshot holds.
    ///
    /// `database_tables` is the full list of tables in the target database;
    /// every one of them must be covered by the manifests unless its name
    /// matches an ignore prefix, and duplicates across manifests are errors.
    pub fn iterate_over_tables(&self, database_tables: &[String]) -> Result<Vec<TableManifest>> {
        let snapshot = self.source.snapshot_name().to_string();
        let info_name = format!("export_info_{}.json", snapshot);
        let info_file = self.source.get_file(&info_name)?;
        debug!(path = %info_file.local_path.display(), "reading export summary");
        let content = std::fs::read_to_string(&info_file.local_path);
        self.source.dispose(info_file);
        let data: Value = serde_json::from_str(&content?)?;

        self.check_export_info(&data, &snapshot, &info_name)?;

        let mask = format!("export_tables_info_{}_from_*.json", snapshot);
        let files = self.source.list_files("", &mask, false)?;
        if files.is_empty() {
            return Err(RestoreError::Manifest(format!(
                "no per-range manifests matching '{}' were found",
                mask
            )));
        }
        debug!(count = files.len(), "found per-range manifests");

        // Track which database tables the manifests cover.
        let mut table_map: HashMap<String, bool> = database_tables
            .iter()
            .map(|name| (name.clone(), false))
            .collect();

        let mut tables = Vec::new();
        for file in &files {
            tables.extend(self.process_file(file, &mut table_map)?);
        }

        let mut error_count = 0;
        for (table_name, present) in &table_map {
            if !present {
                if self.table_ignored(table_name) {
                    debug!(table = %table_name, "missing table is ignored");
                } else {
                    error!(table = %table_name, "table is missing in the source manifests");
                    error_count += 1;
                }
            }
        }
        if error_count > 0 {
            return Err(RestoreError::Manifest(format!(
                "{} tables of the target database are missing in the snapshot",
                error_count
            )));
        }

        Ok(tables)
    }

    fn check_export_info(&self, data: &Value, snapshot: &str, file: &str) -> Result<()> {
        let task = data
            .get("exportTaskIdentifier")
            .and_then(Value::as_str)
            .ok_or_else(|| missing_key(file, "exportTaskIdentifier"))?;
        if task != snapshot {
            return Err(RestoreError::Manifest(format!(
                "'exportTaskIdentifier' does not match the snapshot name: expected '{}', got '{}'",
                snapshot, task
            )));
        }

        let status = data
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| missing_key(file, "status"))?;
        if status != STATUS_COMPLETE {
            return Err(RestoreError::Manifest(format!(
                "'status' is '{}', expected '{}'",
                status, STATUS_COMPLETE
            )));
        }

        let progress = data
            .get("percentProgress")
            .and_then(Value::as_f64)
            .ok_or_else(|| missing_key(file, "percentProgress"))?;
        if (progress - 100.0).abs() > PROGRESS_TOLERANCE {
            return Err(RestoreError::Manifest(format!(
                "'percentProgress' is {}, expected 100",
                progress
            )));
        }
        Ok(())
    }

    /// Parse one per-range manifest into table entries.
    fn process_file(
        &self,
        relative_path: &str,
        table_map: &mut HashMap<String, bool>,
    ) -> Result<Vec<TableManifest>> {
        let file = self.source.get_file(relative_path)?;
        debug!(path = %file.local_path.display(), "reading per-range manifest");
        let content = std::fs::read_to_string(&file.local_path);
        let manifest_path = file.local_path.clone();
        self.source.dispose(file);
        let content = content?;

        // The file is a stream of JSON values; table objects sit either at the
        // top level or one collection below it.
        let mut entries = Vec::new();
        for value in serde_json::Deserializer::from_str(&content).into_iter::<Value>() {
            collect_entries(&value?, &mut entries);
        }

        let path_text = manifest_path.display().to_string();
        let mut tables = Vec::new();
        let mut error_count = 0;
        for entry in entries {
            if entry.get("warningMessage").is_some() {
                let target = entry.get("target").and_then(Value::as_str);
                if target != Some("postgres") {
                    return Err(RestoreError::Manifest(format!(
                        "file '{}': expected warning 'target' = 'postgres', got {:?}",
                        path_text, target
                    )));
                }
                continue;
            }
            if entry.get("tableStatistics").is_none() {
                continue;
            }

            let status = entry.get("status").and_then(Value::as_str);
            if status != Some(STATUS_COMPLETE) {
                return Err(RestoreError::Manifest(format!(
                    "file '{}': expected table 'status' = '{}', got {:?}",
                    path_text, STATUS_COMPLETE, status
                )));
            }
            let target = entry
                .get("target")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    RestoreError::Manifest(format!(
                        "file '{}': table 'target' is missing or empty",
                        path_text
                    ))
                })?;
            let mappings = entry
                .get("schemaMetadata")
                .and_then(|m| m.get("originalTypeMappings"))
                .and_then(Value::as_array)
                .filter(|list| !list.is_empty())
                .ok_or_else(|| {
                    RestoreError::Manifest(format!(
                        "file '{}': 'schemaMetadata.originalTypeMappings' is missing or empty",
                        path_text
                    ))
                })?;

            let columns = mappings
                .iter()
                .map(|m| parse_column(m, &path_text))
                .collect::<Result<Vec<_>>>()?;

            let table_name = remove_database_name(target)?;
            let column_count = columns.len();

            tables.push(TableManifest {
                table_name: table_name.clone(),
                manifest_path: manifest_path.clone(),
                columns,
            });

            match table_map.get(&table_name).copied() {
                Some(true) => {
                    error!(table = %table_name, "duplicate table in the source manifests");
                    error_count += 1;
                }
                Some(false) => {
                    debug!(table = %table_name, columns = column_count, "table found");
                    table_map.insert(table_name, true);
                }
                None => {
                    if self.table_ignored(&table_name) {
                        debug!(table = %table_name, "table is ignored");
                        table_map.insert(table_name, true);
                    } else {
                        error!(table = %table_name, "table is not present in the target database");
                        error_count += 1;
                    }
                }
            }
        }

        if error_count > 0 {
            return Err(RestoreError::Manifest(format!(
                "file '{}': {} errors found",
                path_text, error_count
            )));
        }
        Ok(tables)
    }

    /// Whether a table missing from the target database should be ignored.
    fn table_ignored(&self, table_name: &str) -> bool {
        for prefix in &self.config.restore.ignore_missing_table_prefixes {
            if prefix.contains('.') {
                // The prefix carries the schema name.
                if table_name.starts_with(prefix.as_str()) {
                    return true;
                }
            } else if table_name.contains(&format!(".{}", prefix)) {
                return true;
            }
        }
        false
    }
}

/// Build the error for an export summary missing a required top-level key.
fn missing_key(file: &str, key: &str) -> RestoreError {
    RestoreError::Manifest(format!("file '{}': missing or invalid '{}'", file, key))
}

/// Collect candidate manifest objects: at the top level, as array elements,
/// or inside arrays one level below the root object.
fn collect_entries(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::Object(map) => {
            if map.contains_key("warningMessage") || map.contains_key("tableStatistics") {
                out.push(value.clone());
                return;
            }
            for nested in map.values() {
                if let Value::Array(items) = nested {
                    for item in items {
                        if item.is_object() {
                            out.push(item.clone());
                        }
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                if item.is_object() {
                    out.push(item.clone());
                }
            }
        }
        _ => {}
    }
}

fn parse_column(value: &Value, file: &str) -> Result<ColumnInfo> {
    let get_str = |key: &str| -> Result<String> {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                RestoreError::Manifest(format!(
                    "file '{}': column entry is missing '{}': {}",
                    file, key, value
                ))
            })
    };

    Ok(ColumnInfo {
        column_name: get_str("columnName")?,
        original_type: get_str("originalType")?,
        expected_exported_type: value
            .get("expectedExportedType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        original_char_max_length: lenient_i32(value.get("originalCharMaxLength"), file)?,
        original_num_precision: lenient_i32(value.get("originalNumPrecision"), file)?,
        original_date_time_precision: lenient_i32(value.get("originalDateTimePrecision"), file)?,
    })
}

/// Integer manifest fields arrive as JSON numbers, floats, or strings.
fn lenient_i32(value: Option<&Value>, file: &str) -> Result<i32> {
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(|v| v as i32)
            .ok_or_else(|| {
                RestoreError::Manifest(format!("file '{}': invalid integer field: {}", file, n))
            }),
        Some(Value::String(s)) => s.trim().parse::<f64>().map(|f| f as i32).map_err(|_| {
            RestoreError::Manifest(format!("file '{}': invalid integer field: '{}'", file, s))
        }),
        Some(other) => Err(RestoreError::Manifest(format!(
            "file '{}': invalid integer field: {}",
            file, other
        ))),
    }
}

/// Strip the database name from a `database.schema.table` target string.
fn remove_database_name(target: &str) -> Result<String> {
    let dots = target.matches('.').count();
    if dots != 2 {
        return Err(RestoreError::Manifest(format!(
            "invalid table name format, expected 'database_name.schema_name.table_name', got '{}'",
            target
        )));
    }
    Ok(target
        .split_once('.')
        .map(|(_, rest)| rest.to_string())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::LocalSource;
    use std::fs;
    use tempfile::TempDir;

    const EXPORT_INFO: &str = r#"{
        "exportTaskIdentifier": "export-test-01",
        "status": "COMPLETE",
        "percentProgress": 100.0
    }"#;

    fn tables_info(target: &str) -> String {
        format!(
            r#"{{"perTableStatus": [
                {{"warningMessage": "skipped a view", "target": "postgres"}},
                {{
                    "tableStatistics": {{"extractedRowCount": 5}},
                    "status": "COMPLETE",
                    "target": "{target}",
                    "schemaMetadata": {{"originalTypeMappings": [
                        {{"columnName": "id", "originalType": "bigint",
                          "expectedExportedType": "int64",
                          "originalNumPrecision": "19", "originalDateTimePrecision": 0.0}},
                        {{"columnName": "name", "originalType": "character varying",
                          "expectedExportedType": "binary (UTF8)",
                          "originalCharMaxLength": 1000}}
                    ]}}
                }}
            ]}}"#
        )
    }

    fn snapshot_dir(target: &str) -> TempDir {
        let dir = TempDir::with_prefix("export-test-01-").unwrap();
        // The snapshot name is the folder name, so pin it with a subdirectory.
        let root = dir.path().join("export-test-01");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("export_info_export-test-01.json"), EXPORT_INFO).unwrap();
        fs::write(
            root.join("export_tables_info_export-test-01_from_1_to_96.json"),
            tables_info(target),
        )
        .unwrap();
        dir
    }

    fn config_with_ignores(prefixes: &[&str]) -> Config {
        let mut config = Config::default();
        config.restore.ignore_missing_table_prefixes =
            prefixes.iter().map(|s| s.to_string()).collect();
        config
    }

    #[test]
    fn test_iterate_over_tables() {
        let dir = snapshot_dir("appdb.public.users");
        let source = LocalSource::new(dir.path().join("export-test-01")).unwrap();
        let config = Config::default();
        let reader = SourceReader::new(&config, &source);

        let tables = reader
            .iterate_over_tables(&["public.users".to_string()])
            .unwrap();
        assert_eq!(tables.len(), 1);
        let table = &tables[0];
        assert_eq!(table.table_name, "public.users");
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.columns[0].column_name, "id");
        assert_eq!(table.columns[0].original_num_precision, 19);
        assert_eq!(table.columns[1].original_char_max_length, 1000);
        assert_eq!(table.columns[1].expected_exported_type, "binary (UTF8)");
    }

    #[test]
    fn test_missing_table_aborts() {
        let dir = snapshot_dir("appdb.public.users");
        let source = LocalSource::new(dir.path().join("export-test-01")).unwrap();
        let config = Config::default();
        let reader = SourceReader::new(&config, &source);

        let result = reader.iterate_over_tables(&[
            "public.users".to_string(),
            "public.orders".to_string(),
        ]);
        assert!(matches!(result, Err(RestoreError::Manifest(_))));
    }

    #[test]
    fn test_missing_table_with_ignore_prefix() {
        let dir = snapshot_dir("appdb.public.users");
        let source = LocalSource::new(dir.path().join("export-test-01")).unwrap();
        let config = config_with_ignores(&["orders_part"]);
        let reader = SourceReader::new(&config, &source);

        let tables = reader
            .iterate_over_tables(&[
                "public.users".to_string(),
                "public.orders_part_2024".to_string(),
            ])
            .unwrap();
        assert_eq!(tables.len(), 1);
    }

    #[test]
    fn test_manifest_table_absent_from_db_aborts() {
        let dir = snapshot_dir("appdb.public.ghost");
        let source = LocalSource::new(dir.path().join("export-test-01")).unwrap();
        let config = Config::default();
        let reader = SourceReader::new(&config, &source);

        let result = reader.iterate_over_tables(&["public.users".to_string()]);
        assert!(matches!(result, Err(RestoreError::Manifest(_))));
    }

    #[test]
    fn test_bad_export_info_status() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("export-test-01");
        fs::create_dir(&root).unwrap();
        fs::write(
            root.join("export_info_export-test-01.json"),
            r#"{"exportTaskIdentifier": "export-test-01", "status": "IN_PROGRESS", "percentProgress": 42.0}"#,
        )
        .unwrap();
        let source = LocalSource::new(&root).unwrap();
        let config = Config::default();
        let reader = SourceReader::new(&config, &source);

        let result = reader.iterate_over_tables(&[]);
        assert!(matches!(result, Err(RestoreError::Manifest(_))));
    }

    #[test]
    fn test_remove_database_name() {
        assert_eq!(
            remove_database_name("appdb.public.users").unwrap(),
            "public.users"
        );
        assert!(remove_database_name("public.users").is_err());
        assert!(remove_database_name("a.b.c.d").is_err());
    }

    #[test]
    fn test_lenient_integers() {
        assert_eq!(lenient_i32(Some(&Value::from(7)), "f").unwrap(), 7);
        assert_eq!(lenient_i32(Some(&Value::from(7.0)), "f").unwrap(), 7);
        assert_eq!(lenient_i32(Some(&Value::from("7")), "f").unwrap(), 7);
        assert_eq!(lenient_i32(Some(&Value::from("7.0")), "f").unwrap(), 7);
        assert_eq!(lenient_i32(None, "f").unwrap(), 0);
        assert_eq!(lenient_i32(Some(&Value::Null), "f").unwrap(), 0);
        assert!(lenient_i32(Some(&Value::from("x")), "f").is_err());
    }

    #[test]
    fn test_table_ignored_prefixes() {
        let config = config_with_ignores(&["public.audit", "tmp"]);
        let source_dir = TempDir::new().unwrap();
        let source = LocalSource::new(source_dir.path()).unwrap();
        let reader = SourceReader::new(&config, &source);

        // Prefix with a schema matches from the start of the name.
        assert!(reader.table_ignored("public.audit_log"));
        assert!(!reader.table_ignored("sales.audit_log"));
        // Prefix without a schema matches after the dot.
        assert!(reader.table_ignored("public.tmp_import"));
        assert!(!reader.table_ignored("public.users"));
    }
}
