//! Streaming row source over one Parquet file.
//!
//! A [`ParquetRowReader`] opens the file lazily on first use, then launches a
//! single background producer that walks row groups and rows, transforms each
//! cell through the [`RowTransformer`], and hands finished rows to the
//! consumer over a rendezvous channel. The consumer pulls with [`next`] /
//! [`values`], mirroring the bulk-copy row-source shape.
//!
//! [`next`]: ParquetRowReader::next
//! [`values`]: ParquetRowReader::values

use std::fs::File;
use std::sync::Arc;

use chrono::DateTime;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::{Field, Row};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::{Result, RestoreError};
use crate::manifest::ColumnInfo;
use crate::target::PgValue;

use super::FileInfo;

/// Transforms raw Parquet cells into target values using the manifest's
/// column descriptors, matched to file columns by position.
#[derive(Clone)]
pub struct RowTransformer {
    columns: Arc<Vec<ColumnInfo>>,
}

impl RowTransformer {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        RowTransformer {
            columns: Arc::new(columns),
        }
    }

    /// Transform a full row into target values, one per file column.
    pub fn transform_row(&self, row: &Row) -> Result<Vec<PgValue>> {
        let mut values = Vec::with_capacity(self.columns.len());
        for (index, (_, field)) in row.get_column_iter().enumerate() {
            let column = self.columns.get(index).ok_or_else(|| {
                RestoreError::Encoding(format!(
                    "row has more columns than the manifest declares ({})",
                    self.columns.len()
                ))
            })?;
            values.push(self.transform(field, column)?);
        }
        Ok(values)
    }

    /// Transform one cell according to the column's original SQL type.
    ///
    /// The accepted tags form a closed set; anything else is a fatal error,
    /// because silently coercing an unknown type would corrupt data.
    pub fn transform(&self, field: &Field, column: &ColumnInfo) -> Result<PgValue> {
        if matches!(field, Field::Null) {
            return Ok(PgValue::Null);
        }
        match column.original_type.as_str() {
            "boolean" => match field {
                Field::Bool(b) => Ok(PgValue::Bool(*b)),
                other => Err(self.mismatch(column, other)),
            },
            "bigint" => match field {
                Field::Long(v) => Ok(PgValue::I64(*v)),
                Field::Int(v) => Ok(PgValue::I64(i64::from(*v))),
                Field::Short(v) => Ok(PgValue::I64(i64::from(*v))),
                Field::Byte(v) => Ok(PgValue::I64(i64::from(*v))),
                other => Err(self.mismatch(column, other)),
            },
            // There is no 16-bit value in the mapping; smallint rides in
            // 32 bits and is assumed not to overflow.
            "integer" | "smallint" => match field {
                Field::Int(v) => Ok(PgValue::I32(*v)),
                Field::Short(v) => Ok(PgValue::I32(i32::from(*v))),
                Field::Byte(v) => Ok(PgValue::I32(i32::from(*v))),
                other => Err(self.mismatch(column, other)),
            },
            "double precision" => match field {
                Field::Double(v) => Ok(PgValue::F64(*v)),
                Field::Float(v) => Ok(PgValue::F64(f64::from(*v))),
                other => Err(self.mismatch(column, other)),
            },
            "real" => match field {
                Field::Float(v) => Ok(PgValue::F32(*v)),
                other => Err(self.mismatch(column, other)),
            },
            "numeric"
            | "character varying"
            | "text"
            | "timestamp without time zone"
            | "date"
            | "jsonb"
            | "ARRAY" => Ok(PgValue::Text(field_text(field)?)),
            "USER-DEFINED" if column.expected_exported_type == "binary (UTF8)" => {
                Ok(PgValue::Text(field_text(field)?))
            }
            other => Err(RestoreError::UnknownType {
                column: column.column_name.clone(),
                type_tag: other.to_string(),
            }),
        }
    }

    fn mismatch(&self, column: &ColumnInfo, field: &Field) -> RestoreError {
        RestoreError::Encoding(format!(
            "column {} is declared '{}' but the file holds {:?}",
            column.column_name, column.original_type, field
        ))
    }
}

/// Render a Parquet cell as the string PostgreSQL expects for the column.
fn field_text(field: &Field) -> Result<String> {
    match field {
        Field::Str(s) => Ok(s.clone()),
        Field::Bytes(b) => Ok(String::from_utf8_lossy(b.data()).into_owned()),
        Field::Bool(b) => Ok(b.to_string()),
        Field::Byte(v) => Ok(v.to_string()),
        Field::Short(v) => Ok(v.to_string()),
        Field::Int(v) => Ok(v.to_string()),
        Field::Long(v) => Ok(v.to_string()),
        Field::UByte(v) => Ok(v.to_string()),
        Field::UShort(v) => Ok(v.to_string()),
        Field::UInt(v) => Ok(v.to_string()),
        Field::ULong(v) => Ok(v.to_string()),
        Field::Float(v) => Ok(v.to_string()),
        Field::Double(v) => Ok(v.to_string()),
        Field::Date(days) => {
            let date = DateTime::from_timestamp(i64::from(*days) * 86_400, 0)
                .ok_or_else(|| RestoreError::Encoding(format!("date out of range: {}", days)))?;
            Ok(date.date_naive().format("%Y-%m-%d").to_string())
        }
        Field::TimestampMillis(ms) => {
            let ts = DateTime::from_timestamp_millis(*ms)
                .ok_or_else(|| RestoreError::Encoding(format!("timestamp out of range: {}", ms)))?;
            Ok(ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string())
        }
        Field::TimestampMicros(us) => {
            let ts = DateTime::from_timestamp_micros(*us)
                .ok_or_else(|| RestoreError::Encoding(format!("timestamp out of range: {}", us)))?;
            Ok(ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string())
        }
        Field::Decimal(d) => decimal_text(d),
        other => Err(RestoreError::Encoding(format!(
            "unsupported Parquet value: {:?}",
            other
        ))),
    }
}

/// Plain decimal string from a Parquet decimal's big-endian unscaled bytes.
fn decimal_text(d: &parquet::data_type::Decimal) -> Result<String> {
    let bytes = d.data();
    if bytes.is_empty() || bytes.len() > 16 {
        return Err(RestoreError::Encoding(format!(
            "decimal with {} bytes is out of range",
            bytes.len()
        )));
    }
    let negative = bytes[0] & 0x80 != 0;
    let mut wide = if negative { [0xFFu8; 16] } else { [0u8; 16] };
    wide[16 - bytes.len()..].copy_from_slice(bytes);
    let unscaled = i128::from_be_bytes(wide);

    let scale = d.scale().max(0) as usize;
    if scale == 0 {
        return Ok(unscaled.to_string());
    }
    let magnitude = unscaled.unsigned_abs().to_string();
    let padded = format!("{:0>width$}", magnitude, width = scale + 1);
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);
    let sign = if unscaled < 0 { "-" } else { "" };
    Ok(format!("{}{}.{}", sign, int_part, frac_part))
}

/// Row sent from the producer: a transformed row or the error that ended it.
type NextRow = std::result::Result<Vec<PgValue>, RestoreError>;

/// Pull-based row stream over one Parquet file.
///
/// Single-use: once the stream reaches its end (or fails) it cannot be
/// reopened. A file with zero rows is not an error; [`is_empty`] reports it
/// and the loader skips the file.
///
/// [`is_empty`]: ParquetRowReader::is_empty
pub struct ParquetRowReader {
    file_info: FileInfo,
    transformer: RowTransformer,
    is_open: bool,
    was_closed: bool,
    last_error: Option<RestoreError>,
    row_count: i64,
    row_counter: i64,
    rows: Option<mpsc::Receiver<NextRow>>,
    current: Vec<PgValue>,
}

impl ParquetRowReader {
    pub fn new(file_info: FileInfo, transformer: RowTransformer) -> Self {
        ParquetRowReader {
            file_info,
            transformer,
            is_open: false,
            was_closed: false,
            last_error: None,
            row_count: 0,
            row_counter: 0,
            rows: None,
            current: Vec::new(),
        }
    }

    /// True when the file has zero rows or opening it already failed.
    pub fn is_empty(&mut self) -> bool {
        self.open_if_needed();
        self.row_count <= 0 || self.last_error.is_some()
    }

    /// Advance to the next row. Returns false at end of data or on error.
    pub async fn next(&mut self) -> bool {
        self.open_if_needed();
        if self.last_error.is_some() {
            return false;
        }
        let Some(rows) = self.rows.as_mut() else {
            return false;
        };
        match rows.recv().await {
            None => {
                self.was_closed = true;
                false
            }
            Some(Err(e)) => {
                self.last_error = Some(e);
                false
            }
            Some(Ok(row)) => {
                self.current = row;
                self.row_counter += 1;
                true
            }
        }
    }

    /// The current row, in file-schema column order.
    pub fn values(&self) -> &[PgValue] {
        &self.current
    }

    /// The most recent terminal error, if any.
    pub fn err(&self) -> Option<&RestoreError> {
        self.last_error.as_ref()
    }

    /// Take the terminal error for propagation.
    pub fn take_error(&mut self) -> Option<RestoreError> {
        self.last_error.take()
    }

    /// Total number of rows declared by the file metadata.
    pub fn row_count(&self) -> i64 {
        self.row_count
    }

    /// Number of rows delivered so far.
    pub fn rows_read(&self) -> i64 {
        self.row_counter
    }

    /// Open the file, read its metadata, and launch the producer.
    fn open_if_needed(&mut self) {
        if self.last_error.is_some() || self.is_open || self.was_closed {
            return;
        }
        self.is_open = true;
        match self.open_and_start() {
            Ok(()) => {}
            Err(e) => self.last_error = Some(e),
        }
    }

    fn open_and_start(&mut self) -> Result<()> {
        let path = &self.file_info.local_path;
        let file = File::open(path).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("failed to open file '{}': {}", path.display(), e),
            )
        })?;
        let reader = SerializedFileReader::new(file)?;
        self.row_count = reader.metadata().file_metadata().num_rows();
        debug!(path = %path.display(), rows = self.row_count, "opened Parquet file");
        if self.row_count == 0 {
            return Ok(());
        }

        // The producer owns the reader (and through it the file handle); both
        // are released when the closure exits, on every path.
        let (tx, rx) = mpsc::channel::<NextRow>(1);
        let transformer = self.transformer.clone();
        tokio::task::spawn_blocking(move || {
            produce_rows(reader, transformer, tx);
        });
        self.rows = Some(rx);
        Ok(())
    }
}

/// Walk row groups, then rows within each group, transforming each cell and
/// handing finished rows to the consumer. Closing the channel signals end of
/// data; an error is sent, then the channel closes.
fn produce_rows(
    reader: SerializedFileReader<File>,
    transformer: RowTransformer,
    tx: mpsc::Sender<NextRow>,
) {
    for group_index in 0..reader.num_row_groups() {
        let group = match reader.get_row_group(group_index) {
            Ok(group) => group,
            Err(e) => {
                let _ = tx.blocking_send(Err(e.into()));
                return;
            }
        };
        let rows = match group.get_row_iter(None) {
            Ok(rows) => rows,
            Err(e) => {
                let _ = tx.blocking_send(Err(e.into()));
                return;
            }
        };
        for row in rows {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    error!(error = %e, "error reading row");
                    let _ = tx.blocking_send(Err(e.into()));
                    return;
                }
            };
            let values = match transformer.transform_row(&row) {
                Ok(values) => values,
                Err(e) => {
                    error!(error = %e, "error transforming row");
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            };
            if tx.blocking_send(Ok(values)).is_err() {
                // The consumer went away; stop and release the file.
                debug!("row consumer dropped, stopping the producer");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;

    use parquet::data_type::{ByteArray, ByteArrayType, Int64Type};
    use parquet::file::properties::WriterProperties;
    use parquet::file::writer::SerializedFileWriter;
    use parquet::schema::parser::parse_message_type;
    use tempfile::TempDir;

    fn column(name: &str, original_type: &str) -> ColumnInfo {
        ColumnInfo {
            column_name: name.to_string(),
            original_type: original_type.to_string(),
            expected_exported_type: String::new(),
            original_char_max_length: 0,
            original_num_precision: 0,
            original_date_time_precision: 0,
        }
    }

    /// Write a two-column file: OPTIONAL INT64 id, OPTIONAL BYTE_ARRAY name.
    fn write_sample_file(path: &Path, ids: &[i64], names: &[Option<&str>]) {
        let schema = Arc::new(
            parse_message_type(
                "message test { OPTIONAL INT64 id; OPTIONAL BYTE_ARRAY name (UTF8); }",
            )
            .unwrap(),
        );
        let props = Arc::new(WriterProperties::builder().build());
        let file = std::fs::File::create(path).unwrap();
        let mut writer = SerializedFileWriter::new(file, schema, props).unwrap();

        if !ids.is_empty() {
            let mut group = writer.next_row_group().unwrap();

            let mut id_col = group.next_column().unwrap().unwrap();
            let id_defs = vec![1i16; ids.len()];
            id_col
                .typed::<Int64Type>()
                .write_batch(ids, Some(&id_defs), None)
                .unwrap();
            id_col.close().unwrap();

            let mut name_col = group.next_column().unwrap().unwrap();
            let name_values: Vec<ByteArray> = names
                .iter()
                .flatten()
                .map(|s| ByteArray::from(*s))
                .collect();
            let name_defs: Vec<i16> = names.iter().map(|n| i16::from(n.is_some())).collect();
            name_col
                .typed::<ByteArrayType>()
                .write_batch(&name_values, Some(&name_defs), None)
                .unwrap();
            name_col.close().unwrap();

            group.close().unwrap();
        }
        writer.close().unwrap();
    }

    fn reader_for(path: &Path, columns: Vec<ColumnInfo>) -> ParquetRowReader {
        let info = FileInfo {
            relative_path: path.to_path_buf(),
            local_path: path.to_path_buf(),
            size: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            temp: false,
        };
        ParquetRowReader::new(info, RowTransformer::new(columns))
    }

    #[tokio::test]
    async fn test_reads_all_rows_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.parquet");
        write_sample_file(&path, &[1, 2, 3], &[Some("Alice"), Some("Bob"), None]);

        let columns = vec![column("id", "bigint"), column("name", "character varying")];
        let mut reader = reader_for(&path, columns);

        assert!(!reader.is_empty());
        assert_eq!(reader.row_count(), 3);

        let mut seen = Vec::new();
        while reader.next().await {
            seen.push(reader.values().to_vec());
        }
        assert!(reader.err().is_none());
        assert_eq!(reader.rows_read(), 3);
        assert_eq!(
            seen,
            vec![
                vec![PgValue::I64(1), PgValue::Text("Alice".to_string())],
                vec![PgValue::I64(2), PgValue::Text("Bob".to_string())],
                vec![PgValue::I64(3), PgValue::Null],
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.parquet");
        write_sample_file(&path, &[], &[]);

        let columns = vec![column("id", "bigint"), column("name", "character varying")];
        let mut reader = reader_for(&path, columns);

        assert!(reader.is_empty());
        assert!(reader.err().is_none());
        assert_eq!(reader.row_count(), 0);
        assert!(!reader.next().await);
    }

    #[tokio::test]
    async fn test_missing_file_reports_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.parquet");
        let mut reader = reader_for(&path, vec![column("id", "bigint")]);

        assert!(reader.is_empty());
        assert!(reader.err().is_some());
    }

    #[tokio::test]
    async fn test_unknown_type_tag_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.parquet");
        write_sample_file(&path, &[1], &[Some("x")]);

        let columns = vec![column("id", "bigint"), column("name", "uuid")];
        let mut reader = reader_for(&path, columns);

        assert!(!reader.next().await);
        assert!(matches!(
            reader.err(),
            Some(RestoreError::UnknownType { type_tag, .. }) if type_tag == "uuid"
        ));
    }

    #[test]
    fn test_transform_fixed_mapping() {
        let transformer = RowTransformer::new(Vec::new());
        let cases = [
            (Field::Bool(true), "boolean", PgValue::Bool(true)),
            (Field::Long(9), "bigint", PgValue::I64(9)),
            (Field::Int(7), "integer", PgValue::I32(7)),
            (Field::Int(7), "smallint", PgValue::I32(7)),
            (Field::Double(1.5), "double precision", PgValue::F64(1.5)),
            (Field::Float(0.5), "real", PgValue::F32(0.5)),
            (
                Field::Str("12.34".to_string()),
                "numeric",
                PgValue::Text("12.34".to_string()),
            ),
            (
                Field::Str("{\"a\":1}".to_string()),
                "jsonb",
                PgValue::Text("{\"a\":1}".to_string()),
            ),
        ];
        for (field, tag, expected) in cases {
            let result = transformer.transform(&field, &column("c", tag)).unwrap();
            assert_eq!(result, expected, "tag {}", tag);
        }
    }

    #[test]
    fn test_transform_null_is_always_null() {
        let transformer = RowTransformer::new(Vec::new());
        for tag in ["boolean", "bigint", "text", "USER-DEFINED"] {
            let result = transformer.transform(&Field::Null, &column("c", tag)).unwrap();
            assert_eq!(result, PgValue::Null);
        }
    }

    #[test]
    fn test_transform_user_defined_requires_utf8() {
        let transformer = RowTransformer::new(Vec::new());
        let mut col = column("tags", "USER-DEFINED");
        assert!(matches!(
            transformer.transform(&Field::Str("a=>1".to_string()), &col),
            Err(RestoreError::UnknownType { .. })
        ));
        col.expected_exported_type = "binary (UTF8)".to_string();
        assert_eq!(
            transformer
                .transform(&Field::Str("a=>1".to_string()), &col)
                .unwrap(),
            PgValue::Text("a=>1".to_string())
        );
    }

    #[test]
    fn test_transform_type_mismatch() {
        let transformer = RowTransformer::new(Vec::new());
        assert!(matches!(
            transformer.transform(&Field::Str("x".to_string()), &column("c", "boolean")),
            Err(RestoreError::Encoding(_))
        ));
    }

    #[test]
    fn test_field_text_date_and_timestamp() {
        assert_eq!(field_text(&Field::Date(1)).unwrap(), "1970-01-02");
        assert_eq!(
            field_text(&Field::TimestampMicros(1_000_002)).unwrap(),
            "1970-01-01 00:00:01.000002"
        );
        assert_eq!(
            field_text(&Field::TimestampMillis(1_500)).unwrap(),
            "1970-01-01 00:00:01.500"
        );
    }

    #[test]
    fn test_decimal_text() {
        let decimal = parquet::data_type::Decimal::from_bytes(
            ByteArray::from(vec![0x30, 0x39]), // 12345
            9,
            2,
        );
        assert_eq!(decimal_text(&decimal).unwrap(), "123.45");

        let negative = parquet::data_type::Decimal::from_bytes(
            ByteArray::from(vec![0xFF, 0x85]), // -123
            9,
            1,
        );
        assert_eq!(decimal_text(&negative).unwrap(), "-12.3");
    }
}
