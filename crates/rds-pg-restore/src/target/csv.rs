//! CSV bridge between the row stream and the bulk-copy protocol.
//!
//! PostgreSQL's CSV copy mode reads an unquoted empty field as NULL and a
//! quoted empty field (`""`) as an empty string. The csv writer never quotes
//! an empty field on its own, so empty strings would silently collapse into
//! NULLs. The bridge therefore writes a placeholder byte for every empty
//! string and a second stage rewrites each placeholder into `""` on the way
//! out.
//!
//! The placeholder is the ASCII Delete control character: it is not printable
//! and must never occur in legitimate input. Cells are checked, and a cell
//! that does contain it is rejected rather than silently corrupted.

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{Result, RestoreError};
use crate::source::ParquetRowReader;
use crate::target::PgValue;

/// Placeholder standing in for an empty string until the substitution stage.
pub const EMPTY_STRING_PLACEHOLDER: u8 = 0x7F;

/// In-memory pipe capacity between the pipeline stages.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Read-chunk size of the substitution stage.
const SCAN_CHUNK: usize = 1024;

/// Encode one row as a CSV record.
///
/// NULL becomes an unquoted empty field; an empty string (or any value whose
/// rendering is empty) becomes the placeholder byte, later rewritten to `""`.
pub fn encode_csv_record(values: &[PgValue]) -> Result<Vec<u8>> {
    let placeholder = char::from(EMPTY_STRING_PLACEHOLDER).to_string();
    let mut record = Vec::with_capacity(values.len());
    for value in values {
        match value.render() {
            None => record.push(String::new()),
            Some(text) => {
                if text.as_bytes().contains(&EMPTY_STRING_PLACEHOLDER) {
                    return Err(RestoreError::Encoding(format!(
                        "cell contains the reserved placeholder byte 0x7F: {:?}",
                        text
                    )));
                }
                record.push(if text.is_empty() { placeholder.clone() } else { text });
            }
        }
    }

    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(&record)?;
    writer
        .into_inner()
        .map_err(|e| RestoreError::Encoding(format!("flushing the CSV record failed: {}", e)))
}

/// Replace every placeholder byte with the two-byte sequence `""`.
pub fn substitute_placeholder(chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunk.len());
    for &byte in chunk {
        if byte == EMPTY_STRING_PLACEHOLDER {
            out.extend_from_slice(b"\"\"");
        } else {
            out.push(byte);
        }
    }
    out
}

/// Stream the row sequence into bulk-copy-ready CSV bytes.
///
/// Two producer tasks joined by two in-memory pipes: the first drains the row
/// stream and writes raw CSV, the second rewrites placeholders and feeds the
/// returned read end, which the copy command consumes. Cancelling the token
/// closes both pipes and drops in-flight work; a row-stream error ends the
/// stream early, which the caller's row-count validation surfaces.
pub fn spawn_csv_pipeline(
    mut reader: ParquetRowReader,
    cancel: CancellationToken,
) -> DuplexStream {
    let (mut raw_writer, mut raw_reader) = tokio::io::duplex(PIPE_CAPACITY);
    let (mut out_writer, out_reader) = tokio::io::duplex(PIPE_CAPACITY);

    let encode_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = encode_cancel.cancelled() => {
                    debug!("CSV encoding stage cancelled");
                    break;
                }
                has_row = reader.next() => {
                    if !has_row {
                        if let Some(e) = reader.err() {
                            error!(error = %e, "row stream failed inside the CSV bridge");
                        }
                        break;
                    }
                    let bytes = match encode_csv_record(reader.values()) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            error!(error = %e, "failed to encode a CSV record");
                            break;
                        }
                    };
                    if raw_writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
            }
        }
        // Dropping the writer closes the first pipe and ends stage two.
    });

    tokio::spawn(async move {
        let mut chunk = [0u8; SCAN_CHUNK];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("CSV substitution stage cancelled");
                    break;
                }
                read = raw_reader.read(&mut chunk) => {
                    match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let processed = substitute_placeholder(&chunk[..n]);
                            if out_writer.write_all(&processed).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
    });

    out_reader
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> PgValue {
        PgValue::Text(s.to_string())
    }

    fn encode_rows(rows: &[Vec<PgValue>]) -> String {
        let mut out = Vec::new();
        for row in rows {
            out.extend(encode_csv_record(row).unwrap());
        }
        String::from_utf8(substitute_placeholder(&out)).unwrap()
    }

    #[test]
    fn test_null_vs_empty_string_round_trip() {
        let rows = vec![
            vec![PgValue::I64(1), text("Alice"), PgValue::Null],
            vec![PgValue::I64(2), text("Bob"), text("")],
            vec![PgValue::I64(3), PgValue::Null, PgValue::Null],
            vec![PgValue::I64(4), text(""), text("Empty Description")],
            vec![PgValue::I64(5), PgValue::Null, text("one,two")],
        ];
        assert_eq!(
            encode_rows(&rows),
            "1,Alice,\n2,Bob,\"\"\n3,,\n4,\"\",Empty Description\n5,,\"one,two\"\n"
        );
    }

    #[test]
    fn test_quotes_are_escaped() {
        let rows = vec![vec![text("say \"hi\"")]];
        assert_eq!(encode_rows(&rows), "\"say \"\"hi\"\"\"\n");
    }

    #[test]
    fn test_placeholder_in_input_is_rejected() {
        let result = encode_csv_record(&[text("bad\u{7f}cell")]);
        assert!(matches!(result, Err(RestoreError::Encoding(_))));
    }

    #[test]
    fn test_substitute_placeholder_spans_values() {
        let input = [b'a', EMPTY_STRING_PLACEHOLDER, b',', EMPTY_STRING_PLACEHOLDER];
        assert_eq!(substitute_placeholder(&input), b"a\"\",\"\"");
    }

    #[tokio::test]
    async fn test_pipeline_streams_and_substitutes() {
        use parquet::data_type::{ByteArray, ByteArrayType, Int64Type};
        use parquet::file::properties::WriterProperties;
        use parquet::file::writer::SerializedFileWriter;
        use parquet::schema::parser::parse_message_type;
        use std::sync::Arc;
        use tokio::io::AsyncReadExt;

        use crate::manifest::ColumnInfo;
        use crate::source::{FileInfo, RowTransformer};

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rows.parquet");

        let schema = Arc::new(
            parse_message_type(
                "message test { OPTIONAL INT64 id; OPTIONAL BYTE_ARRAY name (UTF8); }",
            )
            .unwrap(),
        );
        let props = Arc::new(WriterProperties::builder().build());
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = SerializedFileWriter::new(file, schema, props).unwrap();
        let mut group = writer.next_row_group().unwrap();
        let mut id_col = group.next_column().unwrap().unwrap();
        id_col
            .typed::<Int64Type>()
            .write_batch(&[1, 2], Some(&[1, 1]), None)
            .unwrap();
        id_col.close().unwrap();
        let mut name_col = group.next_column().unwrap().unwrap();
        name_col
            .typed::<ByteArrayType>()
            .write_batch(&[ByteArray::from("")], Some(&[1, 0]), None)
            .unwrap();
        name_col.close().unwrap();
        group.close().unwrap();
        writer.close().unwrap();

        let columns = vec![
            ColumnInfo {
                column_name: "id".to_string(),
                original_type: "bigint".to_string(),
                expected_exported_type: String::new(),
                original_char_max_length: 0,
                original_num_precision: 0,
                original_date_time_precision: 0,
            },
            ColumnInfo {
                column_name: "name".to_string(),
                original_type: "character varying".to_string(),
                expected_exported_type: String::new(),
                original_char_max_length: 0,
                original_num_precision: 0,
                original_date_time_precision: 0,
            },
        ];
        let info = FileInfo {
            relative_path: path.clone(),
            local_path: path.clone(),
            size: 0,
            temp: false,
        };
        let reader = ParquetRowReader::new(info, RowTransformer::new(columns));

        let mut output = spawn_csv_pipeline(reader, CancellationToken::new());
        let mut bytes = Vec::new();
        output.read_to_end(&mut bytes).await.unwrap();

        // Row 1 has an empty string, row 2 a NULL.
        assert_eq!(String::from_utf8(bytes).unwrap(), "1,\"\"\n2,\n");
    }
}
