//! Cell values and their encodings for the bulk-copy protocol.
//!
//! The Row Source produces one [`PgValue`] per cell. Numeric, timestamp,
//! date, and jsonb cells travel as their string representation and are turned
//! into the PostgreSQL binary wire format only here, using the column's
//! declared original type. Keeping `numeric` on the text path end to end
//! avoids any float round-trip.

use bytes::{BufMut, BytesMut};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use crate::error::{Result, RestoreError};
use crate::manifest::ColumnInfo;

/// A single cell value on its way into the target database.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    /// Also carries 16-bit integers; overflow is assumed absent.
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// String representation as stored in the file.
    Text(String),
}

impl PgValue {
    /// Render the cell for the CSV copy path. `None` means SQL NULL.
    pub fn render(&self) -> Option<String> {
        match self {
            PgValue::Null => None,
            PgValue::Bool(b) => Some(b.to_string()),
            PgValue::I32(v) => Some(v.to_string()),
            PgValue::I64(v) => Some(v.to_string()),
            PgValue::F32(v) => Some(v.to_string()),
            PgValue::F64(v) => Some(v.to_string()),
            PgValue::Text(s) => Some(s.clone()),
        }
    }
}

/// Write the PGCOPY binary signature, flags, and extension header.
pub fn write_binary_header(buf: &mut BytesMut) {
    buf.put_slice(b"PGCOPY\n\xff\r\n\0");
    buf.put_i32(0); // flags
    buf.put_i32(0); // extension area length
}

/// Write the PGCOPY end-of-data trailer.
pub fn write_binary_trailer(buf: &mut BytesMut) {
    buf.put_i16(-1);
}

/// Encode one cell as a length-prefixed binary COPY field.
///
/// Text cells are dispatched on the column's original type: `numeric` through
/// the exact NUMERIC wire format, timestamps and dates through the
/// 2000-01-01 epoch, `jsonb` with its version byte, everything else (array
/// literals included) as raw UTF-8. Columns typed `USER-DEFINED` never take
/// the binary path.
pub fn write_binary_cell(buf: &mut BytesMut, value: &PgValue, column: &ColumnInfo) -> Result<()> {
    match value {
        PgValue::Null => {
            buf.put_i32(-1);
        }
        PgValue::Bool(b) => {
            buf.put_i32(1);
            buf.put_u8(u8::from(*b));
        }
        PgValue::I32(v) => {
            if column.original_type == "smallint" {
                buf.put_i32(2);
                buf.put_i16(*v as i16);
            } else {
                buf.put_i32(4);
                buf.put_i32(*v);
            }
        }
        PgValue::I64(v) => {
            buf.put_i32(8);
            buf.put_i64(*v);
        }
        PgValue::F32(v) => {
            buf.put_i32(4);
            buf.put_f32(*v);
        }
        PgValue::F64(v) => {
            buf.put_i32(8);
            buf.put_f64(*v);
        }
        PgValue::Text(s) => match column.original_type.as_str() {
            "numeric" => {
                let decimal: Decimal = s.trim().parse().map_err(|e| {
                    RestoreError::Encoding(format!(
                        "column {}: cannot parse '{}' as numeric: {}",
                        column.column_name, s, e
                    ))
                })?;
                encode_numeric_binary(buf, &decimal);
            }
            "timestamp without time zone" => {
                let timestamp = parse_timestamp(s).ok_or_else(|| {
                    RestoreError::Encoding(format!(
                        "column {}: cannot parse '{}' as timestamp",
                        column.column_name, s
                    ))
                })?;
                let micros = (timestamp - pg_epoch()).num_microseconds().unwrap_or(0);
                buf.put_i32(8);
                buf.put_i64(micros);
            }
            "date" => {
                let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| {
                    RestoreError::Encoding(format!(
                        "column {}: cannot parse '{}' as date: {}",
                        column.column_name, s, e
                    ))
                })?;
                let days = (date - pg_epoch().date()).num_days() as i32;
                buf.put_i32(4);
                buf.put_i32(days);
            }
            "jsonb" => {
                let bytes = s.as_bytes();
                buf.put_i32(bytes.len() as i32 + 1);
                buf.put_u8(1); // jsonb wire format version
                buf.put_slice(bytes);
            }
            "USER-DEFINED" => {
                return Err(RestoreError::Encoding(format!(
                    "column {}: type '{}' requires the CSV copy path",
                    column.column_name, column.original_type
                )));
            }
            _ => {
                let bytes = s.as_bytes();
                buf.put_i32(bytes.len() as i32);
                buf.put_slice(bytes);
            }
        },
    }
    Ok(())
}

/// Microsecond epoch of PostgreSQL binary timestamps.
fn pg_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

/// Encode a Decimal into PostgreSQL binary NUMERIC format.
///
/// Field layout: ndigits, weight, sign, dscale as i16, then the base-10000
/// digits. The weight is the position of the first digit group relative to
/// the decimal point, minus one.
fn encode_numeric_binary(buf: &mut BytesMut, d: &Decimal) {
    const NUMERIC_POS: i16 = 0x0000;
    const NUMERIC_NEG: i16 = 0x4000;

    if d.is_zero() {
        buf.put_i32(8);
        buf.put_i16(0); // ndigits
        buf.put_i16(0); // weight
        buf.put_i16(NUMERIC_POS);
        buf.put_i16(d.scale() as i16);
        return;
    }

    let sign = if d.is_sign_negative() { NUMERIC_NEG } else { NUMERIC_POS };
    let dscale = d.scale() as i16;

    // Work from the string form to keep digit positioning exact for values
    // like 0.01 where the mantissa alone loses the leading zeros.
    let abs_str = d.abs().to_string();
    let (int_part, frac_part) = match abs_str.split_once('.') {
        Some((i, f)) => (i, f),
        None => (abs_str.as_str(), ""),
    };

    // Integer groups of four digits, padded on the left.
    let mut digits: Vec<i16> = Vec::new();
    let int_part = int_part.trim_start_matches('0');
    if !int_part.is_empty() {
        let padded = format!("{:0>width$}", int_part, width = int_part.len().div_ceil(4) * 4);
        for chunk in padded.as_bytes().chunks(4) {
            digits.push(
                std::str::from_utf8(chunk)
                    .ok()
                    .and_then(|s| s.parse::<i16>().ok())
                    .unwrap_or(0),
            );
        }
    }
    let int_groups = digits.len() as i16;

    // Fractional groups of four digits, padded on the right.
    let mut frac_digits: Vec<i16> = Vec::new();
    if !frac_part.is_empty() {
        let mut padded = frac_part.to_string();
        while padded.len() % 4 != 0 {
            padded.push('0');
        }
        for chunk in padded.as_bytes().chunks(4) {
            frac_digits.push(
                std::str::from_utf8(chunk)
                    .ok()
                    .and_then(|s| s.parse::<i16>().ok())
                    .unwrap_or(0),
            );
        }
    }

    let weight = if int_groups > 0 {
        int_groups - 1
    } else {
        // All fractional: count the leading all-zero groups.
        let leading_zero_groups = frac_digits.iter().take_while(|&&d| d == 0).count() as i16;
        -(leading_zero_groups + 1)
    };

    digits.extend(frac_digits);
    while digits.len() > 1 && digits.last() == Some(&0) {
        digits.pop();
    }
    while digits.len() > 1 && digits.first() == Some(&0) {
        digits.remove(0);
    }

    let ndigits = digits.len() as i16;
    buf.put_i32(8 + i32::from(ndigits) * 2);
    buf.put_i16(ndigits);
    buf.put_i16(weight);
    buf.put_i16(sign);
    buf.put_i16(dscale);
    for digit in digits {
        buf.put_i16(digit);
    }
}
