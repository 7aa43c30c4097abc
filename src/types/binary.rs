//! Binary result batch decoding
//!
//! `Xexportbin` answers with the columns of a batch laid out one after the
//! other, followed by a trailer with one `(start, length)` pair of 64-bit
//! integers per column giving each column's byte range:
//!
//! ```text
//! +----------+----------+-----+----------------------------------------+
//! | column 0 | column 1 | ... | start0 len0 start1 len1 ... (i64 each) |
//! +----------+----------+-----+----------------------------------------+
//! ```
//!
//! Multi-byte values use the byte order the server announced in its login
//! challenge. NULL is a per-type sentinel: the minimum value for integers,
//! NaN for floats, `0x80` for strings, a negative length for blobs.

use bytes::Bytes;
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone};

use crate::buffer::{Endian, ReadBuffer};
use crate::error::{Error, Result};
use crate::row::Value;
use crate::statement::ColumnInfo;
use crate::types::{Decimal, SqlType};

const TRAILER_ENTRY_SIZE: usize = 16;
const STRING_NULL: &[u8] = b"\x80";

/// How one column of a binary batch is decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnDecoder {
    /// Signed integer of 1, 2, 4 or 8 bytes
    Integer {
        /// Width in bytes
        width: usize,
    },
    /// 16-byte integer
    HugeInt,
    /// One byte, -128 is NULL
    Boolean,
    /// 4-byte float
    Real,
    /// 8-byte float
    Double,
    /// Scaled integer whose width follows from the precision
    Decimal {
        /// Width in bytes
        width: usize,
        /// Digits after the decimal point
        scale: u32,
    },
    /// 16 raw bytes, all zero is NULL
    Uuid,
    /// NUL-terminated UTF-8
    Text,
    /// NUL-terminated JSON text
    Json,
    /// 8-byte length prefix followed by the bytes
    Blob,
    /// day, month, 2-byte year
    Date,
    /// microseconds, second, minute, hour, padding
    Time {
        /// Session time zone for `timetz`
        offset: Option<FixedOffset>,
    },
    /// time followed by date
    Timestamp {
        /// Session time zone for `timestamptz`
        offset: Option<FixedOffset>,
    },
    /// 4-byte month count
    MonthInterval,
    /// 8-byte milliseconds
    SecInterval,
    /// 8-byte milliseconds, reported in days
    DayInterval,
}

/// Decoder for a column, or `None` when its type has no binary form.
///
/// `session_offset` is the session time zone, applied to `timetz` and
/// `timestamptz` values which the server sends in UTC.
pub fn decoder_for(column: &ColumnInfo, session_offset: FixedOffset) -> Option<ColumnDecoder> {
    let decoder = match column.sql_type {
        SqlType::TinyInt => ColumnDecoder::Integer { width: 1 },
        SqlType::SmallInt => ColumnDecoder::Integer { width: 2 },
        SqlType::Int => ColumnDecoder::Integer { width: 4 },
        SqlType::BigInt => ColumnDecoder::Integer { width: 8 },
        SqlType::HugeInt => ColumnDecoder::HugeInt,
        SqlType::Boolean => ColumnDecoder::Boolean,
        SqlType::Real => ColumnDecoder::Real,
        SqlType::Double | SqlType::Float => ColumnDecoder::Double,
        SqlType::Decimal => {
            let width = match column.precision? {
                0..=2 => 1,
                3..=4 => 2,
                5..=9 => 4,
                10..=18 => 8,
                19..=38 => 16,
                _ => return None,
            };
            ColumnDecoder::Decimal {
                width,
                scale: column.scale.unwrap_or(0),
            }
        }
        SqlType::Uuid => ColumnDecoder::Uuid,
        SqlType::Char | SqlType::Varchar | SqlType::Clob | SqlType::Url => ColumnDecoder::Text,
        SqlType::Json => ColumnDecoder::Json,
        SqlType::Blob => ColumnDecoder::Blob,
        SqlType::Date => ColumnDecoder::Date,
        SqlType::Time => ColumnDecoder::Time { offset: None },
        SqlType::TimeTz => ColumnDecoder::Time {
            offset: Some(session_offset),
        },
        SqlType::Timestamp => ColumnDecoder::Timestamp { offset: None },
        SqlType::TimestampTz => ColumnDecoder::Timestamp {
            offset: Some(session_offset),
        },
        SqlType::MonthInterval => ColumnDecoder::MonthInterval,
        SqlType::SecInterval => ColumnDecoder::SecInterval,
        SqlType::DayInterval => ColumnDecoder::DayInterval,
        SqlType::Oid | SqlType::Serial | SqlType::Inet | SqlType::Other(_) => return None,
    };
    Some(decoder)
}

impl ColumnDecoder {
    /// Bytes per value for fixed-width encodings
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            ColumnDecoder::Integer { width } | ColumnDecoder::Decimal { width, .. } => Some(*width),
            ColumnDecoder::HugeInt | ColumnDecoder::Uuid => Some(16),
            ColumnDecoder::Boolean => Some(1),
            ColumnDecoder::Real | ColumnDecoder::MonthInterval | ColumnDecoder::Date => Some(4),
            ColumnDecoder::Double
            | ColumnDecoder::SecInterval
            | ColumnDecoder::DayInterval
            | ColumnDecoder::Time { .. } => Some(8),
            ColumnDecoder::Timestamp { .. } => Some(12),
            ColumnDecoder::Text | ColumnDecoder::Json | ColumnDecoder::Blob => None,
        }
    }

    /// Decode exactly `rows` values from `buf`, which holds one column
    pub fn decode(&self, buf: &mut ReadBuffer, rows: usize) -> Result<Vec<Value>> {
        if let Some(width) = self.fixed_width() {
            if buf.len() != rows * width {
                return Err(Error::protocol(format!(
                    "binary column of {} bytes does not hold {} values of {} bytes",
                    buf.len(),
                    rows,
                    width
                )));
            }
        }

        let values = match self {
            ColumnDecoder::Text | ColumnDecoder::Json => self.decode_strings(buf, rows)?,
            ColumnDecoder::Blob => decode_blobs(buf, rows)?,
            _ => {
                let mut values = Vec::with_capacity(rows);
                for _ in 0..rows {
                    values.push(self.decode_fixed(buf)?);
                }
                values
            }
        };
        Ok(values)
    }

    fn decode_fixed(&self, buf: &mut ReadBuffer) -> Result<Value> {
        let value = match self {
            ColumnDecoder::Integer { width } => match read_int(buf, *width)? {
                Some(v) => Value::Integer(v as i64),
                None => Value::Null,
            },
            ColumnDecoder::HugeInt => match buf.read_i128()? {
                i128::MIN => Value::Null,
                v => Value::HugeInt(v),
            },
            ColumnDecoder::Boolean => match buf.read_i8()? {
                i8::MIN => Value::Null,
                v => Value::Boolean(v != 0),
            },
            ColumnDecoder::Real => float_or_null(buf.read_f32()? as f64),
            ColumnDecoder::Double => float_or_null(buf.read_f64()?),
            ColumnDecoder::Decimal { width, scale } => match read_int(buf, *width)? {
                Some(v) => Value::Decimal(Decimal::new(v, *scale)),
                None => Value::Null,
            },
            ColumnDecoder::Uuid => {
                let mut raw = [0u8; 16];
                buf.read_bytes(&mut raw)?;
                if raw == [0u8; 16] {
                    Value::Null
                } else {
                    Value::Uuid(uuid::Uuid::from_bytes(raw))
                }
            }
            ColumnDecoder::Date => match read_date(buf)? {
                Some(d) => Value::Date(d),
                None => Value::Null,
            },
            ColumnDecoder::Time { offset } => match (read_time(buf)?, offset) {
                (None, _) => Value::Null,
                (Some(t), None) => Value::Time(t),
                (Some(t), Some(offset)) => {
                    let shift = TimeDelta::seconds(offset.local_minus_utc() as i64);
                    Value::TimeTz {
                        time: t.overflowing_add_signed(shift).0,
                        offset: *offset,
                    }
                }
            },
            ColumnDecoder::Timestamp { offset } => {
                let time = read_time(buf)?;
                let date = read_date(buf)?;
                match (date, time, offset) {
                    (Some(d), Some(t), None) => Value::Timestamp(NaiveDateTime::new(d, t)),
                    (Some(d), Some(t), Some(offset)) => {
                        Value::TimestampTz(offset.from_utc_datetime(&NaiveDateTime::new(d, t)))
                    }
                    _ => Value::Null,
                }
            }
            ColumnDecoder::MonthInterval => match buf.read_i32()? {
                i32::MIN => Value::Null,
                v => Value::MonthInterval(v),
            },
            ColumnDecoder::SecInterval => match buf.read_i64()? {
                i64::MIN => Value::Null,
                v => Value::SecInterval(TimeDelta::milliseconds(v)),
            },
            ColumnDecoder::DayInterval => match buf.read_i64()? {
                i64::MIN => Value::Null,
                v => Value::DayInterval(v.div_euclid(86_400_000)),
            },
            ColumnDecoder::Text | ColumnDecoder::Json | ColumnDecoder::Blob => {
                return Err(Error::protocol("variable-width column decoded as fixed"))
            }
        };
        Ok(value)
    }

    fn decode_strings(&self, buf: &mut ReadBuffer, rows: usize) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(rows);
        for _ in 0..rows {
            let raw = buf.read_until(0)?;
            if &raw[..] == STRING_NULL {
                values.push(Value::Null);
                continue;
            }
            let text = std::str::from_utf8(&raw)
                .map_err(|e| Error::protocol(format!("invalid UTF-8 in binary string: {}", e)))?;
            values.push(match self {
                ColumnDecoder::Json => Value::Json(serde_json::from_str(text).map_err(|e| {
                    Error::DataConversion(format!("invalid JSON in result: {}", e))
                })?),
                _ => Value::String(text.to_string()),
            });
        }
        ensure_consumed(buf, rows)?;
        Ok(values)
    }
}

fn decode_blobs(buf: &mut ReadBuffer, rows: usize) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(rows);
    for _ in 0..rows {
        let length = buf.read_i64()?;
        if length < 0 {
            values.push(Value::Null);
        } else {
            let data = buf.read_bytes_owned(length as usize)?;
            values.push(Value::Bytes(data.to_vec()));
        }
    }
    ensure_consumed(buf, rows)?;
    Ok(values)
}

fn ensure_consumed(buf: &ReadBuffer, rows: usize) -> Result<()> {
    if buf.has_remaining(1) {
        return Err(Error::protocol(format!(
            "binary column has {} bytes left after {} values",
            buf.remaining(),
            rows
        )));
    }
    Ok(())
}

/// Read a signed integer of `width` bytes; `None` for the NULL sentinel
fn read_int(buf: &mut ReadBuffer, width: usize) -> Result<Option<i128>> {
    let (value, null) = match width {
        1 => (buf.read_i8()? as i128, i8::MIN as i128),
        2 => (buf.read_i16()? as i128, i16::MIN as i128),
        4 => (buf.read_i32()? as i128, i32::MIN as i128),
        8 => (buf.read_i64()? as i128, i64::MIN as i128),
        16 => (buf.read_i128()?, i128::MIN),
        _ => return Err(Error::protocol(format!("unsupported integer width {}", width))),
    };
    Ok((value != null).then_some(value))
}

fn float_or_null(v: f64) -> Value {
    if v.is_nan() {
        Value::Null
    } else {
        Value::Float(v)
    }
}

fn read_date(buf: &mut ReadBuffer) -> Result<Option<NaiveDate>> {
    let day = buf.read_u8()?;
    let month = buf.read_u8()?;
    let year = buf.read_i16()?;
    if month > 12 {
        return Ok(None);
    }
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .map(Some)
        .ok_or_else(|| Error::protocol(format!("invalid date {}-{}-{}", year, month, day)))
}

fn read_time(buf: &mut ReadBuffer) -> Result<Option<NaiveTime>> {
    let micros = buf.read_u32()?;
    let second = buf.read_u8()?;
    let minute = buf.read_u8()?;
    let hour = buf.read_u8()?;
    buf.skip(1)?;
    if micros >= 1_000_000 {
        return Ok(None);
    }
    NaiveTime::from_hms_micro_opt(hour as u32, minute as u32, second as u32, micros)
        .map(Some)
        .ok_or_else(|| Error::protocol(format!("invalid time {}:{}:{}", hour, minute, second)))
}

/// Decoded binary batch, column by column
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryBatch {
    columns: Vec<Vec<Value>>,
    rows: usize,
}

impl BinaryBatch {
    /// Number of rows in the batch
    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Values of one column
    pub fn column(&self, index: usize) -> Option<&[Value]> {
        self.columns.get(index).map(Vec::as_slice)
    }

    /// Convert to row-major order
    pub fn into_rows(self) -> Vec<Vec<Value>> {
        let mut rows: Vec<Vec<Value>> = (0..self.rows)
            .map(|_| Vec::with_capacity(self.columns.len()))
            .collect();
        for column in self.columns {
            for (row, value) in rows.iter_mut().zip(column) {
                row.push(value);
            }
        }
        rows
    }
}

/// Column ranges read from the trailer of a binary batch with `columns`
/// columns, each checked against the body that precedes the trailer
fn column_ranges(data: &Bytes, endian: Endian, columns: usize) -> Result<Vec<(usize, usize)>> {
    let trailer_len = columns * TRAILER_ENTRY_SIZE;
    if data.len() < trailer_len {
        return Err(Error::protocol(format!(
            "binary batch of {} bytes too short for {} columns",
            data.len(),
            columns
        )));
    }
    let body_len = data.len() - trailer_len;
    let mut trailer = ReadBuffer::with_endian(data.clone(), endian).sub_buffer(body_len, trailer_len)?;

    let mut ranges = Vec::with_capacity(columns);
    for index in 0..columns {
        let start = trailer.read_i64()?;
        let length = trailer.read_i64()?;
        let in_bounds = start >= 0
            && length >= 0
            && (start as u64).saturating_add(length as u64) <= body_len as u64;
        if !in_bounds {
            return Err(Error::protocol(format!(
                "binary column {} range {}+{} outside batch of {} bytes",
                index, start, length, body_len
            )));
        }
        ranges.push((start as usize, length as usize));
    }
    Ok(ranges)
}

/// Whether `data` carries a trailer of `columns` in-bounds column ranges
pub fn has_binary_trailer(data: &Bytes, endian: Endian, columns: usize) -> bool {
    column_ranges(data, endian, columns).is_ok()
}

/// Decode a binary batch of `rows` rows.
///
/// Column ranges are checked against the message before anything is read;
/// a range that runs into the trailer or past the end is a protocol error.
pub fn decode_binary_batch(
    data: Bytes,
    endian: Endian,
    decoders: &[ColumnDecoder],
    rows: usize,
) -> Result<BinaryBatch> {
    let ranges = column_ranges(&data, endian, decoders.len())?;
    let message = ReadBuffer::with_endian(data, endian);

    let mut columns = Vec::with_capacity(decoders.len());
    for (decoder, (start, length)) in decoders.iter().zip(ranges) {
        let mut column = message.sub_buffer(start, length)?;
        columns.push(decoder.decode(&mut column, rows)?);
    }

    Ok(BinaryBatch { columns, rows })
}
