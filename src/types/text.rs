//! Text result decoding
//!
//! Tuple lines look like `[ 1,\t"two",\tNULL\t]`. Strings are double-quoted
//! with backslash escapes; every other value is bare. A bare `NULL` is SQL
//! NULL, a quoted `"NULL"` is the four-letter string.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::error::{Error, Result};
use crate::row::Value;
use crate::statement::ColumnInfo;
use crate::types::{Decimal, SqlType};

const FIELD_SEPARATOR: &str = ",\t";

/// Split a tuple line into raw fields; `None` is NULL
pub fn parse_tuple_line(line: &str) -> Result<Vec<Option<String>>> {
    let body = line
        .strip_prefix("[ ")
        .and_then(|rest| rest.strip_suffix("\t]"))
        .ok_or_else(|| Error::protocol(format!("malformed tuple line: {:?}", line)))?;

    let bytes = body.as_bytes();
    let mut fields = Vec::new();
    let mut pos = 0;
    loop {
        if bytes.get(pos) == Some(&b'"') {
            let start = pos + 1;
            let mut i = start;
            loop {
                match bytes.get(i) {
                    None => {
                        return Err(Error::protocol(format!(
                            "unterminated string in tuple line: {:?}",
                            line
                        )))
                    }
                    Some(b'\\') => i += 2,
                    Some(b'"') => break,
                    Some(_) => i += 1,
                }
            }
            fields.push(Some(unescape(&body[start..i])?));
            pos = i + 1;
        } else {
            let end = body[pos..]
                .find(FIELD_SEPARATOR)
                .map(|off| pos + off)
                .unwrap_or(body.len());
            let raw = &body[pos..end];
            fields.push(if raw == "NULL" {
                None
            } else {
                Some(raw.to_string())
            });
            pos = end;
        }

        if pos >= body.len() {
            break;
        }
        if body[pos..].starts_with(FIELD_SEPARATOR) {
            pos += FIELD_SEPARATOR.len();
        } else {
            return Err(Error::protocol(format!(
                "expected field separator at offset {} in tuple line: {:?}",
                pos, line
            )));
        }
    }
    Ok(fields)
}

/// Resolve backslash escapes in the body of a quoted string
pub fn unescape(text: &str) -> Result<String> {
    if !text.contains('\\') {
        return Ok(text.to_string());
    }
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }
        let escaped = *bytes
            .get(i + 1)
            .ok_or_else(|| Error::protocol("dangling backslash in string"))?;
        i += 2;
        match escaped {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'f' => out.push(0x0c),
            b'b' => out.push(0x08),
            b'0'..=b'7' => {
                let digits = bytes
                    .get(i - 1..i + 2)
                    .filter(|d| d.iter().all(|c| (b'0'..=b'7').contains(c)))
                    .ok_or_else(|| Error::protocol("truncated octal escape in string"))?;
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + (d - b'0') as u32);
                out.push(value as u8);
                i += 2;
            }
            other => out.push(other),
        }
    }
    String::from_utf8(out).map_err(|e| Error::protocol(format!("invalid UTF-8 in string: {}", e)))
}

fn conversion_error(column: &ColumnInfo, raw: &str) -> Error {
    Error::DataConversion(format!(
        "cannot convert {:?} to {} for column {}",
        raw, column.type_name, column.name
    ))
}

/// Convert one raw text field to a [`Value`] according to the column type
pub fn convert_text(raw: Option<&str>, column: &ColumnInfo) -> Result<Value> {
    let raw = match raw {
        Some(raw) => raw,
        None => return Ok(Value::Null),
    };
    let bad = || conversion_error(column, raw);

    let value = match &column.sql_type {
        SqlType::TinyInt
        | SqlType::SmallInt
        | SqlType::Int
        | SqlType::BigInt
        | SqlType::Oid
        | SqlType::Serial => Value::Integer(parse_oid(raw).ok_or_else(bad)?),
        SqlType::HugeInt => Value::HugeInt(raw.parse().map_err(|_| bad())?),
        SqlType::Boolean => match raw {
            "true" => Value::Boolean(true),
            "false" => Value::Boolean(false),
            _ => return Err(bad()),
        },
        SqlType::Real | SqlType::Double | SqlType::Float => {
            Value::Float(raw.parse().map_err(|_| bad())?)
        }
        SqlType::Decimal => Value::Decimal(Decimal::parse(raw)?),
        SqlType::Char
        | SqlType::Varchar
        | SqlType::Clob
        | SqlType::Url
        | SqlType::Inet
        | SqlType::Other(_) => Value::String(raw.to_string()),
        SqlType::Blob => Value::Bytes(hex::decode(raw).map_err(|_| bad())?),
        SqlType::Json => Value::Json(serde_json::from_str(raw).map_err(|_| bad())?),
        SqlType::Uuid => Value::Uuid(uuid::Uuid::parse_str(raw).map_err(|_| bad())?),
        SqlType::Date => {
            Value::Date(NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| bad())?)
        }
        SqlType::Time => {
            Value::Time(NaiveTime::parse_from_str(raw, "%H:%M:%S%.f").map_err(|_| bad())?)
        }
        SqlType::TimeTz => {
            let (time, offset) = split_offset(raw).ok_or_else(bad)?;
            Value::TimeTz {
                time: NaiveTime::parse_from_str(time, "%H:%M:%S%.f").map_err(|_| bad())?,
                offset,
            }
        }
        SqlType::Timestamp => Value::Timestamp(
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").map_err(|_| bad())?,
        ),
        SqlType::TimestampTz => Value::TimestampTz(
            DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z").map_err(|_| bad())?,
        ),
        SqlType::MonthInterval => Value::MonthInterval(raw.parse().map_err(|_| bad())?),
        SqlType::SecInterval => {
            let millis = decimal_seconds_to_millis(raw).ok_or_else(bad)?;
            Value::SecInterval(TimeDelta::milliseconds(millis))
        }
        SqlType::DayInterval => {
            if raw.contains('.') {
                let millis = decimal_seconds_to_millis(raw).ok_or_else(bad)?;
                Value::DayInterval(millis.div_euclid(86_400_000))
            } else {
                Value::DayInterval(raw.parse().map_err(|_| bad())?)
            }
        }
    };
    Ok(value)
}

/// Integers; oids are printed with an `@0` suffix
fn parse_oid(raw: &str) -> Option<i64> {
    raw.strip_suffix("@0").unwrap_or(raw).parse().ok()
}

/// Split `12:00:00.5+01:30` into the time and its offset
fn split_offset(raw: &str) -> Option<(&str, FixedOffset)> {
    if raw.len() < 6 || !raw.is_char_boundary(raw.len() - 6) {
        return None;
    }
    let (value, offset) = raw.split_at(raw.len() - 6);
    let sign = match offset.as_bytes()[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let hours: i32 = offset.get(1..3)?.parse().ok()?;
    let minutes: i32 = offset.get(4..6)?.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).map(|o| (value, o))
}

fn decimal_seconds_to_millis(raw: &str) -> Option<i64> {
    let d = Decimal::parse(raw).ok()?;
    let millis = if d.scale <= 3 {
        d.value.checked_mul(10i128.pow(3 - d.scale))?
    } else {
        d.value / 10i128.pow(d.scale - 3)
    };
    i64::try_from(millis).ok()
}
