//! Row data for MonetDB query results
//!
//! This module provides:
//! - [`Value`], one decoded column value of any SQL type the client knows
//! - [`Row`], the values of one result row with optional named access

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::types::Decimal;

/// Represents a value from a MonetDB column.
///
/// Text and binary result batches decode to the same variants, so callers
/// never see which encoding a row travelled in.
///
/// # Example
///
/// ```rust
/// use monetdb_rs::Value;
///
/// fn describe(value: &Value) -> String {
///     match value {
///         Value::Null => "NULL".to_string(),
///         Value::Integer(i) => format!("integer {}", i),
///         Value::String(s) => format!("string {}", s),
///         other => format!("{}", other),
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,
    /// `boolean`
    Boolean(bool),
    /// `tinyint`, `smallint`, `int`, `bigint`, `oid`, `serial`
    Integer(i64),
    /// `hugeint`
    HugeInt(i128),
    /// `real`, `double`, `float`
    Float(f64),
    /// `decimal`
    Decimal(Decimal),
    /// `char`, `varchar`, `clob`, `url`, `inet` and unknown types
    String(String),
    /// `blob`
    Bytes(Vec<u8>),
    /// `uuid`
    Uuid(uuid::Uuid),
    /// `json`
    Json(serde_json::Value),
    /// `date`
    Date(NaiveDate),
    /// `time`
    Time(NaiveTime),
    /// `timetz`, in the session time zone
    TimeTz {
        /// Wall clock time
        time: NaiveTime,
        /// Offset of the session time zone
        offset: FixedOffset,
    },
    /// `timestamp`
    Timestamp(NaiveDateTime),
    /// `timestamptz`, in the session time zone
    TimestampTz(DateTime<FixedOffset>),
    /// `month_interval`, in months
    MonthInterval(i32),
    /// `sec_interval`
    SecInterval(TimeDelta),
    /// `day_interval`, in days
    DayInterval(i64),
}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::HugeInt(i) => i64::try_from(*i).ok(),
            Value::Float(f) => Some(*f as i64),
            Value::MonthInterval(m) => Some(*m as i64),
            Value::DayInterval(d) => Some(*d),
            _ => None,
        }
    }

    /// Try to get as a 128-bit integer
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::HugeInt(i) => Some(*i),
            Value::Integer(i) => Some(*i as i128),
            _ => None,
        }
    }

    /// Try to get as a float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            Value::HugeInt(i) => Some(*i as f64),
            Value::Decimal(d) => Some(d.to_f64()),
            _ => None,
        }
    }

    /// Try to get as bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Try to get as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Try to get as a decimal
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Integer(i) => Some(Decimal::new(*i as i128, 0)),
            Value::HugeInt(i) => Some(Decimal::new(*i, 0)),
            _ => None,
        }
    }

    /// Try to get as a date
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Timestamp(ts) => Some(ts.date()),
            _ => None,
        }
    }

    /// Try to get as a timestamp without time zone
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::TimestampTz(ts) => Some(ts.naive_local()),
            _ => None,
        }
    }

    /// Try to get as a UUID
    pub fn as_uuid(&self) -> Option<uuid::Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    /// Try to get as JSON
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(json) => Some(json),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::HugeInt(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "{}", hex::encode_upper(b)),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::Json(json) => write!(f, "{}", json),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Value::TimeTz { time, offset } => {
                write!(f, "{}{}", time.format("%H:%M:%S%.f"), offset)
            }
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::TimestampTz(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f%:z")),
            Value::MonthInterval(m) => write!(f, "{} months", m),
            Value::SecInterval(d) => write!(f, "{}", d),
            Value::DayInterval(d) => write!(f, "{} days", d),
        }
    }
}

/// A row of data from a query result.
///
/// Rows contain values that can be accessed by column index (0-based) or by
/// column name.
///
/// # Example
///
/// ```rust,no_run
/// use monetdb_rs::{Config, Connection};
///
/// # async fn example() -> monetdb_rs::Result<()> {
/// # let conn = Connection::connect_with_config(Config::new("localhost", 50000, "demo", "monetdb", "monetdb")).await?;
/// let result = conn.query("SELECT id, name FROM sys.tables").await?;
///
/// for row in &result.rows {
///     let id = row.get_i64(0);
///     let name = row.get_by_name("name").and_then(|v| v.as_str());
///     println!("{:?}: {:?}", id, name);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Column values
    values: Vec<Value>,
    /// Column names shared by every row of a result set
    column_names: Option<Arc<Vec<String>>>,
}

impl Row {
    /// Create a new row with values
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            column_names: None,
        }
    }

    /// Create a new row with values and column names
    pub fn with_names(values: Vec<Value>, names: Arc<Vec<String>>) -> Self {
        Self {
            values,
            column_names: Some(names),
        }
    }

    /// Get the number of columns in this row
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let names = self.column_names.as_ref()?;
        let index = names.iter().position(|n| n.eq_ignore_ascii_case(name))?;
        self.values.get(index)
    }

    /// Get all values as a slice
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume the row and return the values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Try to get a string value by index
    pub fn get_string(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Value::as_str)
    }

    /// Try to get an integer value by index
    pub fn get_i64(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(Value::as_i64)
    }

    /// Try to get a float value by index
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(Value::as_f64)
    }

    /// Check if a column value is NULL
    pub fn is_null(&self, index: usize) -> bool {
        self.get(index).map(Value::is_null).unwrap_or(true)
    }
}

impl std::ops::Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}
