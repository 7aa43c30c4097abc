//! MonetDB data types
//!
//! This module names the SQL types the server reports in result set
//! metadata and converts their wire representations into [`Value`]s: the
//! quoted text of tuple lines, and the columnar binary export format.
//!
//! [`Value`]: crate::row::Value

mod binary;
mod decimal;
mod text;

pub use binary::{
    decode_binary_batch, decoder_for, has_binary_trailer, BinaryBatch, ColumnDecoder,
};
pub use decimal::Decimal;
pub use text::{convert_text, parse_tuple_line, unescape};

/// SQL types reported in the `type` metadata line
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlType {
    /// `tinyint`
    TinyInt,
    /// `smallint`
    SmallInt,
    /// `int`
    Int,
    /// `bigint`
    BigInt,
    /// `hugeint`
    HugeInt,
    /// `oid`
    Oid,
    /// `serial` and friends
    Serial,
    /// `boolean`
    Boolean,
    /// `real`
    Real,
    /// `double`
    Double,
    /// `float` (64 bits in MonetDB)
    Float,
    /// `decimal`
    Decimal,
    /// `char`
    Char,
    /// `varchar`
    Varchar,
    /// `clob`
    Clob,
    /// `blob`
    Blob,
    /// `url`
    Url,
    /// `json`
    Json,
    /// `uuid`
    Uuid,
    /// `inet`
    Inet,
    /// `date`
    Date,
    /// `time`
    Time,
    /// `timetz`
    TimeTz,
    /// `timestamp`
    Timestamp,
    /// `timestamptz`
    TimestampTz,
    /// `month_interval`
    MonthInterval,
    /// `sec_interval`
    SecInterval,
    /// `day_interval`
    DayInterval,
    /// Anything else; values are passed on as strings
    Other(String),
}

impl SqlType {
    /// Look up a type by the name the server uses
    pub fn from_name(name: &str) -> Self {
        match name {
            "tinyint" => SqlType::TinyInt,
            "smallint" => SqlType::SmallInt,
            "int" => SqlType::Int,
            "bigint" => SqlType::BigInt,
            "hugeint" => SqlType::HugeInt,
            "oid" => SqlType::Oid,
            "serial" | "shortint" | "mediumint" | "longint" | "wrd" => SqlType::Serial,
            "boolean" => SqlType::Boolean,
            "real" => SqlType::Real,
            "double" => SqlType::Double,
            "float" => SqlType::Float,
            "decimal" => SqlType::Decimal,
            "char" => SqlType::Char,
            "varchar" => SqlType::Varchar,
            "clob" => SqlType::Clob,
            "blob" => SqlType::Blob,
            "url" => SqlType::Url,
            "json" => SqlType::Json,
            "uuid" => SqlType::Uuid,
            "inet" => SqlType::Inet,
            "date" => SqlType::Date,
            "time" => SqlType::Time,
            "timetz" => SqlType::TimeTz,
            "timestamp" => SqlType::Timestamp,
            "timestamptz" => SqlType::TimestampTz,
            "month_interval" => SqlType::MonthInterval,
            "sec_interval" => SqlType::SecInterval,
            "day_interval" => SqlType::DayInterval,
            other => SqlType::Other(other.to_string()),
        }
    }

    /// Name as reported by the server
    pub fn name(&self) -> &str {
        match self {
            SqlType::TinyInt => "tinyint",
            SqlType::SmallInt => "smallint",
            SqlType::Int => "int",
            SqlType::BigInt => "bigint",
            SqlType::HugeInt => "hugeint",
            SqlType::Oid => "oid",
            SqlType::Serial => "serial",
            SqlType::Boolean => "boolean",
            SqlType::Real => "real",
            SqlType::Double => "double",
            SqlType::Float => "float",
            SqlType::Decimal => "decimal",
            SqlType::Char => "char",
            SqlType::Varchar => "varchar",
            SqlType::Clob => "clob",
            SqlType::Blob => "blob",
            SqlType::Url => "url",
            SqlType::Json => "json",
            SqlType::Uuid => "uuid",
            SqlType::Inet => "inet",
            SqlType::Date => "date",
            SqlType::Time => "time",
            SqlType::TimeTz => "timetz",
            SqlType::Timestamp => "timestamp",
            SqlType::TimestampTz => "timestamptz",
            SqlType::MonthInterval => "month_interval",
            SqlType::SecInterval => "sec_interval",
            SqlType::DayInterval => "day_interval",
            SqlType::Other(name) => name,
        }
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
