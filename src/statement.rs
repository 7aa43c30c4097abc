//! Column metadata and prepared statements

use crate::error::{Error, Result};
use crate::messages::{RawRow, TableReply};
use crate::types::SqlType;

/// Metadata for a column in a result set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Qualified table name, empty for computed columns
    pub table_name: String,
    /// Type name as reported by the server
    pub type_name: String,
    /// Parsed SQL type
    pub sql_type: SqlType,
    /// Display length from the `length` line
    pub length: Option<u32>,
    /// Digits (decimal precision) from the `typesizes` line
    pub precision: Option<u32>,
    /// Digits after the decimal point from the `typesizes` line
    pub scale: Option<u32>,
}

impl ColumnInfo {
    /// Create a new column with minimal info
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            name: name.into(),
            table_name: String::new(),
            sql_type: SqlType::from_name(&type_name),
            type_name,
            length: None,
            precision: None,
            scale: None,
        }
    }

    /// Set precision and scale
    pub fn with_typesizes(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }
}

/// A parameter slot of a prepared statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterInfo {
    /// Type name
    pub type_name: String,
    /// Digits
    pub digits: u32,
    /// Scale
    pub scale: u32,
}

/// A statement prepared on the server with `PREPARE`.
///
/// The server describes the statement's result columns and its parameters in
/// one table; rows without a column name are parameters. The handle stays
/// valid until [`crate::Connection::release`] or the end of the session; the
/// server may drop it earlier when the surrounding transaction aborts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    /// Server-issued statement id
    pub id: u64,
    /// Result columns the statement will produce
    pub columns: Vec<ColumnInfo>,
    /// Parameters, in placeholder order
    pub parameters: Vec<ParameterInfo>,
}

fn cell(row: &RawRow, index: Option<usize>) -> Option<&str> {
    index.and_then(|i| row.get(i)).and_then(|v| v.as_deref())
}

fn number(row: &RawRow, index: Option<usize>) -> u32 {
    cell(row, index).and_then(|v| v.parse().ok()).unwrap_or(0)
}

impl PreparedStatement {
    /// Build from the `&5` reply to a `PREPARE`
    pub fn from_reply(table: &TableReply) -> Result<Self> {
        let index = |name: &str| table.columns.iter().position(|c| c.name == name);
        let type_index = index("type")
            .ok_or_else(|| Error::protocol("prepare reply without a type column"))?;
        let (digits, scale) = (index("digits"), index("scale"));
        let (table_index, column_index) = (index("table"), index("column"));

        let mut columns = Vec::new();
        let mut parameters = Vec::new();
        for row in &table.rows {
            let type_name = cell(row, Some(type_index)).unwrap_or_default();
            match cell(row, column_index) {
                Some(name) => {
                    let mut column = ColumnInfo::new(name, type_name)
                        .with_typesizes(number(row, digits), number(row, scale));
                    column.table_name = cell(row, table_index).unwrap_or_default().to_string();
                    columns.push(column);
                }
                None => parameters.push(ParameterInfo {
                    type_name: type_name.to_string(),
                    digits: number(row, digits),
                    scale: number(row, scale),
                }),
            }
        }

        Ok(Self {
            id: table.id,
            columns,
            parameters,
        })
    }

    /// Number of `?` placeholders
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Render `EXECUTE id(...)` with caller-rendered SQL literals
    pub fn execute_sql(&self, literals: &[&str]) -> String {
        format!("EXECUTE {}({})", self.id, literals.join(", "))
    }
}
