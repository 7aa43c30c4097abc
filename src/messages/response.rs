//! Response parsing
//!
//! A response is one text message of newline-separated lines. The first
//! character of each line says what it is:
//!
//! | Marker | Meaning                                              |
//! |--------|------------------------------------------------------|
//! | `&1`   | result set header: `id rows columns rows_in_reply`   |
//! | `&2`   | update count: `affected last_id`                     |
//! | `&3`   | schema change                                        |
//! | `&4`   | transaction state: `t` or `f` for autocommit         |
//! | `&5`   | prepared statement: `id rows columns rows_in_reply`  |
//! | `&6`   | continuation block: `id columns rows_in_reply offset`|
//! | `%`    | column metadata: `% a,\tb # key`                     |
//! | `[`    | tuple                                                |
//! | `=`    | single value tuple, or `=OK`                         |
//! | `!`    | error                                                |
//! | `#`    | informational message                                |
//!
//! One response can carry several results when a command holds several
//! statements; they are returned in order.

use std::collections::HashMap;

use tracing::info;

use crate::constants::{marker, query_type};
use crate::error::{Error, Result};
use crate::statement::ColumnInfo;
use crate::types::parse_tuple_line;

/// Raw tuple fields; `None` is NULL
pub type RawRow = Vec<Option<String>>;

/// One classified response line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLine<'a> {
    /// Blank line
    Empty,
    /// Prompt bytes left in the text
    Prompt,
    /// `#` line, without the marker
    Info(&'a str),
    /// `!` line, without the marker
    Error(&'a str),
    /// `&` line, without the marker
    Header(&'a str),
    /// `%` line, without the marker
    Metadata(&'a str),
    /// `[` line, complete
    Tuple(&'a str),
    /// `=` line, without the marker
    Sliceless(&'a str),
}

impl<'a> ResponseLine<'a> {
    /// Classify a line by its leading marker
    pub fn classify(line: &'a str) -> Result<Self> {
        let mut chars = line.chars();
        let first = match chars.next() {
            Some(c) => c,
            None => return Ok(ResponseLine::Empty),
        };
        let rest = chars.as_str();
        match first {
            marker::INFO => Ok(ResponseLine::Info(rest)),
            marker::ERROR => Ok(ResponseLine::Error(rest)),
            marker::RESULT => Ok(ResponseLine::Header(rest)),
            marker::HEADER => Ok(ResponseLine::Metadata(rest)),
            marker::TUPLE => Ok(ResponseLine::Tuple(line)),
            marker::SLICELESS => Ok(ResponseLine::Sliceless(rest)),
            '\x01' => Ok(ResponseLine::Prompt),
            _ => Err(Error::UnknownResponse(line.to_string())),
        }
    }
}

/// Header and rows of a `&1` or `&5` result
#[derive(Debug, Clone, PartialEq)]
pub struct TableReply {
    /// Result set or prepared statement id
    pub id: u64,
    /// Total rows in the result set
    pub row_count: u64,
    /// Number of columns
    pub column_count: usize,
    /// Rows included in this response
    pub rows_in_reply: usize,
    /// Query id, when the server reports one
    pub query_id: Option<i64>,
    /// Column metadata
    pub columns: Vec<ColumnInfo>,
    /// Rows of this response
    pub rows: Vec<RawRow>,
}

/// Rows of a `&6` continuation block
#[derive(Debug, Clone, PartialEq)]
pub struct BlockReply {
    /// Result set id
    pub id: u64,
    /// Number of columns
    pub column_count: usize,
    /// Rows included in this response
    pub rows_in_reply: usize,
    /// Row number of the first row
    pub offset: u64,
    /// Rows of this response
    pub rows: Vec<RawRow>,
}

/// One result carried by a response
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Query result set
    Table(TableReply),
    /// Affected row count
    Update {
        /// Rows affected
        affected: i64,
        /// Last generated id, if any
        last_id: Option<i64>,
    },
    /// Schema change
    Schema,
    /// Autocommit state after a transaction statement
    Transaction {
        /// Whether autocommit is now on
        autocommit: bool,
    },
    /// Prepared statement description
    Prepare(TableReply),
    /// Continuation of a result set
    Block(BlockReply),
}

/// A parsed response
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    /// Results in the order the server sent them
    pub replies: Vec<Reply>,
    /// Informational messages
    pub info: Vec<String>,
}

impl Response {
    /// Parse response text
    pub fn parse(text: &str) -> Result<Self> {
        let mut response = Response::default();
        let mut open: Option<OpenReply> = None;
        let mut lines = text.split('\n').peekable();

        while let Some(line) = lines.next() {
            match ResponseLine::classify(line)? {
                ResponseLine::Empty | ResponseLine::Prompt => {}
                ResponseLine::Info(msg) => {
                    info!(message = msg.trim(), "server info");
                    response.info.push(msg.trim().to_string());
                }
                ResponseLine::Error(first) => {
                    let mut messages = vec![first];
                    while let Some(next) = lines.peek().and_then(|l| l.strip_prefix(marker::ERROR)) {
                        messages.push(next);
                        lines.next();
                    }
                    return Err(server_error(&messages));
                }
                ResponseLine::Header(header) => {
                    if let Some(done) = open.take() {
                        response.replies.push(done.finish()?);
                    }
                    match parse_header(header)? {
                        Parsed::Done(reply) => response.replies.push(reply),
                        Parsed::Open(reply) => open = Some(reply),
                    }
                }
                ResponseLine::Metadata(meta) => match open.as_mut() {
                    Some(reply) => reply.add_metadata(meta)?,
                    None => return Err(Error::protocol("column metadata outside a result")),
                },
                ResponseLine::Tuple(tuple) => match open.as_mut() {
                    Some(reply) => reply.add_row(parse_tuple_line(tuple)?)?,
                    None => return Err(Error::protocol("tuple outside a result")),
                },
                ResponseLine::Sliceless(value) => match open.as_mut() {
                    Some(reply) => {
                        let field = (value != "NULL").then(|| value.to_string());
                        reply.add_row(vec![field])?;
                    }
                    None if line == marker::OK => {}
                    None => return Err(Error::protocol(format!("unexpected value line: {:?}", line))),
                },
            }
        }

        if let Some(done) = open.take() {
            response.replies.push(done.finish()?);
        }
        Ok(response)
    }

    /// Ids of result sets announced in `text` that still hold rows on the
    /// server.
    ///
    /// Only `&1` headers are read, so this works on responses that fail to
    /// parse as a whole.
    pub fn unfinished_tables(text: &str) -> Vec<u64> {
        text.split('\n')
            .filter_map(|line| line.strip_prefix("&1 "))
            .filter_map(|header| {
                let fields: Vec<u64> = header
                    .split_whitespace()
                    .take(4)
                    .map(|f| f.parse().ok())
                    .collect::<Option<_>>()?;
                match fields[..] {
                    [id, rows, _, in_reply] if in_reply < rows => Some(id),
                    _ => None,
                }
            })
            .collect()
    }

    /// First result set, if any
    pub fn first_table(&self) -> Option<&TableReply> {
        self.replies.iter().find_map(|r| match r {
            Reply::Table(t) => Some(t),
            _ => None,
        })
    }
}

/// Build a server error from consecutive `!` lines (markers stripped)
fn server_error(messages: &[&str]) -> Error {
    match Error::server(messages[0]) {
        Error::Server { code, message } if messages.len() > 1 => {
            let mut full = message;
            for extra in &messages[1..] {
                full.push('\n');
                full.push_str(extra);
            }
            Error::Server { code, message: full }
        }
        err => err,
    }
}

enum Parsed {
    Done(Reply),
    Open(OpenReply),
}

/// A table or block whose metadata and rows are still arriving
struct OpenReply {
    kind: u8,
    header: TableReply,
    offset: u64,
    metadata: HashMap<String, Vec<String>>,
}

fn numbers<T: std::str::FromStr>(fields: &[&str], what: &str, count: usize) -> Result<Vec<T>> {
    if fields.len() < count {
        return Err(Error::protocol(format!(
            "{} header has {} fields, expected {}",
            what,
            fields.len(),
            count
        )));
    }
    fields[..count]
        .iter()
        .map(|f| {
            f.parse()
                .map_err(|_| Error::protocol(format!("invalid number {:?} in {} header", f, what)))
        })
        .collect()
}

fn table_header(fields: &[&str]) -> Result<TableReply> {
    let n: Vec<u64> = numbers(fields, "result", 4)?;
    Ok(TableReply {
        id: n[0],
        row_count: n[1],
        column_count: n[2] as usize,
        rows_in_reply: n[3] as usize,
        query_id: fields.get(4).and_then(|q| q.parse().ok()),
        columns: Vec::new(),
        rows: Vec::new(),
    })
}

fn parse_header(header: &str) -> Result<Parsed> {
    let mut fields = header.split_whitespace();
    let kind: u8 = fields
        .next()
        .and_then(|k| k.parse().ok())
        .ok_or_else(|| Error::protocol(format!("invalid result header: &{}", header)))?;
    let fields: Vec<&str> = fields.collect();

    let parsed = match kind {
        query_type::TABLE | query_type::PREPARE => Parsed::Open(OpenReply {
            kind,
            header: table_header(&fields)?,
            offset: 0,
            metadata: HashMap::new(),
        }),
        query_type::UPDATE => {
            let n: Vec<i64> = numbers(&fields, "update", 1)?;
            let last_id = fields
                .get(1)
                .and_then(|f| f.parse::<i64>().ok())
                .filter(|id| *id >= 0);
            Parsed::Done(Reply::Update {
                affected: n[0],
                last_id,
            })
        }
        query_type::SCHEMA => Parsed::Done(Reply::Schema),
        query_type::TRANSACTION => {
            let autocommit = match fields.first() {
                Some(&"t") => true,
                Some(&"f") => false,
                _ => {
                    return Err(Error::protocol(format!(
                        "invalid transaction header: &{}",
                        header
                    )))
                }
            };
            Parsed::Done(Reply::Transaction { autocommit })
        }
        query_type::BLOCK => {
            let n: Vec<u64> = numbers(&fields, "block", 4)?;
            Parsed::Open(OpenReply {
                kind,
                header: TableReply {
                    id: n[0],
                    row_count: 0,
                    column_count: n[1] as usize,
                    rows_in_reply: n[2] as usize,
                    query_id: None,
                    columns: Vec::new(),
                    rows: Vec::new(),
                },
                offset: n[3],
                metadata: HashMap::new(),
            })
        }
        _ => return Err(Error::UnknownResponse(format!("&{}", header))),
    };
    Ok(parsed)
}

impl OpenReply {
    fn add_metadata(&mut self, line: &str) -> Result<()> {
        let (values, key) = line
            .trim_start()
            .rsplit_once(" # ")
            .ok_or_else(|| Error::protocol(format!("malformed metadata line: %{}", line)))?;
        let values: Vec<String> = values.split(",\t").map(|v| v.trim().to_string()).collect();
        if values.len() != self.header.column_count {
            return Err(Error::protocol(format!(
                "metadata line {} has {} values for {} columns",
                key,
                values.len(),
                self.header.column_count
            )));
        }
        self.metadata.insert(key.trim().to_string(), values);
        Ok(())
    }

    fn add_row(&mut self, row: RawRow) -> Result<()> {
        if row.len() != self.header.column_count {
            return Err(Error::protocol(format!(
                "tuple has {} fields for {} columns",
                row.len(),
                self.header.column_count
            )));
        }
        self.header.rows.push(row);
        Ok(())
    }

    fn finish(mut self) -> Result<Reply> {
        if self.header.rows.len() != self.header.rows_in_reply {
            return Err(Error::protocol(format!(
                "result {} announced {} rows but carried {}",
                self.header.id,
                self.header.rows_in_reply,
                self.header.rows.len()
            )));
        }

        if self.kind == query_type::BLOCK {
            let h = self.header;
            return Ok(Reply::Block(BlockReply {
                id: h.id,
                column_count: h.column_count,
                rows_in_reply: h.rows_in_reply,
                offset: self.offset,
                rows: h.rows,
            }));
        }

        self.header.columns = self.build_columns()?;
        Ok(if self.kind == query_type::PREPARE {
            Reply::Prepare(self.header)
        } else {
            Reply::Table(self.header)
        })
    }

    fn build_columns(&mut self) -> Result<Vec<ColumnInfo>> {
        let count = self.header.column_count;
        if count == 0 {
            return Ok(Vec::new());
        }
        let names = self
            .metadata
            .remove("name")
            .ok_or_else(|| Error::protocol("result without column names"))?;
        let types = self
            .metadata
            .remove("type")
            .ok_or_else(|| Error::protocol("result without column types"))?;
        let tables = self.metadata.remove("table_name");
        let lengths = self.metadata.remove("length");
        let typesizes = self.metadata.remove("typesizes");

        let mut columns = Vec::with_capacity(count);
        for i in 0..count {
            let mut column = ColumnInfo::new(names[i].clone(), types[i].clone());
            if let Some(tables) = &tables {
                column.table_name = tables[i].clone();
            }
            column.length = lengths.as_ref().and_then(|l| l[i].parse().ok());
            if let Some(sizes) = &typesizes {
                let mut parts = sizes[i].split_whitespace();
                column.precision = parts.next().and_then(|p| p.parse().ok());
                column.scale = parts.next().and_then(|s| s.parse().ok());
            }
            columns.push(column);
        }
        Ok(columns)
    }
}
