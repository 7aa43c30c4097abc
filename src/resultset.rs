//! Result sets and their row cache
//!
//! A result set lives on the server under a numeric id. The reply to the
//! query carries the first rows; the rest are pulled with `Xexport` (text)
//! or `Xexportbin` (binary) commands whose sizes come from the
//! [`BatchPolicy`]. Rows are handed out strictly in order: the cache only
//! ever holds rows `[position, delivered)`.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use chrono::FixedOffset;
use tracing::debug;

use crate::buffer::Endian;
use crate::error::{Error, Result};
use crate::messages::{BlockReply, Command, RawRow, TableReply};
use crate::policy::BatchPolicy;
use crate::row::{Row, Value};
use crate::statement::ColumnInfo;
use crate::types::{convert_text, decode_binary_batch, decoder_for, ColumnDecoder};

/// Description of an open result set
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSetInfo {
    /// Server-issued id
    pub id: u64,
    /// Total number of rows
    pub row_count: u64,
    /// Column metadata
    pub columns: Vec<ColumnInfo>,
    /// Query id, when the server reports one
    pub query_id: Option<i64>,
    /// Rows included in the reply to the query. With a reply size of 0 the
    /// server decides how many to send.
    pub rows_in_reply: usize,
}

/// A fully fetched result
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Column information
    pub columns: Vec<ColumnInfo>,
    /// Rows returned
    pub rows: Vec<Row>,
    /// Number of rows affected (for DML)
    pub rows_affected: u64,
    /// Last generated id (for INSERT), if any
    pub last_id: Option<i64>,
}

impl QueryResult {
    /// Create an empty query result
    pub fn empty() -> Self {
        Self::default()
    }

    /// Get the number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get a column by name
    pub fn column_by_name(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Get column index by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Iterate over rows
    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter()
    }

    /// Get the first row
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}

impl IntoIterator for QueryResult {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Client-side state of one open result set
#[derive(Debug)]
pub(crate) struct ResultSet {
    id: u64,
    row_count: u64,
    query_id: Option<i64>,
    rows_in_reply: usize,
    columns: Vec<ColumnInfo>,
    names: Arc<Vec<String>>,
    cache: VecDeque<Row>,
    /// Row number of the next row handed out
    position: u64,
    /// Rows received from the server so far
    delivered: u64,
    policy: BatchPolicy,
    arraysize: usize,
    /// Per-column binary decoders; `None` when batches come as text
    decoders: Option<Vec<ColumnDecoder>>,
    endian: Endian,
    last_batch_binary: bool,
}

impl ResultSet {
    /// Create from the reply to a query
    pub(crate) fn from_reply(
        table: TableReply,
        policy: BatchPolicy,
        arraysize: usize,
        endian: Endian,
        session_offset: FixedOffset,
    ) -> Result<Self> {
        let decoders = if policy.use_binary() {
            let decoders: Option<Vec<_>> = table
                .columns
                .iter()
                .map(|c| decoder_for(c, session_offset))
                .collect();
            if decoders.is_none() {
                debug!(id = table.id, "result set has columns without binary form, using text export");
            }
            decoders
        } else {
            None
        };

        let names = Arc::new(table.columns.iter().map(|c| c.name.clone()).collect());
        let mut result = Self {
            id: table.id,
            row_count: table.row_count,
            query_id: table.query_id,
            rows_in_reply: table.rows.len(),
            columns: table.columns,
            names,
            cache: VecDeque::new(),
            position: 0,
            delivered: 0,
            policy,
            arraysize,
            decoders,
            endian,
            last_batch_binary: false,
        };
        result.push_text_rows(table.rows)?;
        Ok(result)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn info(&self) -> ResultSetInfo {
        ResultSetInfo {
            id: self.id,
            row_count: self.row_count,
            columns: self.columns.clone(),
            query_id: self.query_id,
            rows_in_reply: self.rows_in_reply,
        }
    }

    pub(crate) fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub(crate) fn arraysize(&self) -> usize {
        self.arraysize
    }

    pub(crate) fn set_arraysize(&mut self, arraysize: usize) {
        self.arraysize = arraysize.max(1);
    }

    /// Whether the most recent batch arrived in binary
    pub(crate) fn last_batch_binary(&self) -> bool {
        self.last_batch_binary
    }

    /// Size of the most recent request
    #[cfg(test)]
    pub(crate) fn last_request(&self) -> i64 {
        self.policy.last()
    }

    /// Rows buffered and not yet handed out
    pub(crate) fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Rows not yet handed out, buffered or not
    pub(crate) fn remaining(&self) -> u64 {
        self.row_count - self.position
    }

    /// Whether the server still holds rows for this result set
    pub(crate) fn open_on_server(&self) -> bool {
        self.delivered < self.row_count
    }

    /// Hand out up to `n` buffered rows
    pub(crate) fn take(&mut self, n: usize) -> Vec<Row> {
        let n = n.min(self.cache.len());
        self.position += n as u64;
        self.cache.drain(..n).collect()
    }

    /// Export command for the next window when the cache is exhausted.
    ///
    /// `already_used` rows of the current call were served from the cache
    /// and `wanted` more are needed. `None` when nothing is left.
    pub(crate) fn next_request(&mut self, already_used: u64, wanted: u64) -> Option<Command> {
        if self.delivered >= self.row_count || wanted == 0 {
            return None;
        }
        let start = self.delivered;
        let count = self
            .policy
            .batch_size(already_used, start, start + wanted, self.row_count);
        debug!(id = self.id, offset = start, count, binary = self.decoders.is_some(), "fetching batch");
        Some(self.export(start, count))
    }

    /// Export command for everything not yet received; leaves the window
    /// size of incremental fetching untouched
    pub(crate) fn full_request(&self) -> Option<Command> {
        if self.delivered >= self.row_count {
            return None;
        }
        let count = self.row_count - self.delivered;
        debug!(id = self.id, offset = self.delivered, count, "fetching remainder");
        Some(self.export(self.delivered, count))
    }

    fn export(&self, offset: u64, count: u64) -> Command {
        if self.decoders.is_some() {
            Command::ExportBinary {
                id: self.id,
                offset,
                count,
            }
        } else {
            Command::Export {
                id: self.id,
                offset,
                count,
            }
        }
    }

    /// Add the rows of a `&6` reply
    pub(crate) fn ingest_text(&mut self, block: BlockReply) -> Result<()> {
        if block.id != self.id || block.offset != self.delivered {
            return Err(Error::protocol(format!(
                "expected rows of result {} from {}, got result {} from {}",
                self.id, self.delivered, block.id, block.offset
            )));
        }
        if block.column_count != self.columns.len() {
            return Err(Error::protocol(format!(
                "result {} has {} columns, block has {}",
                self.id,
                self.columns.len(),
                block.column_count
            )));
        }
        self.push_text_rows(block.rows)?;
        self.last_batch_binary = false;
        Ok(())
    }

    /// Add the rows of a binary batch answering a request for `rows` rows
    pub(crate) fn ingest_binary(&mut self, data: Bytes, rows: u64) -> Result<()> {
        let decoders = self
            .decoders
            .as_ref()
            .ok_or_else(|| Error::protocol("binary batch for a text result set"))?;
        let rows = rows.min(self.row_count - self.delivered) as usize;
        let batch = decode_binary_batch(data, self.endian, decoders, rows)?;
        for values in batch.into_rows() {
            self.cache.push_back(Row::with_names(values, self.names.clone()));
        }
        self.delivered += rows as u64;
        self.last_batch_binary = true;
        Ok(())
    }

    fn push_text_rows(&mut self, rows: Vec<RawRow>) -> Result<()> {
        let count = rows.len() as u64;
        if self.delivered + count > self.row_count {
            return Err(Error::protocol(format!(
                "result {} received more rows than its {}",
                self.id, self.row_count
            )));
        }
        // nothing is cached unless the whole batch converts
        let converted = rows
            .iter()
            .map(|raw| {
                raw.iter()
                    .zip(&self.columns)
                    .map(|(field, column)| convert_text(field.as_deref(), column))
                    .collect::<Result<Vec<Value>>>()
                    .map(|values| Row::with_names(values, self.names.clone()))
            })
            .collect::<Result<Vec<Row>>>()?;
        self.cache.extend(converted);
        self.delivered += count;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{BinaryMode, FetchPolicy};

    fn table(row_count: u64, rows: u64) -> TableReply {
        TableReply {
            id: 7,
            row_count,
            column_count: 1,
            rows_in_reply: rows as usize,
            query_id: None,
            columns: vec![ColumnInfo::new("n", "int")],
            rows: (0..rows).map(|i| vec![Some(i.to_string())]).collect(),
        }
    }

    fn text_policy(replysize: i64, maxprefetch: i64) -> BatchPolicy {
        let mut policy = BatchPolicy::new(
            &FetchPolicy::default()
                .replysize(replysize)
                .maxprefetch(maxprefetch)
                .binary(BinaryMode::Off),
            0,
        );
        policy.new_query();
        policy
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_initial_rows_are_cached() {
        let mut rs =
            ResultSet::from_reply(table(500, 100), text_policy(100, 2500), 100, Endian::Little, utc()).unwrap();
        assert_eq!(rs.cached(), 100);
        assert!(rs.open_on_server());
        let rows = rs.take(3);
        assert_eq!(rows[2].get_i64(0), Some(2));
        assert_eq!(rows[0].get_by_name("n").and_then(|v| v.as_i64()), Some(0));
        assert_eq!(rs.remaining(), 497);
    }

    #[test]
    fn test_fetchone_after_initial_batch_doubles() {
        let mut rs =
            ResultSet::from_reply(table(1000, 100), text_policy(100, 2500), 100, Endian::Little, utc()).unwrap();
        assert_eq!(rs.take(100).len(), 100);
        assert_eq!(
            rs.next_request(0, 1),
            Some(Command::Export {
                id: 7,
                offset: 100,
                count: 200
            })
        );
    }

    #[test]
    fn test_full_request_leaves_window_alone() {
        let mut rs =
            ResultSet::from_reply(table(1000, 100), text_policy(100, 2500), 100, Endian::Little, utc()).unwrap();
        rs.take(100);
        assert_eq!(
            rs.full_request(),
            Some(Command::Export {
                id: 7,
                offset: 100,
                count: 900
            })
        );
        assert_eq!(rs.last_request(), 100);
    }

    #[test]
    fn test_ingest_text_block() {
        let mut rs =
            ResultSet::from_reply(table(3, 1), text_policy(1, 2500), 1, Endian::Little, utc()).unwrap();
        rs.take(1);
        let block = BlockReply {
            id: 7,
            column_count: 1,
            rows_in_reply: 2,
            offset: 1,
            rows: vec![vec![Some("10".into())], vec![None]],
        };
        rs.ingest_text(block).unwrap();
        assert!(!rs.open_on_server());
        assert!(!rs.last_batch_binary());
        let rows = rs.take(5);
        assert_eq!(rows.len(), 2);
        assert!(rows[1].is_null(0));
        assert_eq!(rs.next_request(0, 1), None);
    }

    #[test]
    fn test_failed_conversion_leaves_batch_unread() {
        let mut rs =
            ResultSet::from_reply(table(4, 1), text_policy(1, 2500), 1, Endian::Little, utc()).unwrap();
        rs.take(1);
        let block = |middle: &str| BlockReply {
            id: 7,
            column_count: 1,
            rows_in_reply: 3,
            offset: 1,
            rows: vec![
                vec![Some("10".into())],
                vec![Some(middle.into())],
                vec![Some("12".into())],
            ],
        };

        assert!(matches!(
            rs.ingest_text(block("eleven")),
            Err(Error::DataConversion(_))
        ));
        assert_eq!(rs.cached(), 0);
        assert!(matches!(
            rs.next_request(0, 1),
            Some(Command::Export { offset: 1, .. })
        ));

        rs.ingest_text(block("11")).unwrap();
        let values: Vec<_> = rs.take(5).iter().map(|r| r.get_i64(0)).collect();
        assert_eq!(values, vec![Some(10), Some(11), Some(12)]);
        assert!(!rs.open_on_server());
    }

    #[test]
    fn test_ingest_rejects_wrong_offset() {
        let mut rs =
            ResultSet::from_reply(table(3, 1), text_policy(1, 2500), 1, Endian::Little, utc()).unwrap();
        let block = BlockReply {
            id: 7,
            column_count: 1,
            rows_in_reply: 1,
            offset: 2,
            rows: vec![vec![Some("10".into())]],
        };
        assert!(matches!(rs.ingest_text(block), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_binary_falls_back_for_undecodable_columns() {
        let policy = || {
            let mut p = BatchPolicy::new(&FetchPolicy::default().binary(BinaryMode::On), 1);
            p.new_query();
            p
        };

        let mut reply = table(10, 1);
        reply.columns = vec![ColumnInfo::new("o", "oid")];
        reply.rows = vec![vec![Some("1@0".into())]];
        let mut rs = ResultSet::from_reply(reply, policy(), 100, Endian::Little, utc()).unwrap();
        rs.take(1);
        assert!(matches!(rs.next_request(0, 1), Some(Command::Export { .. })));

        let mut rs = ResultSet::from_reply(table(10, 1), policy(), 100, Endian::Little, utc()).unwrap();
        rs.take(1);
        assert!(matches!(rs.next_request(0, 1), Some(Command::ExportBinary { .. })));
    }

    #[test]
    fn test_ingest_binary_batch() {
        let mut policy = BatchPolicy::new(&FetchPolicy::default().binary(BinaryMode::On), 1);
        policy.new_query();
        let mut rs = ResultSet::from_reply(table(3, 1), policy, 100, Endian::Little, utc()).unwrap();
        rs.take(1);

        let mut data = Vec::new();
        data.extend_from_slice(&5i32.to_le_bytes());
        data.extend_from_slice(&i32::MIN.to_le_bytes());
        data.extend_from_slice(&0i64.to_le_bytes());
        data.extend_from_slice(&8i64.to_le_bytes());
        rs.ingest_binary(Bytes::from(data), 2).unwrap();

        assert!(rs.last_batch_binary());
        let rows = rs.take(2);
        assert_eq!(rows[0].get_i64(0), Some(5));
        assert!(rows[1].is_null(0));
    }
}
