//! Adaptive batching policy for result set retrieval
//!
//! The server includes up to `replysize` rows in its reply to a query. Rows
//! beyond that are pulled with export commands, and this module decides how
//! many rows each of those commands asks for:
//!
//! - every cache miss doubles the previous request,
//! - fixed-stride consumers get windows aligned to their stride,
//! - `maxprefetch` bounds how far the window may run ahead of the consumer,
//! - nothing beyond the end of the result set is requested.
//!
//! When binary export is available and the caller asked for everything
//! (`replysize = -1`), the initial reply is kept small and the remainder is
//! fetched in one binary batch.

use std::num::NonZeroUsize;

use crate::constants::policy::{
    DEFAULT_MAX_PREFETCH, DEFAULT_REPLY_SIZE, SMALL_REPLY_SIZE,
};
use crate::error::{Error, Result};

/// Whether result batches may use the binary export format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryMode {
    /// Always use text export
    Off,
    /// Use binary export; a warning is logged when the server lacks it
    On,
    /// Use binary export whenever the server advertises it
    #[default]
    Auto,
}

impl BinaryMode {
    /// Whether the client asks for binary at all
    pub fn requested(&self) -> bool {
        !matches!(self, BinaryMode::Off)
    }
}

impl std::str::FromStr for BinaryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "false" | "0" | "no" => Ok(BinaryMode::Off),
            "on" | "true" | "1" | "yes" => Ok(BinaryMode::On),
            "auto" => Ok(BinaryMode::Auto),
            _ => Err(Error::InvalidConfig(format!("invalid binary mode: {}", s))),
        }
    }
}

/// Caller-facing fetch settings, per session or per query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Rows in the reply to a query; -1 for all of them
    pub replysize: i64,
    /// Bound on rows fetched ahead of the consumer; -1 unbounded, 0 none
    pub maxprefetch: i64,
    /// Explicit batch stride for [`crate::Connection::fetch_next_batch`]
    pub arraysize: Option<NonZeroUsize>,
    /// Binary export preference
    pub binary: BinaryMode,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            replysize: DEFAULT_REPLY_SIZE,
            maxprefetch: DEFAULT_MAX_PREFETCH,
            arraysize: None,
            binary: BinaryMode::Auto,
        }
    }
}

impl FetchPolicy {
    /// Set the reply size
    pub fn replysize(mut self, replysize: i64) -> Self {
        self.replysize = replysize;
        self
    }

    /// Set the prefetch bound
    pub fn maxprefetch(mut self, maxprefetch: i64) -> Self {
        self.maxprefetch = maxprefetch;
        self
    }

    /// Set the default batch stride
    pub fn arraysize(mut self, arraysize: NonZeroUsize) -> Self {
        self.arraysize = Some(arraysize);
        self
    }

    /// Set the binary preference
    pub fn binary(mut self, binary: BinaryMode) -> Self {
        self.binary = binary;
        self
    }

    /// Batch stride: the explicit array size, else `replysize` when positive,
    /// else 100
    pub fn effective_arraysize(&self) -> usize {
        match self.arraysize {
            Some(n) => n.get(),
            None if self.replysize > 0 => self.replysize as usize,
            None => DEFAULT_REPLY_SIZE as usize,
        }
    }
}

/// Per-result-set batching state
#[derive(Debug, Clone)]
pub struct BatchPolicy {
    replysize: i64,
    maxprefetch: i64,
    binary_requested: bool,
    server_binary_level: u32,
    /// Size of the most recent request; 0 before any
    last: i64,
}

impl BatchPolicy {
    /// Create batching state from caller settings and the server's binary
    /// export level
    pub fn new(policy: &FetchPolicy, server_binary_level: u32) -> Self {
        Self {
            replysize: policy.replysize,
            maxprefetch: policy.maxprefetch,
            binary_requested: policy.binary.requested(),
            server_binary_level,
            last: 0,
        }
    }

    /// Whether batches are fetched with binary export
    pub fn use_binary(&self) -> bool {
        self.binary_requested && self.server_binary_level > 0
    }

    /// Reply size sent to the server before the query.
    ///
    /// Equals `replysize`, except that an unlimited reply size is replaced by
    /// a small one when binary export will deliver the rest.
    pub fn effective_reply_size(&self) -> i64 {
        if self.use_binary() && self.replysize < 0 {
            SMALL_REPLY_SIZE
        } else {
            self.replysize
        }
    }

    /// Start a new query and return the reply size to send with it.
    ///
    /// The rows of the initial reply count as the first request.
    pub fn new_query(&mut self) -> i64 {
        let reply_size = self.effective_reply_size();
        self.last = reply_size;
        reply_size
    }

    /// Size of the most recent request
    pub fn last(&self) -> i64 {
        self.last
    }

    /// Number of rows to request starting at `request_start`.
    ///
    /// The consumer wants rows `[request_start, request_end)`, and
    /// `already_used` rows of its current call were served from the cache
    /// before the miss. `result_end` is the result set's row count. The
    /// returned count is at least `request_end - request_start` and at least 1.
    pub fn batch_size(
        &mut self,
        already_used: u64,
        request_start: u64,
        request_end: u64,
        result_end: u64,
    ) -> u64 {
        let already_used = already_used as i64;
        let request_start = request_start as i64;
        let result_end = result_end as i64;
        let request_end = (request_end as i64).clamp(request_start + 1, result_end.max(request_start + 1));

        if self.use_binary() && self.replysize < 0 {
            // everything left, in one binary batch
            return (result_end - request_start).max(1) as u64;
        }

        let size = if self.last > 0 {
            2 * self.last
        } else {
            DEFAULT_REPLY_SIZE
        };
        let mut prefetch_end = request_start + size;

        // align to the stride of the consumer's call
        let real_start = request_start - already_used;
        prefetch_end += (real_start - prefetch_end).rem_euclid(request_end - real_start);

        if self.maxprefetch >= 0 {
            prefetch_end = prefetch_end.min(request_end + self.maxprefetch);
        }
        prefetch_end = prefetch_end.min(result_end);

        let end = prefetch_end.max(request_end);
        let to_fetch = (end - request_start).max(1);
        self.last = to_fetch;
        to_fetch as u64
    }
}
