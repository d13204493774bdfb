//! Connector seam: what the client needs from a database connection.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::BackendResult;
use crate::pool::CancelToken;
use crate::value::RawValue;

/// Column metadata as reported by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawColumn {
    pub name: String,
    pub type_name: String,
}

impl RawColumn {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A live result: column metadata plus rows pulled one at a time.
pub trait RowCursor: Send {
    fn columns(&self) -> &[RawColumn];

    /// `None` once the result is exhausted. A row error ends the iteration.
    fn next_row(&mut self) -> Option<BackendResult<Vec<RawValue>>>;
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn query(&self, sql: &str, cancel: &CancelToken) -> BackendResult<Box<dyn RowCursor>>;

    async fn ping(&self, cancel: &CancelToken) -> BackendResult<()>;

    async fn close(&self) -> BackendResult<()>;
}

/// Cursor over rows that are already in memory.
pub struct VecCursor {
    columns: Vec<RawColumn>,
    rows: VecDeque<BackendResult<Vec<RawValue>>>,
    failed: bool,
}

impl VecCursor {
    pub fn new(columns: Vec<RawColumn>, rows: Vec<Vec<RawValue>>) -> Self {
        Self::with_results(columns, rows.into_iter().map(Ok).collect())
    }

    pub fn with_results(columns: Vec<RawColumn>, rows: Vec<BackendResult<Vec<RawValue>>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
            failed: false,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl RowCursor for VecCursor {
    fn columns(&self) -> &[RawColumn] {
        &self.columns
    }

    fn next_row(&mut self) -> Option<BackendResult<Vec<RawValue>>> {
        if self.failed {
            return None;
        }
        let next = self.rows.pop_front()?;
        if next.is_err() {
            self.failed = true;
        }
        Some(next)
    }
}
