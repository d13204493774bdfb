use std::io;

use chmcp_db::DbError;
use rust_mcp_sdk::error::McpSdkError;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("MCP transport error: {0}")]
    Mcp(#[from] McpSdkError),
}

/// Tool calls refused before they reach ClickHouse.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CallRejected {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Server busy: {limit} tool calls already admitted")]
    Busy { limit: usize },
}
