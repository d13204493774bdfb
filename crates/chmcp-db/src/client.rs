//! The database client: introspection plus capped query execution.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{Instrument, Span, debug, info, warn};

use crate::backend::{Backend, RowCursor};
use crate::error::{BackendError, DbError, DbResult};
use crate::materialize::materialize_rows;
use crate::normalize::{apply_row_cap, normalize};
use crate::pool::CancelToken;
use crate::value::{ColumnDescriptor, QueryResult, RawValue};

const LIST_DATABASES: &str = "list_databases";
const LIST_TABLES: &str = "list_tables";
const DESCRIBE_SCHEMA: &str = "describe_schema";
const EXECUTE_QUERY: &str = "execute_query";
const PING: &str = "ping";
const CLOSE: &str = "close";

#[async_trait]
pub trait Client: Send + Sync {
    /// User databases, with the configured system databases removed.
    async fn list_databases(&self, cancel: &CancelToken) -> DbResult<Vec<String>>;

    async fn list_tables(&self, database: &str, cancel: &CancelToken) -> DbResult<Vec<String>>;

    async fn describe_schema(
        &self,
        database: &str,
        table: &str,
        cancel: &CancelToken,
    ) -> DbResult<Vec<ColumnDescriptor>>;

    /// Runs `sql` with `row_cap` appended as a LIMIT unless one is present. A cap
    /// of zero leaves the statement alone.
    async fn execute_query(
        &self,
        sql: &str,
        row_cap: u64,
        cancel: &CancelToken,
    ) -> DbResult<QueryResult>;

    async fn ping(&self, cancel: &CancelToken) -> DbResult<()>;

    async fn close(&self) -> DbResult<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Databases dropped from `list_databases`.
    pub hidden_databases: Vec<String>,
    /// Queries slower than this are logged at warn level.
    pub slow_query_threshold: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hidden_databases: vec!["system".into(), "information_schema".into()],
            slow_query_threshold: Duration::from_secs(5),
        }
    }
}

pub struct DefaultClient<B> {
    backend: B,
    config: ClientConfig,
    span: Span,
}

impl<B: Backend> DefaultClient<B> {
    pub fn with_backend(backend: B, config: ClientConfig, span: Span) -> Self {
        Self {
            backend,
            config,
            span,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn run(
        &self,
        operation: &'static str,
        sql: &str,
        cancel: &CancelToken,
    ) -> DbResult<Box<dyn RowCursor>> {
        debug!(operation, sql, "sending statement");
        self.backend
            .query(sql, cancel)
            .await
            .map_err(|err| classify(operation, err))
    }

    /// First column of every row as text.
    async fn first_column(
        &self,
        operation: &'static str,
        sql: &str,
        cancel: &CancelToken,
    ) -> DbResult<Vec<String>> {
        let mut cursor = self.run(operation, sql, cancel).await?;
        let mut names = Vec::new();
        while let Some(row) = cursor.next_row() {
            let row = row.map_err(|err| classify(operation, err))?;
            names.push(text_cell(operation, &row, 0)?);
        }
        Ok(names)
    }
}

#[cfg(feature = "http")]
impl DefaultClient<crate::http::HttpBackend> {
    /// Opens the HTTP connector and checks that the server answers.
    pub async fn connect(config: crate::http::ClickHouseConfig, span: Span) -> DbResult<Self> {
        let address = format!("{}:{}", config.host, config.port);
        let backend = crate::http::HttpBackend::new(config)
            .map_err(|err| DbError::connection("connect", err))?;
        let client = Self::with_backend(backend, ClientConfig::default(), span);
        client
            .backend
            .ping(&CancelToken::new())
            .instrument(client.span.clone())
            .await
            .map_err(|err| DbError::connection("connect", err))?;
        client.span.in_scope(|| info!(%address, "connected to ClickHouse"));
        Ok(client)
    }
}

impl<B: Backend> DefaultClient<B> {
    async fn databases(&self, cancel: &CancelToken) -> DbResult<Vec<String>> {
        let mut names = self
            .first_column(LIST_DATABASES, "SHOW DATABASES", cancel)
            .await?;
        names.retain(|name| !self.config.hidden_databases.contains(name));
        debug!(count = names.len(), "listed databases");
        Ok(names)
    }

    async fn tables(&self, database: &str, cancel: &CancelToken) -> DbResult<Vec<String>> {
        // Identifiers are interpolated as given.
        let sql = format!("SHOW TABLES FROM {database}");
        let tables = self.first_column(LIST_TABLES, &sql, cancel).await?;
        debug!(database, count = tables.len(), "listed tables");
        Ok(tables)
    }

    async fn schema(
        &self,
        database: &str,
        table: &str,
        cancel: &CancelToken,
    ) -> DbResult<Vec<ColumnDescriptor>> {
        let sql = format!("DESCRIBE TABLE {database}.{table}");
        let mut cursor = self.run(DESCRIBE_SCHEMA, &sql, cancel).await?;
        let mut columns = Vec::new();
        while let Some(row) = cursor.next_row() {
            let row = row.map_err(|err| classify(DESCRIBE_SCHEMA, err))?;
            let name = text_cell(DESCRIBE_SCHEMA, &row, 0)?;
            let declared = text_cell(DESCRIBE_SCHEMA, &row, 1)?;
            columns.push(ColumnDescriptor::new(name, declared, columns.len() + 1));
        }
        debug!(database, table, count = columns.len(), "described table");
        Ok(columns)
    }

    async fn query(&self, sql: &str, row_cap: u64, cancel: &CancelToken) -> DbResult<QueryResult> {
        let statement = apply_row_cap(normalize(sql), row_cap);
        self.backend
            .ping(cancel)
            .await
            .map_err(|err| DbError::connection(EXECUTE_QUERY, err))?;
        let started = Instant::now();
        let mut cursor = self.run(EXECUTE_QUERY, &statement, cancel).await?;
        let (columns, rows) = materialize_rows(cursor.as_mut())
            .map_err(|err| DbError::execution(EXECUTE_QUERY, err))?;
        let elapsed = started.elapsed();
        if elapsed >= self.config.slow_query_threshold {
            warn!(elapsed_ms = elapsed.as_millis() as u64, sql = %statement, "slow query");
        }
        info!(
            columns = columns.len(),
            rows = rows.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "query executed"
        );
        Ok(QueryResult { columns, rows })
    }
}

#[async_trait]
impl<B: Backend> Client for DefaultClient<B> {
    async fn list_databases(&self, cancel: &CancelToken) -> DbResult<Vec<String>> {
        self.databases(cancel).instrument(self.span.clone()).await
    }

    async fn list_tables(&self, database: &str, cancel: &CancelToken) -> DbResult<Vec<String>> {
        self.tables(database, cancel)
            .instrument(self.span.clone())
            .await
    }

    async fn describe_schema(
        &self,
        database: &str,
        table: &str,
        cancel: &CancelToken,
    ) -> DbResult<Vec<ColumnDescriptor>> {
        self.schema(database, table, cancel)
            .instrument(self.span.clone())
            .await
    }

    async fn execute_query(
        &self,
        sql: &str,
        row_cap: u64,
        cancel: &CancelToken,
    ) -> DbResult<QueryResult> {
        self.query(sql, row_cap, cancel)
            .instrument(self.span.clone())
            .await
    }

    async fn ping(&self, cancel: &CancelToken) -> DbResult<()> {
        self.backend
            .ping(cancel)
            .instrument(self.span.clone())
            .await
            .map_err(|err| DbError::connection(PING, err))
    }

    async fn close(&self) -> DbResult<()> {
        self.span.in_scope(|| info!("closing ClickHouse client"));
        self.backend
            .close()
            .await
            .map_err(|err| DbError::execution(CLOSE, err))
    }
}

/// Transport and pool failures mean the server was unreachable; the rest is the
/// statement's fault.
fn classify(operation: &'static str, err: BackendError) -> DbError {
    let unreachable = match &err {
        BackendError::Pool(_) | BackendError::Closed => true,
        #[cfg(feature = "http")]
        BackendError::Transport(inner) => inner.is_connect() || inner.is_timeout(),
        _ => false,
    };
    if unreachable {
        DbError::connection(operation, err)
    } else {
        DbError::execution(operation, err)
    }
}

fn text_cell(operation: &'static str, row: &[RawValue], idx: usize) -> DbResult<String> {
    row.get(idx)
        .and_then(RawValue::to_text)
        .ok_or_else(|| {
            DbError::execution(
                operation,
                BackendError::other(format!("column {idx} is missing or not text")),
            )
        })
}
