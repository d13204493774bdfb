//! ClickHouse HTTP interface connector.
//!
//! Every pooled item is one server-side session (`session_id`), so statements that
//! share a checkout see the same temporary tables and settings. Results are read in
//! full and decoded from `RowBinaryWithNamesAndTypes`. Columns whose types have no
//! binary decoder are cast to `String` by re-running the statement wrapped in
//! `SELECT * REPLACE (...)`, then reported under their declared types.

use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::RequestBuilder;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{Backend, RowCursor};
use crate::dsn::{DEFAULT_DATABASE, DEFAULT_HOST, DEFAULT_PORT};
use crate::error::{BackendError, BackendResult};
use crate::pool::{AsyncPool, CancelToken, PoolConfig, Pooled};
use crate::rowbinary::{self, RowBinaryCursor};

const RESULT_FORMAT: &str = "RowBinaryWithNamesAndTypes";

#[derive(Clone, Debug)]
pub struct ClickHouseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// HTTPS without certificate verification.
    pub secure: bool,
    pub pool: PoolConfig,
    pub connect_timeout: Duration,
    pub query_timeout: Option<Duration>,
    /// Server-side session expiry. Idle sessions older than this are not reused.
    pub session_timeout: Duration,
    /// Extra settings sent with every statement.
    pub settings: Vec<(String, String)>,
}

impl ClickHouseConfig {
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            username: String::new(),
            password: String::new(),
            secure: false,
            pool: PoolConfig::default(),
            connect_timeout: Duration::from_secs(5),
            query_timeout: None,
            session_timeout: Duration::from_secs(60),
            settings: default_settings(),
        }
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("{scheme}://[{}]:{}", self.host, self.port)
        } else {
            format!("{scheme}://{}:{}", self.host, self.port)
        }
    }
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT, DEFAULT_DATABASE)
    }
}

fn default_settings() -> Vec<(String, String)> {
    [
        ("allow_experimental_object_type", "1"),
        ("output_format_json_named_tuples_as_objects", "1"),
        ("allow_suspicious_low_cardinality_types", "1"),
        ("format_csv_delimiter", ","),
        ("output_format_binary_write_json_as_string", "1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub struct HttpSession {
    id: String,
    last_used: Mutex<Instant>,
}

impl HttpSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            last_used: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }
}

pub struct HttpBackend {
    config: Arc<ClickHouseConfig>,
    http: reqwest::Client,
    base_url: String,
    sessions: Arc<AsyncPool<HttpSession>>,
}

impl HttpBackend {
    pub fn new(config: ClickHouseConfig) -> BackendResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .danger_accept_invalid_certs(config.secure)
            .pool_max_idle_per_host(config.pool.max_idle)
            .gzip(true)
            .build()?;
        let sessions = AsyncPool::new(config.pool.clone(), || async {
            Ok::<_, Infallible>(HttpSession::new())
        });
        Ok(Self {
            base_url: config.base_url(),
            config: Arc::new(config),
            http,
            sessions,
        })
    }

    pub fn config(&self) -> &ClickHouseConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<AsyncPool<HttpSession>> {
        &self.sessions
    }

    async fn session(&self, cancel: &CancelToken) -> BackendResult<Pooled<HttpSession>> {
        loop {
            let session = self.sessions.acquire(Some(cancel)).await?;
            if session.as_ref().idle_for() >= self.config.session_timeout {
                session.discard();
                continue;
            }
            return Ok(session);
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.config.username.is_empty() {
            request
        } else {
            request.basic_auth(&self.config.username, Some(&self.config.password))
        }
    }

    fn statement_request(&self, sql: &str, session: Option<&str>, query_id: &str) -> RequestBuilder {
        let mut params: Vec<(&str, &str)> = vec![
            ("database", self.config.database.as_str()),
            ("default_format", RESULT_FORMAT),
            ("query_id", query_id),
        ];
        let session_timeout = self.config.session_timeout.as_secs().to_string();
        if let Some(id) = session {
            params.push(("session_id", id));
        }
        let mut request = self
            .http
            .post(&self.base_url)
            .query(&params)
            .query(&self.config.settings);
        if session.is_some() {
            request = request.query(&[("session_timeout", session_timeout)]);
        }
        if let Some(timeout) = self.config.query_timeout {
            request = request.timeout(timeout);
        }
        self.authorize(request).body(sql.to_owned())
    }

    /// Best effort: the statement may already be finished.
    async fn kill_query(&self, query_id: &str) {
        let kill = format!("KILL QUERY WHERE query_id = '{query_id}' ASYNC");
        let request = self
            .statement_request(&kill, None, &Uuid::new_v4().to_string())
            .timeout(self.config.connect_timeout);
        if let Err(err) = send(request).await {
            warn!(query_id, error = %err, "failed to kill cancelled query");
        }
    }

    /// Runs one statement on a pooled session and returns the raw response body.
    async fn fetch(&self, sql: &str, cancel: &CancelToken) -> BackendResult<Vec<u8>> {
        let session = self.session(cancel).await?;
        let query_id = Uuid::new_v4().to_string();
        let request = self.statement_request(sql, Some(session.as_ref().id()), &query_id);
        debug!(session = session.as_ref().id(), %query_id, "dispatching statement");
        let outcome = tokio::select! {
            outcome = send(request) => outcome,
            _ = cancel.cancelled() => {
                // The server may still hold the session lock.
                session.discard();
                self.kill_query(&query_id).await;
                return Err(BackendError::Cancelled);
            }
        };
        match outcome {
            Ok(body) => {
                session.as_ref().touch();
                Ok(body)
            }
            Err(err @ BackendError::Transport(_)) => {
                session.discard();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

/// Wraps `sql` so the named columns come back as `String`.
fn cast_to_string(sql: &str, columns: &[&str]) -> String {
    let replaced = columns
        .iter()
        .map(|name| {
            let quoted = quote_identifier(name);
            format!("toString({quoted}) AS {quoted}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT * REPLACE ({replaced}) FROM (\n{sql}\n)")
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

async fn send(request: RequestBuilder) -> BackendResult<Vec<u8>> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.bytes().await?;
    if !status.is_success() {
        return Err(BackendError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).trim().to_string(),
        });
    }
    Ok(body.to_vec())
}

#[async_trait]
impl Backend for HttpBackend {
    async fn query(&self, sql: &str, cancel: &CancelToken) -> BackendResult<Box<dyn RowCursor>> {
        if self.sessions.is_closed() {
            return Err(BackendError::Closed);
        }
        let body = self.fetch(sql, cancel).await?;
        let declared = rowbinary::read_header(&body)?;
        let opaque: Vec<&str> = declared
            .iter()
            .filter(|column| rowbinary::needs_cast(&column.type_name))
            .map(|column| column.name.as_str())
            .collect();
        if opaque.is_empty() {
            return Ok(Box::new(RowBinaryCursor::new(body)?));
        }
        debug!(columns = ?opaque, "re-running statement with string casts");
        let body = self.fetch(&cast_to_string(sql, &opaque), cancel).await?;
        let mut cursor = RowBinaryCursor::new(body)?;
        cursor.restore_declared_types(&declared);
        Ok(Box::new(cursor))
    }

    async fn ping(&self, cancel: &CancelToken) -> BackendResult<()> {
        if self.sessions.is_closed() {
            return Err(BackendError::Closed);
        }
        let request = self
            .http
            .get(format!("{}/ping", self.base_url))
            .timeout(self.config.connect_timeout);
        tokio::select! {
            outcome = send(request) => outcome.map(|_| ()),
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
        }
    }

    async fn close(&self) -> BackendResult<()> {
        self.sessions.close();
        Ok(())
    }
}
