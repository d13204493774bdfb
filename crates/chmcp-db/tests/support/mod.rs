#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chmcp_db::{
    Backend, BackendError, BackendResult, CancelToken, ClientConfig, DefaultClient, RawColumn,
    RawValue, RowCursor, VecCursor,
};

type Responder = Box<dyn Fn(&str) -> BackendResult<VecCursor> + Send + Sync>;

/// In-memory backend that records every statement it receives.
pub struct FakeBackend {
    responder: Responder,
    statements: Mutex<Vec<String>>,
    ping_fails: AtomicBool,
    pings: AtomicUsize,
    closed: AtomicBool,
}

impl FakeBackend {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> BackendResult<VecCursor> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            statements: Mutex::new(Vec::new()),
            ping_fails: AtomicBool::new(false),
            pings: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Answers every statement with the same rows.
    pub fn fixed(columns: Vec<RawColumn>, rows: Vec<Vec<RawValue>>) -> Self {
        Self::new(move |_| Ok(VecCursor::new(columns.clone(), rows.clone())))
    }

    pub fn failing_ping(self) -> Self {
        self.ping_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().expect("statements lock").clone()
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn query(&self, sql: &str, cancel: &CancelToken) -> BackendResult<Box<dyn RowCursor>> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        self.statements
            .lock()
            .expect("statements lock")
            .push(sql.to_string());
        let cursor = (self.responder)(sql)?;
        Ok(Box::new(cursor))
    }

    async fn ping(&self, _cancel: &CancelToken) -> BackendResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.ping_fails.load(Ordering::SeqCst) {
            return Err(BackendError::other("connection refused"));
        }
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn client(backend: FakeBackend) -> DefaultClient<FakeBackend> {
    DefaultClient::with_backend(backend, ClientConfig::default(), tracing::Span::none())
}

pub fn text(value: &str) -> RawValue {
    RawValue::Bytes(value.as_bytes().to_vec())
}

pub fn column(name: &str, type_name: &str) -> RawColumn {
    RawColumn::new(name, type_name)
}
