use std::error::Error as StdError;

use crate::pool::AcquireError;
use crate::rowbinary::DecodeError;

pub type DbResult<T> = Result<T, DbError>;
pub type BackendResult<T> = Result<T, BackendError>;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced by the engine, annotated with the originating operation.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("invalid ClickHouse URL {input:?}: {reason}")]
    Configuration { input: String, reason: String },
    #[error("{operation}: connection failed: {source}")]
    Connection {
        operation: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("{operation}: {source}")]
    Execution {
        operation: &'static str,
        #[source]
        source: BoxError,
    },
}

impl DbError {
    pub fn configuration(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn connection(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Connection {
            operation,
            source: source.into(),
        }
    }

    pub fn execution(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Execution {
            operation,
            source: source.into(),
        }
    }

    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Self::Configuration { .. } => None,
            Self::Connection { operation, .. } | Self::Execution { operation, .. } => {
                Some(*operation)
            }
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Failures inside a connector.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[cfg(feature = "http")]
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("session pool: {0}")]
    Pool(#[from] AcquireError),
    #[error("request cancelled")]
    Cancelled,
    #[error("backend closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}
