//! Query execution and type-directed result materialization for ClickHouse.
//!
//! [`DefaultClient`] runs introspection statements and capped queries against a
//! [`Backend`]. The HTTP connector lives behind the `http` feature.

pub mod backend;
pub mod client;
pub mod dsn;
pub mod error;
pub mod materialize;
pub mod normalize;
pub mod pool;
pub mod rowbinary;
pub mod types;
pub mod value;

#[cfg(feature = "http")]
pub mod http;

pub use backend::{Backend, RawColumn, RowCursor, VecCursor};
pub use client::{Client, ClientConfig, DefaultClient};
pub use dsn::{ConnectionTarget, parse_connection_url};
pub use error::{BackendError, BackendResult, DbError, DbResult};
pub use pool::{AcquireError, AsyncPool, CancelToken, PoolConfig, Pooled};
pub use value::{ColumnDescriptor, QueryResult, RawValue, Record, Value};

#[cfg(feature = "http")]
pub use http::{ClickHouseConfig, HttpBackend};
