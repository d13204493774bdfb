//! `clickhouse://host:port/database` parsing.

use crate::error::{DbError, DbResult};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_DATABASE: &str = "default";

const SCHEME: &str = "clickhouse://";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl Default for ConnectionTarget {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.to_string(),
        }
    }
}

/// Anything starting with `localhost` short-circuits to the defaults, port and
/// database included.
pub fn parse_connection_url(url: &str) -> DbResult<ConnectionTarget> {
    if url.is_empty() || url.starts_with(DEFAULT_HOST) {
        return Ok(ConnectionTarget::default());
    }
    let rest = url.strip_prefix(SCHEME).unwrap_or(url);
    let (authority, database) = match rest.split_once('/') {
        Some((authority, db)) if !db.is_empty() => (authority, db),
        Some((authority, _)) => (authority, DEFAULT_DATABASE),
        None => (rest, DEFAULT_DATABASE),
    };
    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, scan_port(port)),
        None => (authority, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(DbError::configuration(url, "missing host"));
    }
    Ok(ConnectionTarget {
        host: host.to_string(),
        port,
        database: database.to_string(),
    })
}

/// Reads the leading decimal digits, so `8123x` is port 8123. No digits, or a
/// number outside the port range, means the default port.
fn scan_port(text: &str) -> u16 {
    let text = text.trim_start();
    let unsigned = text.strip_prefix('+').unwrap_or(text);
    let end = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());
    unsigned[..end].parse().unwrap_or(DEFAULT_PORT)
}
