//! Command line and environment configuration.

use std::time::Duration;

use chmcp_db::{ClickHouseConfig, DbResult, PoolConfig, parse_connection_url};
use clap::{Parser, ValueEnum};

const NATIVE_PORT: u16 = 9000;
const NATIVE_TLS_PORT: u16 = 9440;
const HTTP_PORT: u16 = 8123;
const HTTP_TLS_PORT: u16 = 8443;

/// How MCP messages reach the server.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    /// Newline-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// HTTP listener with SSE and streamable HTTP endpoints
    Sse,
}

/// MCP server exposing read and introspection tools for ClickHouse.
#[derive(Parser, Debug, Clone)]
#[command(name = "clickhouse-mcp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Transport type
    #[arg(short = 't', long, value_enum, env = "CHMCP_TRANSPORT", default_value_t = Transport::Stdio)]
    pub transport: Transport,

    /// Address the SSE listener binds to
    #[arg(long, env = "CHMCP_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port for the SSE listener
    #[arg(long, env = "CHMCP_PORT", default_value_t = 8082)]
    pub port: u16,

    /// ClickHouse URL (format: [clickhouse://]host:port/database)
    #[arg(long, env = "CLICKHOUSE_URL", default_value = "localhost:9000/default")]
    pub url: String,

    /// ClickHouse username
    #[arg(long, env = "CLICKHOUSE_USER", default_value = "default")]
    pub user: String,

    /// ClickHouse password
    #[arg(long, env = "CLICKHOUSE_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Database to use, overriding the one in the URL
    #[arg(long = "db", env = "CLICKHOUSE_DB")]
    pub database: Option<String>,

    /// Use TLS without certificate verification
    #[arg(long, env = "CLICKHOUSE_SECURE")]
    pub secure: bool,

    /// HTTP interface port; derived from the URL port when omitted
    #[arg(long, env = "CLICKHOUSE_HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Tool calls executed concurrently (defaults to available parallelism)
    #[arg(long, env = "CHMCP_THREADS")]
    pub threads: Option<usize>,

    /// Tool calls waiting for a slot before new ones are rejected as busy
    #[arg(long, env = "CHMCP_MAX_QUEUE", default_value_t = 64)]
    pub max_queue: usize,

    /// Upper bound on open ClickHouse sessions
    #[arg(long, env = "CHMCP_MAX_OPEN", default_value_t = 10)]
    pub max_open: usize,

    /// Idle sessions kept for reuse
    #[arg(long, env = "CHMCP_MAX_IDLE", default_value_t = 5)]
    pub max_idle: usize,

    /// Session lifetime in seconds (0 disables expiry)
    #[arg(long, env = "CHMCP_MAX_LIFETIME_SECS", default_value_t = 600)]
    pub max_lifetime_secs: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "CHMCP_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Print example requests and exit without connecting
    #[arg(long)]
    pub test: bool,
}

/// Where the MCP server listens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Listen {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
}

/// Resolved runtime settings.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub clickhouse: ClickHouseConfig,
    pub listen: Listen,
    pub threads: usize,
    pub max_queue: usize,
}

impl ServerConfig {
    pub fn from_cli(cli: &Cli) -> DbResult<Self> {
        let target = parse_connection_url(&cli.url)?;
        let database = match cli.database.as_deref() {
            Some(db) if !db.is_empty() => db.to_string(),
            _ => target.database,
        };
        let port = cli
            .http_port
            .unwrap_or_else(|| http_port_for(target.port, cli.secure));
        let mut clickhouse = ClickHouseConfig::new(target.host, port, database);
        clickhouse.username = cli.user.clone();
        clickhouse.password = cli.password.clone();
        clickhouse.secure = cli.secure;
        clickhouse.pool = PoolConfig {
            max_open: cli.max_open.max(1),
            max_idle: cli.max_idle,
            max_lifetime: (cli.max_lifetime_secs > 0)
                .then(|| Duration::from_secs(cli.max_lifetime_secs)),
            ..PoolConfig::default()
        };
        let threads = cli.threads.filter(|count| *count > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(4)
        });
        Ok(Self {
            clickhouse,
            listen: Listen {
                transport: cli.transport,
                host: cli.host.clone(),
                port: cli.port,
            },
            threads,
            max_queue: cli.max_queue.max(1),
        })
    }
}

/// Native-protocol ports map to their HTTP counterparts; anything else is
/// assumed to already be an HTTP port.
pub fn http_port_for(port: u16, secure: bool) -> u16 {
    match port {
        NATIVE_PORT if secure => HTTP_TLS_PORT,
        NATIVE_PORT => HTTP_PORT,
        NATIVE_TLS_PORT => HTTP_TLS_PORT,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["clickhouse-mcp"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("cli")
    }

    #[test]
    fn defaults_resolve_to_local_http_interface() {
        let config = ServerConfig::from_cli(&parse(&[])).expect("config");
        assert_eq!(config.clickhouse.host, "localhost");
        assert_eq!(config.clickhouse.port, 8123);
        assert_eq!(config.clickhouse.database, "default");
        assert_eq!(config.clickhouse.username, "default");
        assert_eq!(config.clickhouse.pool.max_open, 10);
        assert_eq!(config.clickhouse.pool.max_idle, 5);
        assert_eq!(
            config.clickhouse.pool.max_lifetime,
            Some(Duration::from_secs(600))
        );
        assert_eq!(config.max_queue, 64);
        assert!(config.threads >= 1);
        assert_eq!(
            config.listen,
            Listen {
                transport: Transport::Stdio,
                host: "127.0.0.1".into(),
                port: 8082,
            }
        );
    }

    #[test]
    fn sse_transport_and_port() {
        let config = ServerConfig::from_cli(&parse(&["--transport", "sse", "--port", "9090"]))
            .expect("config");
        assert_eq!(config.listen.transport, Transport::Sse);
        assert_eq!(config.listen.port, 9090);

        let config = ServerConfig::from_cli(&parse(&["-t", "sse", "--host", "0.0.0.0"]))
            .expect("config");
        assert_eq!(config.listen.transport, Transport::Sse);
        assert_eq!(config.listen.host, "0.0.0.0");
        assert_eq!(config.listen.port, 8082);
    }

    #[test]
    fn unknown_transport_is_rejected() {
        assert!(Cli::try_parse_from(["clickhouse-mcp", "--transport", "websocket"]).is_err());
    }

    #[test]
    fn db_flag_overrides_url_database() {
        let config = ServerConfig::from_cli(&parse(&[
            "--url",
            "clickhouse://ch.prod:8123/raw",
            "--db",
            "analytics",
        ]))
        .expect("config");
        assert_eq!(config.clickhouse.host, "ch.prod");
        assert_eq!(config.clickhouse.port, 8123);
        assert_eq!(config.clickhouse.database, "analytics");
    }

    #[test]
    fn explicit_http_port_wins() {
        let config = ServerConfig::from_cli(&parse(&[
            "--url",
            "ch.prod:9000/raw",
            "--http-port",
            "18123",
            "--secure",
        ]))
        .expect("config");
        assert_eq!(config.clickhouse.port, 18123);
        assert!(config.clickhouse.secure);
        assert!(config.clickhouse.base_url().starts_with("https://"));
    }

    #[test]
    fn native_ports_map_to_http_ports() {
        assert_eq!(http_port_for(9000, false), 8123);
        assert_eq!(http_port_for(9000, true), 8443);
        assert_eq!(http_port_for(9440, true), 8443);
        assert_eq!(http_port_for(8123, false), 8123);
    }

    #[test]
    fn zero_lifetime_disables_expiry() {
        let config = ServerConfig::from_cli(&parse(&["--max-lifetime-secs", "0", "--threads", "2"]))
            .expect("config");
        assert_eq!(config.clickhouse.pool.max_lifetime, None);
        assert_eq!(config.threads, 2);
    }

    #[test]
    fn bad_url_is_rejected() {
        assert!(ServerConfig::from_cli(&parse(&["--url", "clickhouse://:9000/x"])).is_err());
    }
}
