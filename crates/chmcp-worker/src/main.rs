mod config;
mod error;
mod logging;
mod mcp;
mod tools;

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use chmcp_db::{Client, DefaultClient};
use clap::Parser;
use tracing::{error, info, info_span};

use config::{Cli, ServerConfig};
use error::WorkerError;
use mcp::{CallLimits, ClickHouseHandler};
use tools::ToolHandler;

const EXAMPLE_REQUESTS: [(&str, &str); 4] = [
    (
        "List databases",
        r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"get_databases","arguments":{}}}"#,
    ),
    (
        "List tables",
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"get_tables","arguments":{"database":"default"}}}"#,
    ),
    (
        "Describe a table",
        r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"get_schema","arguments":{"database":"default","table":"some_table"}}}"#,
    ),
    (
        "Run a query",
        r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"query","arguments":{"query":"SELECT 1 AS test","limit":10}}}"#,
    ),
];

fn print_examples<W: Write>(out: &mut W) -> io::Result<()> {
    for (idx, (title, request)) in EXAMPLE_REQUESTS.iter().enumerate() {
        if idx > 0 {
            writeln!(out)?;
        }
        writeln!(out, "=== {title} ===")?;
        writeln!(out, "{request}")?;
    }
    writeln!(out)?;
    writeln!(
        out,
        "Start the server without --test and send these requests from an MCP client."
    )
}

fn run(cli: Cli) -> Result<(), WorkerError> {
    if cli.test {
        info!("printing example requests");
        return Ok(print_examples(&mut io::stdout().lock())?);
    }
    let config = ServerConfig::from_cli(&cli)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("chmcp-io")
        .build()?;

    let clickhouse = config.clickhouse.clone();
    info!(
        host = %clickhouse.host,
        port = clickhouse.port,
        database = %clickhouse.database,
        secure = clickhouse.secure,
        "connecting to ClickHouse"
    );
    let span = info_span!("clickhouse", host = %clickhouse.host, database = %clickhouse.database);
    let client: Arc<dyn Client> = Arc::new(runtime.block_on(DefaultClient::connect(clickhouse, span))?);

    let tools = Arc::new(ToolHandler::new(client.clone()));
    let handler = ClickHouseHandler::new(
        tools,
        CallLimits {
            concurrent: config.threads,
            queued: config.max_queue,
        },
    );
    let in_flight = handler.in_flight();
    let served = runtime.block_on(mcp::serve(&config.listen, handler));
    let abandoned = in_flight.cancel_all();
    if abandoned > 0 {
        info!(abandoned, "cancelled unfinished tool calls");
    }
    if let Err(err) = runtime.block_on(client.close()) {
        error!(error = %err, "failed to close ClickHouse client");
    }
    info!("server stopped");
    Ok(served?)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "clickhouse-mcp failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn examples_are_valid_tool_calls() {
        for (_, request) in EXAMPLE_REQUESTS {
            let decoded: serde_json::Value = serde_json::from_str(request).expect("request");
            assert_eq!(decoded["jsonrpc"], "2.0");
            assert_eq!(decoded["method"], "tools/call");
            let name = decoded["params"]["name"].as_str().expect("name");
            assert!(tools::Tool::from_name(name).is_some(), "{name}");
            assert!(decoded["params"]["arguments"].is_object());
        }
    }

    #[test]
    fn example_output_lists_every_tool() {
        let mut out = Vec::new();
        print_examples(&mut out).expect("write");
        let text = String::from_utf8(out).expect("utf8");
        for tool in tools::Tool::ALL {
            assert!(text.contains(tool.name()), "{}", tool.name());
        }
        assert!(text.ends_with("MCP client.\n"));
    }
}
