//! The four MCP tools and their text rendering.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use chmcp_db::{CancelToken, Client, ColumnDescriptor, QueryResult};
use rust_mcp_sdk::schema::{ListToolsResult, Tool as ToolDefinition, ToolInputSchema};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const DEFAULT_QUERY_LIMIT: i64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
    GetDatabases,
    GetTables,
    GetSchema,
    Query,
}

impl Tool {
    pub const ALL: [Tool; 4] = [Tool::GetDatabases, Tool::GetTables, Tool::GetSchema, Tool::Query];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Tool::GetDatabases => "get_databases",
            Tool::GetTables => "get_tables",
            Tool::GetSchema => "get_schema",
            Tool::Query => "query",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Tool::GetDatabases => "List databases in ClickHouse",
            Tool::GetTables => "List tables in the selected database",
            Tool::GetSchema => "Get the schema of the selected table",
            Tool::Query => "Run a SQL query in ClickHouse",
        }
    }

    pub fn input_schema(self) -> ToolInputSchema {
        let mut required: Vec<String> = Vec::new();
        let mut props: HashMap<String, Map<String, Value>> = HashMap::new();
        match self {
            Tool::GetDatabases => {}
            Tool::GetTables => {
                required.push("database".into());
                props.insert("database".into(), property("string", "Database name"));
            }
            Tool::GetSchema => {
                required.extend(["database".into(), "table".into()]);
                props.insert("database".into(), property("string", "Database name"));
                props.insert("table".into(), property("string", "Table name"));
            }
            Tool::Query => {
                required.push("query".into());
                props.insert("query".into(), property("string", "SQL query to run"));
                props.insert(
                    "limit".into(),
                    property("number", "Maximum number of rows to return (default 100)"),
                );
            }
        }
        ToolInputSchema::new(required, Some(props))
    }

    pub fn definition(self) -> ToolDefinition {
        ToolDefinition {
            annotations: None,
            description: Some(self.description().to_string()),
            input_schema: self.input_schema(),
            name: self.name().to_string(),
        }
    }
}

fn property(kind: &str, description: &str) -> Map<String, Value> {
    let mut schema = Map::new();
    schema.insert("type".into(), Value::String(kind.into()));
    schema.insert("description".into(), Value::String(description.into()));
    schema
}

/// `tools/list` result.
pub fn list_tools() -> ListToolsResult {
    ListToolsResult {
        tools: Tool::ALL.iter().map(|tool| tool.definition()).collect(),
        meta: None,
        next_cursor: None,
    }
}

/// Outcome of one tool call: a single text payload, flagged when it reports a failure.
#[derive(Debug, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(text)
        }
    }

    pub fn first_text(&self) -> &str {
        &self.text
    }
}

pub struct ToolHandler {
    client: Arc<dyn Client>,
}

impl ToolHandler {
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self { client }
    }

    pub async fn call(
        &self,
        tool: Tool,
        arguments: &Map<String, Value>,
        cancel: &CancelToken,
    ) -> ToolOutput {
        debug!(tool = tool.name(), "tool call");
        let output = match tool {
            Tool::GetDatabases => self.get_databases(cancel).await,
            Tool::GetTables => self.get_tables(arguments, cancel).await,
            Tool::GetSchema => self.get_schema(arguments, cancel).await,
            Tool::Query => self.query(arguments, cancel).await,
        };
        if output.is_error {
            warn!(tool = tool.name(), error = output.first_text(), "tool failed");
        }
        output
    }

    async fn get_databases(&self, cancel: &CancelToken) -> ToolOutput {
        match self.client.list_databases(cancel).await {
            Ok(databases) => ToolOutput::text(render_databases(&databases)),
            Err(err) => ToolOutput::error(format!("Failed to list databases: {err}")),
        }
    }

    async fn get_tables(&self, arguments: &Map<String, Value>, cancel: &CancelToken) -> ToolOutput {
        let Some(database) = string_arg(arguments, "database") else {
            return ToolOutput::error("Parameter 'database' is required");
        };
        match self.client.list_tables(database, cancel).await {
            Ok(tables) => ToolOutput::text(render_tables(database, &tables)),
            Err(err) => ToolOutput::error(format!("Failed to list tables: {err}")),
        }
    }

    async fn get_schema(&self, arguments: &Map<String, Value>, cancel: &CancelToken) -> ToolOutput {
        let (Some(database), Some(table)) = (
            string_arg(arguments, "database"),
            string_arg(arguments, "table"),
        ) else {
            return ToolOutput::error("Parameters 'database' and 'table' are required");
        };
        match self.client.describe_schema(database, table, cancel).await {
            Ok(columns) => ToolOutput::text(render_schema(database, table, &columns)),
            Err(err) => ToolOutput::error(format!("Failed to get table schema: {err}")),
        }
    }

    async fn query(&self, arguments: &Map<String, Value>, cancel: &CancelToken) -> ToolOutput {
        let Some(sql) = string_arg(arguments, "query") else {
            return ToolOutput::error("Parameter 'query' is required");
        };
        let limit = limit_arg(arguments);
        let result = match self.client.execute_query(sql, row_cap(limit), cancel).await {
            Ok(result) => result,
            Err(err) => return ToolOutput::error(format!("Query failed: {err}")),
        };
        if result.is_untabular() {
            return ToolOutput::text("Query executed, no results.");
        }
        match render_query(&result) {
            Ok(text) => ToolOutput::text(text),
            Err(err) => ToolOutput::error(format!("Failed to format results: {err}")),
        }
    }
}

fn string_arg<'a>(arguments: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str)
}

/// Numeric `limit`, truncated toward zero. Non-numbers fall back to the default.
pub fn limit_arg(arguments: &Map<String, Value>) -> i64 {
    arguments
        .get("limit")
        .and_then(Value::as_f64)
        .filter(|limit| limit.is_finite())
        .map_or(DEFAULT_QUERY_LIMIT, |limit| limit.trunc() as i64)
}

/// Zero or negative limits disable the cap.
pub fn row_cap(limit: i64) -> u64 {
    u64::try_from(limit).unwrap_or(0)
}

pub fn render_databases(databases: &[String]) -> String {
    let mut out = String::from("Databases in ClickHouse:\n\n");
    push_numbered(&mut out, databases);
    out
}

pub fn render_tables(database: &str, tables: &[String]) -> String {
    let mut out = format!("Tables in database '{database}':\n\n");
    if tables.is_empty() {
        out.push_str("No tables found.");
    } else {
        push_numbered(&mut out, tables);
    }
    out
}

pub fn render_schema(database: &str, table: &str, columns: &[ColumnDescriptor]) -> String {
    let mut out = format!("Schema of table '{database}.{table}':\n\n");
    if columns.is_empty() {
        out.push_str("No columns found.");
        return out;
    }
    let _ = writeln!(out, "{:<20} | {:<30} | {}", "COLUMN", "TYPE", "POSITION");
    out.push_str(&"-".repeat(70));
    out.push('\n');
    for column in columns {
        let _ = writeln!(
            out,
            "{:<20} | {:<30} | {}",
            column.name, column.declared_type, column.position
        );
    }
    out
}

pub fn render_query(result: &QueryResult) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(result)
}

fn push_numbered(out: &mut String, items: &[String]) {
    for (idx, item) in items.iter().enumerate() {
        let _ = writeln!(out, "{}. {item}", idx + 1);
    }
}
