//! MCP server surface on rust-mcp-sdk.
//!
//! The SDK owns framing and the protocol handshake on either transport. Tool
//! calls pass an admission gate that bounds running plus waiting calls, and
//! every admitted call holds a cancellation token until it finishes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use chmcp_db::CancelToken;
use rust_mcp_sdk::error::SdkResult;
use rust_mcp_sdk::mcp_server::{HyperServerOptions, ServerHandler, hyper_server, server_runtime};
use rust_mcp_sdk::schema::schema_utils::CallToolError;
use rust_mcp_sdk::schema::{
    CallToolRequest, CallToolResult, CancelledNotification, Implementation, InitializeResult,
    LATEST_PROTOCOL_VERSION, ListToolsRequest, ListToolsResult, RpcError, ServerCapabilities,
    ServerCapabilitiesTools,
};
use rust_mcp_sdk::{McpServer, StdioTransport, TransportOptions};
use serde_json::{Map, Value};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::{Listen, Transport};
use crate::error::CallRejected;
use crate::tools::{Tool, ToolHandler, ToolOutput, list_tools};

pub const SERVER_NAME: &str = "clickhouse-client";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const INSTRUCTIONS: &str =
    "Read-only ClickHouse access: list databases and tables, describe schemas, run SQL queries";

pub fn server_details() -> InitializeResult {
    InitializeResult {
        server_info: Implementation {
            name: SERVER_NAME.to_string(),
            version: SERVER_VERSION.to_string(),
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools { list_changed: None }),
            ..Default::default()
        },
        meta: None,
        instructions: Some(INSTRUCTIONS.to_string()),
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    }
}

/// Runs the server until the transport shuts down.
pub async fn serve(listen: &Listen, handler: ClickHouseHandler) -> SdkResult<()> {
    match listen.transport {
        Transport::Stdio => {
            info!("serving MCP over stdio");
            let transport = StdioTransport::new(TransportOptions::default())?;
            let server = server_runtime::create_server(server_details(), transport, handler);
            server.start().await
        }
        Transport::Sse => {
            info!(host = %listen.host, port = listen.port, "serving MCP over SSE and streamable HTTP");
            let server = hyper_server::create_server(
                server_details(),
                handler,
                HyperServerOptions {
                    host: listen.host.clone(),
                    port: listen.port,
                    ..Default::default()
                },
            );
            server.start().await.map_err(Into::into)
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CallLimits {
    /// Calls running at once.
    pub concurrent: usize,
    /// Calls waiting for a running slot.
    pub queued: usize,
}

/// Bounds admitted calls to `concurrent + queued`; beyond that callers are
/// turned away instead of waiting.
struct CallGate {
    running: Arc<Semaphore>,
    admitted: Arc<AtomicUsize>,
    limit: usize,
}

struct Admission {
    admitted: Arc<AtomicUsize>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.admitted.fetch_sub(1, Ordering::AcqRel);
    }
}

struct GatePass {
    _running: OwnedSemaphorePermit,
    _admission: Admission,
}

impl CallGate {
    fn new(limits: CallLimits) -> Self {
        let concurrent = limits.concurrent.max(1);
        Self {
            running: Arc::new(Semaphore::new(concurrent)),
            admitted: Arc::new(AtomicUsize::new(0)),
            limit: concurrent + limits.queued,
        }
    }

    async fn enter(&self) -> Result<GatePass, CallRejected> {
        if self.admitted.fetch_add(1, Ordering::AcqRel) >= self.limit {
            self.admitted.fetch_sub(1, Ordering::AcqRel);
            return Err(CallRejected::Busy { limit: self.limit });
        }
        let admission = Admission {
            admitted: self.admitted.clone(),
        };
        let running = self
            .running
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CallRejected::Busy { limit: self.limit })?;
        Ok(GatePass {
            _running: running,
            _admission: admission,
        })
    }
}

/// Cancellation tokens of admitted calls. Each call gets its own ticket, so two
/// calls never share or evict each other's entry.
#[derive(Clone, Default)]
pub struct InFlight {
    next: Arc<AtomicU64>,
    calls: Arc<Mutex<HashMap<u64, CancelToken>>>,
}

pub struct InFlightCall {
    ticket: u64,
    token: CancelToken,
    calls: Arc<Mutex<HashMap<u64, CancelToken>>>,
}

impl InFlightCall {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for InFlightCall {
    fn drop(&mut self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.ticket);
    }
}

impl InFlight {
    pub fn register(&self) -> InFlightCall {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        let token = CancelToken::new();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ticket, token.clone());
        InFlightCall {
            ticket,
            token,
            calls: self.calls.clone(),
        }
    }

    /// Cancels every admitted call and returns how many there were.
    pub fn cancel_all(&self) -> usize {
        let calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        for token in calls.values() {
            token.cancel();
        }
        calls.len()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct ClickHouseHandler {
    tools: Arc<ToolHandler>,
    gate: CallGate,
    in_flight: InFlight,
}

impl ClickHouseHandler {
    pub fn new(tools: Arc<ToolHandler>, limits: CallLimits) -> Self {
        Self {
            tools,
            gate: CallGate::new(limits),
            in_flight: InFlight::default(),
        }
    }

    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<ToolOutput, CallRejected> {
        let tool = Tool::from_name(name).ok_or_else(|| CallRejected::UnknownTool(name.to_string()))?;
        let queued_at = Instant::now();
        let _pass = self.gate.enter().await?;
        let call = self.in_flight.register();
        let started = Instant::now();
        let arguments = arguments.unwrap_or_default();
        let output = self.tools.call(tool, &arguments, call.token()).await;
        debug!(
            tool = tool.name(),
            ticket = call.ticket(),
            queue_ms = started.duration_since(queued_at).as_millis() as u64,
            exec_ms = started.elapsed().as_millis() as u64,
            is_error = output.is_error,
            "tool call finished"
        );
        Ok(output)
    }
}

fn call_result(output: ToolOutput) -> CallToolResult {
    let mut result = CallToolResult::text_content(output.text, None);
    result.is_error = Some(output.is_error);
    result
}

#[async_trait]
impl ServerHandler for ClickHouseHandler {
    async fn handle_list_tools_request(
        &self,
        _request: ListToolsRequest,
        _runtime: &dyn McpServer,
    ) -> Result<ListToolsResult, RpcError> {
        Ok(list_tools())
    }

    async fn handle_call_tool_request(
        &self,
        request: CallToolRequest,
        _runtime: &dyn McpServer,
    ) -> Result<CallToolResult, CallToolError> {
        let params = request.params;
        match self.dispatch(&params.name, params.arguments).await {
            Ok(output) => Ok(call_result(output)),
            Err(CallRejected::UnknownTool(name)) => Err(CallToolError::unknown_tool(name)),
            Err(err) => {
                warn!(tool = %params.name, error = %err, "tool call rejected");
                Err(CallToolError::new(err))
            }
        }
    }

    // Requests carry no id into the tool handler, so a cancellation can only be
    // recorded here; shutdown cancels whatever is still in flight.
    async fn handle_cancelled_notification(
        &self,
        notification: CancelledNotification,
        _runtime: &dyn McpServer,
    ) -> Result<(), RpcError> {
        info!(
            request_id = ?notification.params.request_id,
            reason = notification.params.reason.as_deref().unwrap_or(""),
            in_flight = self.in_flight.count(),
            "cancellation requested"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chmcp_db::{BackendError, Client, ColumnDescriptor, DbError, DbResult, QueryResult};
    use serde_json::json;

    /// Answers after an optional delay, honouring cancellation.
    struct SlowClient {
        delay: Duration,
    }

    #[async_trait]
    impl Client for SlowClient {
        async fn list_databases(&self, cancel: &CancelToken) -> DbResult<Vec<String>> {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => Ok(vec!["default".into()]),
                _ = cancel.cancelled() => Err(DbError::execution(
                    "list_databases",
                    BackendError::Cancelled,
                )),
            }
        }

        async fn list_tables(&self, _database: &str, _cancel: &CancelToken) -> DbResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn describe_schema(
            &self,
            _database: &str,
            _table: &str,
            _cancel: &CancelToken,
        ) -> DbResult<Vec<ColumnDescriptor>> {
            Ok(Vec::new())
        }

        async fn execute_query(
            &self,
            _sql: &str,
            _row_cap: u64,
            _cancel: &CancelToken,
        ) -> DbResult<QueryResult> {
            Ok(QueryResult::empty())
        }

        async fn ping(&self, _cancel: &CancelToken) -> DbResult<()> {
            Ok(())
        }

        async fn close(&self) -> DbResult<()> {
            Ok(())
        }
    }

    fn handler(delay: Duration, limits: CallLimits) -> Arc<ClickHouseHandler> {
        let tools = Arc::new(ToolHandler::new(Arc::new(SlowClient { delay })));
        Arc::new(ClickHouseHandler::new(tools, limits))
    }

    const ONE_SLOT: CallLimits = CallLimits {
        concurrent: 1,
        queued: 0,
    };

    async fn wait_for_in_flight(in_flight: &InFlight, count: usize) {
        while in_flight.count() < count {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn details_advertise_tools() {
        let details = server_details();
        assert_eq!(details.server_info.name, SERVER_NAME);
        assert_eq!(details.server_info.version, SERVER_VERSION);
        assert!(details.capabilities.tools.is_some());
        assert_eq!(details.protocol_version, LATEST_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn dispatch_runs_named_tool() {
        let handler = handler(Duration::ZERO, ONE_SLOT);
        let output = handler
            .dispatch("get_databases", None)
            .await
            .expect("dispatch");
        assert!(!output.is_error);
        assert_eq!(output.text, "Databases in ClickHouse:\n\n1. default\n");
        assert_eq!(handler.in_flight().count(), 0);
    }

    #[tokio::test]
    async fn argument_errors_are_tool_results() {
        let handler = handler(Duration::ZERO, ONE_SLOT);
        let output = handler
            .dispatch("get_tables", Some(Map::new()))
            .await
            .expect("dispatch");
        assert!(output.is_error);
        assert_eq!(output.text, "Parameter 'database' is required");
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let handler = handler(Duration::ZERO, ONE_SLOT);
        assert_eq!(
            handler.dispatch("drop_everything", None).await,
            Err(CallRejected::UnknownTool("drop_everything".into()))
        );
    }

    #[tokio::test]
    async fn full_gate_reports_busy_and_shutdown_cancels() {
        let handler = handler(Duration::from_secs(30), ONE_SLOT);
        let in_flight = handler.in_flight();
        let running = tokio::spawn({
            let handler = handler.clone();
            async move { handler.dispatch("get_databases", None).await }
        });
        wait_for_in_flight(&in_flight, 1).await;

        assert_eq!(
            handler.dispatch("get_databases", None).await,
            Err(CallRejected::Busy { limit: 1 })
        );

        assert_eq!(in_flight.cancel_all(), 1);
        let output = running.await.expect("join").expect("dispatch");
        assert!(output.is_error);
        assert!(output.text.starts_with("Failed to list databases: "));
        assert_eq!(in_flight.count(), 0);
    }

    #[tokio::test]
    async fn queued_calls_wait_for_a_slot() {
        let handler = handler(
            Duration::from_millis(20),
            CallLimits {
                concurrent: 1,
                queued: 1,
            },
        );
        let first = tokio::spawn({
            let handler = handler.clone();
            async move { handler.dispatch("get_databases", None).await }
        });
        wait_for_in_flight(&handler.in_flight(), 1).await;
        let second = handler.dispatch("get_databases", None).await.expect("dispatch");
        assert!(!second.is_error);
        assert!(!first.await.expect("join").expect("dispatch").is_error);
    }

    #[test]
    fn calls_sharing_a_client_id_keep_separate_tokens() {
        let in_flight = InFlight::default();
        let first = in_flight.register();
        let second = in_flight.register();
        assert_ne!(first.ticket(), second.ticket());
        assert_eq!(in_flight.count(), 2);

        drop(first);
        assert_eq!(in_flight.count(), 1);
        assert_eq!(in_flight.cancel_all(), 1);
        assert!(second.token().is_cancelled());
        drop(second);
        assert_eq!(in_flight.count(), 0);
    }

    #[test]
    fn outputs_map_to_call_results() {
        let result = serde_json::to_value(call_result(ToolOutput::error("nope"))).expect("json");
        assert_eq!(result["isError"], json!(true));
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "nope");

        let result = serde_json::to_value(call_result(ToolOutput::text("ok"))).expect("json");
        assert_eq!(result["isError"], json!(false));
    }
}
