//! MCP server implementation
//!
//! Serves JSON-RPC 2.0 over a newline-delimited byte stream (stdin/stdout in
//! the binary). Every request runs on its own task so listings and pings are
//! never stuck behind a slow tool call; responses funnel through one writer
//! task.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::{FutureExt, SinkExt, StreamExt};
use tether_protocol::{
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ReadResourceResult,
    ResourcesListResult, ServerInfo, ToolResult, ToolsListResult,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::registry::ToolRegistry;
use crate::shutdown::wait_for_shutdown;

use super::codec::{InputLine, RequestCodec};
use super::error::{McpError, ToolError};

/// Request counter for log correlation
static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Longest accepted input line
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Responses buffered before request tasks wait on the writer
const RESPONSE_QUEUE_DEPTH: usize = 64;

/// MCP server
///
/// Routes `tools/*` and `resources/*` requests through the registry and hands
/// every handler the shared [`Context`].
pub struct McpServer {
    context: Arc<Context>,
    registry: Arc<ToolRegistry>,
    server_info: ServerInfo,
    initialized: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl McpServer {
    pub fn new(context: Arc<Context>, registry: Arc<ToolRegistry>, server_info: ServerInfo) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            context,
            registry,
            server_info,
            initialized: AtomicBool::new(false),
            stop_tx,
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Whether the client has sent `initialize`
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Stop reading requests; requests not yet dispatched are refused
    ///
    /// Idempotent.
    pub fn close(&self) {
        if !self.stop_tx.send_replace(true) {
            info!("MCP server closing");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Resolves once [`close`](Self::close) has been called
    pub async fn wait_closed(&self) {
        let mut rx = self.stop_tx.subscribe();
        wait_for_shutdown(&mut rx).await;
    }

    /// tools/list
    pub fn handle_list_tools(&self) -> ToolsListResult {
        ToolsListResult {
            tools: self.registry.list_tools(),
        }
    }

    /// resources/list
    pub fn handle_list_resources(&self) -> ResourcesListResult {
        ResourcesListResult {
            resources: self.registry.list_resources(),
        }
    }

    /// Run one tool call
    ///
    /// Never fails at the protocol level: unknown tools, bad arguments,
    /// handler errors and handler panics all come back as `isError` results.
    pub async fn handle_call_tool(&self, name: &str, args: serde_json::Value) -> ToolResult {
        let Some(tool) = self.registry.find_tool(name) else {
            warn!(tool = %name, "Unknown tool requested");
            return ToolResult::error(ToolError::NotFound(name.to_string()).to_string());
        };

        let call = match tool.bind(args) {
            Ok(call) => call,
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool arguments rejected");
                return ToolResult::error(e.to_string());
            }
        };

        let ctx = Arc::clone(&self.context);
        let start = Instant::now();
        let outcome = AssertUnwindSafe(async move { call(ctx).await })
            .catch_unwind()
            .await;
        let elapsed_ms = start.elapsed().as_millis();

        match outcome {
            Ok(Ok(result)) => {
                info!(tool = %name, elapsed_ms = %elapsed_ms, "Tool call completed");
                result
            }
            Ok(Err(e)) => {
                warn!(tool = %name, elapsed_ms = %elapsed_ms, error = %e, "Tool call failed");
                ToolResult::error(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(tool = %name, elapsed_ms = %elapsed_ms, panic = %message, "Tool handler panicked");
                let err = ToolError::handler(format!("Tool \"{}\" panicked: {}", name, message));
                ToolResult::error(err.to_string())
            }
        }
    }

    /// resources/read
    ///
    /// Unknown uris yield empty contents; reader failures are errors.
    pub async fn handle_read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        let Some(resource) = self.registry.find_resource(uri) else {
            debug!(uri = %uri, "Unknown resource requested");
            return Ok(ReadResourceResult::default());
        };

        let start = Instant::now();
        let contents = resource
            .read(Arc::clone(&self.context))
            .await
            .map_err(|e| {
                warn!(uri = %uri, error = %e, "Resource read failed");
                McpError::Resource {
                    uri: uri.to_string(),
                    message: e.to_string(),
                }
            })?;
        debug!(uri = %uri, elapsed_ms = %start.elapsed().as_millis(), "Resource read completed");

        Ok(ReadResourceResult { contents })
    }

    /// Handle a JSON-RPC request; notifications produce no response
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.is_notification();

        let result = if self.is_closed() {
            Err(McpError::ShuttingDown)
        } else {
            match request.method.as_str() {
                "initialize" => self.handle_initialize(&request.params),
                "initialized" | "notifications/initialized" => Ok(serde_json::json!({})),
                "ping" => Ok(serde_json::json!({})),
                "tools/list" => to_result(self.handle_list_tools()),
                "tools/call" => self.handle_tools_call(&request.params).await,
                "resources/list" => to_result(self.handle_list_resources()),
                "resources/read" => self.handle_resources_read(&request.params).await,
                _ => Err(McpError::MethodNotFound(request.method.clone())),
            }
        };

        if is_notification {
            if let Err(e) = result {
                warn!(method = %request.method, error = %e, "Notification handling failed");
            }
            return None;
        }

        Some(match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => JsonRpcResponse::error(request.id, e.into()),
        })
    }

    fn handle_initialize(&self, params: &serde_json::Value) -> Result<serde_json::Value, McpError> {
        self.initialized.store(true, Ordering::SeqCst);
        info!(
            client = params["clientInfo"]["name"].as_str().unwrap_or("unknown"),
            client_protocol = params["protocolVersion"].as_str().unwrap_or("unspecified"),
            "MCP server initialized"
        );

        to_result(InitializeResult::new(self.server_info.clone()))
    }

    async fn handle_tools_call(&self, params: &serde_json::Value) -> Result<serde_json::Value, McpError> {
        let name = params["name"]
            .as_str()
            .ok_or_else(|| McpError::InvalidParams("Missing 'name' parameter".into()))?;
        let arguments = params["arguments"].clone();

        debug!(tool = %name, arguments = %arguments, "Tool call arguments");

        to_result(self.handle_call_tool(name, arguments).await)
    }

    async fn handle_resources_read(
        &self,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let uri = params["uri"]
            .as_str()
            .ok_or_else(|| McpError::InvalidParams("Missing 'uri' parameter".into()))?;

        to_result(self.handle_read_resource(uri).await?)
    }

    /// Parse one input line, or produce the error response for it
    pub fn parse_line(line: &str) -> Result<JsonRpcRequest, JsonRpcResponse> {
        let value: serde_json::Value = serde_json::from_str(line).map_err(|e| {
            JsonRpcResponse::error(
                serde_json::Value::Null,
                JsonRpcError::new(JsonRpcError::PARSE_ERROR, e.to_string()),
            )
        })?;

        let id = value.get("id").cloned().unwrap_or(serde_json::Value::Null);
        let request: JsonRpcRequest = serde_json::from_value(value).map_err(|e| {
            JsonRpcResponse::error(
                id.clone(),
                JsonRpcError::new(JsonRpcError::INVALID_REQUEST, e.to_string()),
            )
        })?;

        if request.jsonrpc != "2.0" {
            return Err(JsonRpcResponse::error(
                id,
                JsonRpcError::with_data(
                    JsonRpcError::INVALID_REQUEST,
                    "Invalid JSON-RPC version",
                    serde_json::json!({"expected": "2.0", "got": request.jsonrpc}),
                ),
            ));
        }

        Ok(request)
    }

    /// Serve requests read from `reader`, writing responses to `writer`
    ///
    /// Returns once the input reaches EOF or the server is closed, after all
    /// requests already dispatched have been answered. EOF closes the server.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<(), McpError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.serve_with_limit(reader, writer, MAX_LINE_BYTES).await
    }

    async fn serve_with_limit<R, W>(
        self: Arc<Self>,
        reader: R,
        writer: W,
        max_line_bytes: usize,
    ) -> Result<(), McpError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut lines = FramedRead::new(reader, RequestCodec::new(max_line_bytes));
        let mut sink = FramedWrite::new(writer, LinesCodec::new());

        let (response_tx, mut response_rx) = mpsc::channel::<String>(RESPONSE_QUEUE_DEPTH);
        let writer_task = tokio::spawn(async move {
            while let Some(json) = response_rx.recv().await {
                if let Err(e) = sink.send(json).await {
                    error!(error = %e, "Failed to write response, dropping output");
                    break;
                }
            }
        });

        let mut stop_rx = self.stop_tx.subscribe();
        let mut in_flight = JoinSet::new();
        let mut read_error = None;

        info!(
            server = %self.server_info.name,
            tools = self.registry.tool_count(),
            resources = self.registry.resource_count(),
            "MCP server starting"
        );

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut stop_rx) => {
                    info!("MCP server stopped reading requests");
                    break;
                }
                next = lines.next() => match next {
                    None => {
                        info!("Input closed, MCP server shutting down");
                        self.close();
                        break;
                    }
                    Some(Ok(InputLine::Oversized)) => {
                        warn!(limit = max_line_bytes, "Discarding oversized request line");
                        let response = JsonRpcResponse::error(
                            serde_json::Value::Null,
                            JsonRpcError::new(JsonRpcError::PARSE_ERROR, "Request line too long"),
                        );
                        queue_response(&response_tx, &response).await;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Failed to read request");
                        self.close();
                        read_error = Some(match e {
                            LinesCodecError::Io(e) => e,
                            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
                        });
                        break;
                    }
                    Some(Ok(InputLine::Line(line))) => {
                        if line.trim().is_empty() {
                            continue;
                        }

                        let req_id = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
                        debug!(req_id, raw = %line, "Received raw JSON-RPC request");

                        match Self::parse_line(&line) {
                            Ok(request) => {
                                let server = Arc::clone(&self);
                                let tx = response_tx.clone();
                                in_flight.spawn(async move {
                                    server.process(req_id, request, tx).await;
                                });
                            }
                            Err(response) => {
                                warn!(req_id, error = ?response.error, "Rejected malformed request");
                                queue_response(&response_tx, &response).await;
                            }
                        }
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join_error(joined);
                }
            }
        }

        let pending = in_flight.len();
        if pending > 0 {
            info!(pending, "Draining in-flight requests");
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join_error(joined);
        }

        drop(response_tx);
        if let Err(e) = writer_task.await {
            error!(error = %e, "Response writer task failed");
        }

        info!("MCP server stopped");
        match read_error {
            Some(e) => Err(McpError::Io(e)),
            None => Ok(()),
        }
    }

    async fn process(&self, req_id: u64, request: JsonRpcRequest, tx: mpsc::Sender<String>) {
        info!(
            req_id,
            method = %request.method,
            jsonrpc_id = ?request.id,
            "Incoming JSON-RPC request"
        );

        let method = request.method.clone();
        let start = Instant::now();
        let response = self.handle_request(request).await;
        let elapsed_ms = start.elapsed().as_millis();

        match response {
            Some(response) => {
                if response.is_error() {
                    warn!(
                        req_id,
                        method = %method,
                        elapsed_ms = %elapsed_ms,
                        error = ?response.error,
                        "JSON-RPC request completed with error"
                    );
                } else {
                    info!(
                        req_id,
                        method = %method,
                        elapsed_ms = %elapsed_ms,
                        "JSON-RPC request completed successfully"
                    );
                }
                queue_response(&tx, &response).await;
            }
            None => {
                debug!(req_id, method = %method, elapsed_ms = %elapsed_ms, "Notification handled (no response)");
            }
        }
    }
}

fn to_result<T: serde::Serialize>(value: T) -> Result<serde_json::Value, McpError> {
    serde_json::to_value(value).map_err(|e| McpError::Internal(e.to_string()))
}

async fn queue_response(tx: &mpsc::Sender<String>, response: &JsonRpcResponse) {
    match serde_json::to_string(response) {
        Ok(json) => {
            debug!(raw = %json, "Sending raw JSON-RPC response");
            if tx.send(json).await.is_err() {
                warn!("Response writer gone, dropping response");
            }
        }
        Err(e) => error!(error = %e, "Failed to serialize response"),
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Request task failed");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
