//! Model Context Protocol (MCP) transport.
//!
//! `McpService` implements `rmcp::ServerHandler` on top of a shared
//! [`Dispatcher`]:
//!
//! - `tools/list` returns the fixed registry with its input and output schemas
//! - `tools/call` builds a [`ToolRequest`], forwards the request's
//!   cancellation token and answers with structured content
//!
//! Tool failures are reported as tool results with `isError: true`, never as
//! protocol errors, so every call gets exactly one answer the model can read.
//!
//! The same service runs over stdio (`rmcp::ServiceExt::serve` with
//! `rmcp::transport::stdio()`) or over streamable HTTP via
//! [`McpService::streamable_http_service`].

use std::{borrow::Cow, sync::Arc};

use rmcp::{
    ErrorData, RoleServer,
    handler::server::ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, Extensions, JsonObject, ListToolsResult,
        PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
    transport::{
        common::http_header::HEADER_SESSION_ID,
        streamable_http_server::{
            StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
        },
    },
};
use tracing::debug;

use crate::{Dispatcher, ToolRequest, ToolResult, registry::ToolSpec};

const INSTRUCTIONS: &str = "Tools for a Jenkins controller. Trigger builds with trigger-build, \
    follow them with get-status and get-log (pass next_offset back to continue reading), and \
    browse with list-jobs, get-job-info, get-queue and list-nodes.";

/// MCP server exposing the bridge's tools.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use jenkins_mcp_runtime::{Dispatcher, transports::mcp::McpService};
///
/// let dispatcher = Arc::new(Dispatcher::from_config(&config)?);
/// let http_service = McpService::new(dispatcher).streamable_http_service();
/// let router = axum::Router::new().nest_service("/mcp", http_service);
/// ```
#[derive(Clone)]
pub struct McpService {
    dispatcher: Arc<Dispatcher>,
    info: ServerInfo,
}

impl McpService {
    /// Create a service with the default server info (tools capability
    /// enabled).
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self::with_info(dispatcher, default_server_info())
    }

    #[must_use]
    pub fn with_info(dispatcher: Arc<Dispatcher>, info: ServerInfo) -> Self {
        Self { dispatcher, info }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Streamable HTTP service with the default configuration, ready to be
    /// mounted in an axum router.
    #[must_use]
    pub fn streamable_http_service(&self) -> StreamableHttpService<Self, LocalSessionManager> {
        self.streamable_http_service_with_config(StreamableHttpServerConfig::default())
    }

    #[must_use]
    pub fn streamable_http_service_with_config(
        &self,
        config: StreamableHttpServerConfig,
    ) -> StreamableHttpService<Self, LocalSessionManager> {
        let service = self.clone();
        StreamableHttpService::new(move || Ok(service.clone()), Arc::default(), config)
    }
}

impl ServerHandler for McpService {
    fn get_info(&self) -> ServerInfo {
        self.info.clone()
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        let tools = self.dispatcher.registry().iter().map(tool_spec_to_mcp).collect();
        async move { Ok(ListToolsResult::with_all_items(tools)) }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        let dispatcher = Arc::clone(&self.dispatcher);
        async move {
            let session_id = extract_session_id_from_extensions(&context.extensions);
            debug!(
                tool = %request.name,
                session_id = session_id.as_deref(),
                "MCP tool call"
            );

            let request = ToolRequest::new(
                context.id.to_string(),
                request.name.into_owned(),
                request.arguments.unwrap_or_default(),
            );
            let result = dispatcher.dispatch(request, &context.ct).await;
            Ok(tool_result_to_mcp(result))
        }
    }
}

fn default_server_info() -> ServerInfo {
    ServerInfo {
        capabilities: ServerCapabilities::builder().enable_tools().build(),
        instructions: Some(INSTRUCTIONS.to_string()),
        ..Default::default()
    }
}

/// Converts a registry entry to the MCP tool format.
fn tool_spec_to_mcp(spec: &ToolSpec) -> Tool {
    Tool {
        name: Cow::Borrowed(spec.name()),
        title: Some(spec.title.to_string()),
        description: Some(Cow::Borrowed(spec.description)),
        input_schema: Arc::new(schema_to_object(spec.input_schema())),
        output_schema: Some(Arc::new(schema_to_object(spec.output_schema()))),
        annotations: None,
        icons: None,
    }
}

/// Successful calls carry the tool output; failed ones carry
/// `{"error": {"kind", "message"}}` and set `isError`.
fn tool_result_to_mcp(result: ToolResult) -> CallToolResult {
    match result.outcome {
        Ok(output) => CallToolResult::structured(output),
        Err(error) => CallToolResult::structured_error(serde_json::json!({ "error": error })),
    }
}

fn schema_to_object(schema: &serde_json::Value) -> JsonObject {
    match schema {
        serde_json::Value::Object(map) => map.clone(),
        _ => JsonObject::default(),
    }
}

/// Reads the MCP session id from the HTTP request parts, when the call came
/// in over streamable HTTP.
fn extract_session_id_from_extensions(extensions: &Extensions) -> Option<String> {
    let parts = extensions.get::<http::request::Parts>()?;
    parts
        .headers
        .get(HEADER_SESSION_ID)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}
