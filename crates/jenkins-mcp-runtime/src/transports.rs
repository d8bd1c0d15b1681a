//! Protocol front-ends for the [`Dispatcher`](crate::Dispatcher).
//!
//! A transport turns protocol requests into [`ToolRequest`](crate::ToolRequest)s,
//! hands them to the dispatcher together with the protocol's cancellation
//! signal and encodes the single [`ToolResult`](crate::ToolResult) that comes
//! back.

/// Model Context Protocol transport.
///
/// Provides `McpService`, usable over stdio or streamable HTTP.
pub mod mcp;
