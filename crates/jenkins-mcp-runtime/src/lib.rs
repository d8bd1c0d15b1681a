//! Tool dispatch and MCP serving for jenkins-mcp.
//!
//! # Key Components
//!
//! - **Registry**: [`ToolRegistry`] is the fixed catalog of tools with their
//!   declared parameters ([`ParamSpec`]) and output schemas
//! - **Dispatcher**: [`Dispatcher`] validates a [`ToolRequest`], runs the
//!   matching handler and always answers with one [`ToolResult`]
//! - **Transports**: [`transports::mcp::McpService`] serves the dispatcher
//!   over the Model Context Protocol
//!
//! # Errors
//!
//! Every failure reaching a client is a [`ToolError`] tagged with one
//! [`ErrorKind`]. Jenkins-side errors are converted in one place
//! (`From<JenkinsError> for ToolError`).

mod dispatcher;
mod handlers;
mod registry;
mod schema;
mod tool;
pub mod transports;

pub use dispatcher::{Dispatcher, InflightRequestGuard};
pub use handlers::{
    GetLogOutput, Handlers, JobDetails, JobEntry, ListJobsOutput, ListNodesOutput,
    MAX_WAIT_SECONDS, NodeEntry, QueueEntry, QueueOutput, StopBuildOutput, TriggerBuildOutput,
    TriggerPhase,
};
pub use registry::{Operation, ToolInfo, ToolRegistry, ToolSpec};
pub use schema::{ParamSpec, ParamType, input_schema, validate};
pub use tool::{ErrorKind, ToolError, ToolRequest, ToolResult};
