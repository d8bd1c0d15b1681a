//! Request/response envelope of a tool call.

use std::fmt;

use jenkins_mcp_core::JenkinsError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A parsed tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Correlation id echoed in the result.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Stable error tags reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The call did not match the tool's declared parameters. Never reaches
    /// Jenkins.
    InvalidArgument,
    NotFound,
    Unauthorized,
    /// The queue item was not assigned a build in time.
    QueueTimeout,
    /// The queue item was cancelled before it started.
    QueueCancelled,
    NetworkError,
    ServerError,
    /// Something failed inside the bridge itself.
    InternalError,
    /// The caller abandoned the request or the bridge is shutting down.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::NotFound => "NotFound",
            Self::Unauthorized => "Unauthorized",
            Self::QueueTimeout => "QueueTimeout",
            Self::QueueCancelled => "QueueCancelled",
            Self::NetworkError => "NetworkError",
            Self::ServerError => "ServerError",
            Self::InternalError => "InternalError",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed tool call: a stable kind plus a message for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request cancelled")
    }
}

impl From<JenkinsError> for ToolError {
    fn from(err: JenkinsError) -> Self {
        let kind = match &err {
            JenkinsError::Unauthorized { .. } | JenkinsError::Crumb(_) => ErrorKind::Unauthorized,
            JenkinsError::NotFound(_) => ErrorKind::NotFound,
            JenkinsError::ServerError { .. }
            | JenkinsError::UnexpectedStatus { .. }
            | JenkinsError::Decode(_)
            | JenkinsError::InvalidQueueLocation(_) => ErrorKind::ServerError,
            JenkinsError::Network(_) => ErrorKind::NetworkError,
            JenkinsError::QueueTimeout { .. } => ErrorKind::QueueTimeout,
            JenkinsError::QueueCancelled { .. } => ErrorKind::QueueCancelled,
            JenkinsError::OffsetOutOfRange { .. } | JenkinsError::InvalidJob(_) => {
                ErrorKind::InvalidArgument
            }
            JenkinsError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::InternalError,
        };
        Self::new(kind, err.to_string())
    }
}

/// The single answer to a [`ToolRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub id: String,
    pub tool: String,
    pub outcome: Result<Value, ToolError>,
}

impl ToolResult {
    pub fn ok(id: impl Into<String>, tool: impl Into<String>, output: Value) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            outcome: Ok(output),
        }
    }

    pub fn error(id: impl Into<String>, tool: impl Into<String>, error: ToolError) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            outcome: Err(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// Wire form: `{"id", "tool", "ok": true, "output"}` or
    /// `{"id", "tool", "ok": false, "error": {"kind", "message"}}`.
    pub fn to_json(&self) -> Value {
        match &self.outcome {
            Ok(output) => serde_json::json!({
                "id": self.id,
                "tool": self.tool,
                "ok": true,
                "output": output,
            }),
            Err(error) => serde_json::json!({
                "id": self.id,
                "tool": self.tool,
                "ok": false,
                "error": error,
            }),
        }
    }
}
