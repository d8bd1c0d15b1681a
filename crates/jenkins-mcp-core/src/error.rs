//! Errors raised while talking to Jenkins.

use std::time::Duration;

use crate::ConfigError;

/// Maximum number of response body bytes echoed back in error messages.
const BODY_EXCERPT_LIMIT: usize = 200;

/// Errors that can occur while issuing Jenkins calls or driving the
/// asynchronous trigger/log protocols.
///
/// Every HTTP failure is classified into exactly one variant; nothing is
/// swallowed by the client.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum JenkinsError {
    /// Jenkins answered 401 or 403 (bad credentials or missing permission).
    #[error("Jenkins rejected the request with status {status}: {body}")]
    Unauthorized { status: u16, body: String },

    /// The job, build or queue item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Jenkins answered with a 5xx status.
    #[error("Jenkins server error {status}: {body}")]
    ServerError { status: u16, body: String },

    /// Jenkins answered with a status outside the classified ranges.
    #[error("unexpected Jenkins response {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Connection-level failure (DNS, refused connection, timeout, reset).
    #[error("failed to reach Jenkins: {0}")]
    Network(#[source] reqwest::Error),

    /// The CSRF crumb could not be obtained or was rejected.
    #[error("CSRF crumb error: {0}")]
    Crumb(String),

    /// The response body was not what the endpoint promises.
    #[error("failed to decode Jenkins response: {0}")]
    Decode(String),

    /// A queue item did not leave the queue before the deadline.
    #[error("queue item {queue_id} for '{job}' was not assigned a build within {waited:?}")]
    QueueTimeout {
        job: String,
        queue_id: u64,
        waited: Duration,
    },

    /// A queue item was cancelled before it started.
    #[error("queue item {queue_id} for '{job}' was cancelled")]
    QueueCancelled { job: String, queue_id: u64 },

    /// The `Location` header of a trigger response is not a queue item URL.
    #[error("invalid queue location: {0}")]
    InvalidQueueLocation(String),

    /// A log offset beyond the current end of the console log was requested.
    #[error("log offset {offset} is beyond the end of the log ({size} bytes)")]
    OffsetOutOfRange { offset: u64, size: u64 },

    /// A job path could not be parsed.
    #[error("invalid job path: {0}")]
    InvalidJob(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The client could not be built from its configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl JenkinsError {
    /// Returns `true` for connection-level failures that are safe to retry on
    /// idempotent calls.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Returns `true` when the error means "does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Classifies a non-success HTTP status into an error.
    pub(crate) fn from_status(status: u16, what: &str, body: &[u8]) -> Self {
        let body = excerpt(body);
        match status {
            401 | 403 => Self::Unauthorized { status, body },
            404 => Self::NotFound(what.to_string()),
            500..=599 => Self::ServerError { status, body },
            _ => Self::UnexpectedStatus { status, body },
        }
    }
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.len() <= BODY_EXCERPT_LIMIT {
        return text.to_string();
    }
    let mut cut = BODY_EXCERPT_LIMIT;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}
