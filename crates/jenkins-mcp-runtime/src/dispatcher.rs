//! Single entry point for tool calls.
//!
//! [`Dispatcher::dispatch`] always produces exactly one [`ToolResult`]:
//! unknown tools and malformed arguments are rejected before any handler
//! runs, handler failures are mapped onto [`ErrorKind`], and a panicking
//! handler is reported as [`ErrorKind::InternalError`] instead of taking the
//! server down.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use futures::FutureExt;
use jenkins_mcp_core::{BridgeConfig, JenkinsClient, JenkinsError};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    ErrorKind, ToolError, ToolRequest, ToolResult,
    handlers::Handlers,
    registry::{ToolRegistry, ToolSpec},
    schema,
};

/// Validates and runs tool calls, tracking how many are in flight.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    handlers: Handlers,
    inflight: AtomicU64,
    shutdown: CancellationToken,
}

/// Counts one dispatched call for as long as it is alive.
#[must_use = "if unused, the in-flight request will be immediately ended"]
pub struct InflightRequestGuard<'a> {
    dispatcher: &'a Dispatcher,
}

impl Drop for InflightRequestGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.end_request();
    }
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, handlers: Handlers) -> Self {
        Self {
            registry,
            handlers,
            inflight: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Builds a dispatcher with the built-in tools for the configured
    /// Jenkins.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, JenkinsError> {
        let client = JenkinsClient::new(config)?;
        Ok(Self::new(
            Arc::new(ToolRegistry::builtin()),
            Handlers::new(client, config),
        ))
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Runs one tool call to completion.
    ///
    /// `cancel` aborts this call only; [`Self::shutdown`] aborts every call.
    #[instrument(skip_all, fields(tool = %request.name, request_id = %request.id))]
    pub async fn dispatch(&self, request: ToolRequest, cancel: &CancellationToken) -> ToolResult {
        let _guard = self.start_request_guard();
        let started = Instant::now();
        let ToolRequest {
            id,
            name,
            arguments,
        } = request;

        let Some(spec) = self.registry.get(&name) else {
            warn!("Unknown tool");
            let error = unknown_tool(&self.registry, &name);
            return ToolResult::error(id, name, error);
        };
        let arguments = match schema::validate(spec.name(), &spec.params, &arguments) {
            Ok(arguments) => arguments,
            Err(err) => {
                debug!(error = %err, "Rejected tool arguments");
                return ToolResult::error(id, spec.name(), err);
            }
        };
        if self.shutdown.is_cancelled() {
            return ToolResult::error(id, spec.name(), shutting_down());
        }

        let token = self.shutdown.child_token();
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ToolError::cancelled()),
            () = token.cancelled() => Err(shutting_down()),
            outcome = self.execute(spec, arguments, &token) => outcome,
        };
        // Stops any handler-side waits that outlive the select.
        token.cancel();

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &outcome {
            Ok(_) => info!(elapsed_ms, "Tool call succeeded"),
            Err(err) if err.kind == ErrorKind::InternalError => {
                error!(elapsed_ms, error = %err, "Tool call failed");
            }
            Err(err) => info!(elapsed_ms, kind = %err.kind, "Tool call failed"),
        }
        ToolResult {
            id,
            tool: spec.name().to_string(),
            outcome,
        }
    }

    async fn execute(
        &self,
        spec: &ToolSpec,
        arguments: serde_json::Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        guarded(self.handlers.run(spec.operation, arguments, cancel)).await
    }

    /// Stops accepting work and cancels every call in flight.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn start_request(&self) {
        self.inflight.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use = "dropping the guard immediately will end the request"]
    pub fn start_request_guard(&self) -> InflightRequestGuard<'_> {
        self.start_request();
        InflightRequestGuard { dispatcher: self }
    }

    fn end_request(&self) {
        let _ = self
            .inflight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(1))
            });
    }

    pub fn inflight_count(&self) -> u64 {
        self.inflight.load(Ordering::Relaxed)
    }

    /// Waits until no call is in flight.
    pub async fn drain(&self) {
        while self.inflight_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Runs a handler future, turning a panic into an `InternalError`.
async fn guarded<F>(future: F) -> Result<Value, ToolError>
where
    F: Future<Output = Result<Value, ToolError>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(panic = %message, "Tool handler panicked");
            Err(ToolError::internal(format!("tool handler panicked: {message}")))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn unknown_tool(registry: &ToolRegistry, name: &str) -> ToolError {
    ToolError::invalid_argument(format!(
        "unknown tool '{name}'; available tools: {}",
        registry.names().join(", ")
    ))
}

fn shutting_down() -> ToolError {
    ToolError::new(ErrorKind::Cancelled, "bridge is shutting down")
}
