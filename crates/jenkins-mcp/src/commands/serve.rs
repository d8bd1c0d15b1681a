//! `jenkins-mcp serve`: the MCP server.
//!
//! Runs over stdio by default, which is what desktop MCP clients spawn. With
//! `--http <addr>` the same service is mounted on an axum router as a
//! streamable HTTP endpoint.
//!
//! On Ctrl+C every in-flight tool call is cancelled and the server waits for
//! the dispatcher to drain before exiting.

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use jenkins_mcp_core::BridgeConfig;
use jenkins_mcp_runtime::{Dispatcher, transports::mcp::McpService};
use rmcp::{
    service::ServiceExt,
    transport::{stdio, streamable_http_server::StreamableHttpServerConfig},
};
use tokio::signal;
use tracing::info;

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Serve streamable HTTP on this address instead of stdio.
    #[arg(long, value_name = "ADDR")]
    pub http: Option<SocketAddr>,

    /// HTTP path for the MCP endpoint.
    #[arg(long, default_value = "/mcp")]
    pub path: String,
}

pub async fn run(args: &ServeArgs, config: &BridgeConfig) -> Result<()> {
    let shutdown = async {
        let _ = signal::ctrl_c().await;
        info!("Received shutdown signal");
    };
    run_with_shutdown(args, config, shutdown).await
}

async fn run_with_shutdown<F>(args: &ServeArgs, config: &BridgeConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let dispatcher =
        Arc::new(Dispatcher::from_config(config).context("failed to create Jenkins client")?);
    let service = McpService::new(Arc::clone(&dispatcher));

    // Cancel in-flight calls first so open requests can answer and let the
    // transport close.
    let shutdown = {
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            shutdown.await;
            dispatcher.shutdown();
        }
    };

    match args.http {
        Some(addr) => serve_http(service, addr, &normalize_path(&args.path), shutdown).await?,
        None => serve_stdio(service, shutdown).await?,
    }

    info!(inflight = dispatcher.inflight_count(), "Draining inflight requests");
    dispatcher.drain().await;
    info!("jenkins-mcp stopped");
    Ok(())
}

async fn serve_http<F>(service: McpService, addr: SocketAddr, path: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let tools = service.dispatcher().registry().len();
    let service = service.streamable_http_service_with_config(StreamableHttpServerConfig {
        // Clients that skip the `initialized` notification still work.
        stateful_mode: false,
        ..Default::default()
    });
    let router = axum::Router::new().nest_service(path, service);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind MCP server on {addr}"))?;

    info!(address = %addr, path, tools, "Starting MCP HTTP server");
    eprintln!(
        "{} MCP server running on http://{addr}{path} ({tools} tools)",
        style("✓").green().bold(),
    );
    eprintln!("Press Ctrl+C to stop\n");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("MCP server error")
}

async fn serve_stdio<F>(service: McpService, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(tools = service.dispatcher().registry().len(), "Starting MCP stdio server");

    let running = service
        .serve(stdio())
        .await
        .context("failed to start MCP stdio server")?;

    let cancel = running.cancellation_token();
    let mut waiting = Box::pin(running.waiting());

    tokio::select! {
        result = &mut waiting => {
            let reason = result.context("MCP stdio server exited")?;
            info!(?reason, "MCP client disconnected");
        }
        () = shutdown => {
            cancel.cancel();
            let _ = waiting.await;
        }
    }
    Ok(())
}

/// Ensures the HTTP path starts with `/`; empty means `/mcp`.
fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.is_empty() {
        "/mcp".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct ServeArgsCli {
        #[command(flatten)]
        serve: ServeArgs,
    }

    #[test]
    fn test_serve_args_default_to_stdio() {
        let cli = ServeArgsCli::try_parse_from(["test"]).expect("args should parse");
        assert_eq!(cli.serve.http, None);
        assert_eq!(cli.serve.path, "/mcp");
    }

    #[test]
    fn test_serve_args_parse_http() {
        let cli = ServeArgsCli::try_parse_from(["test", "--http", "0.0.0.0:9000", "--path", "jenkins"])
            .expect("args should parse");
        assert_eq!(cli.serve.http, Some("0.0.0.0:9000".parse().unwrap()));
        assert_eq!(normalize_path(&cli.serve.path), "/jenkins");
    }

    #[test]
    fn test_serve_args_reject_bad_address() {
        assert!(ServeArgsCli::try_parse_from(["test", "--http", "localhost"]).is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/mcp");
        assert_eq!(normalize_path("/custom"), "/custom");
        assert_eq!(normalize_path("custom"), "/custom");
    }

    #[tokio::test]
    async fn test_http_server_stops_on_shutdown() {
        let config = BridgeConfig::new("http://127.0.0.1:1", "bot", "token");
        let args = ServeArgs {
            http: Some("127.0.0.1:0".parse().unwrap()),
            path: "/mcp".to_string(),
        };
        let stopped = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            run_with_shutdown(&args, &config, async {}),
        )
        .await;
        assert!(matches!(stopped, Ok(Ok(()))));
    }
}
