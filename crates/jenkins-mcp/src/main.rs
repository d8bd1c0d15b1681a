//! `jenkins-mcp`: Jenkins tools for MCP clients.
//!
//! Usage:
//! ```bash
//! jenkins-mcp serve                          # MCP over stdio
//! jenkins-mcp serve --http 127.0.0.1:3333    # MCP over streamable HTTP at /mcp
//! jenkins-mcp call get-status '{"job":"demo"}'
//! jenkins-mcp tools                          # Print the tool catalog
//! ```
//!
//! Connection settings come from `jenkins-mcp.toml` and the `JENKINS_URL`,
//! `JENKINS_USERNAME`, `JENKINS_API_TOKEN` and `JENKINS_TIMEOUT` variables.
//! Logs always go to stderr.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use jenkins_mcp_core::BridgeConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "jenkins-mcp", author, version, about)]
struct Cli {
    /// Path to the config file (defaults to `jenkins-mcp.toml` in the current
    /// directory or a parent).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the tools over MCP (stdio unless --http is given)
    Serve(commands::serve::ServeArgs),

    /// Call one tool and print its result
    Call(commands::call::CallArgs),

    /// List the available tools
    Tools(commands::tools::ToolsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match &cli.command {
        Command::Serve(args) => {
            let config = load_config(cli.config.as_deref())?;
            commands::serve::run(args, &config).await
        }
        Command::Call(args) => {
            let config = load_config(cli.config.as_deref())?;
            commands::call::run(args, &config).await
        }
        Command::Tools(args) => commands::tools::run(args),
    }
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new("info").context("failed to parse log directive")?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    BridgeConfig::resolve(path).context("failed to load Jenkins configuration")
}
