//! `jenkins-mcp call` command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use console::style;
use jenkins_mcp_core::BridgeConfig;
use jenkins_mcp_runtime::{Dispatcher, ToolRequest};
use serde_json::{Map, Value};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Arguments for the `call` command.
#[derive(Debug, Args)]
pub struct CallArgs {
    /// Tool name, e.g. "get-status".
    pub tool: String,

    /// Arguments as a JSON object (inline or @file.json).
    #[arg(default_value = "{}")]
    pub input: String,
}

pub async fn run(args: &CallArgs, config: &BridgeConfig) -> Result<()> {
    let arguments = parse_input(&args.input)?;
    let dispatcher = Dispatcher::from_config(config).context("failed to create Jenkins client")?;

    eprintln!(
        "{} Calling tool: {}",
        style("→").cyan(),
        style(&args.tool).bold()
    );

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let result = dispatcher
        .dispatch(ToolRequest::new("cli", args.tool.as_str(), arguments), &cancel)
        .await;
    interrupt.abort();

    println!("{}", serde_json::to_string_pretty(&result.to_json())?);
    match &result.outcome {
        Ok(_) => {
            eprintln!("{} {} succeeded", style("✓").green().bold(), result.tool);
            Ok(())
        }
        Err(err) => {
            eprintln!("{} {} failed", style("✗").red().bold(), result.tool);
            bail!("{err}")
        }
    }
}

/// Reads the tool arguments from inline JSON or an `@path` reference.
fn parse_input(input: &str) -> Result<Map<String, Value>> {
    let json = match input.strip_prefix('@') {
        Some(path) => {
            let path = PathBuf::from(path);
            std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read input file: {}", path.display()))?
        }
        None => input.to_string(),
    };

    match serde_json::from_str(&json).context("invalid input JSON")? {
        Value::Object(map) => Ok(map),
        _ => bail!("input must be a JSON object"),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct CallArgsCli {
        #[command(flatten)]
        call: CallArgs,
    }

    #[test]
    fn test_call_args_default_to_empty_object() {
        let cli = CallArgsCli::try_parse_from(["test", "get-queue"]).expect("args should parse");
        assert_eq!(cli.call.tool, "get-queue");
        assert_eq!(cli.call.input, "{}");
    }

    #[test]
    fn test_parse_inline_input() {
        let map = parse_input(r#"{"job": "demo", "build": 17}"#).unwrap();
        assert_eq!(map["job"], "demo");
        assert_eq!(map["build"], 17);
    }

    #[test]
    fn test_parse_input_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"job": "team/app"}}"#).unwrap();

        let map = parse_input(&format!("@{}", file.path().display())).unwrap();
        assert_eq!(map["job"], "team/app");
    }

    #[test]
    fn test_parse_input_rejects_non_objects() {
        assert!(parse_input("[1, 2]").is_err());
        assert!(parse_input("not json").is_err());
        assert!(parse_input("@/definitely/missing.json").is_err());
    }
}
