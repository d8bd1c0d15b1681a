//! `jenkins-mcp tools` command implementation.

use std::fmt::Write;

use anyhow::Result;
use clap::Args;
use console::style;
use jenkins_mcp_runtime::{ParamSpec, ToolInfo, ToolRegistry, ToolSpec};

/// Arguments for the `tools` command.
#[derive(Debug, Args)]
pub struct ToolsArgs {
    /// Print the catalog as JSON, including input and output schemas.
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: &ToolsArgs) -> Result<()> {
    let registry = ToolRegistry::builtin();

    if args.json {
        let tools: Vec<ToolInfo> = registry.iter().map(ToolSpec::info).collect();
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    println!(
        "{} {} tool(s)\n",
        style("✓").green().bold(),
        registry.len()
    );
    for spec in registry.iter() {
        println!("{}  {}", style(spec.name()).bold(), style(spec.title).dim());
        println!("  {}", spec.description);
        for param in &spec.params {
            println!("    {}", describe_param(param));
        }
        println!();
    }
    Ok(())
}

fn describe_param(param: &ParamSpec) -> String {
    let mut line = param.name.to_string();
    if !param.required {
        line.push('?');
    }
    if let Some(default) = &param.default {
        let _ = write!(line, " = {default}");
    }
    format!("{line}  {}", style(param.description).dim())
}
