//! Subcommands of the `jenkins-mcp` binary.
//!
//! Each module exports an `*Args` struct implementing `clap::Args` and a
//! `run` function that `main` dispatches to:
//!
//! - **`serve`**: run the MCP server over stdio or streamable HTTP
//! - **`call`**: invoke one tool directly and print the result envelope
//! - **`tools`**: print the tool catalog without contacting Jenkins

pub mod call;
pub mod serve;
pub mod tools;
