//! Jenkins side of the jenkins-mcp bridge.
//!
//! This crate talks to one Jenkins controller over its REST API and hides the
//! parts of that API that are awkward to consume directly: CSRF crumbs,
//! fire-and-forget triggers that only return a queue location, and console
//! logs that are read progressively by byte offset.
//!
//! # Key Components
//!
//! - **Client**: [`JenkinsClient`] issues authenticated calls, retries
//!   idempotent GETs on connection failures and never retries POSTs
//! - **Queue resolution**: [`QueueResolver`] turns a [`QueueItem`] into a
//!   [`BuildRef`] or reports why it could not
//! - **Logs**: [`LogReader`] reads bounded [`LogChunk`]s keyed by offset
//! - **Status**: [`StatusPoller`] maps Jenkins build documents onto
//!   [`BuildStatus`]
//!
//! # Example
//!
//! ```ignore
//! use jenkins_mcp_core::{BridgeConfig, JenkinsClient, JobRef, QueueResolver};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BridgeConfig::resolve(None)?;
//! let client = JenkinsClient::new(&config)?;
//! let resolver = QueueResolver::new(client.clone(), &config);
//!
//! let job = JobRef::parse("team/app")?;
//! if let Some(mut item) = client.trigger(&job, &[]).await? {
//!     let build = resolver
//!         .resolve(&mut item, config.queue_timeout(), &CancellationToken::new())
//!         .await?;
//!     println!("started {build}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! All handles are `Clone + Send + Sync`. Clones of a [`JenkinsClient`] share
//! one connection pool and one crumb cache; nothing else is shared between
//! calls.

mod client;
mod config;
mod crumb;
mod error;
mod jobs;
mod log;
mod queue;
mod status;
mod types;

pub use client::{JenkinsClient, RawResponse};
pub use config::{
    API_TOKEN_ENV, BridgeConfig, CONFIG_FILE_NAME, CONFIG_PATH_ENV, ConfigError,
    MIN_LOG_CHUNK_LIMIT, TIMEOUT_ENV, URL_ENV, USERNAME_ENV,
};
pub use crumb::Crumb;
pub use error::JenkinsError;
pub use log::LogReader;
pub use queue::QueueResolver;
pub use status::StatusPoller;
pub use types::{
    BuildOutcome, BuildPhase, BuildRef, BuildSelector, BuildStatus, BuildSummary, JobInfo,
    JobRef, JobSummary, LogChunk, NodeInfo, QueueExecutable, QueueItem, QueueItemSnapshot,
    QueueState, QueueTask, queue_id_from_location,
};
