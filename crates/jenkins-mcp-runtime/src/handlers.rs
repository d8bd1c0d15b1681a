//! Operation handlers: typed input, Jenkins calls, typed output.
//!
//! Arguments reaching this module were already checked against the tool's
//! declared parameters, so decoding them into the input structs only fails
//! for values the schema cannot express (e.g. a job path with `..`).

use std::{collections::BTreeMap, time::Duration};

use jenkins_mcp_core::{
    BridgeConfig, BuildRef, BuildSelector, BuildStatus, BuildSummary, JenkinsClient,
    JenkinsError, JobRef, LogReader, QueueResolver, StatusPoller,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{ToolError, registry::Operation};

/// Upper bound for `wait_seconds` and `follow_seconds`.
pub const MAX_WAIT_SECONDS: u64 = 3_600;

/// Runs registered operations against one Jenkins controller.
#[derive(Debug, Clone)]
pub struct Handlers {
    client: JenkinsClient,
    queue: QueueResolver,
    logs: LogReader,
    status: StatusPoller,
    default_wait: Duration,
}

impl Handlers {
    pub fn new(client: JenkinsClient, config: &BridgeConfig) -> Self {
        Self {
            queue: QueueResolver::new(client.clone(), config),
            logs: LogReader::new(client.clone(), config),
            status: StatusPoller::new(client.clone()),
            default_wait: config.queue_timeout(),
            client,
        }
    }

    pub fn client(&self) -> &JenkinsClient {
        &self.client
    }

    /// Runs `operation` with validated `arguments`.
    ///
    /// # Errors
    ///
    /// Returns the [`ToolError`] the operation failed with.
    pub async fn run(
        &self,
        operation: Operation,
        arguments: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        match operation {
            Operation::TriggerBuild => output(&self.trigger_build(input(arguments)?, cancel).await?),
            Operation::GetStatus => output(&self.get_status(input(arguments)?).await?),
            Operation::GetLog => output(&self.get_log(input(arguments)?, cancel).await?),
            Operation::ListJobs => output(&self.list_jobs(input(arguments)?).await?),
            Operation::GetJobInfo => output(&self.get_job_info(input(arguments)?).await?),
            Operation::StopBuild => output(&self.stop_build(input(arguments)?).await?),
            Operation::GetQueue => output(&self.get_queue().await?),
            Operation::ListNodes => output(&self.list_nodes().await?),
        }
    }

    async fn trigger_build(
        &self,
        input: TriggerBuildInput,
        cancel: &CancellationToken,
    ) -> Result<TriggerBuildOutput, ToolError> {
        let TriggerBuildInput {
            job,
            params,
            wait_seconds,
        } = input;
        let parameters: Vec<(String, String)> = params.into_iter().collect();
        let wait = wait_seconds.map_or(self.default_wait, |secs| {
            Duration::from_secs(secs.min(MAX_WAIT_SECONDS))
        });

        let Some(mut item) = self.client.trigger(&job, &parameters).await? else {
            return Ok(TriggerBuildOutput::queued(
                job,
                None,
                "Jenkins accepted the build but did not report a queue item; check get-queue",
            ));
        };
        let queue_id = item.id();
        if wait.is_zero() {
            return Ok(TriggerBuildOutput::queued(
                job,
                Some(queue_id),
                "Build queued; not waiting for a build number",
            ));
        }

        match self.queue.resolve(&mut item, wait, cancel).await {
            Ok(build) => {
                info!(job = %job, queue_id, build = ?build.number(), "Triggered build started");
                Ok(TriggerBuildOutput {
                    job,
                    phase: TriggerPhase::Resolved,
                    build: build.number(),
                    queue_id: Some(queue_id),
                    message: None,
                })
            }
            Err(JenkinsError::QueueTimeout { waited, .. }) => {
                debug!(job = %job, queue_id, "Build still queued after the wait");
                Ok(TriggerBuildOutput::queued(
                    job,
                    Some(queue_id),
                    format!(
                        "Build still queued after {}s; it may start later, check get-status or get-queue",
                        waited.as_secs()
                    ),
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_status(&self, input: BuildInput) -> Result<BuildStatus, ToolError> {
        let build = BuildRef::new(input.job, input.build);
        Ok(self.status.status(&build).await?)
    }

    async fn get_log(
        &self,
        input: GetLogInput,
        cancel: &CancellationToken,
    ) -> Result<GetLogOutput, ToolError> {
        // Offsets only make sense against one concrete build.
        let build = self
            .client
            .resolve_build(&BuildRef::new(input.job, input.build))
            .await?;
        let number = pinned_number(&build)?;
        let limit = input.limit.unwrap_or_else(|| self.logs.chunk_limit());

        let chunk = if input.follow_seconds == 0 {
            self.logs.read_bounded(&build, input.offset, limit).await?
        } else {
            let window = Duration::from_secs(input.follow_seconds.min(MAX_WAIT_SECONDS));
            self.logs
                .follow(&build, input.offset, limit, window, cancel)
                .await?
        };

        Ok(GetLogOutput {
            job: build.job,
            build: number,
            start: chunk.start,
            end: chunk.end,
            next_offset: chunk.next_offset(),
            more: chunk.more,
            text: chunk.text,
        })
    }

    async fn list_jobs(&self, input: ListJobsInput) -> Result<ListJobsOutput, ToolError> {
        let jobs = self.client.list_jobs(input.folder.as_ref()).await?;
        let jobs = jobs
            .into_iter()
            .map(|job| JobEntry {
                full_name: job.full_name.unwrap_or_else(|| match &input.folder {
                    Some(folder) => format!("{folder}/{}", job.name),
                    None => job.name.clone(),
                }),
                name: job.name,
                url: job.url,
                color: job.color,
                last_build: job.last_build,
            })
            .collect();
        Ok(ListJobsOutput {
            folder: input.folder,
            jobs,
        })
    }

    async fn get_job_info(&self, input: JobInput) -> Result<JobDetails, ToolError> {
        let info = self.client.job_info(&input.job).await?;
        Ok(JobDetails {
            full_name: info.full_name.unwrap_or_else(|| input.job.to_string()),
            name: info.name,
            description: info.description.filter(|d| !d.trim().is_empty()),
            url: info.url,
            buildable: info.buildable,
            color: info.color,
            in_queue: info.in_queue,
            next_build_number: info.next_build_number,
            last_build: info.last_build,
        })
    }

    async fn stop_build(&self, input: BuildInput) -> Result<StopBuildOutput, ToolError> {
        let build = self
            .client
            .resolve_build(&BuildRef::new(input.job, input.build))
            .await?;
        let number = pinned_number(&build)?;
        self.client.stop_build(&build).await?;
        info!(build = %build, "Stop requested");
        Ok(StopBuildOutput {
            job: build.job,
            build: number,
            stopped: true,
        })
    }

    async fn get_queue(&self) -> Result<QueueOutput, ToolError> {
        let items = self
            .client
            .queue_items()
            .await?
            .into_iter()
            .map(|item| {
                let (task, url) = item
                    .task
                    .map_or((None, None), |task| (task.name, task.url));
                QueueEntry {
                    id: item.id,
                    task,
                    url,
                    why: item.why,
                    in_queue_since_ms: item.in_queue_since,
                    blocked: item.blocked,
                    stuck: item.stuck,
                }
            })
            .collect();
        Ok(QueueOutput { items })
    }

    async fn list_nodes(&self) -> Result<ListNodesOutput, ToolError> {
        let nodes = self
            .client
            .nodes()
            .await?
            .into_iter()
            .map(|node| NodeEntry {
                name: node.display_name,
                online: !node.offline,
                offline_reason: node.offline_cause_reason.filter(|r| !r.trim().is_empty()),
                idle: node.idle,
                executors: node.num_executors,
            })
            .collect();
        Ok(ListNodesOutput { nodes })
    }
}

fn input<T: DeserializeOwned>(arguments: Map<String, Value>) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|err| ToolError::invalid_argument(err.to_string()))
}

fn output<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value)
        .map_err(|err| ToolError::internal(format!("failed to encode output: {err}")))
}

fn pinned_number(build: &BuildRef) -> Result<u32, ToolError> {
    build
        .number()
        .ok_or_else(|| ToolError::internal(format!("{build} was not pinned to a build number")))
}

fn latest() -> BuildSelector {
    BuildSelector::Latest
}

// ============================================================================
// Inputs
// ============================================================================

#[derive(Debug, Deserialize)]
struct TriggerBuildInput {
    job: JobRef,
    #[serde(default)]
    params: BTreeMap<String, String>,
    #[serde(default)]
    wait_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BuildInput {
    job: JobRef,
    #[serde(default = "latest")]
    build: BuildSelector,
}

#[derive(Debug, Deserialize)]
struct GetLogInput {
    job: JobRef,
    build: BuildSelector,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    follow_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct ListJobsInput {
    #[serde(default)]
    folder: Option<JobRef>,
}

#[derive(Debug, Deserialize)]
struct JobInput {
    job: JobRef,
}

// ============================================================================
// Outputs
// ============================================================================

/// Whether a triggered build already has a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPhase {
    /// Jenkins assigned a build number.
    Resolved,
    /// The build is still waiting in the queue.
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TriggerBuildOutput {
    pub job: JobRef,
    pub phase: TriggerPhase,
    /// Build number, present when `phase` is `resolved`.
    pub build: Option<u32>,
    /// Jenkins queue item id, when Jenkins reported one.
    pub queue_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TriggerBuildOutput {
    fn queued(job: JobRef, queue_id: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            job,
            phase: TriggerPhase::Queued,
            build: None,
            queue_id,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GetLogOutput {
    pub job: JobRef,
    /// The concrete build read, even when `latest` was requested.
    pub build: u32,
    pub start: u64,
    pub end: u64,
    pub text: String,
    /// `true` while the build may append more output or the chunk was cut
    /// at the size limit.
    pub more: bool,
    /// Offset to pass to the next call.
    pub next_offset: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobEntry {
    pub name: String,
    pub full_name: String,
    pub url: Option<String>,
    pub color: Option<String>,
    pub last_build: Option<BuildSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListJobsOutput {
    pub folder: Option<JobRef>,
    pub jobs: Vec<JobEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobDetails {
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub buildable: Option<bool>,
    pub color: Option<String>,
    pub in_queue: bool,
    pub next_build_number: Option<u32>,
    pub last_build: Option<BuildSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StopBuildOutput {
    pub job: JobRef,
    pub build: u32,
    pub stopped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueueEntry {
    pub id: u64,
    /// Name of the queued job.
    pub task: Option<String>,
    pub url: Option<String>,
    /// Jenkins's explanation of why the item is waiting.
    pub why: Option<String>,
    pub in_queue_since_ms: Option<u64>,
    pub blocked: bool,
    pub stuck: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueueOutput {
    pub items: Vec<QueueEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NodeEntry {
    pub name: String,
    pub online: bool,
    pub offline_reason: Option<String>,
    pub idle: bool,
    pub executors: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListNodesOutput {
    pub nodes: Vec<NodeEntry>,
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, query_param},
    };

    use super::*;
    use crate::ErrorKind;

    pub(crate) fn test_config(uri: &str) -> BridgeConfig {
        BridgeConfig {
            get_retries: 1,
            retry_min_delay_ms: 1,
            retry_max_delay_ms: 5,
            request_timeout: 5,
            queue_poll_interval_ms: 5,
            queue_poll_max_interval_ms: 20,
            log_poll_interval_ms: 5,
            queue_timeout: 2,
            ..BridgeConfig::new(uri, "bot", "secret-token")
        }
    }

    pub(crate) fn test_handlers(server: &MockServer) -> Handlers {
        let config = test_config(&server.uri());
        Handlers::new(JenkinsClient::new(&config).unwrap(), &config)
    }

    pub(crate) async fn mount_crumb(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/crumbIssuer/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "crumb": "c0ffee",
                "crumbRequestField": "Jenkins-Crumb"
            })))
            .mount(server)
            .await;
    }

    /// `POST /job/demo/build` answering with queue item 42.
    pub(crate) async fn mount_trigger(server: &MockServer) {
        mount_crumb(server).await;
        Mock::given(method("POST"))
            .and(path("/job/demo/build"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", format!("{}/queue/item/42/", server.uri())),
            )
            .mount(server)
            .await;
    }

    pub(crate) fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn test_trigger_build_resolves_queue_item() {
        let server = MockServer::start().await;
        mount_trigger(&server).await;
        Mock::given(method("GET"))
            .and(path("/queue/item/42/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 42,
                "executable": {"number": 17, "url": "http://jenkins/job/demo/17/"}
            })))
            .mount(&server)
            .await;

        let output = test_handlers(&server)
            .run(
                Operation::TriggerBuild,
                args(json!({"job": "demo"})),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            output,
            json!({"job": "demo", "phase": "resolved", "build": 17, "queue_id": 42})
        );
    }

    #[tokio::test]
    async fn test_trigger_build_without_wait_does_not_poll() {
        let server = MockServer::start().await;
        mount_trigger(&server).await;
        Mock::given(method("GET"))
            .and(path("/queue/item/42/api/json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let output = test_handlers(&server)
            .run(
                Operation::TriggerBuild,
                args(json!({"job": "demo", "wait_seconds": 0})),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output["phase"], "queued");
        assert_eq!(output["queue_id"], 42);
        assert_eq!(output["build"], Value::Null);
    }

    #[tokio::test]
    async fn test_trigger_build_timeout_is_still_queued() {
        let server = MockServer::start().await;
        mount_trigger(&server).await;
        Mock::given(method("GET"))
            .and(path("/queue/item/42/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 42,
                "why": "Waiting for next available executor"
            })))
            .mount(&server)
            .await;

        let output = test_handlers(&server)
            .run(
                Operation::TriggerBuild,
                args(json!({"job": "demo", "wait_seconds": 1})),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output["phase"], "queued");
        assert_eq!(output["queue_id"], 42);
        assert!(
            output["message"]
                .as_str()
                .is_some_and(|m| m.contains("still queued"))
        );
    }

    #[tokio::test]
    async fn test_trigger_build_wait_bounds_a_slow_queue_endpoint() {
        let server = MockServer::start().await;
        mount_trigger(&server).await;
        Mock::given(method("GET"))
            .and(path("/queue/item/42/api/json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": 42}))
                    .set_delay(Duration::from_secs(4)),
            )
            .mount(&server)
            .await;

        let started = tokio::time::Instant::now();
        let output = test_handlers(&server)
            .run(
                Operation::TriggerBuild,
                args(json!({"job": "demo", "wait_seconds": 1})),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(output["phase"], "queued");
        assert_eq!(output["queue_id"], 42);
    }

    #[tokio::test]
    async fn test_trigger_build_cancelled_in_queue_is_an_error() {
        let server = MockServer::start().await;
        mount_trigger(&server).await;
        Mock::given(method("GET"))
            .and(path("/queue/item/42/api/json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 42, "cancelled": true})),
            )
            .mount(&server)
            .await;

        let err = test_handlers(&server)
            .run(
                Operation::TriggerBuild,
                args(json!({"job": "demo"})),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::QueueCancelled);
    }

    #[tokio::test]
    async fn test_get_log_pins_latest_build() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/demo/lastBuild/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"number": 17})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/job/demo/17/logText/progressiveText"))
            .and(query_param("start", "0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Text-Size", "13")
                    .insert_header("X-More-Data", "true")
                    .set_body_string("Started by a\n"),
            )
            .mount(&server)
            .await;

        let output = test_handlers(&server)
            .run(
                Operation::GetLog,
                args(json!({"job": "demo", "build": "latest", "offset": 0})),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output["build"], 17);
        assert_eq!(output["text"], "Started by a\n");
        assert_eq!(output["next_offset"], 13);
        assert_eq!(output["more"], true);
    }

    #[tokio::test]
    async fn test_get_log_offset_past_end_is_invalid_argument() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/demo/17/logText/progressiveText"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Text-Size", "10")
                    .set_body_string("0123456789"),
            )
            .mount(&server)
            .await;

        let err = test_handlers(&server)
            .run(
                Operation::GetLog,
                args(json!({"job": "demo", "build": 17, "offset": 500})),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_list_jobs_fills_full_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/team/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobs": [
                    {"name": "app", "color": "blue", "lastBuild": {"number": 3, "result": "SUCCESS"}},
                    {"name": "lib", "fullName": "team/lib", "color": "red"}
                ]
            })))
            .mount(&server)
            .await;

        let output = test_handlers(&server)
            .run(
                Operation::ListJobs,
                args(json!({"folder": "team"})),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output["folder"], "team");
        assert_eq!(output["jobs"][0]["full_name"], "team/app");
        assert_eq!(output["jobs"][0]["last_build"]["number"], 3);
        assert_eq!(output["jobs"][1]["full_name"], "team/lib");
    }

    #[tokio::test]
    async fn test_stop_build_reports_concrete_number() {
        let server = MockServer::start().await;
        mount_crumb(&server).await;
        Mock::given(method("GET"))
            .and(path("/job/demo/lastBuild/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"number": 9})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/job/demo/9/stop"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let output = test_handlers(&server)
            .run(
                Operation::StopBuild,
                args(json!({"job": "demo", "build": "latest"})),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output, json!({"job": "demo", "build": 9, "stopped": true}));
    }

    #[tokio::test]
    async fn test_queue_and_nodes_are_flattened() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/queue/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "id": 7,
                    "why": "Waiting for next available executor",
                    "stuck": true,
                    "inQueueSince": 1_700_000_000_000_u64,
                    "task": {"name": "demo", "url": "http://jenkins/job/demo/"}
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/computer/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "computer": [
                    {"displayName": "built-in", "offline": false, "idle": true, "numExecutors": 2},
                    {"displayName": "agent-1", "offline": true, "offlineCauseReason": "", "numExecutors": 1}
                ]
            })))
            .mount(&server)
            .await;

        let handlers = test_handlers(&server);
        let cancel = CancellationToken::new();
        let queue = handlers
            .run(Operation::GetQueue, Map::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(queue["items"][0]["task"], "demo");
        assert_eq!(queue["items"][0]["stuck"], true);
        assert_eq!(queue["items"][0]["in_queue_since_ms"], 1_700_000_000_000_u64);

        let nodes = handlers
            .run(Operation::ListNodes, Map::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(nodes["nodes"][0]["online"], true);
        assert_eq!(nodes["nodes"][0]["executors"], 2);
        assert_eq!(nodes["nodes"][1]["online"], false);
        assert_eq!(nodes["nodes"][1]["offline_reason"], Value::Null);
    }

    #[tokio::test]
    async fn test_relative_job_path_is_invalid_argument() {
        let server = MockServer::start().await;
        let err = test_handlers(&server)
            .run(
                Operation::GetJobInfo,
                args(json!({"job": "team/../admin"})),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}
