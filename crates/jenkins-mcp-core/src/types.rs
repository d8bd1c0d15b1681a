//! Domain model of the bridge and the Jenkins JSON payloads it consumes.

use std::{fmt, str::FromStr};

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::time::Instant;

use crate::JenkinsError;

// ============================================================================
// Job and build references
// ============================================================================

/// A Jenkins job identified by its folder path, e.g. `team/app/deploy`.
///
/// Segments are kept unescaped; they are percent-encoded one by one when a URL
/// is built, so a job called `a b` or `50%` never leaks raw into a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobRef {
    segments: Vec<String>,
}

impl JobRef {
    /// Parses a slash-delimited job path.
    ///
    /// Empty segments (leading, trailing or doubled slashes) are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`JenkinsError::InvalidJob`] if the path has no segments or a
    /// segment is `.` or `..`.
    pub fn parse(path: &str) -> Result<Self, JenkinsError> {
        let segments: Vec<String> = path
            .split('/')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(ToString::to_string)
            .collect();

        if segments.is_empty() {
            return Err(JenkinsError::InvalidJob(
                "job path must not be empty".to_string(),
            ));
        }
        if let Some(bad) = segments.iter().find(|s| *s == "." || *s == "..") {
            return Err(JenkinsError::InvalidJob(format!(
                "'{path}' contains the relative segment '{bad}'"
            )));
        }
        Ok(Self { segments })
    }

    /// Folder and job names from the root down to the job itself.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The job's own (last) name.
    pub fn name(&self) -> &str {
        self.segments.last().map_or("", String::as_str)
    }

    /// URL path segments: `job/<a>/job/<b>`, still unescaped.
    pub(crate) fn url_segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().flat_map(|s| ["job", s.as_str()])
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for JobRef {
    type Err = JenkinsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for JobRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl JsonSchema for JobRef {
    fn schema_name() -> std::borrow::Cow<'static, str> {
        "JobRef".into()
    }

    fn json_schema(_generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
        schemars::json_schema!({
            "type": "string",
            "description": "Slash-delimited job path, e.g. \"folder/my-job\"."
        })
    }
}

/// Which build of a job: a concrete number or the most recent one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildSelector {
    /// A concrete build number (always positive).
    Number(u32),
    /// Jenkins's `lastBuild` permalink.
    Latest,
}

impl BuildSelector {
    /// Keyword accepted for [`BuildSelector::Latest`].
    pub const LATEST: &'static str = "latest";

    /// Builds a selector from a build number.
    ///
    /// # Errors
    ///
    /// Returns [`JenkinsError::InvalidJob`] for build number zero.
    pub fn number(number: u32) -> Result<Self, JenkinsError> {
        if number == 0 {
            return Err(JenkinsError::InvalidJob(
                "build numbers start at 1".to_string(),
            ));
        }
        Ok(Self::Number(number))
    }

    /// The URL segment Jenkins uses for this selector.
    pub(crate) fn url_segment(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Latest => "lastBuild".to_string(),
        }
    }
}

impl fmt::Display for BuildSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "#{n}"),
            Self::Latest => f.write_str(Self::LATEST),
        }
    }
}

impl Serialize for BuildSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Number(n) => serializer.serialize_u32(*n),
            Self::Latest => serializer.serialize_str(Self::LATEST),
        }
    }
}

impl<'de> Deserialize<'de> for BuildSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Keyword(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => u32::try_from(n)
                .map_err(|_| serde::de::Error::custom(format!("build number {n} is too large")))
                .and_then(|n| Self::number(n).map_err(serde::de::Error::custom)),
            Raw::Keyword(word) if word.eq_ignore_ascii_case(Self::LATEST) => Ok(Self::Latest),
            Raw::Keyword(word) => Err(serde::de::Error::custom(format!(
                "expected a build number or \"latest\", got \"{word}\""
            ))),
        }
    }
}

impl JsonSchema for BuildSelector {
    fn schema_name() -> std::borrow::Cow<'static, str> {
        "BuildSelector".into()
    }

    fn json_schema(_generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
        schemars::json_schema!({
            "oneOf": [
                { "type": "integer", "minimum": 1 },
                { "type": "string", "enum": ["latest"] }
            ]
        })
    }
}

/// A job plus a build selector. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct BuildRef {
    pub job: JobRef,
    pub build: BuildSelector,
}

impl BuildRef {
    pub fn new(job: JobRef, build: BuildSelector) -> Self {
        Self { job, build }
    }

    /// The concrete build number, if this reference is not `latest`.
    pub fn number(&self) -> Option<u32> {
        match self.build {
            BuildSelector::Number(n) => Some(n),
            BuildSelector::Latest => None,
        }
    }
}

impl fmt::Display for BuildRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.job, self.build)
    }
}

// ============================================================================
// Queue items
// ============================================================================

/// Resolution state of a triggered build waiting in the Jenkins queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    /// Still waiting for an executor.
    Pending,
    /// Jenkins assigned a build number.
    Resolved(BuildRef),
    /// Somebody cancelled the item before it started.
    Cancelled,
    /// The bridge stopped waiting; the item may still start later.
    Expired,
}

impl QueueState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// An in-flight trigger: created from a `201 Created` + `Location` response
/// and dropped once it leaves [`QueueState::Pending`].
#[derive(Debug, Clone)]
pub struct QueueItem {
    id: u64,
    job: JobRef,
    created_at: Instant,
    state: QueueState,
}

impl QueueItem {
    pub fn new(id: u64, job: JobRef) -> Self {
        Self {
            id,
            job,
            created_at: Instant::now(),
            state: QueueState::Pending,
        }
    }

    /// Creates a queue item from a trigger response's `Location` header, e.g.
    /// `https://ci.example.com/queue/item/42/`.
    ///
    /// # Errors
    ///
    /// Returns [`JenkinsError::InvalidQueueLocation`] if the location does not
    /// end in `queue/item/<id>`.
    pub fn from_location(location: &str, job: JobRef) -> Result<Self, JenkinsError> {
        let id = queue_id_from_location(location)
            .ok_or_else(|| JenkinsError::InvalidQueueLocation(location.to_string()))?;
        Ok(Self::new(id, job))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn job(&self) -> &JobRef {
        &self.job
    }

    pub fn state(&self) -> &QueueState {
        &self.state
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Applies one poll of the queue endpoint. Terminal states never change.
    pub fn observe(&mut self, snapshot: &QueueItemSnapshot) -> &QueueState {
        if self.state.is_terminal() {
            return &self.state;
        }
        if let Some(executable) = &snapshot.executable {
            if let Ok(build) = BuildSelector::number(executable.number) {
                self.state = QueueState::Resolved(BuildRef::new(self.job.clone(), build));
            }
        } else if snapshot.cancelled.unwrap_or(false) {
            self.state = QueueState::Cancelled;
        }
        &self.state
    }

    /// Marks a still-pending item as abandoned by the bridge.
    pub fn expire(&mut self) {
        if self.state == QueueState::Pending {
            self.state = QueueState::Expired;
        }
    }
}

/// Extracts the numeric id from a queue item URL.
pub fn queue_id_from_location(location: &str) -> Option<u64> {
    let mut parts = location.trim().trim_end_matches('/').rsplit('/');
    let id = parts.next()?.parse().ok()?;
    match (parts.next(), parts.next()) {
        (Some("item"), Some("queue")) => Some(id),
        _ => None,
    }
}

// ============================================================================
// Build status
// ============================================================================

/// Lifecycle phase of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Queued,
    Running,
    Finished,
}

/// Terminal outcome of a finished build.
///
/// Plugins can introduce their own result strings; anything outside the known
/// vocabulary becomes [`BuildOutcome::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    Success,
    Failure,
    Unstable,
    Aborted,
    Unknown,
}

impl BuildOutcome {
    /// Normalizes a Jenkins result string, case-insensitively.
    pub fn from_jenkins(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => Self::Success,
            "FAILURE" => Self::Failure,
            "UNSTABLE" => Self::Unstable,
            "ABORTED" => Self::Aborted,
            _ => Self::Unknown,
        }
    }
}

/// Normalized view of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BuildStatus {
    /// Job the build belongs to.
    pub job: JobRef,
    /// Build number; absent while a `latest` query is still queued.
    pub number: Option<u32>,
    pub phase: BuildPhase,
    /// Present only when `phase` is `finished`.
    pub result: Option<BuildOutcome>,
    /// The result string exactly as Jenkins reported it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_result: Option<String>,
    /// Build duration in milliseconds (0 while running).
    pub duration_ms: u64,
    /// Start time, Unix epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    /// Console log size in bytes when the status was taken; never decreases.
    /// `None` when Jenkins could not report it.
    pub log_offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

// ============================================================================
// Console log
// ============================================================================

/// A contiguous slice of console output, `[start, end)` in log bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LogChunk {
    pub start: u64,
    pub end: u64,
    pub text: String,
    /// `true` while the build may still append output or the chunk was cut
    /// short by the size limit.
    pub more: bool,
}

impl LogChunk {
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Offset to pass to the next read.
    pub fn next_offset(&self) -> u64 {
        self.end
    }
}

// ============================================================================
// Jenkins JSON payloads
// ============================================================================

/// `GET /crumbIssuer/api/json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CrumbResponse {
    pub crumb: String,
    pub crumb_request_field: String,
}

/// `GET /queue/item/<id>/api/json` and entries of `GET /queue/api/json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueItemSnapshot {
    pub id: u64,
    /// Only present on items that left the queue.
    #[serde(default)]
    pub cancelled: Option<bool>,
    /// Only present once a build was assigned.
    #[serde(default)]
    pub executable: Option<QueueExecutable>,
    #[serde(default)]
    pub why: Option<String>,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub stuck: bool,
    #[serde(default)]
    pub in_queue_since: Option<u64>,
    #[serde(default)]
    pub task: Option<QueueTask>,
}

/// The build a queue item turned into.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueueExecutable {
    pub number: u32,
    #[serde(default)]
    pub url: Option<String>,
}

/// The job a queue item belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueueTask {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// `GET /queue/api/json`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct QueueListing {
    #[serde(default)]
    pub items: Vec<QueueItemSnapshot>,
}

/// `GET /job/<path>/<n>/api/json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BuildInfo {
    pub number: u32,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub building: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// Last build reference embedded in job payloads.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BuildSummary {
    pub number: u32,
    #[serde(default)]
    pub result: Option<String>,
}

/// One entry of a job listing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Jenkins ball color, e.g. `blue`, `red_anime`; absent for folders.
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub last_build: Option<BuildSummary>,
}

/// `GET /api/json` or `GET /job/<folder>/api/json` with a `jobs` tree.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct JobListing {
    #[serde(default)]
    pub jobs: Vec<JobSummary>,
}

/// `GET /job/<path>/api/json`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub buildable: Option<bool>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub in_queue: bool,
    #[serde(default)]
    pub next_build_number: Option<u32>,
    #[serde(default)]
    pub last_build: Option<BuildSummary>,
}

/// One agent from `GET /computer/api/json`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub display_name: String,
    #[serde(default)]
    pub offline: bool,
    #[serde(default)]
    pub offline_cause_reason: Option<String>,
    #[serde(default)]
    pub idle: bool,
    #[serde(default)]
    pub num_executors: u32,
}

/// `GET /computer/api/json`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NodeListing {
    #[serde(default)]
    pub computer: Vec<NodeInfo>,
}
