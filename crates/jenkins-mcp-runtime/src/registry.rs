//! The fixed catalog of tools the bridge exposes.

use std::fmt;

use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    handlers::{
        GetLogOutput, JobDetails, ListJobsOutput, ListNodesOutput, QueueOutput,
        StopBuildOutput, TriggerBuildOutput,
    },
    schema::{ParamSpec, ParamType, input_schema},
};

const JOB: ParamType = ParamType::String { non_empty: true };

/// Every operation the dispatcher knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    TriggerBuild,
    GetStatus,
    GetLog,
    ListJobs,
    GetJobInfo,
    StopBuild,
    GetQueue,
    ListNodes,
}

impl Operation {
    pub const ALL: [Self; 8] = [
        Self::TriggerBuild,
        Self::GetStatus,
        Self::GetLog,
        Self::ListJobs,
        Self::GetJobInfo,
        Self::StopBuild,
        Self::GetQueue,
        Self::ListNodes,
    ];

    /// Name clients call the tool by.
    pub fn name(self) -> &'static str {
        match self {
            Self::TriggerBuild => "trigger-build",
            Self::GetStatus => "get-status",
            Self::GetLog => "get-log",
            Self::ListJobs => "list-jobs",
            Self::GetJobInfo => "get-job-info",
            Self::StopBuild => "stop-build",
            Self::GetQueue => "get-queue",
            Self::ListNodes => "list-nodes",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A registered tool: its parameters and the operation that serves it.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub operation: Operation,
    pub title: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    input_schema: Value,
    output_schema: Value,
}

impl ToolSpec {
    fn new(
        operation: Operation,
        title: &'static str,
        description: &'static str,
        params: Vec<ParamSpec>,
        output_schema: schemars::Schema,
    ) -> Self {
        let input_schema = input_schema(&params);
        Self {
            operation,
            title,
            description,
            params,
            input_schema,
            output_schema: output_schema.to_value(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.operation.name()
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn output_schema(&self) -> &Value {
        &self.output_schema
    }

    pub fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name().to_string(),
            title: self.title.to_string(),
            description: self.description.to_string(),
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
        }
    }
}

/// Catalog entry as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub title: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
}

/// Fixed set of tools, built once at startup and never modified.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
}

impl ToolRegistry {
    /// The bridge's built-in tools.
    pub fn builtin() -> Self {
        let tools = Operation::ALL.into_iter().map(builtin_spec).collect();
        Self { tools }
    }

    /// Looks a tool up by name. `trigger_build` is accepted for
    /// `trigger-build`.
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        let normalized = name.trim().replace('_', "-");
        self.tools.iter().find(|spec| spec.name() == normalized)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(ToolSpec::name).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn builtin_spec(operation: Operation) -> ToolSpec {
    match operation {
        Operation::TriggerBuild => ToolSpec::new(
            operation,
            "Trigger build",
            "Queue a build of a job and wait (up to wait_seconds) for Jenkins to assign it a \
             build number. A build that is still queued when the wait ends is reported with \
             phase \"queued\" rather than as an error.",
            vec![
                ParamSpec::required("job", JOB, "Slash-delimited job path, e.g. \"team/app\"."),
                ParamSpec::optional(
                    "params",
                    ParamType::StringMap,
                    "Build parameters as name/value strings. Triggers buildWithParameters when non-empty.",
                ),
                ParamSpec::optional(
                    "wait_seconds",
                    ParamType::Integer { min: 0 },
                    "How long to wait for a build number. Defaults to the configured queue timeout; 0 returns immediately.",
                ),
            ],
            schemars::schema_for!(TriggerBuildOutput),
        ),
        Operation::GetStatus => ToolSpec::new(
            operation,
            "Get build status",
            "Phase (queued, running, finished) and normalized result of a build.",
            vec![
                ParamSpec::required("job", JOB, "Slash-delimited job path."),
                ParamSpec::optional(
                    "build",
                    ParamType::BuildSelector,
                    "Build number or \"latest\".",
                )
                .with_default(json!("latest")),
            ],
            schemars::schema_for!(jenkins_mcp_core::BuildStatus),
        ),
        Operation::GetLog => ToolSpec::new(
            operation,
            "Get console log",
            "Read console output from a byte offset. Pass next_offset back to continue; \
             more=false means the build finished and the log is complete.",
            vec![
                ParamSpec::required("job", JOB, "Slash-delimited job path."),
                ParamSpec::required(
                    "build",
                    ParamType::BuildSelector,
                    "Build number or \"latest\" (pinned to a number on first read).",
                ),
                ParamSpec::optional(
                    "offset",
                    ParamType::Integer { min: 0 },
                    "Byte offset to read from.",
                )
                .with_default(json!(0)),
                ParamSpec::optional(
                    "limit",
                    ParamType::Integer { min: 1 },
                    "Maximum bytes to return; capped by the server's chunk limit.",
                ),
                ParamSpec::optional(
                    "follow_seconds",
                    ParamType::Integer { min: 0 },
                    "Keep collecting new output for up to this many seconds.",
                )
                .with_default(json!(0)),
            ],
            schemars::schema_for!(GetLogOutput),
        ),
        Operation::ListJobs => ToolSpec::new(
            operation,
            "List jobs",
            "Jobs at the Jenkins root or inside a folder, with their last build.",
            vec![ParamSpec::optional(
                "folder",
                JOB,
                "Folder path; omit for the root.",
            )],
            schemars::schema_for!(ListJobsOutput),
        ),
        Operation::GetJobInfo => ToolSpec::new(
            operation,
            "Get job info",
            "Description, buildability and build counters of a job.",
            vec![ParamSpec::required("job", JOB, "Slash-delimited job path.")],
            schemars::schema_for!(JobDetails),
        ),
        Operation::StopBuild => ToolSpec::new(
            operation,
            "Stop build",
            "Abort a running build.",
            vec![
                ParamSpec::required("job", JOB, "Slash-delimited job path."),
                ParamSpec::required(
                    "build",
                    ParamType::BuildSelector,
                    "Build number or \"latest\".",
                ),
            ],
            schemars::schema_for!(StopBuildOutput),
        ),
        Operation::GetQueue => ToolSpec::new(
            operation,
            "Get build queue",
            "Items waiting in the Jenkins build queue and why they are waiting.",
            Vec::new(),
            schemars::schema_for!(QueueOutput),
        ),
        Operation::ListNodes => ToolSpec::new(
            operation,
            "List nodes",
            "Build agents with their online state and executor count.",
            Vec::new(),
            schemars::schema_for!(ListNodesOutput),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_has_every_operation_once() {
        let registry = ToolRegistry::builtin();
        assert_eq!(registry.len(), Operation::ALL.len());
        assert_eq!(
            registry.names(),
            [
                "trigger-build",
                "get-status",
                "get-log",
                "list-jobs",
                "get-job-info",
                "stop-build",
                "get-queue",
                "list-nodes"
            ]
        );
    }

    #[test]
    fn test_lookup_accepts_underscores() {
        let registry = ToolRegistry::builtin();
        assert_eq!(
            registry.get("trigger_build").map(|spec| spec.operation),
            Some(Operation::TriggerBuild)
        );
        assert_eq!(
            registry.get("get-log").map(|spec| spec.operation),
            Some(Operation::GetLog)
        );
        assert!(registry.get("delete-job").is_none());
        assert!(registry.get("triggerBuild").is_none());
    }

    #[test]
    fn test_schemas_are_objects() {
        for spec in ToolRegistry::builtin().iter() {
            assert_eq!(spec.input_schema()["type"], "object", "{}", spec.name());
            assert_eq!(spec.output_schema()["type"], "object", "{}", spec.name());
        }
    }

    #[test]
    fn test_get_log_declares_required_build() {
        let registry = ToolRegistry::builtin();
        let spec = registry.get("get-log").unwrap();
        assert_eq!(spec.input_schema()["required"], json!(["job", "build"]));
        assert_eq!(
            spec.input_schema()["properties"]["offset"]["default"],
            json!(0)
        );
    }
}
