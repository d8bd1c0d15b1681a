//! Normalized build status.

use reqwest::Method;
use tracing::{debug, instrument};

use crate::{
    JenkinsClient, JenkinsError,
    jobs::not_found_as,
    types::{BuildInfo, BuildOutcome, BuildPhase, BuildRef, BuildSelector, BuildStatus, JobInfo},
};

const BUILD_TREE: &str = "number,url,building,result,duration,timestamp";
const QUEUE_HINT_TREE: &str = "name,inQueue,nextBuildNumber";

/// Reads build state and maps it onto the closed status vocabulary.
#[derive(Debug, Clone)]
pub struct StatusPoller {
    client: JenkinsClient,
}

impl StatusPoller {
    pub fn new(client: JenkinsClient) -> Self {
        Self { client }
    }

    /// Current status of a build.
    ///
    /// A build that does not exist yet is reported as `queued` when the job
    /// has a queued item that will become that build.
    ///
    /// # Errors
    ///
    /// Returns [`JenkinsError::NotFound`] when neither the build nor a queued
    /// item for it exist, or any client error.
    #[instrument(skip(self, build), fields(build = %build))]
    pub async fn status(&self, build: &BuildRef) -> Result<BuildStatus, JenkinsError> {
        let url = self.client.build_url(build, &["api", "json"]);
        match self
            .client
            .get_json::<BuildInfo>(&url, &[("tree", BUILD_TREE.to_string())])
            .await
        {
            Ok(info) => {
                let pinned = BuildRef::new(build.job.clone(), BuildSelector::number(info.number)?);
                let log_offset = self.log_size(&pinned).await;
                Ok(normalize(build, info, log_offset))
            }
            Err(JenkinsError::NotFound(_)) => self.queued_or_missing(build).await,
            Err(err) => Err(err),
        }
    }

    async fn queued_or_missing(&self, build: &BuildRef) -> Result<BuildStatus, JenkinsError> {
        let url = self.client.job_url(&build.job, &["api", "json"]);
        let job: JobInfo = self
            .client
            .get_json(&url, &[("tree", QUEUE_HINT_TREE.to_string())])
            .await
            .map_err(|err| not_found_as(err, || format!("job '{}'", build.job)))?;

        let next_in_queue = match build.build {
            BuildSelector::Latest => true,
            BuildSelector::Number(n) => job.next_build_number == Some(n),
        };
        if job.in_queue && next_in_queue {
            debug!("Build not started yet; job has a queued item");
            return Ok(BuildStatus {
                job: build.job.clone(),
                number: build.number(),
                phase: BuildPhase::Queued,
                result: None,
                raw_result: None,
                duration_ms: 0,
                started_at_ms: None,
                log_offset: Some(0),
                url: None,
            });
        }
        Err(JenkinsError::NotFound(format!("build {build}")))
    }

    /// Console log size in bytes, probed without downloading the log.
    ///
    /// A failed probe yields `None` rather than a size that could move the
    /// watermark backwards.
    async fn log_size(&self, build: &BuildRef) -> Option<u64> {
        let url = self
            .client
            .build_url(build, &["logText", "progressiveText"]);
        let probe = self
            .client
            .request(Method::HEAD, &url, &[("start", "0".to_string())], None)
            .await;
        match probe {
            Ok(response) => response
                .header("X-Text-Size")
                .and_then(|v| v.trim().parse().ok()),
            Err(err) => {
                debug!(error = %err, "Log size probe failed");
                None
            }
        }
    }
}

/// Maps a build document onto [`BuildStatus`].
///
/// `result` decides the phase: Jenkins sets it exactly when the build is
/// over, while `building` can lag behind during post-build steps.
fn normalize(requested: &BuildRef, info: BuildInfo, log_offset: Option<u64>) -> BuildStatus {
    let (phase, result) = match info.result.as_deref() {
        Some(raw) => (BuildPhase::Finished, Some(BuildOutcome::from_jenkins(raw))),
        None => (BuildPhase::Running, None),
    };
    let duration_ms = if phase == BuildPhase::Finished {
        info.duration
    } else {
        0
    };

    BuildStatus {
        job: requested.job.clone(),
        number: Some(info.number),
        phase,
        result,
        raw_result: info.result,
        duration_ms,
        started_at_ms: info.timestamp,
        log_offset,
        url: info.url,
    }
}
