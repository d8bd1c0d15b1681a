//! Job, build, queue and node endpoints.

use tracing::{info, instrument, warn};

use crate::{
    JenkinsClient, JenkinsError,
    types::{
        BuildRef, BuildSelector, BuildSummary, JobInfo, JobListing, JobRef, JobSummary, NodeInfo,
        NodeListing, QueueItem, QueueItemSnapshot, QueueListing,
    },
};

const JOB_LIST_TREE: &str = "jobs[name,fullName,url,color,lastBuild[number,result]]";
const JOB_INFO_TREE: &str =
    "name,fullName,description,url,buildable,color,inQueue,nextBuildNumber,lastBuild[number,result]";
const QUEUE_TREE: &str =
    "items[id,why,blocked,stuck,inQueueSince,cancelled,task[name,url],executable[number,url]]";
const NODE_TREE: &str = "computer[displayName,offline,offlineCauseReason,idle,numExecutors]";

impl JenkinsClient {
    /// Lists the jobs at the root or inside `folder`.
    ///
    /// # Errors
    ///
    /// Returns [`JenkinsError::NotFound`] for an unknown folder, or any
    /// client error.
    #[instrument(skip(self))]
    pub async fn list_jobs(&self, folder: Option<&JobRef>) -> Result<Vec<JobSummary>, JenkinsError> {
        let url = match folder {
            Some(folder) => self.job_url(folder, &["api", "json"]),
            None => self.url_for(["api", "json"]),
        };
        let listing: JobListing = self
            .get_json(&url, &[("tree", JOB_LIST_TREE.to_string())])
            .await
            .map_err(|err| not_found_as(err, || match folder {
                Some(folder) => format!("folder '{folder}'"),
                None => "job listing".to_string(),
            }))?;
        Ok(listing.jobs)
    }

    /// Fetches one job's description and build counters.
    ///
    /// # Errors
    ///
    /// Returns [`JenkinsError::NotFound`] for an unknown job, or any client
    /// error.
    #[instrument(skip(self), fields(job = %job))]
    pub async fn job_info(&self, job: &JobRef) -> Result<JobInfo, JenkinsError> {
        let url = self.job_url(job, &["api", "json"]);
        self.get_json(&url, &[("tree", JOB_INFO_TREE.to_string())])
            .await
            .map_err(|err| not_found_as(err, || format!("job '{job}'")))
    }

    /// Queues a build. Never retried: a second POST would queue a second
    /// build.
    ///
    /// Returns the queue item named by the response's `Location` header, or
    /// `None` when Jenkins accepted the call without naming one.
    ///
    /// # Errors
    ///
    /// Returns [`JenkinsError::NotFound`] for an unknown job, or any client
    /// error.
    #[instrument(skip(self, parameters), fields(job = %job, parameters = parameters.len()))]
    pub async fn trigger(
        &self,
        job: &JobRef,
        parameters: &[(String, String)],
    ) -> Result<Option<QueueItem>, JenkinsError> {
        let endpoint = if parameters.is_empty() {
            "build"
        } else {
            "buildWithParameters"
        };
        let url = self.job_url(job, &[endpoint]);
        let response = self
            .post(&url, parameters)
            .await
            .map_err(|err| not_found_as(err, || format!("job '{job}'")))?;

        let Some(location) = response.location() else {
            warn!("Trigger accepted without a queue location");
            return Ok(None);
        };
        match QueueItem::from_location(location, job.clone()) {
            Ok(item) => {
                info!(queue_id = item.id(), "Build queued");
                Ok(Some(item))
            }
            Err(err) => {
                warn!(location, error = %err, "Trigger accepted with an unrecognised location");
                Ok(None)
            }
        }
    }

    /// Aborts a running build.
    ///
    /// # Errors
    ///
    /// Returns [`JenkinsError::NotFound`] for an unknown build, or any client
    /// error.
    #[instrument(skip(self), fields(build = %build))]
    pub async fn stop_build(&self, build: &BuildRef) -> Result<(), JenkinsError> {
        let url = self.build_url(build, &["stop"]);
        self.post(&url, &[])
            .await
            .map_err(|err| not_found_as(err, || format!("build {build}")))?;
        info!("Stop requested");
        Ok(())
    }

    /// Items currently waiting in the build queue.
    ///
    /// # Errors
    ///
    /// Returns any client error.
    pub async fn queue_items(&self) -> Result<Vec<QueueItemSnapshot>, JenkinsError> {
        let url = self.url_for(["queue", "api", "json"]);
        let listing: QueueListing = self
            .get_json(&url, &[("tree", QUEUE_TREE.to_string())])
            .await?;
        Ok(listing.items)
    }

    /// Build agents and the controller itself.
    ///
    /// # Errors
    ///
    /// Returns any client error.
    pub async fn nodes(&self) -> Result<Vec<NodeInfo>, JenkinsError> {
        let url = self.url_for(["computer", "api", "json"]);
        let listing: NodeListing = self
            .get_json(&url, &[("tree", NODE_TREE.to_string())])
            .await?;
        Ok(listing.computer)
    }

    /// Pins `latest` to the job's current last build number.
    ///
    /// # Errors
    ///
    /// Returns [`JenkinsError::NotFound`] if the job does not exist or has
    /// never been built.
    pub async fn resolve_build(&self, build: &BuildRef) -> Result<BuildRef, JenkinsError> {
        if let BuildSelector::Number(_) = build.build {
            return Ok(build.clone());
        }
        let url = self.build_url(build, &["api", "json"]);
        let summary: BuildSummary = self
            .get_json(&url, &[("tree", "number".to_string())])
            .await
            .map_err(|err| not_found_as(err, || format!("builds of job '{}'", build.job)))?;
        Ok(BuildRef::new(
            build.job.clone(),
            BuildSelector::number(summary.number)?,
        ))
    }
}

/// Replaces a bare path in a `NotFound` error with a readable subject.
pub(crate) fn not_found_as(err: JenkinsError, subject: impl FnOnce() -> String) -> JenkinsError {
    match err {
        JenkinsError::NotFound(_) => JenkinsError::NotFound(subject()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, method, path, query_param},
    };

    use super::*;
    use crate::client::tests::{mount_crumb, test_client};

    #[tokio::test]
    async fn test_trigger_returns_queue_item_from_location() {
        let server = MockServer::start().await;
        mount_crumb(&server).await;
        Mock::given(method("POST"))
            .and(path("/job/demo/build"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", format!("{}/queue/item/42/", server.uri())),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let item = client
            .trigger(&JobRef::parse("demo").unwrap(), &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.id(), 42);
        assert_eq!(item.job().to_string(), "demo");
    }

    #[tokio::test]
    async fn test_trigger_with_parameters_uses_build_with_parameters() {
        let server = MockServer::start().await;
        mount_crumb(&server).await;
        Mock::given(method("POST"))
            .and(path("/job/team/job/app/buildWithParameters"))
            .and(body_string_contains("ENV=staging"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let item = client
            .trigger(
                &JobRef::parse("team/app").unwrap(),
                &[("ENV".to_string(), "staging".to_string())],
            )
            .await
            .unwrap();
        assert!(item.is_none(), "no Location header means no queue item");
    }

    #[tokio::test]
    async fn test_trigger_unknown_job_is_not_found() {
        let server = MockServer::start().await;
        mount_crumb(&server).await;
        Mock::given(method("POST"))
            .and(path("/job/ghost/build"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server)
            .trigger(&JobRef::parse("ghost").unwrap(), &[])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "not found: job 'ghost'");
    }

    #[tokio::test]
    async fn test_list_jobs_in_folder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/team/api/json"))
            .and(query_param("tree", JOB_LIST_TREE))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "_class": "com.cloudbees.hudson.plugins.folder.Folder",
                "jobs": [
                    {
                        "_class": "hudson.model.FreeStyleProject",
                        "name": "app",
                        "fullName": "team/app",
                        "url": "http://jenkins/job/team/job/app/",
                        "color": "blue",
                        "lastBuild": { "number": 12, "result": "SUCCESS" }
                    },
                    {
                        "_class": "com.cloudbees.hudson.plugins.folder.Folder",
                        "name": "nested",
                        "fullName": "team/nested",
                        "url": "http://jenkins/job/team/job/nested/"
                    }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let jobs = test_client(&server)
            .list_jobs(Some(&JobRef::parse("team").unwrap()))
            .await
            .unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].full_name.as_deref(), Some("team/app"));
        assert_eq!(jobs[0].last_build.as_ref().map(|b| b.number), Some(12));
        assert!(jobs[1].color.is_none());
    }

    #[tokio::test]
    async fn test_stop_build_posts_to_stop() {
        let server = MockServer::start().await;
        mount_crumb(&server).await;
        Mock::given(method("POST"))
            .and(path("/job/demo/17/stop"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let build = BuildRef::new(JobRef::parse("demo").unwrap(), BuildSelector::Number(17));
        test_client(&server).stop_build(&build).await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_latest_build() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/demo/lastBuild/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "_class": "hudson.model.FreeStyleBuild",
                "number": 23
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let latest = BuildRef::new(JobRef::parse("demo").unwrap(), BuildSelector::Latest);
        let pinned = client.resolve_build(&latest).await.unwrap();
        assert_eq!(pinned.number(), Some(23));

        // Concrete numbers are returned without a call.
        assert_eq!(client.resolve_build(&pinned).await.unwrap(), pinned);
    }

    #[tokio::test]
    async fn test_queue_and_nodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/queue/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{
                    "id": 8,
                    "why": "Waiting for next available executor on linux",
                    "blocked": false,
                    "stuck": true,
                    "inQueueSince": 1_700_000_000_000_u64,
                    "task": { "name": "demo", "url": "http://jenkins/job/demo/" }
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/computer/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "computer": [
                    { "displayName": "Built-In Node", "offline": false, "idle": true, "numExecutors": 2 },
                    { "displayName": "linux-1", "offline": true, "offlineCauseReason": "disk full", "idle": true, "numExecutors": 4 }
                ]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let queue = client.queue_items().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert!(queue[0].stuck);
        assert_eq!(queue[0].task.as_ref().and_then(|t| t.name.as_deref()), Some("demo"));

        let nodes = client.nodes().await.unwrap();
        assert_eq!(nodes[1].offline_cause_reason.as_deref(), Some("disk full"));
        assert_eq!(nodes[0].num_executors, 2);
    }
}
