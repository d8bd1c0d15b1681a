//! Resolution of queue items into build numbers.
//!
//! A trigger call only returns a queue location. The resolver polls the
//! queue-item endpoint with jittered exponential backoff until Jenkins assigns
//! a build, the item is cancelled, or the caller's deadline passes.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::{
    BridgeConfig, JenkinsClient, JenkinsError,
    types::{BuildRef, QueueItem, QueueItemSnapshot, QueueState},
};

/// Polls queue items until they turn into builds.
#[derive(Debug, Clone)]
pub struct QueueResolver {
    client: JenkinsClient,
    poll_interval: Duration,
    max_poll_interval: Duration,
}

impl QueueResolver {
    pub fn new(client: JenkinsClient, config: &BridgeConfig) -> Self {
        Self {
            client,
            poll_interval: config.queue_poll_interval(),
            max_poll_interval: config.queue_poll_max_interval(),
        }
    }

    /// Fetches the raw queue-item document.
    ///
    /// # Errors
    ///
    /// Returns [`JenkinsError::NotFound`] once Jenkins has forgotten the item,
    /// or any client error.
    pub async fn snapshot(&self, id: u64) -> Result<QueueItemSnapshot, JenkinsError> {
        let id_segment = id.to_string();
        let url = self
            .client
            .url_for(["queue", "item", id_segment.as_str(), "api", "json"]);
        self.client.get_json(&url, &[]).await.map_err(|err| match err {
            JenkinsError::NotFound(_) => JenkinsError::NotFound(format!("queue item {id}")),
            other => other,
        })
    }

    /// Polls the item once and records the observed state on it.
    ///
    /// Terminal items are returned as-is without calling Jenkins.
    ///
    /// # Errors
    ///
    /// See [`Self::snapshot`].
    pub async fn poll(&self, item: &mut QueueItem) -> Result<QueueState, JenkinsError> {
        if item.state().is_terminal() {
            return Ok(item.state().clone());
        }
        let snapshot = self.snapshot(item.id()).await?;
        if let Some(why) = snapshot.why.as_deref() {
            debug!(queue_id = item.id(), why, "Queue item still waiting");
        }
        Ok(item.observe(&snapshot).clone())
    }

    /// Polls until the item resolves, is cancelled, or `timeout` elapses.
    ///
    /// The timeout is measured from the item's creation and also bounds a
    /// poll that is still in flight. On timeout the item is marked
    /// [`QueueState::Expired`]; the build may still start later.
    ///
    /// # Errors
    ///
    /// Returns [`JenkinsError::QueueTimeout`], [`JenkinsError::QueueCancelled`],
    /// [`JenkinsError::Cancelled`] when `cancel` fires, or any client error.
    #[instrument(skip_all, fields(job = %item.job(), queue_id = item.id()))]
    pub async fn resolve(
        &self,
        item: &mut QueueItem,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<BuildRef, JenkinsError> {
        let deadline = Instant::now() + timeout.saturating_sub(item.elapsed());
        let mut delays = ExponentialBuilder::default()
            .with_min_delay(self.poll_interval)
            .with_max_delay(self.max_poll_interval)
            .with_jitter()
            .without_max_times()
            .build();

        loop {
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(JenkinsError::Cancelled),
                state = self.poll(item) => Some(state?),
                () = tokio::time::sleep_until(deadline) => None,
            };
            let Some(state) = polled else {
                item.expire();
                return Err(self.timeout_error(item));
            };

            match state {
                QueueState::Resolved(build) => {
                    info!(build = %build.build, "Queue item resolved");
                    return Ok(build);
                }
                QueueState::Cancelled => {
                    return Err(JenkinsError::QueueCancelled {
                        job: item.job().to_string(),
                        queue_id: item.id(),
                    });
                }
                QueueState::Expired => return Err(self.timeout_error(item)),
                QueueState::Pending => {}
            }

            let now = Instant::now();
            if now >= deadline {
                item.expire();
                return Err(self.timeout_error(item));
            }

            let delay = delays
                .next()
                .unwrap_or(self.max_poll_interval)
                .min(deadline - now);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(JenkinsError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn timeout_error(&self, item: &QueueItem) -> JenkinsError {
        debug!(
            queue_id = item.id(),
            max_poll_interval = ?self.max_poll_interval,
            "Stopped waiting for queue item"
        );
        JenkinsError::QueueTimeout {
            job: item.job().to_string(),
            queue_id: item.id(),
            waited: item.elapsed(),
        }
    }
}
