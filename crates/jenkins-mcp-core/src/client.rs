//! Authenticated HTTP access to one Jenkins controller.
//!
//! [`JenkinsClient`] is cheap to clone and safe to share across tasks. The
//! only state shared between calls is the CSRF crumb cache.

use std::{fmt, sync::Arc, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use reqwest::{
    Method, StatusCode,
    header::{HeaderMap, LOCATION},
};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{
    BridgeConfig, JenkinsError,
    crumb::{Crumb, CrumbCache},
    types::{BuildRef, CrumbResponse, JobRef},
};

/// Status, headers and body of a Jenkins response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Returns a header value if it is present and valid ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Location` header, set by trigger calls.
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`JenkinsError::Decode`] if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, JenkinsError> {
        serde_json::from_slice(&self.body).map_err(|e| JenkinsError::Decode(e.to_string()))
    }

    fn into_result(self, what: &str) -> Result<Self, JenkinsError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(JenkinsError::from_status(
                self.status.as_u16(),
                what,
                &self.body,
            ))
        }
    }

    /// Jenkins answers a missing or stale crumb with a 403 whose body names
    /// the crumb.
    fn is_crumb_rejection(&self) -> bool {
        self.status == StatusCode::FORBIDDEN
            && String::from_utf8_lossy(&self.body)
                .to_ascii_lowercase()
                .contains("crumb")
    }
}

/// HTTP client for the Jenkins REST API.
#[derive(Clone)]
pub struct JenkinsClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    api_token: String,
    crumbs: CrumbCache,
    get_retries: usize,
    retry_min_delay: Duration,
    retry_max_delay: Duration,
}

impl fmt::Debug for JenkinsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JenkinsClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("username", &self.inner.username)
            .finish_non_exhaustive()
    }
}

impl JenkinsClient {
    /// Builds a client from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`JenkinsError::Config`] if the base URL is unusable or the
    /// HTTP client cannot be constructed.
    pub fn new(config: &BridgeConfig) -> Result<Self, JenkinsError> {
        let base_url = config.base_url()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .cookie_store(true)
            .user_agent(concat!("jenkins-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| crate::ConfigError::Invalid {
                field: "http client",
                reason: e.to_string(),
            })?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                username: config.username.clone(),
                api_token: config.api_token.clone(),
                crumbs: CrumbCache::new(config.crumb_ttl()),
                get_retries: config.get_retries,
                retry_min_delay: config.retry_min_delay(),
                retry_max_delay: config.retry_max_delay(),
            }),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Appends path segments to the base URL, percent-encoding each one.
    pub fn url_for<I, S>(&self, segments: I) -> Url
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut url = self.inner.base_url.clone();
        // Base URLs are validated as http(s), which can always be a base.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// `<base>/job/<a>/job/<b>/<tail...>`
    pub fn job_url(&self, job: &JobRef, tail: &[&str]) -> Url {
        self.url_for(job.url_segments().chain(tail.iter().copied()))
    }

    /// `<base>/job/<path>/<number|lastBuild>/<tail...>`
    pub fn build_url(&self, build: &BuildRef, tail: &[&str]) -> Url {
        let selector = build.build.url_segment();
        self.url_for(
            build
                .job
                .url_segments()
                .chain(std::iter::once(selector.as_str()))
                .chain(tail.iter().copied()),
        )
    }

    /// Issues one Jenkins call and classifies non-success statuses.
    ///
    /// GET and HEAD are retried with exponential backoff on connection-level
    /// failures. Every other method is sent exactly once, carrying a CSRF
    /// crumb; if Jenkins rejects the crumb, a fresh one is fetched and the
    /// call is re-sent a single time.
    ///
    /// # Errors
    ///
    /// Returns the classified [`JenkinsError`] for failed calls.
    #[instrument(skip_all, fields(method = %method, path = %url.path()))]
    pub async fn request(
        &self,
        method: Method,
        url: &Url,
        query: &[(&str, String)],
        form: Option<&[(String, String)]>,
    ) -> Result<RawResponse, JenkinsError> {
        let what = url.path().to_string();
        if method == Method::GET || method == Method::HEAD {
            return self.send_idempotent(method, url, query).await?.into_result(&what);
        }

        let crumb = self.crumb().await?;
        let response = self
            .send(method.clone(), url, query, form, crumb.as_ref())
            .await?;
        if !response.is_crumb_rejection() {
            return response.into_result(&what);
        }

        warn!("Jenkins rejected the CSRF crumb; fetching a new one");
        self.inner.crumbs.invalidate(crumb.as_ref()).await;
        let crumb = self.crumb().await?;
        let response = self.send(method, url, query, form, crumb.as_ref()).await?;
        if response.is_crumb_rejection() {
            return Err(JenkinsError::Crumb(format!(
                "Jenkins rejected a freshly issued crumb for {what}"
            )));
        }
        response.into_result(&what)
    }

    /// GET with retry.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn get(&self, url: &Url, query: &[(&str, String)]) -> Result<RawResponse, JenkinsError> {
        self.request(Method::GET, url, query, None).await
    }

    /// GET a JSON document.
    ///
    /// # Errors
    ///
    /// See [`Self::request`]; additionally [`JenkinsError::Decode`] if the
    /// body does not match `T`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        query: &[(&str, String)],
    ) -> Result<T, JenkinsError> {
        self.get(url, query).await?.json()
    }

    /// POST a form body, never retried except for a single crumb refresh.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn post(
        &self,
        url: &Url,
        form: &[(String, String)],
    ) -> Result<RawResponse, JenkinsError> {
        self.request(Method::POST, url, &[], Some(form)).await
    }

    async fn send(
        &self,
        method: Method,
        url: &Url,
        query: &[(&str, String)],
        form: Option<&[(String, String)]>,
        crumb: Option<&Crumb>,
    ) -> Result<RawResponse, JenkinsError> {
        let mut request = self
            .inner
            .http
            .request(method, url.clone())
            .basic_auth(&self.inner.username, Some(&self.inner.api_token));
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(form) = form {
            request = request.form(form);
        }
        if let Some(crumb) = crumb {
            request = request.header(crumb.field.as_str(), crumb.value.as_str());
        }

        let response = request.send().await.map_err(JenkinsError::Network)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(JenkinsError::Network)?;
        debug!(status = status.as_u16(), bytes = body.len(), "Jenkins responded");

        Ok(RawResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }

    /// Sends a GET or HEAD, retrying connection-level failures. Never
    /// touches the crumb cache, so crumb fetches can use it too.
    async fn send_idempotent(
        &self,
        method: Method,
        url: &Url,
        query: &[(&str, String)],
    ) -> Result<RawResponse, JenkinsError> {
        (|| self.send(method.clone(), url, query, None, None))
            .retry(self.backoff())
            .when(JenkinsError::is_transient)
            .notify(|err, delay| {
                warn!(error = %err, ?delay, "Jenkins call failed; retrying");
            })
            .await
    }

    async fn crumb(&self) -> Result<Option<Crumb>, JenkinsError> {
        self.inner
            .crumbs
            .get_or_fetch(|| self.fetch_crumb())
            .await
    }

    async fn fetch_crumb(&self) -> Result<Option<Crumb>, JenkinsError> {
        debug!("Fetching CSRF crumb");
        let url = self.url_for(["crumbIssuer", "api", "json"]);
        let fetched = self
            .send_idempotent(Method::GET, &url, &[])
            .await
            .and_then(|response| response.into_result(url.path()))
            .and_then(|response| response.json::<CrumbResponse>());
        match fetched {
            Ok(response) => Ok(Some(Crumb {
                field: response.crumb_request_field,
                value: response.crumb,
            })),
            // No crumb issuer means CSRF protection is off.
            Err(JenkinsError::NotFound(_)) => Ok(None),
            Err(err @ (JenkinsError::Unauthorized { .. } | JenkinsError::Network(_))) => Err(err),
            Err(err) => Err(JenkinsError::Crumb(err.to_string())),
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.inner.retry_min_delay)
            .with_max_delay(self.inner.retry_max_delay)
            .with_max_times(self.inner.get_retries)
            .with_jitter()
    }
}
