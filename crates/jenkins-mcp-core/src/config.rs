//! Bridge configuration.
//!
//! Settings come from an optional TOML file, then environment variables
//! override individual values:
//!
//! 1. `--config <path>` (passed in by the caller)
//! 2. `JENKINS_MCP_CONFIG` environment variable
//! 3. `jenkins-mcp.toml` in the current directory or any parent directory
//! 4. Built-in defaults
//!
//! The environment variables `JENKINS_URL`, `JENKINS_USERNAME`,
//! `JENKINS_API_TOKEN` and `JENKINS_TIMEOUT` always win over the file.
//!
//! # Example
//!
//! ```toml
//! url = "https://ci.example.com"
//! username = "bot"
//! api_token = "11a3..."
//! request_timeout = 30
//! queue_timeout = 60
//! log_chunk_limit = 65536
//! ```

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use url::Url;

/// File name searched for in the current directory and its parents.
pub const CONFIG_FILE_NAME: &str = "jenkins-mcp.toml";

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "JENKINS_MCP_CONFIG";

pub const URL_ENV: &str = "JENKINS_URL";
pub const USERNAME_ENV: &str = "JENKINS_USERNAME";
pub const API_TOKEN_ENV: &str = "JENKINS_API_TOKEN";
pub const TIMEOUT_ENV: &str = "JENKINS_TIMEOUT";

/// Smallest accepted per-response log limit.
pub const MIN_LOG_CHUNK_LIMIT: usize = 1024;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error when reading a config file.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error when a config file is malformed.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required setting is absent after all sources were applied.
    #[error("missing Jenkins {field}; set {env} or add `{field}` to jenkins-mcp.toml")]
    Missing {
        field: &'static str,
        env: &'static str,
    },

    /// A setting has an unusable value.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Connection and behaviour settings for the bridge.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Jenkins base URL, e.g. `https://ci.example.com/jenkins`.
    pub url: String,
    pub username: String,
    pub api_token: String,
    /// Per-HTTP-call timeout in seconds.
    pub request_timeout: u64,
    /// Retries for idempotent GET calls on connection failures.
    pub get_retries: usize,
    pub retry_min_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// How long a CSRF crumb is reused before it is fetched again, in seconds.
    pub crumb_ttl: u64,
    pub queue_poll_interval_ms: u64,
    pub queue_poll_max_interval_ms: u64,
    /// Default time `trigger-build` waits for a build number, in seconds.
    pub queue_timeout: u64,
    /// Maximum console bytes returned in one response.
    pub log_chunk_limit: usize,
    /// Pause between log polls while following a running build, in ms.
    pub log_poll_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            api_token: String::new(),
            request_timeout: 30,
            get_retries: 3,
            retry_min_delay_ms: 200,
            retry_max_delay_ms: 2_000,
            crumb_ttl: 300,
            queue_poll_interval_ms: 1_000,
            queue_poll_max_interval_ms: 5_000,
            queue_timeout: 30,
            log_chunk_limit: 64 * 1024,
            log_poll_interval_ms: 1_000,
        }
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("api_token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("get_retries", &self.get_retries)
            .field("crumb_ttl", &self.crumb_ttl)
            .field("queue_timeout", &self.queue_timeout)
            .field("log_chunk_limit", &self.log_chunk_limit)
            .finish_non_exhaustive()
    }
}

impl BridgeConfig {
    /// Builds a config from explicit credentials with default tuning.
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            api_token: api_token.into(),
            ..Self::default()
        }
    }

    /// Loads a config file from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns `Err(ConfigError)` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Resolves the config file, applies the process environment and
    /// validates the result.
    ///
    /// # Errors
    ///
    /// Returns `Err(ConfigError)` if a config file exists but cannot be read
    /// or parsed, an environment value is malformed, or a required setting is
    /// missing.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();
        let cwd = std::env::current_dir().ok();
        Self::resolve_with(explicit, cwd.as_deref(), env)
    }

    /// Same as [`Self::resolve`] with the working directory and environment
    /// supplied by the caller.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve`].
    pub fn resolve_with<F>(
        explicit: Option<&Path>,
        cwd: Option<&Path>,
        env: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env(CONFIG_PATH_ENV).map(PathBuf::from))
            .or_else(|| cwd.and_then(find_in_ancestors));

        let config = match path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading config file");
                Self::load(&path)?
            }
            None => Self::default(),
        };

        let config = config.with_env_overrides(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `JENKINS_*` overrides from the given lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `JENKINS_TIMEOUT` is not a whole
    /// number of seconds.
    pub fn with_env_overrides<F>(mut self, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = env(URL_ENV) {
            self.url = url;
        }
        if let Some(username) = env(USERNAME_ENV) {
            self.username = username;
        }
        if let Some(token) = env(API_TOKEN_ENV) {
            self.api_token = token;
        }
        if let Some(timeout) = env(TIMEOUT_ENV) {
            self.request_timeout =
                timeout
                    .trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                        field: "request_timeout",
                        reason: format!("{TIMEOUT_ENV}={timeout}: {e}"),
                    })?;
        }
        Ok(self)
    }

    /// Checks that credentials are present and values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for absent credentials and
    /// [`ConfigError::Invalid`] for unusable values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "url",
                env: URL_ENV,
            });
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "username",
                env: USERNAME_ENV,
            });
        }
        if self.api_token.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "api_token",
                env: API_TOKEN_ENV,
            });
        }
        self.base_url()?;
        if self.request_timeout == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout",
                reason: "must be at least one second".to_string(),
            });
        }
        if self.log_chunk_limit < MIN_LOG_CHUNK_LIMIT {
            return Err(ConfigError::Invalid {
                field: "log_chunk_limit",
                reason: format!("must be at least {MIN_LOG_CHUNK_LIMIT} bytes"),
            });
        }
        Ok(())
    }

    /// The normalized base URL: trimmed, trailing slashes removed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] unless the URL is absolute http(s).
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let trimmed = self.url.trim().trim_end_matches('/');
        let url = Url::parse(trimmed).map_err(|e| ConfigError::Invalid {
            field: "url",
            reason: format!("'{trimmed}': {e}"),
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(ConfigError::Invalid {
                field: "url",
                reason: format!("'{trimmed}' is not an http(s) URL"),
            });
        }
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn crumb_ttl(&self) -> Duration {
        Duration::from_secs(self.crumb_ttl)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    pub fn queue_poll_max_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_max_interval_ms.max(self.queue_poll_interval_ms))
    }

    pub fn retry_min_delay(&self) -> Duration {
        Duration::from_millis(self.retry_min_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms.max(self.retry_min_delay_ms))
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_interval_ms)
    }
}

fn find_in_ancestors(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}
