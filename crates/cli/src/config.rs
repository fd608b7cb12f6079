//! Process configuration, read once from the environment at startup.
//!
//! Every value is validated here so a bad deployment fails before any state is
//! read or any request is made. See [`Config::from_lookup`] for the variables.

use std::path::PathBuf;
use std::time::Duration;

use relay::{BranchName, ConfigError, RepositoryId};

/// Default branch whose pushes are forwarded.
pub const DEFAULT_TARGET_BRANCH: &str = "main";

/// Default state file, relative to the working directory.
pub const DEFAULT_STATE_PATH: &str = "push-relay-state.json";

/// Default interval between recurring cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// How cycles are triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run a single cycle (with retries) and exit.
    Once,
    /// Run a cycle every `interval` until a shutdown signal.
    Recurring {
        /// Time between cycle starts.
        interval: Duration,
    },
}

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Human-readable lines.
    Text,
}

/// Validated process configuration.
#[derive(Clone)]
pub struct Config {
    pub repository: RepositoryId,
    pub target_branch: BranchName,
    pub webhook_url: String,
    pub github_token: Option<String>,
    pub github_api_url: String,
    pub state_path: PathBuf,
    pub debug: bool,
    pub mode: RunMode,
    pub http_timeout: Option<Duration>,
    pub deployment_id: Option<String>,
    pub log_format: LogFormat,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// Empty values are treated as unset.
    ///
    /// | Variable | Required | Default |
    /// |----------|----------|---------|
    /// | `REPOSITORY` | yes | |
    /// | `WEBHOOK_URL` | yes | |
    /// | `TARGET_BRANCH` | no | `main` |
    /// | `GITHUB_TOKEN` | no | |
    /// | `GITHUB_API_URL` | no | `https://api.github.com` |
    /// | `STATE_PATH` | no | `push-relay-state.json` |
    /// | `DEBUG` | no | `false` |
    /// | `RUN_IMMEDIATELY` | no | `false` |
    /// | `POLL_INTERVAL_SECS` | no | `60` |
    /// | `HTTP_TIMEOUT_SECS` | no | client default |
    /// | `DEPLOYMENT_ID` | no | |
    /// | `LOG_FORMAT` | no | `json` |
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing { name });

        let repository = RepositoryId::parse(&required("REPOSITORY")?).ok_or_else(|| {
            ConfigError::Invalid {
                name: "REPOSITORY",
                message: "expected owner/name".into(),
            }
        })?;

        let target_branch = match get("TARGET_BRANCH") {
            None => BranchName::new(DEFAULT_TARGET_BRANCH),
            Some(branch) => {
                let branch = branch.trim();
                BranchName::new(branch.strip_prefix("refs/heads/").unwrap_or(branch))
            }
        }
        .ok_or_else(|| ConfigError::Invalid {
            name: "TARGET_BRANCH",
            message: "branch name is empty".into(),
        })?;

        let webhook_url = parse_http_url("WEBHOOK_URL", &required("WEBHOOK_URL")?)?;
        let github_api_url = match get("GITHUB_API_URL") {
            Some(url) => parse_http_url("GITHUB_API_URL", &url)?,
            None => github::DEFAULT_API_URL.to_string(),
        };

        let debug = parse_bool("DEBUG", get("DEBUG").as_deref())?;
        let run_immediately = parse_bool("RUN_IMMEDIATELY", get("RUN_IMMEDIATELY").as_deref())?;
        let mode = if run_immediately {
            RunMode::Once
        } else {
            let interval = parse_secs("POLL_INTERVAL_SECS", get("POLL_INTERVAL_SECS").as_deref())?
                .unwrap_or(DEFAULT_POLL_INTERVAL);
            RunMode::Recurring { interval }
        };

        let log_format = match get("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("json") => LogFormat::Json,
            Some("text") => LogFormat::Text,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    message: format!("expected 'json' or 'text', got '{other}'"),
                })
            }
        };

        Ok(Self {
            repository,
            target_branch,
            webhook_url,
            github_token: get("GITHUB_TOKEN"),
            github_api_url,
            state_path: get("STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH)),
            debug,
            mode,
            http_timeout: parse_secs("HTTP_TIMEOUT_SECS", get("HTTP_TIMEOUT_SECS").as_deref())?,
            deployment_id: get("DEPLOYMENT_ID"),
            log_format,
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("repository", &self.repository.as_str())
            .field("target_branch", &self.target_branch.as_str())
            .field("webhook_url", &self.webhook_url)
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("github_api_url", &self.github_api_url)
            .field("state_path", &self.state_path)
            .field("debug", &self.debug)
            .field("mode", &self.mode)
            .field("http_timeout", &self.http_timeout)
            .field("deployment_id", &self.deployment_id)
            .field("log_format", &self.log_format)
            .finish()
    }
}

/// Parses a boolean flag. Unset means `false`.
///
/// Accepts `1/t/y/true` and `0/f/n/false`, case-insensitively.
pub fn parse_bool(name: &'static str, value: Option<&str>) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "y" | "true" => Ok(true),
        "0" | "f" | "n" | "false" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            message: format!("invalid bool value '{value}'"),
        }),
    }
}

/// Checks that `value` is an absolute http(s) URL with a host.
fn parse_http_url(name: &'static str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    let invalid = |message: String| ConfigError::Invalid { name, message };
    let url = reqwest::Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("URL has no host".into()));
    }
    Ok(value.to_string())
}

/// Parses a positive number of seconds.
fn parse_secs(name: &'static str, value: Option<&str>) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            name,
            message: "must be greater than zero".into(),
        }),
        Ok(secs) => Ok(Some(Duration::from_secs(secs))),
        Err(_) => Err(ConfigError::Invalid {
            name,
            message: format!("expected whole seconds, got '{value}'"),
        }),
    }
}
