//! Configuration System
//!
//! Layered configuration: built-in defaults, the global config file, the
//! project config file, `CONFLUENCE_BULK__SECTION__KEY` environment
//! overrides and finally the conventional `CONFLUENCE_URL` /
//! `CONFLUENCE_EMAIL` / `CONFLUENCE_API_TOKEN` credential variables.

use crate::logging::LoggingConfig;
use crate::retry::RetryConfig;
use crate::transport::ConfluenceCredentials;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkConfig {
    #[serde(default)]
    pub confluence: ConfluenceConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote site and credentials.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfluenceConfig {
    /// Site URL, e.g. `https://example.atlassian.net`
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            email: None,
            api_token: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl fmt::Debug for ConfluenceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfluenceConfig")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ConfluenceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Site URL and credentials, or the names of the missing settings.
    pub fn resolve(&self) -> Result<(String, ConfluenceCredentials), Vec<&'static str>> {
        let present = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        let base_url = present(&self.base_url);
        let email = present(&self.email);
        let api_token = present(&self.api_token);
        match (base_url, email, api_token) {
            (Some(base_url), Some(email), Some(api_token)) => {
                Ok((base_url, ConfluenceCredentials { email, api_token }))
            }
            (base_url, email, api_token) => {
                let mut missing = Vec::new();
                if base_url.is_none() {
                    missing.push("confluence.base_url (CONFLUENCE_URL)");
                }
                if email.is_none() {
                    missing.push("confluence.email (CONFLUENCE_EMAIL)");
                }
                if api_token.is_none() {
                    missing.push("confluence.api_token (CONFLUENCE_API_TOKEN)");
                }
                Err(missing)
            }
        }
    }
}

/// Batch execution defaults; CLI flags override them per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Default cap on mutations per run. Exports are unbounded unless
    /// `--max-items` is given.
    #[serde(default = "default_max_items")]
    pub max_items: u64,

    /// In-flight requests per batch
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Predicted item count above which a real run asks for confirmation
    #[serde(default = "default_confirm_threshold")]
    pub confirm_threshold: u64,

    /// Failures listed individually in a report
    #[serde(default = "default_failure_report_limit")]
    pub failure_report_limit: usize,
}

fn default_batch_size() -> usize {
    100
}

fn default_max_items() -> u64 {
    100
}

fn default_workers() -> usize {
    4
}

fn default_confirm_threshold() -> u64 {
    50
}

fn default_failure_report_limit() -> usize {
    100
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_items: default_max_items(),
            workers: default_workers(),
            confirm_threshold: default_confirm_threshold(),
            failure_report_limit: default_failure_report_limit(),
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be at least 1".to_string());
        }
        if self.max_items == 0 {
            return Err("max_items must be at least 1".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// One JSON document per checkpoint path
    #[default]
    File,
    /// Entries in a sled database under the checkpoint directory
    Sled,
}

impl FromStr for CheckpointBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(CheckpointBackend::File),
            "sled" => Ok(CheckpointBackend::Sled),
            other => Err(format!("unknown checkpoint backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,

    /// Directory for checkpoints; defaults to the platform data directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::File,
            dir: None,
        }
    }
}

impl CheckpointConfig {
    /// Effective checkpoint directory.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .or_else(|| {
                directories::ProjectDirs::from("", "", "confluence-bulk")
                    .map(|dirs| dirs.data_dir().join("checkpoints"))
            })
            .unwrap_or_else(|| PathBuf::from(".confluence-bulk").join("checkpoints"))
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Confluence(String),
    Retry(String),
    Execution(String),
    Logging(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Confluence(msg) => write!(f, "confluence: {}", msg),
            ValidationError::Retry(msg) => write!(f, "retry: {}", msg),
            ValidationError::Execution(msg) => write!(f, "execution: {}", msg),
            ValidationError::Logging(msg) => write!(f, "logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl BulkConfig {
    /// Validate every section, collecting all errors. Missing credentials
    /// are not an error here; they are checked when a transport is built.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.confluence.connect_timeout_secs == 0 || self.confluence.request_timeout_secs == 0 {
            errors.push(ValidationError::Confluence(
                "timeouts must be at least one second".to_string(),
            ));
        }
        if let Some(url) = self.confluence.base_url.as_deref() {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                errors.push(ValidationError::Confluence(format!(
                    "base_url '{}' must start with http:// or https://",
                    url
                )));
            }
        }
        if let Err(e) = self.retry.validate() {
            errors.push(ValidationError::Retry(e));
        }
        if let Err(e) = self.execution.validate() {
            errors.push(ValidationError::Execution(e));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
