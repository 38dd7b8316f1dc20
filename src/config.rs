//! Configuration types for gmail-dl
//!
//! All settings are static: they are read once from a TOML file and passed
//! explicitly to the components that need them. Every field has a default, so an
//! empty file is a valid configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum number of sub-requests the remote batch endpoint accepts in one call
pub const MAX_BATCH_SIZE: usize = 100;

/// Credential locations and requested scopes
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// OAuth client secrets file downloaded from the cloud console
    #[serde(default = "default_client_secrets_path")]
    pub client_secrets_path: PathBuf,

    /// Authorized-user token file holding the access and refresh tokens
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,

    /// OAuth scopes the token must carry
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_secrets_path: default_client_secrets_path(),
            token_path: default_token_path(),
            scopes: default_scopes(),
        }
    }
}

/// Remote API settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API root, without a trailing path (default: "https://gmail.googleapis.com")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Mailbox owner; "me" is the authenticated user
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// Restrict listing to messages carrying all of these labels (empty = whole mailbox)
    #[serde(default)]
    pub label_ids: Vec<String>,

    /// Identifiers requested per page, and therefore sub-requests per batch (default: 20)
    ///
    /// The remote side throttles concurrent requests per user; batches larger than
    /// about 20 start failing with rate-limit errors. Raising this risks rejection.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Timeout for a single HTTP round trip (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_id: default_user_id(),
            label_ids: Vec::new(),
            page_size: default_page_size(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Output log location
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Folder holding the output log and analysis reports (default: "output")
    #[serde(default = "default_output_folder")]
    pub folder: PathBuf,

    /// Output log file name inside `folder` (default: "output.jsonl")
    #[serde(default = "default_output_file_name")]
    pub file_name: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            folder: default_output_folder(),
            file_name: default_output_file_name(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Settings for the post-download report generator
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Headers to summarize, one report set per header (default: subject, from)
    #[serde(default = "default_analysis_headers")]
    pub headers: Vec<String>,

    /// Subject substrings to count (default: "" for all messages, "login")
    #[serde(default = "default_subject_filters")]
    pub subject_filters: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            headers: default_analysis_headers(),
            subject_filters: default_subject_filters(),
        }
    }
}

/// Main configuration for gmail-dl
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Credential locations
    #[serde(default)]
    pub auth: AuthConfig,

    /// Remote API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Output log location
    #[serde(default)]
    pub output: OutputConfig,

    /// Backoff policy for listing and batch calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Report generator settings
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl Config {
    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Config {
            message: format!("failed to parse configuration: {}", e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    ///
    /// A missing file yields the default configuration so the tool works out of
    /// the box; any other read failure is reported.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
            Err(e) => Err(Error::Config {
                message: format!("failed to read {}: {}", path.display(), e),
                key: None,
            }),
        }
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        if self.api.page_size == 0 {
            return Err(Error::config("api.page_size", "must be at least 1"));
        }
        if self.api.page_size > MAX_BATCH_SIZE {
            return Err(Error::config(
                "api.page_size",
                format!(
                    "{} exceeds the remote batch limit of {}",
                    self.api.page_size, MAX_BATCH_SIZE
                ),
            ));
        }
        if self.api.user_id.trim().is_empty() {
            return Err(Error::config("api.user_id", "must not be empty"));
        }
        let base = url::Url::parse(&self.api.base_url)
            .map_err(|e| Error::config("api.base_url", format!("invalid URL: {}", e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::config(
                "api.base_url",
                format!("unsupported scheme '{}'", base.scheme()),
            ));
        }
        if self.output.file_name.trim().is_empty() {
            return Err(Error::config("output.file_name", "must not be empty"));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "must be at least 1.0",
            ));
        }
        Ok(())
    }

    /// Full path of the output log
    pub fn output_path(&self) -> PathBuf {
        self.output.folder.join(&self.output.file_name)
    }
}

fn default_client_secrets_path() -> PathBuf {
    PathBuf::from(".auth_cache/credentials.json")
}

fn default_token_path() -> PathBuf {
    PathBuf::from("auth_cache/token.json")
}

fn default_scopes() -> Vec<String> {
    vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()]
}

fn default_base_url() -> String {
    "https://gmail.googleapis.com".to_string()
}

fn default_user_id() -> String {
    "me".to_string()
}

fn default_page_size() -> usize {
    20
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_output_folder() -> PathBuf {
    PathBuf::from("output")
}

fn default_output_file_name() -> String {
    "output.jsonl".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_analysis_headers() -> Vec<String> {
    vec!["subject".to_string(), "from".to_string()]
}

fn default_subject_filters() -> Vec<String> {
    vec![String::new(), "login".to_string()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
