//! Configuration and session management.
//!
//! Handles:
//! - API endpoint configuration
//! - Polling policy for instance toggles
//! - Session cookie storage

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use ecc_reconcile::{PollPolicy, TargetResolution};
use serde::{Deserialize, Serialize};

/// Configuration file name.
const CONFIG_FILE: &str = "config.json";

/// Credentials file name.
const CREDENTIALS_FILE: &str = "credentials.json";

/// API endpoint used when nothing else is configured.
const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Get the config directory path.
fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("ECC_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }

    ProjectDirs::from("io", "ecc", "ecc")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

/// Write a file readable only by the current user.
fn write_private(path: &Path, contents: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("Failed to open {:?}", path))?;
        file.write_all(contents.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents).with_context(|| format!("Failed to write {:?}", path))?;
    }

    Ok(())
}

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// API endpoint URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Toggle polling settings.
    #[serde(default)]
    pub poll: PollSettings,
}

fn default_api_url() -> String {
    std::env::var("ECC_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            poll: PollSettings::default(),
        }
    }
}

impl Config {
    /// Load config from disk, or return default.
    pub fn load() -> Result<Self> {
        let path = config_dir()?.join(CONFIG_FILE);

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))
    }

    /// Get the API URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<()> {
        let dir = config_dir()?;
        fs::create_dir_all(&dir)?;

        let contents = serde_json::to_string_pretty(self)?;
        write_private(&dir.join(CONFIG_FILE), &contents)
    }
}

/// Polling settings as stored on disk (seconds, not durations).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Seconds between status polls.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Polls before giving up (`null` or 0 for no limit).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,

    /// Seconds before giving up (`null` or 0 for no limit).
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: Option<u64>,

    /// Consecutive failed polls tolerated.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Timeout on each API call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Re-read the instance state right before toggling.
    #[serde(default)]
    pub authoritative: bool,
}

fn default_interval_secs() -> u64 {
    ecc_reconcile::DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_max_attempts() -> Option<u32> {
    Some(ecc_reconcile::DEFAULT_MAX_ATTEMPTS)
}

fn default_max_duration_secs() -> Option<u64> {
    Some(ecc_reconcile::DEFAULT_MAX_DURATION.as_secs())
}

fn default_max_consecutive_failures() -> u32 {
    ecc_reconcile::DEFAULT_MAX_CONSECUTIVE_FAILURES
}

fn default_request_timeout_secs() -> u64 {
    ecc_reconcile::DEFAULT_REQUEST_TIMEOUT.as_secs()
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_attempts: default_max_attempts(),
            max_duration_secs: default_max_duration_secs(),
            max_consecutive_failures: default_max_consecutive_failures(),
            request_timeout_secs: default_request_timeout_secs(),
            authoritative: false,
        }
    }
}

impl PollSettings {
    /// Build the poller policy.
    pub fn to_policy(&self) -> PollPolicy {
        let resolution = if self.authoritative {
            TargetResolution::Authoritative
        } else {
            TargetResolution::CallerState
        };

        PollPolicy::default()
            .with_interval(Duration::from_secs(self.interval_secs))
            .with_max_attempts(self.max_attempts.filter(|&n| n > 0))
            .with_max_duration(
                self.max_duration_secs
                    .filter(|&secs| secs > 0)
                    .map(Duration::from_secs),
            )
            .with_max_consecutive_failures(self.max_consecutive_failures)
            .with_request_timeout(self.request_timeout())
            .with_target_resolution(resolution)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Stored session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Session cookie (`name=value`) set by the login endpoint.
    pub cookie: String,

    /// Email used to log in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// User ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Whether the account is an administrator.
    #[serde(default)]
    pub is_superuser: bool,

    /// When the session was created.
    pub logged_in_at: DateTime<Utc>,
}

impl Credentials {
    /// Create new credentials.
    pub fn new(cookie: String) -> Self {
        Self {
            cookie,
            email: None,
            user_id: None,
            is_superuser: false,
            logged_in_at: Utc::now(),
        }
    }

    /// Load credentials from disk.
    pub fn load() -> Result<Option<Self>> {
        let path = config_dir()?.join(CREDENTIALS_FILE);

        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read credentials from {:?}", path))?;

        let creds: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse credentials from {:?}", path))?;

        Ok(Some(creds))
    }

    /// Save credentials to disk.
    pub fn save(&self) -> Result<()> {
        let dir = config_dir()?;
        fs::create_dir_all(&dir)?;

        let contents = serde_json::to_string_pretty(self)?;
        write_private(&dir.join(CREDENTIALS_FILE), &contents)
    }

    /// Delete credentials from disk.
    pub fn delete() -> Result<()> {
        let path = config_dir()?.join(CREDENTIALS_FILE);

        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to delete credentials at {:?}", path))?;
        }

        Ok(())
    }
}
