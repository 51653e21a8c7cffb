//! Configuration management module
//!
//! Handles loading, saving, and validation of the service configuration:
//! listen address, authentication, scratch storage, request limits, and
//! job lifecycle timings.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BenchError, Result, APP_NAME, CONFIG_FILE};

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listen address
    pub host: String,
    pub port: u16,
    /// Bearer token required on benchmark routes
    pub api_token: Option<String>,
    /// Serve benchmark routes without a token when none is configured
    pub allow_anonymous: bool,
    /// Directory holding disk benchmark scratch files
    pub scratch_dir: PathBuf,
    pub limits: Limits,
    pub defaults: RequestDefaults,
    /// How often runners publish progress and check for cancellation
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    /// Extra time granted on top of the requested duration before a
    /// workload is considered hung
    #[serde(with = "duration_str")]
    pub grace_period: Duration,
    /// How long finished jobs stay readable
    #[serde(with = "duration_str")]
    pub job_retention: Duration,
    /// Upper bound on finished jobs kept in memory (0 = unbounded)
    pub max_retained_jobs: usize,
    #[serde(with = "duration_str")]
    pub reaper_interval: Duration,
}

/// Bounds applied to incoming benchmark requests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_duration_secs: u64,
    pub max_size_mb: u64,
    pub max_threads: usize,
    /// Maximum simultaneously queued or running jobs (0 = unlimited)
    pub max_concurrent_jobs: usize,
}

/// Values used when a request omits a parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestDefaults {
    pub duration_secs: u64,
    pub size_mb: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_token: None,
            allow_anonymous: false,
            scratch_dir: std::env::temp_dir(),
            limits: Limits::default(),
            defaults: RequestDefaults::default(),
            poll_interval: Duration::from_millis(250),
            grace_period: Duration::from_secs(30),
            job_retention: Duration::from_secs(3600),
            max_retained_jobs: 1000,
            reaper_interval: Duration::from_secs(60),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_duration_secs: 3600,
            max_size_mb: 8192,
            max_threads: 256,
            max_concurrent_jobs: 4,
        }
    }
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            duration_secs: 10,
            size_mb: 256,
        }
    }
}

impl ServiceConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(BenchError::Config("Port must be greater than 0".to_string()));
        }

        if let Some(token) = &self.api_token {
            if token.trim().is_empty() {
                return Err(BenchError::Config("API token must not be empty".to_string()));
            }
        }

        if !self.scratch_dir.exists() {
            return Err(BenchError::Config(format!(
                "Scratch directory does not exist: {}",
                self.scratch_dir.display()
            )));
        }
        if !self.scratch_dir.is_dir() {
            return Err(BenchError::Config(format!(
                "Scratch directory is not a directory: {}",
                self.scratch_dir.display()
            )));
        }

        if self.limits.max_duration_secs == 0 {
            return Err(BenchError::Config(
                "Maximum duration must be greater than 0".to_string(),
            ));
        }
        if self.limits.max_size_mb == 0 {
            return Err(BenchError::Config(
                "Maximum size must be greater than 0".to_string(),
            ));
        }
        if self.limits.max_threads == 0 {
            return Err(BenchError::Config(
                "Maximum thread count must be greater than 0".to_string(),
            ));
        }

        if self.defaults.duration_secs == 0
            || self.defaults.duration_secs > self.limits.max_duration_secs
        {
            return Err(BenchError::Config(format!(
                "Default duration must be between 1 and {} seconds",
                self.limits.max_duration_secs
            )));
        }
        if self.defaults.size_mb == 0 || self.defaults.size_mb > self.limits.max_size_mb {
            return Err(BenchError::Config(format!(
                "Default size must be between 1 and {} MB",
                self.limits.max_size_mb
            )));
        }

        if self.poll_interval.is_zero() {
            return Err(BenchError::Config(
                "Poll interval must be greater than 0".to_string(),
            ));
        }
        const MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);
        if self.poll_interval > MAX_POLL_INTERVAL {
            return Err(BenchError::Config(format!(
                "Poll interval too long: {:?} (max: {:?})",
                self.poll_interval, MAX_POLL_INTERVAL
            )));
        }

        if self.reaper_interval.is_zero() {
            return Err(BenchError::Config(
                "Reaper interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_anonymous_access(mut self, allow: bool) -> Self {
        self.allow_anonymous = allow;
        self
    }

    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = dir;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, limit: usize) -> Self {
        self.limits.max_concurrent_jobs = limit;
        self
    }

    pub fn with_job_retention(mut self, retention: Duration) -> Self {
        self.job_retention = retention;
        self
    }

    /// Refuse to serve without credentials unless anonymous access was
    /// explicitly allowed
    pub fn check_auth(&self) -> Result<()> {
        if self.api_token.is_none() && !self.allow_anonymous {
            return Err(BenchError::Config(
                "No API token configured; set api_token (or --token) or pass --insecure-no-auth"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from the standard config file location
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        if !config_path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load and validate configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BenchError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            BenchError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to the given path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BenchError::Config(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| BenchError::Config(format!("Failed to serialize configuration: {}", e)))?;

        fs::write(path, content).map_err(|e| {
            BenchError::Config(format!(
                "Failed to write config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Get the standard configuration file path
    /// Uses $CONFIG_HOME/srvbench/srvbench.toml
    pub fn config_file_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| BenchError::Config("Unable to determine config directory".to_string()))?;

        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }
}

// Durations are written as humantime strings ("250ms", "1h 30m")
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 8000);
        assert_eq!(config.defaults.duration_secs, 10);
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("srvbench.toml");

        let config = ServiceConfig::default()
            .with_port(9100)
            .with_api_token("secret")
            .with_scratch_dir(dir.path().to_path_buf())
            .with_poll_interval(Duration::from_millis(100));
        config.save_to(&path).unwrap();

        let loaded = ServiceConfig::load_from(&path).unwrap();
        assert_eq!(loaded.port, 9100);
        assert_eq!(loaded.api_token.as_deref(), Some("secret"));
        assert_eq!(loaded.poll_interval, Duration::from_millis(100));
        assert_eq!(loaded.job_retention, Duration::from_secs(3600));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            port = 8080
            job_retention = "2h"

            [limits]
            max_concurrent_jobs = 1
        "#;
        let config: ServiceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.job_retention, Duration::from_secs(7200));
        assert_eq!(config.limits.max_concurrent_jobs, 1);
        assert_eq!(config.limits.max_threads, 256);
        assert_eq!(config.grace_period, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_duration_string_is_rejected() {
        let result: std::result::Result<ServiceConfig, _> =
            toml::from_str(r#"poll_interval = "soon""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_failures() {
        let config = ServiceConfig::default().with_scratch_dir(PathBuf::from("/nonexistent/srvbench"));
        assert!(matches!(config.validate(), Err(BenchError::Config(_))));

        let config = ServiceConfig::default().with_api_token("  ");
        assert!(config.validate().is_err());

        let config = ServiceConfig::default().with_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.defaults.size_mb = config.limits.max_size_mb + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_auth_is_required_by_default() {
        let config = ServiceConfig::default();
        assert!(matches!(config.check_auth(), Err(BenchError::Config(_))));

        assert!(ServiceConfig::default().with_api_token("secret").check_auth().is_ok());
        assert!(ServiceConfig::default().with_anonymous_access(true).check_auth().is_ok());

        let config: ServiceConfig = toml::from_str("allow_anonymous = true").unwrap();
        assert!(config.check_auth().is_ok());
    }

    #[test]
    fn test_config_file_path() {
        let path = ServiceConfig::config_file_path();
        assert!(path.is_ok());
        let path = path.unwrap();
        assert!(path.to_string_lossy().contains("srvbench"));
        assert!(path.to_string_lossy().ends_with("srvbench.toml"));
    }
}
