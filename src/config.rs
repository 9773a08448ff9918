//! Logger configuration.
//!
//! Loaded from a YAML file or built programmatically; every field has a
//! default so an empty document is a valid config. Durations are written in
//! human form (`1s`, `250ms`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Floor for the derived stop deadline, so very short cadences still leave
/// room for process teardown.
const MIN_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Validation(String),
}

/// Which concurrency substrate hosts the collector loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single-threaded cooperative scheduling; fastest stop latency.
    Cooperative,
    /// Dedicated OS thread; stop latency up to one cadence.
    Threaded,
    /// Isolated child process; survives blocking or crashing sensors.
    Process,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Cooperative => "cooperative",
            Self::Threaded => "threaded",
            Self::Process => "process",
        };
        f.write_str(name)
    }
}

/// Complete logger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggerConfig {
    /// SQLite database location.
    pub db_path: PathBuf,

    /// Target interval between cycle starts.
    #[serde(with = "humantime_serde")]
    pub cadence: Duration,

    /// Concurrency substrate for the collector loop.
    pub backend: BackendKind,

    /// Handoff channel capacity; absent means unbounded.
    pub channel_capacity: Option<usize>,

    /// How long `stop` waits for the collector; absent derives a deadline
    /// from the cadence.
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Option<Duration>,

    /// Binary to spawn for the process backend; absent means the running
    /// executable itself.
    pub child_program: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("performance.db"),
            cadence: Duration::from_secs(1),
            backend: BackendKind::Threaded,
            channel_capacity: None,
            stop_timeout: None,
            child_program: None,
        }
    }
}

impl LoggerConfig {
    /// Load and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.as_ref().display(), "config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cadence.is_zero() {
            return Err(ConfigError::Validation(
                "cadence must be greater than zero".to_string(),
            ));
        }
        if let Some(timeout) = self.stop_timeout {
            if timeout.is_zero() {
                return Err(ConfigError::Validation(
                    "stop_timeout must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Stop deadline: the explicit override, or five cadences with a
    /// two-second floor.
    pub fn effective_stop_timeout(&self) -> Duration {
        self.stop_timeout
            .unwrap_or_else(|| (self.cadence * 5).max(MIN_STOP_TIMEOUT))
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }

    pub fn with_child_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.child_program = Some(program.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = LoggerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.db_path, PathBuf::from("performance.db"));
        assert_eq!(config.cadence, Duration::from_secs(1));
        assert_eq!(config.backend, BackendKind::Threaded);
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("perflog.yaml");
        std::fs::write(
            &path,
            "db_path: /tmp/perf.db\ncadence: 250ms\nbackend: process\nchannel_capacity: 64\n",
        )
        .unwrap();

        let config = LoggerConfig::load(&path).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/perf.db"));
        assert_eq!(config.cadence, Duration::from_millis(250));
        assert_eq!(config.backend, BackendKind::Process);
        assert_eq!(config.channel_capacity, Some(64));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("perflog.yaml");
        std::fs::write(&path, "{}\n").unwrap();
        let config = LoggerConfig::load(&path).unwrap();
        assert_eq!(config.backend, BackendKind::Threaded);
    }

    #[test]
    fn test_zero_cadence_rejected() {
        let config = LoggerConfig::default().with_cadence(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("perflog.yaml");
        std::fs::write(&path, "cadense: 1s\n").unwrap();
        assert!(matches!(
            LoggerConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_stop_timeout_derivation() {
        let short = LoggerConfig::default().with_cadence(Duration::from_millis(100));
        assert_eq!(short.effective_stop_timeout(), Duration::from_secs(2));

        let long = LoggerConfig::default().with_cadence(Duration::from_secs(1));
        assert_eq!(long.effective_stop_timeout(), Duration::from_secs(5));

        let explicit = LoggerConfig::default().with_stop_timeout(Duration::from_secs(30));
        assert_eq!(explicit.effective_stop_timeout(), Duration::from_secs(30));
    }
}
