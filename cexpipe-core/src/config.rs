//! Runtime configuration.
//!
//! One `CexConfig` value is built at startup (from TOML or defaults) and
//! passed by reference to every component. Nothing reads process-wide
//! settings behind the caller's back.
//!
//! ```toml
//! sandbox = false
//! max_depth = 50
//!
//! [executor]
//! timeout_secs = 30
//! attempts = 10
//! isolation = "process"
//!
//! [channel]
//! dir = "/tmp/cexpipe"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Complete configuration for one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CexConfig {
    /// Use each venue's sandbox host where one exists.
    pub sandbox: bool,
    /// Upper bound on order-book levels per side.
    pub max_depth: usize,
    pub executor: ExecutorConfig,
    pub channel: ChannelConfig,
    pub pipeline: PipelineConfig,
    pub breaker: BreakerConfig,
}

impl Default for CexConfig {
    fn default() -> Self {
        Self {
            sandbox: false,
            max_depth: 50,
            executor: ExecutorConfig::default(),
            channel: ChannelConfig::default(),
            pipeline: PipelineConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl CexConfig {
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: CexConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.attempts == 0 {
            return Err(ConfigError::Invalid("executor.attempts must be at least 1".into()));
        }
        if self.executor.timeout_secs == 0 {
            return Err(ConfigError::Invalid("executor.timeout_secs must be positive".into()));
        }
        if self.executor.isolation == IsolationMode::Process && self.executor.worker_program.is_none() {
            return Err(ConfigError::Invalid(
                "executor.isolation = \"process\" requires executor.worker_program".into(),
            ));
        }
        if self.channel.heal_after == 0 {
            return Err(ConfigError::Invalid("channel.heal_after must be at least 1".into()));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid("max_depth must be at least 1".into()));
        }
        if self.pipeline.overlap < 0 || self.pipeline.lead_intervals < 0 {
            return Err(ConfigError::Invalid(
                "pipeline.overlap and pipeline.lead_intervals must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// How each attempt is isolated from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Worker thread; a timed-out thread is abandoned and its result discarded.
    Thread,
    /// Worker process; a timed-out process is killed.
    Process,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Hard wall-clock limit per attempt.
    pub timeout_secs: u64,
    /// Maximum attempts per logical call.
    pub attempts: u32,
    /// Back-off before attempt `i + 1` is `i² × backoff_unit_ms`.
    pub backoff_unit_ms: u64,
    /// Spacing before every request, for venue rate limits.
    pub pace_ms: u64,
    pub isolation: IsolationMode,
    /// Program spawned per attempt under process isolation.
    pub worker_program: Option<PathBuf>,
    /// Arguments placed before the slot arguments the executor appends.
    pub worker_args: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            attempts: 10,
            backoff_unit_ms: 1000,
            pace_ms: 1000,
            isolation: IsolationMode::Thread,
            worker_program: None,
            worker_args: Vec::new(),
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Directory holding one file per in-flight attempt.
    pub dir: PathBuf,
    /// Retry delay unit; attempt `n` waits `n² × base_delay_ms`.
    pub base_delay_ms: u64,
    /// Recreate the directory every this many consecutive failures.
    pub heal_after: u32,
    /// Give up after this many failures. Unbounded when absent.
    pub max_attempts: Option<u32>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("cexpipe-channel"),
            base_delay_ms: 20,
            heal_after: 5,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Intervals of overlap on each side of a page.
    pub overlap: i64,
    /// Extra intervals fetched before `start` as gap-fill context.
    pub lead_intervals: i64,
    /// Slack past `end + interval` for exchange clock skew.
    pub skew_secs: i64,
    /// Candles fetched when no start is given.
    pub default_candles: i64,
    /// Restarts allowed after a failed run. Unbounded when absent.
    pub max_restarts: Option<u32>,
    /// Fetch pages concurrently.
    pub parallel_pages: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            overlap: 2,
            lead_intervals: 3,
            skew_secs: 60,
            default_candles: 10,
            max_restarts: None,
            parallel_pages: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: 3,
            cooldown_secs: 30 * 60,
        }
    }
}

/// API credentials. Read from the environment, never from the config file.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
    pub passphrase: Option<String>,
}

impl Credentials {
    pub const KEY_VAR: &'static str = "CEXPIPE_API_KEY";
    pub const SECRET_VAR: &'static str = "CEXPIPE_API_SECRET";
    pub const PASSPHRASE_VAR: &'static str = "CEXPIPE_API_PASSPHRASE";

    /// `None` unless both key and secret are set.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var(Self::KEY_VAR).ok()?;
        let secret = std::env::var(Self::SECRET_VAR).ok()?;
        Some(Self {
            key,
            secret,
            passphrase: std::env::var(Self::PASSPHRASE_VAR).ok(),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &"<redacted>")
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CexConfig::default();
        assert_eq!(config.executor.timeout_secs, 30);
        assert_eq!(config.executor.attempts, 10);
        assert_eq!(config.channel.heal_after, 5);
        assert_eq!(config.pipeline.overlap, 2);
        assert_eq!(config.max_depth, 50);
        assert!(config.pipeline.max_restarts.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = CexConfig::from_toml(
            r#"
            sandbox = true

            [executor]
            attempts = 3
            backoff_unit_ms = 5

            [pipeline]
            max_restarts = 2
            "#,
        )
        .unwrap();
        assert!(config.sandbox);
        assert_eq!(config.executor.attempts, 3);
        assert_eq!(config.executor.timeout_secs, 30);
        assert_eq!(config.pipeline.max_restarts, Some(2));
        assert_eq!(config.channel.base_delay_ms, 20);
    }

    #[test]
    fn process_isolation_requires_program() {
        let err = CexConfig::from_toml("[executor]\nisolation = \"process\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let ok = CexConfig::from_toml(
            "[executor]\nisolation = \"process\"\nworker_program = \"/usr/bin/cexpipe\"\nworker_args = [\"worker\"]\n",
        )
        .unwrap();
        assert_eq!(ok.executor.worker_args, vec!["worker".to_string()]);
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = CexConfig::from_toml("[executor]\nattempts = 0\n").unwrap_err();
        assert!(err.to_string().contains("attempts"));
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials {
            key: "k".into(),
            secret: "hunter2".into(),
            passphrase: None,
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
