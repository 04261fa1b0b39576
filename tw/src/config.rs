//! TaskWarden configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the checkpoint directory
pub const CHECKPOINT_DIR_ENV: &str = "TASKWARDEN_CHECKPOINT_DIR";

/// Lowest accepted concurrency cap
pub const MIN_CONCURRENT_TASKS: usize = 1;

/// Highest accepted concurrency cap
pub const MAX_CONCURRENT_TASKS: usize = 5;

const SECS_PER_DAY: u64 = 24 * 3600;

/// Convert a day count to a Duration, failing when the seconds overflow
pub fn days_to_duration(days: u64) -> Result<Duration> {
    days.checked_mul(SECS_PER_DAY)
        .map(Duration::from_secs)
        .ok_or_else(|| eyre::eyre!("{} days is too large a retention window", days))
}

/// Main TaskWarden configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration
    pub storage: StorageConfig,

    /// Concurrency limits
    pub concurrency: ConcurrencyConfig,

    /// Checkpoint lifecycle settings
    pub checkpoint: CheckpointConfig,

    /// Agent context limits
    pub context: ContextConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        let cap = self.concurrency.max_concurrent_tasks;
        if !(MIN_CONCURRENT_TASKS..=MAX_CONCURRENT_TASKS).contains(&cap) {
            return Err(eyre::eyre!(
                "max-concurrent-tasks must be between {} and {}, got {}",
                MIN_CONCURRENT_TASKS,
                MAX_CONCURRENT_TASKS,
                cap
            ));
        }
        if self.context.tool_result_keep == 0 {
            return Err(eyre::eyre!("context.tool-result-keep must be at least 1"));
        }
        if self.context.cleanup_interval_secs == 0 {
            return Err(eyre::eyre!("context.cleanup-interval-secs must be at least 1"));
        }
        days_to_duration(self.checkpoint.retention_days).context("Invalid checkpoint.retention-days")?;
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .taskwarden.yml
        let local_config = PathBuf::from(".taskwarden.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/taskwarden/taskwarden.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskwarden").join("taskwarden.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one JSON file per checkpoint
    #[serde(rename = "checkpoint-dir")]
    pub checkpoint_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/taskwarden on Linux)
        let checkpoint_dir = dirs::data_dir()
            .map(|d| d.join("taskwarden"))
            .unwrap_or_else(|| PathBuf::from(".taskwarden"))
            .join("checkpoints");

        Self { checkpoint_dir }
    }
}

impl StorageConfig {
    /// Checkpoint directory, honoring the environment override
    pub fn resolved_checkpoint_dir(&self) -> PathBuf {
        match std::env::var_os(CHECKPOINT_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => self.checkpoint_dir.clone(),
        }
    }
}

/// Concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum simultaneously running tasks (1-5)
    #[serde(rename = "max-concurrent-tasks")]
    pub max_concurrent_tasks: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { max_concurrent_tasks: 3 }
    }
}

/// Checkpoint lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Completed checkpoints older than this are swept
    #[serde(rename = "retention-days")]
    pub retention_days: u64,

    /// Token estimate per completed node in recovery summaries
    #[serde(rename = "tokens-per-node")]
    pub tokens_per_node: u64,

    /// Auto-save interval; carried for the host app, no periodic save runs here
    #[serde(rename = "auto-save-interval-ms")]
    pub auto_save_interval_ms: u64,

    /// Steps between progress writes when a task does not specify one
    #[serde(rename = "default-interval")]
    pub default_interval: u32,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            tokens_per_node: 500,
            auto_save_interval_ms: 10_000,
            default_interval: 1,
        }
    }
}

impl CheckpointConfig {
    /// Retention window as a Duration; saturates for out-of-range day counts
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(SECS_PER_DAY))
    }
}

/// Agent context limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Serialized size that triggers compression, in MB
    #[serde(rename = "max-size-mb")]
    pub max_size_mb: u64,

    /// Idle contexts older than this are purged
    #[serde(rename = "max-age-hours")]
    pub max_age_hours: u64,

    /// Period of the cleanup sweep
    #[serde(rename = "cleanup-interval-secs")]
    pub cleanup_interval_secs: u64,

    /// Transfers older than this are dropped on compression
    #[serde(rename = "transfer-retention-secs")]
    pub transfer_retention_secs: u64,

    /// Tool results kept per agent on compression
    #[serde(rename = "tool-result-keep")]
    pub tool_result_keep: usize,

    /// Variables larger than this (serialized) are dropped on compression
    #[serde(rename = "max-variable-bytes")]
    pub max_variable_bytes: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 50,
            max_age_hours: 24,
            cleanup_interval_secs: 3600,
            transfer_retention_secs: 3600,
            tool_result_keep: 3,
            max_variable_bytes: 10 * 1024,
        }
    }
}

impl ContextConfig {
    pub fn max_size_bytes(&self) -> usize {
        usize::try_from(self.max_size_mb)
            .unwrap_or(usize::MAX)
            .saturating_mul(1024 * 1024)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours.saturating_mul(3600))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn transfer_retention(&self) -> Duration {
        Duration::from_secs(self.transfer_retention_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.concurrency.max_concurrent_tasks, 3);
        assert_eq!(config.checkpoint.retention_days, 7);
        assert_eq!(config.checkpoint.tokens_per_node, 500);
        assert_eq!(config.context.max_size_mb, 50);
        assert_eq!(config.context.max_age_hours, 24);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_context_config_units() {
        let config = ContextConfig::default();
        assert_eq!(config.max_size_bytes(), 50 * 1024 * 1024);
        assert_eq!(config.max_age(), Duration::from_secs(86_400));
        assert_eq!(config.transfer_retention(), Duration::from_secs(3600));
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
storage:
  checkpoint-dir: /var/lib/tw/checkpoints

concurrency:
  max-concurrent-tasks: 5

checkpoint:
  retention-days: 14
  tokens-per-node: 800

context:
  max-size-mb: 10
  tool-result-keep: 5

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.storage.checkpoint_dir, PathBuf::from("/var/lib/tw/checkpoints"));
        assert_eq!(config.concurrency.max_concurrent_tasks, 5);
        assert_eq!(config.checkpoint.retention_days, 14);
        assert_eq!(config.checkpoint.tokens_per_node, 800);
        assert_eq!(config.context.max_size_mb, 10);
        assert_eq!(config.context.tool_result_keep, 5);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
checkpoint:
  retention-days: 1
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.checkpoint.retention_days, 1);
        assert_eq!(config.checkpoint.tokens_per_node, 500);
        assert_eq!(config.concurrency.max_concurrent_tasks, 3);
    }

    #[test]
    fn test_validate_rejects_out_of_range_cap() {
        for cap in [0, 6, 50] {
            let mut config = Config::default();
            config.concurrency.max_concurrent_tasks = cap;
            assert!(config.validate().is_err(), "cap {} should be rejected", cap);
        }
    }

    #[test]
    fn test_validate_rejects_zero_cleanup_interval() {
        let mut config = Config::default();
        config.context.cleanup_interval_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cleanup-interval-secs"));
    }

    #[test]
    fn test_retention_days_overflow() {
        assert_eq!(days_to_duration(2).unwrap(), Duration::from_secs(2 * 86_400));
        assert!(days_to_duration(213_503_982_334_602).is_err());

        let mut config = Config::default();
        config.checkpoint.retention_days = u64::MAX;
        assert!(config.validate().is_err());
        assert_eq!(config.checkpoint.retention(), Duration::from_secs(u64::MAX));
    }

    #[test]
    #[serial]
    fn test_checkpoint_dir_env_override() {
        let storage = StorageConfig {
            checkpoint_dir: PathBuf::from("/from/config"),
        };

        unsafe { std::env::remove_var(CHECKPOINT_DIR_ENV) };
        assert_eq!(storage.resolved_checkpoint_dir(), PathBuf::from("/from/config"));

        unsafe { std::env::set_var(CHECKPOINT_DIR_ENV, "/from/env") };
        assert_eq!(storage.resolved_checkpoint_dir(), PathBuf::from("/from/env"));

        unsafe { std::env::remove_var(CHECKPOINT_DIR_ENV) };
    }

    #[test]
    fn test_load_from_explicit_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("tw.yml");
        fs::write(&path, "concurrency:\n  max-concurrent-tasks: 2\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.concurrency.max_concurrent_tasks, 2);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let path = PathBuf::from("/definitely/not/here/tw.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
