//! Configuration for the LRO worker and its external tools.
//!
//! Every knob governing the worker (claim tick, lease, heartbeat, max
//! parallelism) is a construction-time parameter loaded from TOML, never
//! a compiled constant.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub worker: WorkerConfig,
    pub backup: BackupToolConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.worker.validate()?;
        self.backup.validate()?;
        Ok(())
    }
}

/// Worker loop knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Interval between claim ticks, in milliseconds.
    pub tick_interval_ms: u64,
    /// Lease duration granted on claim, in milliseconds.
    pub lease_ms: u64,
    /// Heartbeat (lease renewal) interval, in milliseconds. The default
    /// gives eight renewals before a lease would lapse, tolerating slow
    /// steps and transient store unavailability.
    pub heartbeat_interval_ms: u64,
    /// Maximum concurrent executions. The destructive workflows run
    /// with 1 to bound blast radius.
    pub max_parallel: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            lease_ms: 120_000,
            heartbeat_interval_ms: 15_000,
            max_parallel: 1,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.tick_interval_ms >= 1, "worker.tick_interval_ms must be >= 1");
        anyhow::ensure!(self.lease_ms >= 1, "worker.lease_ms must be >= 1");
        anyhow::ensure!(
            self.heartbeat_interval_ms >= 1,
            "worker.heartbeat_interval_ms must be >= 1"
        );
        anyhow::ensure!(
            self.heartbeat_interval_ms * 2 <= self.lease_ms,
            "worker.heartbeat_interval_ms must be at most half of worker.lease_ms \
             (got {} vs lease {})",
            self.heartbeat_interval_ms,
            self.lease_ms
        );
        anyhow::ensure!(self.max_parallel >= 1, "worker.max_parallel must be >= 1");
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Backup tool (restic) invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupToolConfig {
    /// Path to the restic binary.
    pub binary: PathBuf,
    /// Repository location (path or remote URL).
    pub repository: String,
    /// Optional password file exported as RESTIC_PASSWORD_FILE.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
    /// Per-invocation timeout in seconds.
    pub timeout_secs: u64,
    /// Cap on tool stdout size in bytes.
    pub max_output_bytes: usize,
}

impl Default for BackupToolConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("restic"),
            repository: String::new(),
            password_file: None,
            timeout_secs: 120,
            max_output_bytes: 8 * 1024 * 1024,
        }
    }
}

impl BackupToolConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.timeout_secs >= 1, "backup.timeout_secs must be >= 1");
        anyhow::ensure!(
            self.max_output_bytes >= 1024,
            "backup.max_output_bytes must be >= 1024"
        );
        Ok(())
    }
}
