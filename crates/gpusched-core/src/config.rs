//! Configuration types for gpusched

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default location of the shared state file
pub const DEFAULT_STATE_FILE: &str = "/tmp/gpu_scheduler_info";

/// Main scheduler configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// State store configuration
    pub store: StoreConfig,
    /// Admission loop configuration
    pub admission: AdmissionConfig,
    /// Task launcher configuration
    pub launcher: LauncherConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl SchedulerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::GpuschedError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::GpuschedError::Config(format!("Failed to read config file: {}", e))
        })?;
        toml::from_str(&content)
            .map_err(|e| crate::GpuschedError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// State store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the shared state file
    pub path: PathBuf,
    /// Pool size used when the state file has to be created
    pub default_pool_size: usize,
    /// Delay between lock attempts while another process holds the lock
    pub lock_retry_ms: u64,
}

impl StoreConfig {
    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STATE_FILE),
            default_pool_size: 4,
            lock_retry_ms: 100,
        }
    }
}

/// Admission loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Delay between checks while not enough slots are free
    pub poll_delay_ms: u64,
}

impl AdmissionConfig {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            poll_delay_ms: 3000,
        }
    }
}

/// Task launcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Variable carrying the assignment to the task
    pub env_var: String,
    /// Variable carrying the assigned slot count (when announced)
    pub count_env_var: String,
    /// Prefix of the device label handed to single-slot tasks
    pub label_prefix: String,
    /// Argument replaced by the port derived from the first slot
    pub placeholder: String,
    /// Port of slot 0
    pub port_base: u32,
    /// Port distance between consecutive slots
    pub port_stride: u32,
    /// Budget between terminating a task and killing it
    pub kill_delay_ms: u64,
    /// Interval of the liveness poll during the terminate window
    pub liveness_tick_ms: u64,
}

impl LauncherConfig {
    pub fn kill_delay(&self) -> Duration {
        Duration::from_millis(self.kill_delay_ms)
    }

    pub fn liveness_tick(&self) -> Duration {
        Duration::from_millis(self.liveness_tick_ms)
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            env_var: "GPU".to_string(),
            count_env_var: "GPU_COUNT".to_string(),
            label_prefix: "cuda".to_string(),
            placeholder: "__num__".to_string(),
            port_base: 3600,
            port_stride: 100,
            kill_delay_ms: 3000,
            liveness_tick_ms: 100,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Include the emitting module in log lines
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            target: false,
        }
    }
}
