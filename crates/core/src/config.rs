//! Engine configuration
//!
//! Settings are supplied once, when the content manager is built. They can
//! be loaded from a TOML file, from environment variables, or assembled with
//! the `with_*` builder methods. Runtime reconfiguration is not supported.

use pageview_cache::{MemoryPoolConfig, DEFAULT_PRESSURE_THRESHOLD};
use pageview_scheduler::{JobPriority, WorkerPoolConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `worker_count`
pub const ENV_WORKERS: &str = "PAGEVIEW_WORKERS";
/// Environment variable overriding `foreground_workers`
pub const ENV_FOREGROUND_WORKERS: &str = "PAGEVIEW_FOREGROUND_WORKERS";
/// Environment variable overriding `max_pool_mb`
pub const ENV_POOL_MB: &str = "PAGEVIEW_POOL_MB";
/// Environment variable overriding `preload_window`
pub const ENV_PRELOAD_WINDOW: &str = "PAGEVIEW_PRELOAD_WINDOW";
/// Environment variable overriding `navigation_timeout_ms`
pub const ENV_TIMEOUT_MS: &str = "PAGEVIEW_TIMEOUT_MS";

/// Configuration for the content-loading engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Total number of worker threads
    pub worker_count: usize,
    /// Workers reserved for current-page work and above
    pub foreground_workers: usize,
    /// Page pool budget in megabytes
    pub max_pool_mb: usize,
    /// Pages preloaded on each side of the current page
    pub preload_window: usize,
    /// Upper bound on how long `goto` waits for its page
    pub navigation_timeout_ms: u64,
    /// Pool utilization (0.0 to 1.0) that triggers a memory-pressure notification
    pub pressure_threshold: f64,
    /// Pin the displayed page so eviction never drops it
    pub pin_current: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            foreground_workers: 2,
            max_pool_mb: 512,
            preload_window: 5,
            navigation_timeout_ms: 10_000,
            pressure_threshold: DEFAULT_PRESSURE_THRESHOLD,
            pin_current: true,
        }
    }
}

impl EngineConfig {
    /// Sets the worker counts.
    pub fn with_workers(mut self, total: usize, foreground: usize) -> Self {
        self.worker_count = total;
        self.foreground_workers = foreground;
        self
    }

    /// Sets the pool budget in megabytes.
    pub fn with_pool_mb(mut self, mb: usize) -> Self {
        self.max_pool_mb = mb;
        self
    }

    /// Sets the preload window.
    pub fn with_preload_window(mut self, window: usize) -> Self {
        self.preload_window = window;
        self
    }

    /// Sets the navigation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_pressure_threshold(mut self, threshold: f64) -> Self {
        self.pressure_threshold = threshold;
        self
    }

    pub fn with_pin_current(mut self, pin: bool) -> Self {
        self.pin_current = pin;
        self
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    /// Per-worker priority floors: foreground workers first, background after.
    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::banded(
            self.worker_count,
            self.foreground_workers,
            JobPriority::CurrentPage,
        )
    }

    pub fn memory_pool_config(&self) -> MemoryPoolConfig {
        MemoryPoolConfig::with_mb_limit(self.max_pool_mb)
            .with_pressure_threshold(self.pressure_threshold)
    }

    /// Checks that the settings describe a runnable engine.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::InvalidValue("worker_count".to_string()));
        }
        // At least one worker must accept background work
        if self.foreground_workers >= self.worker_count {
            return Err(ConfigError::InvalidValue("foreground_workers".to_string()));
        }
        // The byte budget must fit in usize
        if self.max_pool_mb == 0 || self.max_pool_mb.checked_mul(1024 * 1024).is_none() {
            return Err(ConfigError::InvalidValue("max_pool_mb".to_string()));
        }
        if !(self.pressure_threshold > 0.0 && self.pressure_threshold <= 1.0) {
            return Err(ConfigError::InvalidValue("pressure_threshold".to_string()));
        }
        if self.navigation_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("navigation_timeout_ms".to_string()));
        }
        Ok(())
    }

    /// Returns the default configuration file location.
    ///
    /// - Linux: ~/.config/pageview/config.toml
    /// - macOS: ~/Library/Application Support/pageview/config.toml
    /// - Windows: %APPDATA%\pageview\config.toml
    pub fn default_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("pageview").join("config.toml"),
            None => PathBuf::from("pageview.toml"),
        }
    }

    /// Loads configuration from environment variables on top of the defaults.
    ///
    /// Environment variables:
    /// - `PAGEVIEW_WORKERS`: total worker threads (default: 4)
    /// - `PAGEVIEW_FOREGROUND_WORKERS`: foreground workers (default: 2)
    /// - `PAGEVIEW_POOL_MB`: pool budget in MB (default: 512)
    /// - `PAGEVIEW_PRELOAD_WINDOW`: preload window (default: 5)
    /// - `PAGEVIEW_TIMEOUT_MS`: navigation timeout in ms (default: 10000)
    ///
    /// # Errors
    /// Returns an error if any variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Overrides fields with any `PAGEVIEW_*` variables that are set.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_value(ENV_WORKERS)? {
            self.worker_count = value;
        }
        if let Some(value) = env_value(ENV_FOREGROUND_WORKERS)? {
            self.foreground_workers = value;
        }
        if let Some(value) = env_value(ENV_POOL_MB)? {
            self.max_pool_mb = value;
        }
        if let Some(value) = env_value(ENV_PRELOAD_WINDOW)? {
            self.preload_window = value;
        }
        if let Some(value) = env_value(ENV_TIMEOUT_MS)? {
            self.navigation_timeout_ms = value;
        }
        Ok(self)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Missing keys keep their defaults:
    /// ```toml
    /// worker_count = 4
    /// foreground_workers = 2
    /// max_pool_mb = 512
    /// preload_window = 5
    /// navigation_timeout_ms = 10000
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Saves configuration to a TOML file, creating parent directories.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn env_value<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(None),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}
