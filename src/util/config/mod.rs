//! Scheduler configuration loading
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. Environment variables
//! 2. Configuration file (RON)
//! 3. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use affinity_pump::util::config::from_ron_str;
//!
//! let config = from_ron_str("(worker_threads: 2)").unwrap();
//! assert_eq!(config.worker_threads, 2);
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::runtime::scheduler::SchedulerConfig;

/// Overrides the number of worker threads.
pub const ENV_WORKERS: &str = "AFFINITY_PUMP_WORKERS";
/// Overrides the pump idle timeout, in milliseconds.
pub const ENV_IDLE_TIMEOUT_MS: &str = "AFFINITY_PUMP_IDLE_TIMEOUT_MS";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    ParseError(#[from] ron::error::SpannedError),
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Parse a configuration from RON text; missing fields take their defaults.
pub fn from_ron_str(content: &str) -> Result<SchedulerConfig, ConfigError> {
    Ok(ron::from_str(content)?)
}

/// Load configuration from a RON file, then apply environment overrides.
/// A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<SchedulerConfig, ConfigError> {
    let config = if path.exists() {
        let content = fs::read_to_string(path)?;
        from_ron_str(&content)?
    } else {
        SchedulerConfig::default()
    };
    apply_env(config, |name| std::env::var(name).ok())
}

/// Default configuration with environment overrides applied.
pub fn from_env() -> Result<SchedulerConfig, ConfigError> {
    apply_env(SchedulerConfig::default(), |name| std::env::var(name).ok())
}

/// Apply overrides looked up through `lookup`.
pub fn apply_env(
    mut config: SchedulerConfig,
    lookup: impl Fn(&'static str) -> Option<String>,
) -> Result<SchedulerConfig, ConfigError> {
    if let Some(value) = lookup(ENV_WORKERS) {
        config.worker_threads = match value.trim().parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                return Err(ConfigError::InvalidEnv {
                    name: ENV_WORKERS,
                    value,
                })
            }
        };
    }
    if let Some(value) = lookup(ENV_IDLE_TIMEOUT_MS) {
        let ms = value
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidEnv {
                name: ENV_IDLE_TIMEOUT_MS,
                value: value.clone(),
            })?;
        config.pump_idle_timeout = Duration::from_millis(ms);
    }
    Ok(config)
}
