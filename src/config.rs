//! Scripting configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`ScriptingConfig::default`])
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `SIMSCRIPT_` (`__` separates nested keys)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! SIMSCRIPT_MAX_EXECUTION_TIME_MS=250
//! SIMSCRIPT_BACKEND=rhai
//! SIMSCRIPT_FAST_PATH__MIN_INVOCATIONS=1000
//! SIMSCRIPT_POOL__KEEP_ALIVE_MS=500
//! ```
//!
//! # Example
//!
//! ```no_run
//! use simscript::config::ScriptingConfig;
//!
//! let config = ScriptingConfig::load(Some("scripting.toml".as_ref())).unwrap();
//! println!("Budget: {} ms", config.max_execution_time_ms);
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::scripting::backend::BackendPreference;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "SIMSCRIPT_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Figment could not read or merge a source.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// Values parsed but are not usable.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::LoadError(Box::new(err))
    }
}

/// Top-level configuration consumed by [`crate::scripting::EngineBuilder`].
///
/// Immutable once handed to the builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// Wall-clock budget for a single `run()` on the safe path.
    #[serde(default = "default_max_execution_time")]
    pub max_execution_time_ms: u32,
    /// Backend preference; `auto` walks the fallback order.
    #[serde(default)]
    pub backend: BackendPreference,
    /// Adaptive fast-path thresholds.
    #[serde(default)]
    pub fast_path: FastPathConfig,
    /// Output sink limits.
    #[serde(default)]
    pub output: OutputConfig,
    /// Worker pool sizing.
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Thresholds for switching from the safe path to direct execution.
///
/// The defaults target the "once per simulated event, millions of times"
/// workload: after `min_invocations` calls, a script whose previous call
/// finished under `max_elapsed_ms` runs on the caller's thread without a
/// timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastPathConfig {
    /// Turn the fast path off entirely.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Calls required before the fast path is considered.
    #[serde(default = "default_min_invocations")]
    pub min_invocations: u64,
    /// The previous call must have been strictly faster than this.
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_ms: u64,
}

/// Output sink limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Characters retained in buffering mode; later writes are dropped.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on worker threads; defaults to the number of CPU cores.
    #[serde(default)]
    pub max_threads: Option<usize>,
    /// Idle workers are retired after this long.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_ms: u64,
}

fn default_max_execution_time() -> u32 {
    1_000
}

fn default_true() -> bool {
    true
}

fn default_min_invocations() -> u64 {
    100
}

fn default_max_elapsed() -> u64 {
    50
}

fn default_max_chars() -> usize {
    10_000_000
}

fn default_keep_alive() -> u64 {
    100
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            max_execution_time_ms: default_max_execution_time(),
            backend: BackendPreference::default(),
            fast_path: FastPathConfig::default(),
            output: OutputConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl Default for FastPathConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_invocations: default_min_invocations(),
            max_elapsed_ms: default_max_elapsed(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_threads: None,
            keep_alive_ms: default_keep_alive(),
        }
    }
}

impl ScriptingConfig {
    /// Load configuration from defaults, an optional TOML file and the environment.
    ///
    /// A missing file is not an error; figment simply contributes nothing for it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(ScriptingConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: ScriptingConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_execution_time_ms == 0 {
            return Err(ConfigError::ValidationError(
                "max_execution_time_ms must be greater than zero".to_string(),
            ));
        }
        if self.output.max_chars == 0 {
            return Err(ConfigError::ValidationError(
                "output.max_chars must be greater than zero".to_string(),
            ));
        }
        if self.pool.keep_alive_ms == 0 {
            return Err(ConfigError::ValidationError(
                "pool.keep_alive_ms must be greater than zero".to_string(),
            ));
        }
        if self.pool.max_threads == Some(0) {
            return Err(ConfigError::ValidationError(
                "pool.max_threads must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    /// The safe-path budget as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.max_execution_time_ms))
    }

    /// Worker count, falling back to the number of available cores.
    pub fn worker_threads(&self) -> usize {
        self.pool.max_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
