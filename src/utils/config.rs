// src/utils/config.rs
//! Runtime configuration
//!
//! Loaded once through the `config` crate and kept immutable afterwards so a
//! reload can rebuild an identical runtime. For ini files the `[main]`
//! section carries the runtime options; other formats use the root table.

use crate::utils::errors::{Result, ScriptError};
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Section holding runtime options in ini files
pub const MAIN_SECTION: &str = "main";

/// Identifier of the built-in engine
pub const DEFAULT_ENGINE: &str = "native";

/// Resolved runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory holding `scripts/module_conf.json` and `scripts/service_conf.json`
    pub config_path: PathBuf,

    /// Working directory handed to the engine
    pub working_path: PathBuf,

    /// Root that module and service paths are resolved against
    pub scripts_path: PathBuf,

    /// Number of pooled script contexts
    pub pool_size: usize,

    /// Registry key of the engine implementation
    pub engine: String,

    /// Default wait for a free context, in milliseconds
    pub claim_timeout_ms: u64,

    /// Entry bound of the script-visible `cache` namespace
    pub cache_size: usize,

    /// Optional time-to-live of `cache` entries, in seconds
    pub cache_ttl_secs: Option<u64>,

    /// Entry bound of each resolution cache (modules, services)
    pub resolution_cache_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("./config/"),
            working_path: PathBuf::from("./"),
            scripts_path: PathBuf::from("./scripts/"),
            pool_size: 5,
            engine: DEFAULT_ENGINE.to_string(),
            claim_timeout_ms: 30_000,
            cache_size: 1024,
            cache_ttl_secs: None,
            resolution_cache_size: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a file (ini, json, toml, yaml)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScriptError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "configuration file not found"),
            ));
        }

        let settings = Config::builder()
            .add_source(File::from(path).required(true))
            .build()?;

        let config: RuntimeConfig = if settings.get_table(MAIN_SECTION).is_ok() {
            settings.get(MAIN_SECTION)?
        } else {
            settings.try_deserialize()?
        };

        debug!("Loaded runtime configuration from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from string key/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut builder = Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(key.as_ref(), value.into())?;
        }

        let config: RuntimeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot be built from
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(ScriptError::ConfigError("pool_size must be at least 1".into()));
        }
        if self.cache_size == 0 || self.resolution_cache_size == 0 {
            return Err(ScriptError::ConfigError("cache sizes must be at least 1".into()));
        }
        if self.engine.trim().is_empty() {
            return Err(ScriptError::ConfigError("engine must not be empty".into()));
        }
        Ok(())
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    /// Path of the module descriptor file
    pub fn module_conf_path(&self) -> PathBuf {
        self.config_path.join("scripts").join("module_conf.json")
    }

    /// Path of the service descriptor file
    pub fn service_conf_path(&self) -> PathBuf {
        self.config_path.join("scripts").join("service_conf.json")
    }
}
