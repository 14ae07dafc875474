// src/utils/errors.rs
//! Error types for the script host
//!
//! Every public operation either returns a usable value or one of these
//! kinds. A key that is absent (or was deleted) is reported as `None`, never
//! as an error.
//!
//! `ScriptError` is `Clone`: a failed single-flight setup hands the same
//! error to every caller waiting on that key.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ScriptError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScriptError {
    // Engine selection
    #[error("Script engine not found: {0}")]
    EngineNotFound(String),

    #[error("Script engine {0} has no usable constructor")]
    EngineNoUsableConstructor(String),

    #[error("Access denied constructing script engine {0}")]
    EngineAccessDenied(String),

    #[error("Error creating script engine {id}: {reason}")]
    EngineConstructionFailed { id: String, reason: String },

    #[error("Invalid argument for script engine {id}: {reason}")]
    EngineBadArgument { id: String, reason: String },

    // Configuration and I/O
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    // Pool resources
    #[error("Timed out after {0:?} waiting for a script context")]
    ClaimTimeout(Duration),

    #[error("Script context pool is closed")]
    PoolClosed,

    // Resolution
    #[error("{kind} cannot be set up: {name} ({reason})")]
    ResolutionFailed {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("Circular {kind} resolution: {name}")]
    CircularResolution { kind: &'static str, name: String },

    // Classpath
    #[error("Repository {0} doesn't exist")]
    ClasspathNotFound(PathBuf),

    #[error("Do not have read access for {0}")]
    ClasspathAccessDenied(PathBuf),

    #[error("Resource resolver is closed")]
    ResolverClosed,

    // Runtime lifecycle
    #[error("Script runtime is no longer available to this context")]
    ReferenceGone,

    #[error("Script runtime unavailable (state: {0})")]
    RuntimeUnavailable(String),

    // Actions
    #[error("Invalid action format: {0} (expected Module.method)")]
    InvalidAction(String),

    #[error("Action {action} failed: {reason}")]
    ActionFailed { action: String, reason: String },
}

impl ScriptError {
    /// Wrap an I/O error together with the path it happened on
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        ScriptError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// True for the configuration kinds that abort startup
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ScriptError::EngineNotFound(_)
                | ScriptError::EngineNoUsableConstructor(_)
                | ScriptError::EngineAccessDenied(_)
                | ScriptError::EngineConstructionFailed { .. }
                | ScriptError::EngineBadArgument { .. }
                | ScriptError::ConfigError(_)
        )
    }
}

impl From<config::ConfigError> for ScriptError {
    fn from(err: config::ConfigError) -> Self {
        ScriptError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for ScriptError {
    fn from(err: serde_json::Error) -> Self {
        ScriptError::ConfigError(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_names_path() {
        let err = ScriptError::io(
            "/tmp/missing.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert!(err.to_string().contains("/tmp/missing.json"));
    }

    #[test]
    fn test_config_kinds() {
        assert!(ScriptError::EngineNotFound("x".into()).is_config());
        assert!(ScriptError::ConfigError("bad".into()).is_config());
        assert!(!ScriptError::PoolClosed.is_config());
    }
}
