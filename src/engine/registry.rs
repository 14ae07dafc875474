// src/engine/registry.rs
//! Engine registry
//!
//! Maps the configured `engine` key to a factory, selected once per
//! runtime initialisation.

use crate::engine::native::{NativeCatalog, NativeEngine};
use crate::engine::ScriptEngine;
use crate::utils::config::DEFAULT_ENGINE;
use crate::utils::errors::{Result, ScriptError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Failure reported by an engine factory
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineFactoryError {
    #[error("no usable constructor")]
    NoUsableConstructor,

    #[error("access denied")]
    AccessDenied,

    #[error("construction failed: {0}")]
    ConstructionFailed(String),

    #[error("bad argument: {0}")]
    BadArgument(String),
}

pub type EngineFactory = Arc<
    dyn Fn() -> std::result::Result<Arc<dyn ScriptEngine>, EngineFactoryError> + Send + Sync,
>;

#[derive(Clone)]
pub struct EngineRegistry {
    factories: HashMap<String, EngineFactory>,
}

impl EngineRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in engine and no native modules
    pub fn with_builtin() -> Self {
        Self::with_native(NativeCatalog::new())
    }

    /// Registry whose built-in engine serves `catalog`
    pub fn with_native(catalog: NativeCatalog) -> Self {
        let mut registry = Self::new();
        let catalog = Arc::new(catalog);
        registry.register(DEFAULT_ENGINE, move || {
            Ok(Arc::new(NativeEngine::new(Arc::clone(&catalog))) as Arc<dyn ScriptEngine>)
        });
        registry
    }

    /// Register an engine factory
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> std::result::Result<Arc<dyn ScriptEngine>, EngineFactoryError>
            + Send
            + Sync
            + 'static,
    {
        let id = id.into();
        debug!("Registering script engine factory: {}", id);
        self.factories.insert(id, Arc::new(factory));
    }

    /// Build the engine registered under `id`
    pub fn create(&self, id: &str) -> Result<Arc<dyn ScriptEngine>> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| ScriptError::EngineNotFound(id.to_string()))?;

        info!("Using script engine: {}", id);
        factory().map_err(|e| match e {
            EngineFactoryError::NoUsableConstructor => {
                ScriptError::EngineNoUsableConstructor(id.to_string())
            }
            EngineFactoryError::AccessDenied => ScriptError::EngineAccessDenied(id.to_string()),
            EngineFactoryError::ConstructionFailed(reason) => ScriptError::EngineConstructionFailed {
                id: id.to_string(),
                reason,
            },
            EngineFactoryError::BadArgument(reason) => ScriptError::EngineBadArgument {
                id: id.to_string(),
                reason,
            },
        })
    }

    /// Get the list of all registered engine ids
    pub fn available_engines(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
