// src/engine/mod.rs
//! Script engine boundary
//!
//! The runtime never looks inside an engine. It sequences calls through
//! [`ScriptEngine`] and hands the engine a [`RuntimeHandle`] so module and
//! service setups can call back into the runtime (shared namespaces,
//! privilege checks, resource lookup, nested resolution).
//!
//! - **registry**: maps the configured `engine` key to a factory
//! - **native**: built-in engine whose modules and services are Rust types

pub mod native;
pub mod registry;

use crate::runtime::context::PooledContext;
use crate::runtime::privileged::SetupId;
use crate::runtime::script_runtime::RuntimeHandle;
use crate::utils::errors::{Result, ScriptError};
use crate::utils::script_config::{ScriptConfig, ScriptDescriptor};
use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub use native::{NativeCatalog, NativeEngine, NativeModule};
pub use registry::{EngineFactoryError, EngineRegistry};

/// Opaque engine-specific module or service object
pub type Resolved = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupKind {
    Module,
    Service,
}

impl SetupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupKind::Module => "module",
            SetupKind::Service => "service",
        }
    }
}

impl fmt::Display for SetupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an engine needs to set up one module or service
#[derive(Debug, Clone)]
pub struct SetupRequest {
    pub kind: SetupKind,

    /// Logical name the caller asked for
    pub name: String,

    /// Script name after descriptor mapping
    pub script_name: String,

    /// Directory holding the script
    pub script_dir: PathBuf,

    /// Configured setup arguments (empty object when none)
    pub init_arguments: Value,

    /// Setup attempt id, services only
    pub setup_id: Option<SetupId>,
}

impl SetupRequest {
    pub(crate) fn new(kind: SetupKind, name: &str, descriptor: &ScriptDescriptor) -> Self {
        Self {
            kind,
            name: name.to_string(),
            script_name: descriptor.script_name(name).to_string(),
            script_dir: descriptor.script_dir(name),
            init_arguments: descriptor.init_arguments_for(name),
            setup_id: None,
        }
    }

    pub(crate) fn with_setup_id(mut self, id: SetupId) -> Self {
        self.setup_id = Some(id);
        self
    }
}

#[async_trait]
pub trait ScriptEngine: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Called once per runtime before any context is claimed
    async fn init(&self, runtime: RuntimeHandle, config: &ScriptConfig) -> Result<()>;

    /// Build a module; `Ok(None)` means the module cannot be set up
    async fn setup_module(
        &self,
        runtime: &RuntimeHandle,
        request: SetupRequest,
    ) -> Result<Option<Resolved>>;

    /// Build a service; `request.setup_id` is privileged when configured
    async fn setup_service(
        &self,
        runtime: &RuntimeHandle,
        request: SetupRequest,
    ) -> Result<Option<Resolved>>;

    /// Execute `name` on `ctx`
    async fn action(&self, ctx: &mut PooledContext, name: &str, args: Option<Value>)
        -> Result<Value>;

    async fn action_return_string(
        &self,
        ctx: &mut PooledContext,
        name: &str,
        args: Option<Value>,
    ) -> Result<String> {
        let value = self.action(ctx, name, args).await?;
        serde_json::to_string(&value).map_err(|e| ScriptError::ActionFailed {
            action: name.to_string(),
            reason: e.to_string(),
        })
    }

    async fn load_modules(&self, ctx: &mut PooledContext, names: &[String]) -> Result<()> {
        for name in names {
            ctx.module(name).await?;
        }
        Ok(())
    }

    async fn load_services(&self, ctx: &mut PooledContext, names: &[String]) -> Result<()> {
        for name in names {
            ctx.service(name).await?;
        }
        Ok(())
    }

    async fn get_service(&self, runtime: &RuntimeHandle, name: &str) -> Result<Resolved> {
        runtime.upgrade()?.resolve_service(name).await
    }

    /// Release engine resources; the runtime is being torn down
    async fn shutdown(&self) -> Result<()>;
}
