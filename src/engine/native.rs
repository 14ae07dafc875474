// src/engine/native.rs
//! Built-in engine backed by Rust modules and services
//!
//! Modules and services are registered as async factories in a
//! [`NativeCatalog`]. An action `"Module.method"` resolves `Module` through
//! the context (set up once, then cached) and invokes `method` on it.
//!
//! ```ignore
//! let catalog = NativeCatalog::new()
//!     .module("Alert", |_req, _rt| async { Ok(Some(native(AlertModule))) })
//!     .service("Billing", |req, rt| async move {
//!         let privileged = match &req.setup_id {
//!             Some(id) => rt.is_privileged(id)?,
//!             None => false,
//!         };
//!         Ok(Some(native(BillingService::new(privileged))))
//!     });
//! let registry = EngineRegistry::with_native(catalog);
//! ```

use crate::engine::{Resolved, ScriptEngine, SetupRequest};
use crate::runtime::context::PooledContext;
use crate::runtime::script_runtime::RuntimeHandle;
use crate::utils::config::DEFAULT_ENGINE;
use crate::utils::errors::{Result, ScriptError};
use crate::utils::script_config::ScriptConfig;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A module or service implemented in Rust
#[async_trait]
pub trait NativeModule: Send + Sync {
    async fn call(&self, method: &str, args: Option<Value>, ctx: &mut PooledContext)
        -> Result<Value>;
}

/// Resolved wrapper stored in the resolution caches
struct NativeHandle(Arc<dyn NativeModule>);

/// Wrap a native module as a resolved value
pub fn native<M: NativeModule + 'static>(module: M) -> Arc<dyn NativeModule> {
    Arc::new(module)
}

type SetupFuture = BoxFuture<'static, Result<Option<Arc<dyn NativeModule>>>>;
type NativeFactory = Arc<dyn Fn(SetupRequest, RuntimeHandle) -> SetupFuture + Send + Sync>;

/// Registered native modules and services
#[derive(Clone, Default)]
pub struct NativeCatalog {
    modules: HashMap<String, NativeFactory>,
    services: HashMap<String, NativeFactory>,
}

impl NativeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module factory under its script name
    pub fn module<F, Fut>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(SetupRequest, RuntimeHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Arc<dyn NativeModule>>>> + Send + 'static,
    {
        self.modules
            .insert(name.into(), Arc::new(move |req, rt| factory(req, rt).boxed()));
        self
    }

    /// Register a service factory under its script name
    pub fn service<F, Fut>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(SetupRequest, RuntimeHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Arc<dyn NativeModule>>>> + Send + 'static,
    {
        self.services
            .insert(name.into(), Arc::new(move |req, rt| factory(req, rt).boxed()));
        self
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }
}

pub struct NativeEngine {
    catalog: Arc<NativeCatalog>,
    initialized: AtomicBool,
    shut_down: AtomicBool,
}

impl NativeEngine {
    pub fn new(catalog: Arc<NativeCatalog>) -> Self {
        Self {
            catalog,
            initialized: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Extract the native module behind a resolved value
    pub fn module_of(resolved: &Resolved) -> Option<Arc<dyn NativeModule>> {
        resolved
            .downcast_ref::<NativeHandle>()
            .map(|handle| Arc::clone(&handle.0))
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    async fn run_factory(
        factory: Option<&NativeFactory>,
        runtime: &RuntimeHandle,
        request: SetupRequest,
    ) -> Result<Option<Resolved>> {
        let Some(factory) = factory else {
            debug!("No native {} registered for {}", request.kind, request.script_name);
            return Ok(None);
        };

        let module = factory(request, runtime.clone()).await?;
        Ok(module.map(|m| Arc::new(NativeHandle(m)) as Resolved))
    }
}

/// Split "Module.method" at the last dot
pub fn split_action(action: &str) -> Result<(&str, &str)> {
    match action.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < action.len() => Ok((&action[..idx], &action[idx + 1..])),
        _ => Err(ScriptError::InvalidAction(action.to_string())),
    }
}

#[async_trait]
impl ScriptEngine for NativeEngine {
    fn name(&self) -> &str {
        DEFAULT_ENGINE
    }

    async fn init(&self, _runtime: RuntimeHandle, config: &ScriptConfig) -> Result<()> {
        self.initialized.store(true, Ordering::SeqCst);
        info!(
            "Native engine ready ({} modules, {} services registered; scripts at {})",
            self.catalog.modules.len(),
            self.catalog.services.len(),
            config.config.scripts_path.display()
        );
        Ok(())
    }

    async fn setup_module(
        &self,
        runtime: &RuntimeHandle,
        request: SetupRequest,
    ) -> Result<Option<Resolved>> {
        let factory = self.catalog.modules.get(&request.script_name);
        Self::run_factory(factory, runtime, request).await
    }

    async fn setup_service(
        &self,
        runtime: &RuntimeHandle,
        request: SetupRequest,
    ) -> Result<Option<Resolved>> {
        let factory = self.catalog.services.get(&request.script_name);
        Self::run_factory(factory, runtime, request).await
    }

    async fn action(
        &self,
        ctx: &mut PooledContext,
        name: &str,
        args: Option<Value>,
    ) -> Result<Value> {
        let (module_name, method) = split_action(name)?;

        let resolved = ctx.module(module_name).await?;
        let module = Self::module_of(&resolved).ok_or_else(|| ScriptError::ActionFailed {
            action: name.to_string(),
            reason: format!("{} is not a native module", module_name),
        })?;

        module.call(method, args, ctx).await
    }

    async fn shutdown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        debug!("Native engine shut down");
        Ok(())
    }
}
