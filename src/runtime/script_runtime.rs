// src/runtime/script_runtime.rs
//! One initialised script runtime
//!
//! Owns everything a generation of the script host needs: the engine, the
//! context pool, the module and service resolution caches, the `cache`,
//! `app` and `system` namespaces, the privileged set and the resource
//! resolver. Contexts and engines only hold a [`RuntimeHandle`], a weak
//! reference that fails with `ReferenceGone` once the runtime is dropped.
//!
//! Init sequence:
//! 1. validate configuration and build the engine (fails before any pool or cache exists)
//! 2. read module/service descriptors
//! 3. build pool, caches and namespaces; publish the script config under `system["config"]`
//! 4. `engine.init`
//! 5. preload services, then modules

use crate::engine::registry::EngineRegistry;
use crate::engine::{Resolved, ScriptEngine, SetupKind, SetupRequest};
use crate::runtime::allocator::ContextAllocator;
use crate::runtime::context::{PooledContext, RequestMap};
use crate::runtime::context_pool::{ContextPool, ContextPoolConfig};
use crate::runtime::privileged::{PrivilegedSet, SetupId};
use crate::runtime::resolution_cache::ResolutionCache;
use crate::runtime::resource_resolver::{ResourceResolver, SearchPath};
use crate::runtime::shared_state::SharedState;
use crate::runtime::value_cache::ValueCache;
use crate::utils::config::RuntimeConfig;
use crate::utils::errors::{Result, ScriptError};
use crate::utils::script_config::ScriptConfig;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Non-owning reference to a [`ScriptRuntime`]
#[derive(Clone)]
pub struct RuntimeHandle(Weak<ScriptRuntime>);

impl RuntimeHandle {
    /// A handle that never upgrades
    pub fn detached() -> Self {
        Self(Weak::new())
    }

    pub fn upgrade(&self) -> Result<Arc<ScriptRuntime>> {
        self.0.upgrade().ok_or(ScriptError::ReferenceGone)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub fn is_privileged(&self, id: &SetupId) -> Result<bool> {
        Ok(self.upgrade()?.is_privileged_service(id))
    }

    pub fn system(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.upgrade()?.system(key))
    }

    pub async fn resolve_resource(&self, name: &str) -> Result<Option<PathBuf>> {
        Ok(self.upgrade()?.resolve_resource(name).await)
    }
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RuntimeHandle").field(&self.is_alive()).finish()
    }
}

pub struct ScriptRuntime {
    /// Reload generation, starting at 1
    generation: u64,

    /// Configuration this runtime was built from
    config: RuntimeConfig,

    /// Module and service descriptors
    script_config: ScriptConfig,

    /// Engine selected by `config.engine`
    engine: Arc<dyn ScriptEngine>,

    /// Execution contexts
    pool: ContextPool,

    /// Resolved modules by logical name
    modules: ResolutionCache<Resolved>,

    /// Resolved services by logical name
    services: ResolutionCache<Resolved>,

    /// Script-visible `cache` namespace
    cache: ValueCache,

    /// `app` and `system` namespaces
    state: SharedState,

    /// Setup ids currently granted privileged access
    privileged: PrivilegedSet,

    /// Search paths added through `add_classpath`
    resolver: ResourceResolver,
}

impl ScriptRuntime {
    /// Build and initialise a runtime from `config`
    pub async fn init(
        config: RuntimeConfig,
        registry: &EngineRegistry,
        generation: u64,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let engine = registry.create(&config.engine)?;
        let script_config = ScriptConfig::load(&config)?;

        let runtime = Arc::new_cyclic(|weak: &Weak<ScriptRuntime>| {
            let handle = RuntimeHandle(weak.clone());
            ScriptRuntime {
                generation,
                pool: ContextPool::new(
                    ContextPoolConfig::from(&config),
                    ContextAllocator::new(handle),
                ),
                modules: ResolutionCache::new("module", config.resolution_cache_size),
                services: ResolutionCache::new("service", config.resolution_cache_size),
                cache: ValueCache::new(config.cache_size, config.cache_ttl()),
                state: SharedState::new(),
                privileged: PrivilegedSet::new(),
                resolver: ResourceResolver::new(),
                engine,
                script_config,
                config,
            }
        });

        runtime
            .state
            .system
            .set("config", Some(runtime.script_config.to_value()));

        if let Err(e) = runtime.start().await {
            warn!("Runtime initialisation failed: {}", e);
            runtime.abandon().await;
            return Err(e);
        }

        info!(
            "Script runtime generation {} ready (engine {}, pool {})",
            generation,
            runtime.engine.name(),
            runtime.pool.size()
        );
        Ok(runtime)
    }

    async fn start(self: &Arc<Self>) -> Result<()> {
        self.engine.init(self.handle(), &self.script_config).await?;
        self.preload().await
    }

    async fn preload(&self) -> Result<()> {
        let services = &self.script_config.service.preload;
        let modules = &self.script_config.module.preload;
        if services.is_empty() && modules.is_empty() {
            return Ok(());
        }

        let mut ctx = self.pool.claim_default().await?;
        let result = async {
            if !services.is_empty() {
                info!("Preloading {} services", services.len());
                self.engine.load_services(&mut ctx, services).await?;
            }
            if !modules.is_empty() {
                info!("Preloading {} modules", modules.len());
                self.engine.load_modules(&mut ctx, modules).await?;
            }
            Ok(())
        }
        .await;
        self.pool.release(ctx);
        result
    }

    /// Tear down a runtime whose initialisation failed
    async fn abandon(&self) {
        self.pool.shutdown();
        if let Err(e) = self.engine.shutdown().await {
            warn!("Engine shutdown after failed init: {}", e);
        }
        self.resolver.close().await;
        self.clear_state();
    }

    pub fn handle(self: &Arc<Self>) -> RuntimeHandle {
        RuntimeHandle(Arc::downgrade(self))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn script_config(&self) -> &ScriptConfig {
        &self.script_config
    }

    pub fn engine(&self) -> Arc<dyn ScriptEngine> {
        Arc::clone(&self.engine)
    }

    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    pub fn modules(&self) -> &ResolutionCache<Resolved> {
        &self.modules
    }

    pub fn services(&self) -> &ResolutionCache<Resolved> {
        &self.services
    }

    pub fn shared_state(&self) -> &SharedState {
        &self.state
    }

    pub fn privileged(&self) -> &PrivilegedSet {
        &self.privileged
    }

    pub fn resolver(&self) -> &ResourceResolver {
        &self.resolver
    }

    // Namespaces

    pub fn app(&self, key: &str) -> Option<Value> {
        self.state.app.get(key)
    }

    pub fn set_app(&self, key: &str, value: Option<Value>) -> Option<Value> {
        self.state.app.set(key, value)
    }

    pub fn system(&self, key: &str) -> Option<Value> {
        self.state.system.get(key)
    }

    pub fn set_system(&self, key: &str, value: Option<Value>) -> Option<Value> {
        self.state.system.set(key, value)
    }

    pub fn cache(&self, key: &str) -> Option<Value> {
        self.cache.get(key)
    }

    pub fn set_cache(&self, key: &str, value: Option<Value>) {
        self.cache.set(key, value)
    }

    pub fn value_cache(&self) -> &ValueCache {
        &self.cache
    }

    /// Resident module, without setting it up
    pub fn module(&self, key: &str) -> Option<Resolved> {
        self.modules.get(key)
    }

    pub fn set_module(&self, key: &str, value: Option<Resolved>) {
        self.modules.put(key, value)
    }

    /// Resident service, without setting it up
    pub fn service(&self, key: &str) -> Option<Resolved> {
        self.services.get(key)
    }

    pub fn set_service(&self, key: &str, value: Option<Resolved>) {
        self.services.put(key, value)
    }

    // Resolution

    /// Resolve a module, running its setup at most once per key
    pub async fn resolve_module(self: &Arc<Self>, name: &str) -> Result<Resolved> {
        let descriptor = &self.script_config.module;
        if !descriptor.permits(name) {
            return Err(denied(SetupKind::Module, name));
        }

        let request = SetupRequest::new(SetupKind::Module, name, descriptor);
        let runtime = Arc::clone(self);

        self.modules
            .get_or_compute(name, move || async move {
                metrics::counter!("scripthost_setups_total", "kind" => "module").increment(1);
                let handle = runtime.handle();
                let name = request.name.clone();
                let resolved = runtime.engine.setup_module(&handle, request).await?;
                resolved.ok_or_else(|| no_value(SetupKind::Module, &name))
            })
            .await
    }

    /// Resolve a service, running its setup at most once per key
    ///
    /// A setup for a name listed in `privilegedServices` runs with a
    /// freshly granted setup id, revoked as soon as the setup returns or its
    /// future is dropped.
    pub async fn resolve_service(self: &Arc<Self>, name: &str) -> Result<Resolved> {
        let descriptor = &self.script_config.service;
        if !descriptor.permits(name) {
            return Err(denied(SetupKind::Service, name));
        }

        let privileged = descriptor.is_privileged(name);
        let request = SetupRequest::new(SetupKind::Service, name, descriptor);
        let runtime = Arc::clone(self);

        self.services
            .get_or_compute(name, move || async move {
                metrics::counter!("scripthost_setups_total", "kind" => "service").increment(1);
                let setup_id = SetupId::new();
                let grant = privileged.then(|| runtime.privileged.grant_scoped(setup_id.clone()));

                let handle = runtime.handle();
                let name = request.name.clone();
                debug!("Setting up service {} (setup {})", name, setup_id);
                let result = runtime
                    .engine
                    .setup_service(&handle, request.with_setup_id(setup_id))
                    .await;

                drop(grant);
                result?.ok_or_else(|| no_value(SetupKind::Service, &name))
            })
            .await
    }

    /// Resolve a service through the engine
    pub async fn get_service(self: &Arc<Self>, name: &str) -> Result<Resolved> {
        self.engine.get_service(&self.handle(), name).await
    }

    // Actions

    /// Claim a context, run `action` on it and release it
    pub async fn action(
        &self,
        action: &str,
        args: Option<Value>,
        request: Option<RequestMap>,
    ) -> Result<Value> {
        let mut ctx = self.claim_for(request).await?;
        let result = ctx.call(action, args).await;
        self.pool.release(ctx);
        result
    }

    /// Like [`action`](Self::action), returning the result serialised as JSON
    pub async fn action_return_string(
        &self,
        action: &str,
        args: Option<Value>,
        request: Option<RequestMap>,
    ) -> Result<String> {
        let mut ctx = self.claim_for(request).await?;
        let result = ctx.call_return_string(action, args).await;
        self.pool.release(ctx);
        result
    }

    async fn claim_for(&self, request: Option<RequestMap>) -> Result<PooledContext> {
        let mut ctx = self.pool.claim_default().await?;
        ctx.set_request(request);
        Ok(ctx)
    }

    // Privileged services

    pub fn add_privileged_service(&self, id: SetupId) {
        self.privileged.grant(id)
    }

    pub fn remove_privileged_service(&self, id: &SetupId) {
        self.privileged.revoke(id)
    }

    pub fn clear_privileged_services(&self) {
        self.privileged.clear()
    }

    pub fn is_privileged_service(&self, id: &SetupId) -> bool {
        self.privileged.is_privileged(id)
    }

    // Resources

    pub async fn add_classpath(&self, path: impl AsRef<Path>) -> Result<Vec<SearchPath>> {
        self.resolver.add_path(path).await
    }

    pub async fn resolve_resource(&self, name: &str) -> Option<PathBuf> {
        self.resolver.resolve(name).await
    }

    // Teardown steps, run in order by the reload coordinator

    /// Close the pool and wait for every claimed context to come back
    pub(crate) async fn shutdown_pool(&self) {
        self.pool.shutdown();
        self.pool.drain().await;
    }

    pub(crate) async fn shutdown_engine(&self) -> Result<()> {
        self.engine.shutdown().await
    }

    pub(crate) async fn close_resolver(&self) {
        self.resolver.close().await
    }

    pub(crate) fn clear_state(&self) {
        self.modules.invalidate_all();
        self.services.invalidate_all();
        self.cache.invalidate_all();
        self.state.clear();
        self.privileged.clear();
    }
}

fn denied(kind: SetupKind, name: &str) -> ScriptError {
    ScriptError::ResolutionFailed {
        kind: kind.as_str(),
        name: name.to_string(),
        reason: "denied by configuration".to_string(),
    }
}

fn no_value(kind: SetupKind, name: &str) -> ScriptError {
    ScriptError::ResolutionFailed {
        kind: kind.as_str(),
        name: name.to_string(),
        reason: "setup returned no value".to_string(),
    }
}
