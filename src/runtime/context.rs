// src/runtime/context.rs
//! Pooled script execution context
//!
//! A context is one reusable unit of request state. It holds:
//! - a non-owning handle back to its runtime (the runtime may be reloaded
//!   or dropped while contexts drain; access then fails with `ReferenceGone`)
//! - a per-request scratch map, or an externally supplied request map that
//!   shadows it
//! - the stack of actions currently executing on it
//!
//! Lifecycle: allocated when the pool grows, `recycle`d on every release,
//! `cleanup`ed when the pool shuts down.

use crate::engine::Resolved;
use crate::runtime::context_pool::Lease;
use crate::runtime::privileged::SetupId;
use crate::runtime::resource_resolver::SearchPath;
use crate::runtime::script_runtime::{RuntimeHandle, ScriptRuntime};
use crate::utils::errors::{Result, ScriptError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, debug_span, Instrument};

/// Request map owned by the caller of an action
pub type RequestMap = Arc<Mutex<HashMap<String, Value>>>;

/// Build an empty external request map
pub fn request_map() -> RequestMap {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Reusable unit of request state handed out by the pool
pub struct PooledContext {
    /// Context identifier, unique within its pool
    id: usize,

    /// Pool that allocated this context
    pool_id: u64,

    /// Back-reference to the owning runtime; `None` after cleanup
    runtime: Option<RuntimeHandle>,

    /// Per-request scratch map, cleared on recycle
    request: HashMap<String, Value>,

    /// Caller-supplied request map, shadows `request` while attached
    external: Option<RequestMap>,

    /// Actions currently executing, innermost last
    call_stack: Vec<String>,

    /// Top-level actions run on this context
    execution_count: u64,

    /// Present while claimed
    pub(crate) lease: Option<Lease>,
}

impl PooledContext {
    pub(crate) fn new(id: usize, pool_id: u64, runtime: RuntimeHandle) -> Self {
        Self {
            id,
            pool_id,
            runtime: Some(runtime),
            request: HashMap::new(),
            external: None,
            call_stack: Vec::new(),
            execution_count: 0,
            lease: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }

    /// Number of top-level actions executed on this context
    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    /// False once `cleanup` has run
    pub fn is_valid(&self) -> bool {
        self.runtime.is_some()
    }

    /// Upgrade the back-reference to the owning runtime
    pub fn runtime(&self) -> Result<Arc<ScriptRuntime>> {
        self.runtime
            .as_ref()
            .ok_or(ScriptError::ReferenceGone)?
            .upgrade()
    }

    pub fn handle(&self) -> Result<RuntimeHandle> {
        self.runtime.clone().ok_or(ScriptError::ReferenceGone)
    }

    // Shared namespaces

    pub fn app(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.runtime()?.app(key))
    }

    pub fn set_app(&self, key: &str, value: Option<Value>) -> Result<Option<Value>> {
        Ok(self.runtime()?.set_app(key, value))
    }

    pub fn system(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.runtime()?.system(key))
    }

    pub fn set_system(&self, key: &str, value: Option<Value>) -> Result<Option<Value>> {
        Ok(self.runtime()?.set_system(key, value))
    }

    pub fn cache(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.runtime()?.cache(key))
    }

    pub fn set_cache(&self, key: &str, value: Option<Value>) -> Result<()> {
        self.runtime()?.set_cache(key, value);
        Ok(())
    }

    /// Resolve a module, setting it up on first use
    pub async fn module(&self, name: &str) -> Result<Resolved> {
        self.runtime()?.resolve_module(name).await
    }

    /// Resolve a service, setting it up on first use
    pub async fn service(&self, name: &str) -> Result<Resolved> {
        self.runtime()?.resolve_service(name).await
    }

    pub fn is_privileged(&self, id: &SetupId) -> Result<bool> {
        Ok(self.runtime()?.is_privileged_service(id))
    }

    pub async fn add_classpath(&self, path: impl AsRef<Path>) -> Result<Vec<SearchPath>> {
        self.runtime()?.add_classpath(path).await
    }

    // Request scope

    /// Read a request value; the external map shadows the scratch map
    pub fn req(&self, key: &str) -> Option<Value> {
        match &self.external {
            Some(external) => external.lock().get(key).cloned(),
            None => self.request.get(key).cloned(),
        }
    }

    /// Write a request value and return the previous one; `None` deletes
    pub fn set_req(&mut self, key: &str, value: Option<Value>) -> Option<Value> {
        match &self.external {
            Some(external) => {
                let mut map = external.lock();
                match value {
                    Some(v) => map.insert(key.to_string(), v),
                    None => map.remove(key),
                }
            }
            None => match value {
                Some(v) => self.request.insert(key.to_string(), v),
                None => self.request.remove(key),
            },
        }
    }

    /// Install (or detach with `None`) an external request map
    pub fn set_request(&mut self, request: Option<RequestMap>) {
        self.external = request;
    }

    pub fn has_external_request(&self) -> bool {
        self.external.is_some()
    }

    // Actions

    /// Run `action` ("Module.method") through the engine on this context
    pub async fn call(&mut self, action: &str, args: Option<Value>) -> Result<Value> {
        let runtime = self.runtime()?;
        let engine = runtime.engine();

        if self.call_stack.is_empty() {
            self.execution_count += 1;
        }
        let span = debug_span!(
            "action",
            context = self.id,
            action,
            depth = self.call_stack.len()
        );
        self.call_stack.push(action.to_string());

        let result = engine.action(self, action, args).instrument(span).await;

        self.call_stack.pop();
        result
    }

    /// Run `action` and return its result as a JSON string
    pub async fn call_return_string(&mut self, action: &str, args: Option<Value>) -> Result<String> {
        let runtime = self.runtime()?;
        let engine = runtime.engine();

        if self.call_stack.is_empty() {
            self.execution_count += 1;
        }
        self.call_stack.push(action.to_string());
        let result = engine.action_return_string(self, action, args).await;
        self.call_stack.pop();
        result
    }

    /// Depth of the innermost running action, -1 when idle
    pub fn call_depth(&self) -> isize {
        self.call_stack.len() as isize - 1
    }

    pub fn current_action(&self) -> Option<&str> {
        self.call_stack.last().map(String::as_str)
    }

    // Lifecycle

    /// Reset request-scoped state before the context is reused
    pub fn recycle(&mut self) {
        self.request.clear();
        self.external = None;
        self.call_stack.clear();
    }

    /// Permanently invalidate this context
    pub fn cleanup(&mut self) {
        debug!("Cleaning up context #{}", self.id);
        self.request.clear();
        self.external = None;
        self.call_stack.clear();
        self.runtime = None;
    }
}

impl std::fmt::Debug for PooledContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledContext")
            .field("id", &self.id)
            .field("valid", &self.is_valid())
            .field("request_keys", &self.request.len())
            .field("external", &self.external.is_some())
            .field("depth", &self.call_depth())
            .finish()
    }
}
