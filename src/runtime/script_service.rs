// src/runtime/script_service.rs
//! Reload coordinator
//!
//! Holds the current [`ScriptRuntime`] and replaces it on `reload`:
//!
//! ```text
//! Running -> Draining -> Reinitializing -> Running
//!                                       -> Failed
//! ```
//!
//! Teardown order: pool (waits for claimed contexts), engine, resource
//! resolver, caches / shared state / privileged set. Reinitialisation runs
//! the normal init sequence from the retained configuration. A failed
//! reinitialisation leaves the service `Failed` with no runtime until a
//! later reload succeeds. Only one reload runs at a time.
//!
//! Dropping a `reload` or `shutdown` future part way (for example while it
//! waits for claimed contexts to drain) marks the service `Failed`. The
//! previous runtime is released without an engine shutdown and the next
//! `reload` builds a fresh generation.

use crate::engine::registry::EngineRegistry;
use crate::engine::Resolved;
use crate::runtime::context::RequestMap;
use crate::runtime::context_pool::PoolStats;
use crate::runtime::resource_resolver::SearchPath;
use crate::runtime::script_runtime::ScriptRuntime;
use crate::utils::config::RuntimeConfig;
use crate::utils::errors::{Result, ScriptError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadState {
    Running,
    Draining,
    Reinitializing,
    Failed(String),
    Stopped,
}

impl fmt::Display for ReloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadState::Running => f.write_str("running"),
            ReloadState::Draining => f.write_str("draining"),
            ReloadState::Reinitializing => f.write_str("reinitializing"),
            ReloadState::Failed(reason) => write!(f, "failed: {}", reason),
            ReloadState::Stopped => f.write_str("stopped"),
        }
    }
}

/// Point-in-time view of the service
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub state: ReloadState,
    pub generation: u64,
    pub reloads: u64,
    pub started_at: DateTime<Utc>,
    pub last_reload_at: Option<DateTime<Utc>>,
    pub pool: Option<PoolStats>,
}

pub struct ScriptService {
    config: RuntimeConfig,
    registry: EngineRegistry,
    current: RwLock<Option<Arc<ScriptRuntime>>>,
    state: RwLock<ReloadState>,
    reload_lock: Mutex<()>,
    generation: AtomicU64,
    reloads: AtomicU64,
    started_at: DateTime<Utc>,
    last_reload_at: RwLock<Option<DateTime<Utc>>>,
}

impl ScriptService {
    /// Initialise the first runtime generation
    pub async fn init(config: RuntimeConfig, registry: EngineRegistry) -> Result<Self> {
        info!("Initializing script service (engine {})", config.engine);
        let runtime = ScriptRuntime::init(config.clone(), &registry, 1).await?;

        Ok(Self {
            config,
            registry,
            current: RwLock::new(Some(runtime)),
            state: RwLock::new(ReloadState::Running),
            reload_lock: Mutex::new(()),
            generation: AtomicU64::new(1),
            reloads: AtomicU64::new(0),
            started_at: Utc::now(),
            last_reload_at: RwLock::new(None),
        })
    }

    /// Current runtime, or `RuntimeUnavailable` while reloading, failed or stopped
    pub fn runtime(&self) -> Result<Arc<ScriptRuntime>> {
        if let Some(runtime) = self.current.read().as_ref() {
            return Ok(Arc::clone(runtime));
        }
        Err(ScriptError::RuntimeUnavailable(self.state().to_string()))
    }

    pub fn state(&self) -> ReloadState {
        self.state.read().clone()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ReloadState) {
        info!("Script service state: {}", state);
        *self.state.write() = state;
    }

    /// Tear the current runtime down and initialise a fresh one
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.reload_lock.lock().await;

        if self.state() == ReloadState::Stopped {
            return Err(ScriptError::RuntimeUnavailable(
                ReloadState::Stopped.to_string(),
            ));
        }

        let start = Instant::now();
        info!("Reloading script runtime");
        let mut interrupted = self.interruption_guard();

        self.set_state(ReloadState::Draining);
        let previous = self.current.write().take();
        if let Some(runtime) = previous {
            Self::teardown(&runtime).await;
        }

        self.set_state(ReloadState::Reinitializing);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.reloads.fetch_add(1, Ordering::Relaxed);

        let initialised = ScriptRuntime::init(self.config.clone(), &self.registry, generation).await;
        interrupted.disarm();

        match initialised {
            Ok(runtime) => {
                *self.current.write() = Some(runtime);
                *self.last_reload_at.write() = Some(Utc::now());
                self.set_state(ReloadState::Running);
                metrics::counter!("scripthost_reloads_total", "result" => "ok").increment(1);
                info!(
                    "Reload complete (generation {}) in {:?}",
                    generation,
                    start.elapsed()
                );
                Ok(())
            }
            Err(e) => {
                error!("Reload failed: {}", e);
                self.set_state(ReloadState::Failed(e.to_string()));
                metrics::counter!("scripthost_reloads_total", "result" => "failed").increment(1);
                Err(e)
            }
        }
    }

    /// Tear the runtime down without reinitialising
    pub async fn shutdown(&self) {
        let _guard = self.reload_lock.lock().await;
        if self.state() == ReloadState::Stopped {
            return;
        }

        info!("Shutting down script service");
        let mut interrupted = self.interruption_guard();
        self.set_state(ReloadState::Draining);
        let previous = self.current.write().take();
        if let Some(runtime) = previous {
            Self::teardown(&runtime).await;
        }
        interrupted.disarm();
        self.set_state(ReloadState::Stopped);
    }

    fn interruption_guard(&self) -> Interrupted<'_> {
        Interrupted {
            state: &self.state,
            armed: true,
        }
    }

    async fn teardown(runtime: &ScriptRuntime) {
        runtime.shutdown_pool().await;
        if let Err(e) = runtime.shutdown_engine().await {
            warn!("Engine shutdown failed: {}", e);
        }
        runtime.close_resolver().await;
        runtime.clear_state();
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            state: self.state(),
            generation: self.generation(),
            reloads: self.reloads.load(Ordering::Relaxed),
            started_at: self.started_at,
            last_reload_at: *self.last_reload_at.read(),
            pool: self.current.read().as_ref().map(|rt| rt.pool().stats()),
        }
    }

    // Delegating entry points

    pub async fn action(
        &self,
        action: &str,
        args: Option<Value>,
        request: Option<RequestMap>,
    ) -> Result<Value> {
        self.runtime()?.action(action, args, request).await
    }

    pub async fn action_return_string(
        &self,
        action: &str,
        args: Option<Value>,
        request: Option<RequestMap>,
    ) -> Result<String> {
        self.runtime()?
            .action_return_string(action, args, request)
            .await
    }

    pub async fn get_service(&self, name: &str) -> Result<Resolved> {
        self.runtime()?.get_service(name).await
    }

    pub async fn add_classpath(&self, path: impl AsRef<Path>) -> Result<Vec<SearchPath>> {
        self.runtime()?.add_classpath(path).await
    }
}

/// Marks the service `Failed` if a reload or shutdown is dropped before it finishes
struct Interrupted<'a> {
    state: &'a RwLock<ReloadState>,
    armed: bool,
}

impl Interrupted<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Interrupted<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Reload interrupted, runtime unavailable until the next reload");
            *self.state.write() = ReloadState::Failed("reload interrupted".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::native::{native, NativeCatalog, NativeModule};
    use crate::engine::SetupRequest;
    use crate::runtime::context::{request_map, PooledContext};
    use crate::runtime::script_runtime::RuntimeHandle;
    use serde_json::json;
    use std::fs;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    struct Alert;

    #[async_trait::async_trait]
    impl NativeModule for Alert {
        async fn call(
            &self,
            method: &str,
            args: Option<Value>,
            ctx: &mut PooledContext,
        ) -> Result<Value> {
            match method {
                "test" => Ok(json!("ok")),
                "remember" => {
                    ctx.set_app("last", args)?;
                    Ok(Value::Null)
                }
                "user" => Ok(ctx.req("user").unwrap_or(Value::Null)),
                _ => Err(ScriptError::ActionFailed {
                    action: method.to_string(),
                    reason: "unknown method".to_string(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct BillingLog {
        billing_setups: AtomicUsize,
        billing_privileged: AtomicBool,
    }

    fn registry(log: Arc<BillingLog>) -> EngineRegistry {
        let catalog = NativeCatalog::new()
            .module("Alert", |_req, _rt| async { Ok(Some(native(Alert))) })
            .service("Metrics", |_req, _rt| async { Ok(Some(native(Alert))) })
            .service("Billing", move |req: SetupRequest, rt: RuntimeHandle| {
                let log = Arc::clone(&log);
                async move {
                    log.billing_setups.fetch_add(1, Ordering::SeqCst);
                    if let Some(id) = &req.setup_id {
                        if rt.is_privileged(id)? {
                            log.billing_privileged.store(true, Ordering::SeqCst);
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, ScriptError>(Some(native(Alert)))
                }
            });
        EngineRegistry::with_native(catalog)
    }

    fn fixture(dir: &Path) -> RuntimeConfig {
        let scripts = dir.join("scripts");
        fs::create_dir_all(&scripts).unwrap();
        fs::write(scripts.join("module_conf.json"), r#"{"preload": ["Alert"]}"#).unwrap();
        fs::write(
            scripts.join("service_conf.json"),
            r#"{"preload": ["Metrics"], "privilegedServices": ["Billing"]}"#,
        )
        .unwrap();
        RuntimeConfig {
            config_path: dir.to_path_buf(),
            scripts_path: scripts,
            pool_size: 2,
            claim_timeout_ms: 1000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_privileged_service_set_up_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(BillingLog::default());
        let service = ScriptService::init(fixture(dir.path()), registry(Arc::clone(&log)))
            .await
            .unwrap();

        let (a, b) = tokio::join!(service.get_service("Billing"), service.get_service("Billing"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));

        let runtime = service.runtime().unwrap();
        assert_eq!(log.billing_setups.load(Ordering::SeqCst), 1);
        assert!(log.billing_privileged.load(Ordering::SeqCst));
        assert_eq!(runtime.privileged().grants(), 1);
        assert!(runtime.privileged().is_empty());
    }

    #[tokio::test]
    async fn test_sequential_reloads_reset_state() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScriptService::init(fixture(dir.path()), registry(Arc::default()))
            .await
            .unwrap();

        service
            .action("Alert.remember", Some(json!(42)), None)
            .await
            .unwrap();
        {
            let runtime = service.runtime().unwrap();
            assert_eq!(runtime.app("last"), Some(json!(42)));
            runtime.set_cache("k", Some(json!("v")));
        }

        service.reload().await.unwrap();
        service.reload().await.unwrap();

        let runtime = service.runtime().unwrap();
        assert_eq!(runtime.generation(), 3);
        assert_eq!(runtime.app("last"), None);
        assert_eq!(runtime.cache("k"), None);
        assert!(runtime.privileged().is_empty());
        assert!(runtime.module("Alert").is_some());
        assert!(runtime.service("Metrics").is_some());
        assert!(runtime.system("config").is_some());

        let status = service.status();
        assert_eq!(status.state, ReloadState::Running);
        assert_eq!(status.reloads, 2);
        assert!(status.last_reload_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_reload_leaves_service_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path());
        let service = ScriptService::init(config.clone(), registry(Arc::default()))
            .await
            .unwrap();

        let module_conf = config.module_conf_path();
        fs::remove_file(&module_conf).unwrap();

        let err = service.reload().await.unwrap_err();
        assert!(matches!(err, ScriptError::Io { .. }));
        assert!(matches!(service.state(), ReloadState::Failed(_)));
        assert!(matches!(
            service.runtime(),
            Err(ScriptError::RuntimeUnavailable(_))
        ));
        assert!(matches!(
            service.action("Alert.test", None, None).await,
            Err(ScriptError::RuntimeUnavailable(_))
        ));

        fs::write(&module_conf, r#"{"preload": ["Alert"]}"#).unwrap();
        service.reload().await.unwrap();
        assert_eq!(service.state(), ReloadState::Running);
        assert_eq!(
            service.action("Alert.test", None, None).await.unwrap(),
            json!("ok")
        );
    }

    #[tokio::test]
    async fn test_handle_outliving_reload_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScriptService::init(fixture(dir.path()), registry(Arc::default()))
            .await
            .unwrap();

        let handle = service.runtime().unwrap().handle();
        assert!(handle.upgrade().is_ok());

        service.reload().await.unwrap();
        assert!(matches!(handle.upgrade(), Err(ScriptError::ReferenceGone)));
        assert!(matches!(
            handle.system("config"),
            Err(ScriptError::ReferenceGone)
        ));
    }

    #[tokio::test]
    async fn test_action_sees_external_request_map() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScriptService::init(fixture(dir.path()), registry(Arc::default()))
            .await
            .unwrap();

        let request = request_map();
        request.lock().insert("user".to_string(), json!("alice"));

        let value = service
            .action("Alert.user", None, Some(Arc::clone(&request)))
            .await
            .unwrap();
        assert_eq!(value, json!("alice"));

        // The next caller without a request map must not see it
        let value = service.action("Alert.user", None, None).await.unwrap();
        assert_eq!(value, Value::Null);

        let text = service
            .action_return_string("Alert.test", None, None)
            .await
            .unwrap();
        assert_eq!(text, "\"ok\"");
    }

    #[tokio::test]
    async fn test_concurrent_reloads_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScriptService::init(fixture(dir.path()), registry(Arc::default()))
            .await
            .unwrap();

        let (a, b) = tokio::join!(service.reload(), service.reload());
        a.unwrap();
        b.unwrap();
        assert_eq!(service.generation(), 3);
        assert_eq!(service.runtime().unwrap().generation(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_stops_service() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScriptService::init(fixture(dir.path()), registry(Arc::default()))
            .await
            .unwrap();

        service.shutdown().await;
        service.shutdown().await;
        assert_eq!(service.state(), ReloadState::Stopped);
        assert!(service.status().pool.is_none());
        assert!(matches!(
            service.reload().await,
            Err(ScriptError::RuntimeUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_interrupted_reload_marks_service_failed() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScriptService::init(fixture(dir.path()), registry(Arc::default()))
            .await
            .unwrap();

        let held = service.runtime().unwrap().pool().claim_default().await.unwrap();

        // Drain never finishes while `held` is out
        let reload = tokio::time::timeout(Duration::from_millis(50), service.reload()).await;
        assert!(reload.is_err());

        assert!(matches!(service.state(), ReloadState::Failed(_)));
        assert!(matches!(
            service.runtime(),
            Err(ScriptError::RuntimeUnavailable(_))
        ));

        drop(held);
        service.reload().await.unwrap();
        assert_eq!(service.state(), ReloadState::Running);
        assert_eq!(
            service.action("Alert.test", None, None).await.unwrap(),
            json!("ok")
        );
    }

    #[tokio::test]
    async fn test_classpath_directory_becomes_resolvable() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScriptService::init(fixture(dir.path()), registry(Arc::default()))
            .await
            .unwrap();

        let lib = dir.path().join("lib");
        fs::create_dir_all(&lib).unwrap();
        fs::write(lib.join("util.js"), "// util").unwrap();

        service.add_classpath(&lib).await.unwrap();
        let runtime = service.runtime().unwrap();
        assert_eq!(
            runtime.resolve_resource("util.js").await,
            Some(lib.join("util.js"))
        );

        let missing = dir.path().join("missing.jar");
        let err = service.add_classpath(&missing).await.unwrap_err();
        assert!(matches!(err, ScriptError::ClasspathNotFound(_)));
        assert!(err.to_string().contains("missing.jar"));
    }
}
