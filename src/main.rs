// src/main.rs
//! Script Host
//!
//! Loads the `[main]` section of an ini file (`SCRIPTHOST_CONFIG`, default
//! `config.ini`), initialises the script service and either runs one action
//!
//! ```text
//! scripthost Alert.out '"abcdefg"'
//! ```
//!
//! or keeps the runtime up until Ctrl-C, reloading it on SIGHUP.

use anyhow::{Context, Result};
use async_trait::async_trait;
use scripthost::engine::native::{native, NativeCatalog, NativeModule};
use scripthost::observability::{init_metrics, init_tracing};
use scripthost::runtime::context::PooledContext;
use scripthost::{BuildInfo, EngineRegistry, RuntimeConfig, ScriptError, ScriptService};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

const CONFIG_ENV: &str = "SCRIPTHOST_CONFIG";

/// Built-in `Host` module exposing host information to scripts
struct HostModule;

#[async_trait]
impl NativeModule for HostModule {
    async fn call(
        &self,
        method: &str,
        args: Option<Value>,
        ctx: &mut PooledContext,
    ) -> scripthost::Result<Value> {
        match method {
            "echo" => Ok(args.unwrap_or(Value::Null)),
            "info" => {
                let build = BuildInfo::current();
                Ok(json!({
                    "version": build.version,
                    "git_hash": build.git_hash,
                    "context": ctx.id(),
                    "generation": ctx.runtime()?.generation(),
                }))
            }
            _ => Err(ScriptError::ActionFailed {
                action: format!("Host.{}", method),
                reason: "unknown method".to_string(),
            }),
        }
    }
}

fn registry() -> EngineRegistry {
    EngineRegistry::with_native(
        NativeCatalog::new().module("Host", |_req, _rt| async { Ok(Some(native(HostModule))) }),
    )
}

fn parse_args(raw: Option<String>) -> Option<Value> {
    raw.map(|s| serde_json::from_str(&s).unwrap_or(Value::String(s)))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let _metrics = init_metrics()?;

    let build = BuildInfo::current();
    info!(
        "Starting Script Host v{} ({}, {})",
        build.version, build.git_hash, build.rustc_version
    );

    let config_file = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "config.ini".to_string());
    let config = RuntimeConfig::load(&config_file)
        .with_context(|| format!("loading configuration from {}", config_file))?;
    info!("Configuration loaded: {:?}", config);

    let service = Arc::new(ScriptService::init(config, registry()).await?);

    let mut args = std::env::args().skip(1);
    if let Some(action) = args.next() {
        let output = service
            .action_return_string(&action, parse_args(args.next()), None)
            .await;
        service.shutdown().await;
        println!("{}", output?);
        return Ok(());
    }

    spawn_reload_handler(Arc::clone(&service));

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("Received shutdown signal, cleaning up...");
    service.shutdown().await;
    Ok(())
}

#[cfg(unix)]
fn spawn_reload_handler(service: Arc<ScriptService>) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to register SIGHUP handler: {}", e);
                return;
            }
        };

        while sighup.recv().await.is_some() {
            info!("Received SIGHUP, reloading script runtime");
            match service.reload().await {
                Ok(()) => info!("Runtime generation {} running", service.generation()),
                Err(e) => error!("Reload failed, runtime unavailable: {}", e),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_handler(_service: Arc<ScriptService>) {
    tracing::warn!("SIGHUP reload not supported on this platform");
}
