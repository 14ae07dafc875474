// src/lib.rs
//! Script Host Runtime Library
//!
//! This library hosts pluggable script engines behind a pool of reusable
//! execution contexts, resolves modules and services lazily through
//! single-flight caches, and can atomically tear down and rebuild its whole
//! runtime state on reload.
//!
//! # Architecture
//!
//! The host is structured into several key modules:
//!
//! - **runtime**: context pool, resolution caches, shared namespaces,
//!   privileged set, resource resolver, runtime and reload coordinator
//! - **engine**: the script engine boundary, engine registry and the
//!   built-in native engine
//! - **observability**: tracing and metrics initialisation
//! - **utils**: configuration, descriptors and errors

// Public module exports
pub mod engine;
pub mod observability;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use engine::{EngineRegistry, NativeCatalog, NativeModule, ScriptEngine};
pub use runtime::script_runtime::{RuntimeHandle, ScriptRuntime};
pub use runtime::script_service::{ReloadState, ScriptService};
pub use utils::config::RuntimeConfig;
pub use utils::errors::{Result, ScriptError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Host build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = BuildInfo::current();
        assert!(!info.version.is_empty());
        assert!(!info.git_hash.is_empty());
    }
}
