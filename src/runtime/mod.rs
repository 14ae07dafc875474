// src/runtime/mod.rs
//! Script execution runtime
//!
//! This module provides the script host core, including:
//!
//! - **Context Pool**: fixed set of reusable execution contexts
//! - **Resolution Cache**: single-flight, bounded cache for modules and services
//! - **Value Cache**: the bounded `cache` namespace
//! - **Shared State**: the `app` and `system` namespaces
//! - **Privileged Set**: setup ids currently allowed elevated host access
//! - **Resource Resolver**: ordered search paths added at runtime (classpath)
//! - **Script Runtime**: one initialised generation owning all of the above
//! - **Script Service**: reload coordinator swapping runtime generations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ScriptService                        │
//! │         Running → Draining → Reinitializing              │
//! │                          │                               │
//! │  ┌───────────────────────▼───────────────────────────┐   │
//! │  │                 ScriptRuntime (gen N)             │   │
//! │  │  ┌────────────┐  ┌──────────────┐  ┌──────────┐   │   │
//! │  │  │ContextPool │  │ modules /    │  │ app      │   │   │
//! │  │  │ ctx ctx .. │  │ services     │  │ system   │   │   │
//! │  │  └─────┬──────┘  │ (single-     │  │ cache    │   │   │
//! │  │        │ weak    │  flight)     │  └──────────┘   │   │
//! │  │        ▼         └──────┬───────┘                 │   │
//! │  │   RuntimeHandle ──────► ScriptEngine              │   │
//! │  └───────────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod allocator;
pub mod bounded_store;
pub mod context;
pub mod context_pool;
pub mod privileged;
pub mod resolution_cache;
pub mod resource_resolver;
pub mod script_runtime;
pub mod script_service;
pub mod shared_state;
pub mod value_cache;

// Re-export commonly used types
pub use context::{request_map, PooledContext, RequestMap};
pub use context_pool::{ContextPool, ContextPoolConfig, PoolStats};
pub use privileged::{PrivilegedSet, SetupId};
pub use resolution_cache::{CacheStats, ResolutionCache};
pub use resource_resolver::{ResourceResolver, SearchPath};
pub use script_runtime::{RuntimeHandle, ScriptRuntime};
pub use script_service::{ReloadState, ScriptService, ServiceStatus};
pub use shared_state::{SharedMap, SharedState};
pub use value_cache::ValueCache;
