// src/runtime/allocator.rs
//! Allocator for pooled contexts

use crate::runtime::context::PooledContext;
use crate::runtime::script_runtime::RuntimeHandle;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Creates and destroys contexts for one pool
pub struct ContextAllocator {
    runtime: RuntimeHandle,
    pool_id: u64,
    next_id: AtomicUsize,
    allocated: AtomicUsize,
    deallocated: AtomicUsize,
}

impl ContextAllocator {
    pub fn new(runtime: RuntimeHandle) -> Self {
        Self {
            runtime,
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            next_id: AtomicUsize::new(1),
            allocated: AtomicUsize::new(0),
            deallocated: AtomicUsize::new(0),
        }
    }

    pub fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub fn allocate(&self) -> PooledContext {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.allocated.fetch_add(1, Ordering::Relaxed);
        debug!("Allocating context #{} for pool {}", id, self.pool_id);
        PooledContext::new(id, self.pool_id, self.runtime.clone())
    }

    pub fn deallocate(&self, mut context: PooledContext) {
        debug!("Deallocating context #{}", context.id());
        context.cleanup();
        self.deallocated.fetch_add(1, Ordering::Relaxed);
    }

    /// Contexts created over the allocator's lifetime
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn deallocated(&self) -> usize {
        self.deallocated.load(Ordering::Relaxed)
    }
}
