// src/runtime/context_pool.rs
//! Bounded pool of reusable script contexts
//!
//! Instead of building a fresh execution context per request, we keep a
//! fixed number of contexts and hand them out one caller at a time.
//!
//! # Architecture
//!
//! ```text
//! ContextPool
//! ├─ Idle: [Ctx1, Ctx2, ...]       (recycled, ready to claim)
//! ├─ Claimed: [Ctx3, ...]          (each holds a lease = one permit)
//! └─ Waiters: [Task1, Task2, ...]  (blocked in claim until release/timeout)
//! ```
//!
//! A claimed context carries a [`Lease`] holding one semaphore permit. The
//! permit goes back when the context is released, or when the context is
//! dropped without being released; in the latter case the allocator builds
//! a replacement on the next claim, so the pool never shrinks and never
//! exceeds its size.

use crate::runtime::allocator::ContextAllocator;
use crate::runtime::context::PooledContext;
use crate::utils::config::RuntimeConfig;
use crate::utils::errors::{Result, ScriptError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Configuration for the context pool
#[derive(Debug, Clone)]
pub struct ContextPoolConfig {
    /// Number of contexts in the pool (default: 5)
    pub pool_size: usize,

    /// Wait used by [`ContextPool::claim_default`]
    pub claim_timeout: Duration,
}

impl Default for ContextPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            claim_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&RuntimeConfig> for ContextPoolConfig {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            pool_size: config.pool_size,
            claim_timeout: config.claim_timeout(),
        }
    }
}

/// Claim held by a context between `claim` and `release`
pub(crate) struct Lease {
    /// Returned to the pool semaphore on drop
    _permit: OwnedSemaphorePermit,

    /// Shared count of claimed contexts
    in_use: Arc<watch::Sender<usize>>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut now = 0;
        self.in_use.send_modify(|n| {
            *n = n.saturating_sub(1);
            now = *n;
        });
        metrics::gauge!("scripthost_contexts_in_use").set(now as f64);
    }
}

struct PoolState {
    /// Recycled contexts ready to be claimed
    idle: Vec<PooledContext>,

    /// Set once by `shutdown`; releases after that deallocate
    closed: bool,
}

/// Fixed-size pool of script contexts
pub struct ContextPool {
    /// Pool configuration
    config: ContextPoolConfig,

    /// Builds replacement contexts and tears down released ones after shutdown
    allocator: ContextAllocator,

    /// Idle contexts and the closed flag
    state: Mutex<PoolState>,

    /// One permit per context; closed on shutdown to wake waiters
    semaphore: Arc<Semaphore>,

    /// Claimed-context count, watched by `drain`
    in_use: Arc<watch::Sender<usize>>,
}

impl ContextPool {
    /// Create a pool and allocate all of its contexts up front
    pub fn new(config: ContextPoolConfig, allocator: ContextAllocator) -> Self {
        info!("Initializing context pool with {} contexts", config.pool_size);

        let idle = (0..config.pool_size).map(|_| allocator.allocate()).collect();
        let (in_use, _) = watch::channel(0usize);

        Self {
            semaphore: Arc::new(Semaphore::new(config.pool_size)),
            state: Mutex::new(PoolState {
                idle,
                closed: false,
            }),
            in_use: Arc::new(in_use),
            allocator,
            config,
        }
    }

    pub fn size(&self) -> usize {
        self.config.pool_size
    }

    /// Claim with the configured default timeout
    pub async fn claim_default(&self) -> Result<PooledContext> {
        self.claim(self.config.claim_timeout).await
    }

    /// Claim a context, waiting at most `timeout` for one to be released
    pub async fn claim(&self, timeout: Duration) -> Result<PooledContext> {
        if self.is_closed() {
            return Err(ScriptError::PoolClosed);
        }

        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        let permit = match tokio::time::timeout(timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ScriptError::PoolClosed),
            Err(_) => {
                debug!("Context claim timed out after {:?}", timeout);
                metrics::counter!("scripthost_pool_claim_timeouts_total").increment(1);
                return Err(ScriptError::ClaimTimeout(timeout));
            }
        };

        let mut context = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ScriptError::PoolClosed);
            }
            let context = match state.idle.pop() {
                Some(context) => context,
                None => {
                    warn!("No idle context despite free permit, allocating a replacement");
                    self.allocator.allocate()
                }
            };
            self.in_use.send_modify(|n| *n += 1);
            context
        };

        context.lease = Some(Lease {
            _permit: permit,
            in_use: Arc::clone(&self.in_use),
        });

        metrics::counter!("scripthost_pool_claims_total").increment(1);
        metrics::gauge!("scripthost_contexts_in_use").set(*self.in_use.borrow() as f64);
        debug!("Claimed context #{}", context.id());
        Ok(context)
    }

    /// Return a context to the pool, resetting its request state first
    pub fn release(&self, mut context: PooledContext) {
        let lease = context.lease.take();

        if context.pool_id() != self.allocator.pool_id() {
            warn!("Context #{} does not belong to this pool, discarding", context.id());
            context.cleanup();
            return;
        }
        if lease.is_none() {
            warn!("Releasing context #{} that was never claimed", context.id());
        }

        {
            let mut state = self.state.lock();
            if state.closed {
                drop(state);
                self.allocator.deallocate(context);
            } else {
                context.recycle();
                debug!("Releasing context #{} back to pool", context.id());
                if state.idle.len() < self.config.pool_size {
                    state.idle.push(context);
                }
            }
        }

        // permit goes back only after the context is claimable again
        drop(lease);
    }

    /// Invalidate all idle contexts and reject further claims. Idempotent.
    pub fn shutdown(&self) {
        let idle = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        self.semaphore.close();

        info!("Shutting down context pool ({} idle)", idle.len());
        for context in idle {
            self.allocator.deallocate(context);
        }
    }

    /// Wait until every claimed context has been released or dropped
    pub async fn drain(&self) {
        let mut rx = self.in_use.subscribe();
        let outstanding = *rx.borrow();
        if outstanding > 0 {
            info!("Waiting for {} claimed contexts to be released", outstanding);
        }
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.state.lock().idle.len();
        let in_use = *self.in_use.borrow();

        PoolStats {
            pool_size: self.config.pool_size,
            idle_contexts: idle,
            claimed_contexts: in_use,
            allocated_total: self.allocator.allocated(),
            closed: self.is_closed(),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub pool_size: usize,
    pub idle_contexts: usize,
    pub claimed_contexts: usize,
    pub allocated_total: usize,
    pub closed: bool,
}
