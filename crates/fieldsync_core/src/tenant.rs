//! Tenant resolution.
//!
//! Every store read and write is scoped to the tenant returned by a
//! [`TenantResolver`]. Applications normally wrap their account service in a
//! [`TenantCache`], which serves a resolved id for a TTL and collapses
//! concurrent lookups into one call to the service.

use crate::config::TenantCacheConfig;
use crate::error::CoreResult;
use crate::types::TenantId;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Supplies the tenant the current user acts for.
#[async_trait]
pub trait TenantResolver: Send + Sync {
    /// Returns the current tenant, or `None` when none is resolvable
    /// (signed out, no memberships, service unreachable).
    async fn current_tenant_id(&self) -> Option<TenantId>;
}

/// The uncached source of tenant ids, typically an account service.
#[async_trait]
pub trait TenantSource: Send + Sync {
    /// Looks up the current tenant.
    async fn fetch_tenant_id(&self) -> CoreResult<Option<TenantId>>;

    /// Persists the user's preferred tenant.
    async fn set_preferred_tenant(&self, name: &str) -> CoreResult<()>;
}

/// A resolver holding a fixed, settable tenant. Useful for tests and
/// single-tenant tools.
#[derive(Debug, Default)]
pub struct StaticTenant {
    tenant: RwLock<Option<TenantId>>,
}

impl StaticTenant {
    /// Creates a resolver for `tenant`.
    pub fn new(tenant: Option<TenantId>) -> Self {
        Self {
            tenant: RwLock::new(tenant),
        }
    }

    /// Switches the current tenant.
    pub fn set(&self, tenant: Option<TenantId>) {
        *self.tenant.write() = tenant;
    }
}

#[async_trait]
impl TenantResolver for StaticTenant {
    async fn current_tenant_id(&self) -> Option<TenantId> {
        self.tenant.read().clone()
    }
}

#[async_trait]
impl TenantSource for StaticTenant {
    async fn fetch_tenant_id(&self) -> CoreResult<Option<TenantId>> {
        Ok(self.tenant.read().clone())
    }

    async fn set_preferred_tenant(&self, name: &str) -> CoreResult<()> {
        self.set(Some(TenantId::new(name)));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CacheState {
    cached: Option<(TenantId, Instant)>,
    /// Bumped on every invalidation; a fetch that started under an older
    /// generation must not populate the cache.
    generation: u64,
    /// Number of completed fetches.
    completed: u64,
    last_result: Option<TenantId>,
    last_generation: u64,
}

/// TTL cache in front of a [`TenantSource`].
///
/// Concurrent callers that miss the cache queue on one fetch: whoever wins
/// the fetch lock calls the source, the others reuse its result. A `None`
/// result is shared with the callers already waiting but is not cached.
///
/// Live queries only re-resolve the tenant when refreshed. Register
/// [`Database::follow_tenant_cache`](crate::Database::follow_tenant_cache)
/// or an [`on_invalidate`](Self::on_invalidate) listener so a tenant switch
/// reaches them.
pub struct TenantCache {
    source: Arc<dyn TenantSource>,
    config: TenantCacheConfig,
    state: Mutex<CacheState>,
    fetch_lock: tokio::sync::Mutex<()>,
    listeners: RwLock<Vec<InvalidateListener>>,
}

type InvalidateListener = Box<dyn Fn() + Send + Sync>;

impl TenantCache {
    /// Creates a cache over `source`.
    pub fn new(source: Arc<dyn TenantSource>, config: TenantCacheConfig) -> Self {
        Self {
            source,
            config,
            state: Mutex::new(CacheState::default()),
            fetch_lock: tokio::sync::Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Calls `listener` after every invalidation.
    pub fn on_invalidate(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    /// Drops the cached id; the next lookup goes to the source. Listeners
    /// run after the cache is cleared.
    pub fn invalidate(&self) {
        {
            let mut state = self.state.lock();
            state.generation += 1;
            state.cached = None;
            debug!(generation = state.generation, "tenant cache invalidated");
        }
        for listener in self.listeners.read().iter() {
            listener();
        }
    }

    /// Stores a new preferred tenant and invalidates the cache, which runs
    /// the [`on_invalidate`](Self::on_invalidate) listeners.
    pub async fn set_preferred_tenant(&self, name: &str) -> CoreResult<()> {
        self.source.set_preferred_tenant(name).await?;
        self.invalidate();
        Ok(())
    }

    fn fresh(&self) -> Option<TenantId> {
        let state = self.state.lock();
        match &state.cached {
            Some((tenant, at)) if at.elapsed() < self.config.ttl => Some(tenant.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl TenantResolver for TenantCache {
    async fn current_tenant_id(&self) -> Option<TenantId> {
        if let Some(tenant) = self.fresh() {
            return Some(tenant);
        }

        let seen = self.state.lock().completed;
        let _fetching = self.fetch_lock.lock().await;

        {
            let state = self.state.lock();
            if state.completed != seen && state.last_generation == state.generation {
                return state.last_result.clone();
            }
        }
        if let Some(tenant) = self.fresh() {
            return Some(tenant);
        }

        let generation = self.state.lock().generation;
        let result = match self.source.fetch_tenant_id().await {
            Ok(tenant) => tenant,
            Err(err) => {
                warn!(error = %err, "tenant lookup failed");
                None
            }
        };

        let mut state = self.state.lock();
        state.completed += 1;
        state.last_result = result.clone();
        state.last_generation = generation;
        if generation == state.generation {
            if let Some(tenant) = &result {
                state.cached = Some((tenant.clone(), Instant::now()));
            }
        }
        result
    }
}
