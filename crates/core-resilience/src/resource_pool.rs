//! Bounded pool of exclusive-use resources
//!
//! Keeps up to `size` warm resources for reuse and allows up to
//! `max_overflow` extra resources under burst load. Overflow resources are
//! never pooled: they are destroyed when released. Resources older than
//! `recycle_after`, or failing the factory's health check, are destroyed
//! and replaced instead of being handed out or returned to the idle set.
//!
//! All state lives behind a single mutex; callers that find the pool
//! saturated wait on a condition variable until a resource is released,
//! the pool is closed, or their timeout elapses.

use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::error::ResilienceError;

/// Configuration for resource pool behavior
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Number of resources kept warm in the pool
    pub size: usize,
    /// Extra resources allowed beyond `size` under load, never pooled
    pub max_overflow: usize,
    /// Maximum time `acquire` blocks when the pool is saturated
    pub acquire_timeout: Duration,
    /// Maximum age of a resource before it is destroyed and replaced
    pub recycle_after: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 10,
            max_overflow: 20,
            acquire_timeout: Duration::from_secs(30),
            recycle_after: Some(Duration::from_secs(3600)), // 1 hour
        }
    }
}

impl PoolConfig {
    /// Reject configurations the pool cannot honor
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.size == 0 && self.max_overflow == 0 {
            return Err(ResilienceError::InvalidConfig(
                "pool size and max_overflow cannot both be zero".to_string(),
            ));
        }
        if self.recycle_after == Some(Duration::ZERO) {
            return Err(ResilienceError::InvalidConfig(
                "pool recycle_after must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Upper bound on resources leased at the same time
    pub fn capacity(&self) -> usize {
        self.size + self.max_overflow
    }
}

/// Factory trait for creating, validating and destroying pooled resources
pub trait ResourceFactory<T>: Send + Sync {
    /// Create a new resource
    fn create(&self) -> Result<T, ResilienceError>;

    /// Liveness check, run before a resource is handed out or pooled again
    fn is_healthy(&self, resource: &mut T) -> bool;

    /// Destroy a resource (optional cleanup)
    fn close(&self, resource: T) {
        drop(resource);
    }
}

/// Whether a lease came from the warm pool or from overflow capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseKind {
    /// Counts against `size`; returned to the idle set on release
    Pooled,
    /// Counts against `max_overflow`; destroyed on release
    Overflow,
}

/// A resource wrapper that tracks metadata
#[derive(Debug)]
struct Pooled<T> {
    resource: T,
    id: u64,
    created_at: Instant,
}

impl<T> Pooled<T> {
    fn is_expired(&self, recycle_after: Option<Duration>) -> bool {
        recycle_after.is_some_and(|max_age| self.created_at.elapsed() >= max_age)
    }
}

/// Internal pool state, guarded by the pool mutex
struct PoolState<T> {
    /// Resources ready for reuse
    idle: Vec<Pooled<T>>,
    /// Pooled resources currently leased
    leased: usize,
    /// Overflow resources currently leased
    overflow: usize,
    closed: bool,
}

struct PoolShared<T> {
    config: PoolConfig,
    factory: Arc<dyn ResourceFactory<T>>,
    state: Mutex<PoolState<T>>,
    available: Condvar,
    next_id: AtomicU64,
    created: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Send + 'static> PoolShared<T> {
    fn create(&self) -> Result<Pooled<T>, ResilienceError> {
        let resource = self.factory.create()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Created pooled resource #{} (total created: {})", id, total);
        Ok(Pooled {
            resource,
            id,
            created_at: Instant::now(),
        })
    }

    /// Undo a reserved slot and wake one waiter
    fn unreserve(&self, kind: LeaseKind) {
        let mut state = self.state.lock();
        match kind {
            LeaseKind::Pooled => state.leased -= 1,
            LeaseKind::Overflow => state.overflow -= 1,
        }
        drop(state);
        self.available.notify_one();
    }

    /// Create a resource for a slot already reserved under the lock
    fn checkout_new(self: &Arc<Self>, kind: LeaseKind) -> Result<PoolLease<T>, ResilienceError> {
        match self.create() {
            Ok(pooled) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                if kind == LeaseKind::Overflow {
                    debug!("Created overflow resource #{}", pooled.id);
                }
                Ok(PoolLease::new(pooled, kind, Arc::clone(self)))
            }
            Err(e) => {
                warn!("Failed to create pooled resource: {}", e);
                self.unreserve(kind);
                Err(e)
            }
        }
    }

    /// Hand out an idle resource, replacing it if expired or unhealthy
    fn checkout_idle(self: &Arc<Self>, mut pooled: Pooled<T>) -> Result<PoolLease<T>, ResilienceError> {
        let expired = pooled.is_expired(self.config.recycle_after);
        if expired || !self.factory.is_healthy(&mut pooled.resource) {
            debug!(
                "Discarding {} resource #{} on acquire",
                if expired { "expired" } else { "unhealthy" },
                pooled.id
            );
            self.factory.close(pooled.resource);
            return self.checkout_new(LeaseKind::Pooled);
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(PoolLease::new(pooled, LeaseKind::Pooled, Arc::clone(self)))
    }

    /// Return a leased resource to the pool
    fn give_back(&self, mut pooled: Pooled<T>, kind: LeaseKind) {
        if kind == LeaseKind::Overflow {
            debug!("Closing overflow resource #{}", pooled.id);
            self.factory.close(pooled.resource);
            self.unreserve(kind);
            return;
        }

        if self.state.lock().closed {
            self.factory.close(pooled.resource);
            self.unreserve(kind);
            return;
        }

        let expired = pooled.is_expired(self.config.recycle_after);
        let replacement = if expired || !self.factory.is_healthy(&mut pooled.resource) {
            debug!("Recycling resource #{} on release", pooled.id);
            self.factory.close(pooled.resource);
            match self.create() {
                Ok(fresh) => Some(fresh),
                Err(e) => {
                    warn!("Failed to replace recycled resource: {}", e);
                    None
                }
            }
        } else {
            Some(pooled)
        };

        let mut state = self.state.lock();
        state.leased -= 1;
        let discarded = match replacement {
            Some(pooled) if !state.closed => {
                state.idle.push(pooled);
                None
            }
            other => other,
        };
        drop(state);

        if let Some(pooled) = discarded {
            self.factory.close(pooled.resource);
        }
        self.available.notify_one();
    }
}

/// A generic blocking resource pool
///
/// Cloning the pool is cheap; all clones share the same resources.
///
/// # Example
/// ```
/// use quill_core_resilience::{PoolConfig, ResilienceError, ResourceFactory, ResourcePool};
/// use std::sync::Arc;
///
/// struct Counter;
///
/// impl ResourceFactory<Vec<u8>> for Counter {
///     fn create(&self) -> Result<Vec<u8>, ResilienceError> {
///         Ok(Vec::new())
///     }
///
///     fn is_healthy(&self, _buf: &mut Vec<u8>) -> bool {
///         true
///     }
/// }
///
/// let pool = ResourcePool::new(Arc::new(Counter), PoolConfig::default()).unwrap();
///
/// let mut buf = pool.acquire().unwrap();
/// buf.push(1);
/// pool.release(buf);
///
/// assert_eq!(pool.stats().idle, 1);
/// ```
pub struct ResourcePool<T> {
    shared: Arc<PoolShared<T>>,
}

impl<T> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> ResourcePool<T> {
    /// Create a new, empty pool; resources are created lazily
    pub fn new(
        factory: Arc<dyn ResourceFactory<T>>,
        config: PoolConfig,
    ) -> Result<Self, ResilienceError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                factory,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    leased: 0,
                    overflow: 0,
                    closed: false,
                }),
                available: Condvar::new(),
                next_id: AtomicU64::new(0),
                created: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        })
    }

    /// The configuration this pool was built with
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Fill the idle set up to `size`, returning how many resources were created
    pub fn warm(&self) -> Result<usize, ResilienceError> {
        let mut created = 0;
        loop {
            {
                let state = self.shared.state.lock();
                if state.closed || state.idle.len() + state.leased >= self.shared.config.size {
                    break;
                }
            }

            let pooled = self.shared.create()?;
            let mut state = self.shared.state.lock();
            if state.closed || state.idle.len() + state.leased >= self.shared.config.size {
                drop(state);
                self.shared.factory.close(pooled.resource);
                break;
            }
            state.idle.push(pooled);
            created += 1;
        }

        if created > 0 {
            debug!("Warmed resource pool with {} resources", created);
            self.shared.available.notify_all();
        }
        Ok(created)
    }

    /// Acquire a resource, waiting up to the configured `acquire_timeout`
    pub fn acquire(&self) -> Result<PoolLease<T>, ResilienceError> {
        self.acquire_timeout(self.shared.config.acquire_timeout)
    }

    /// Acquire a resource without waiting
    pub fn try_acquire(&self) -> Result<PoolLease<T>, ResilienceError> {
        self.acquire_timeout(Duration::ZERO)
    }

    /// Acquire a resource, waiting at most `timeout` when the pool is saturated
    ///
    /// Prefers an idle resource; otherwise creates a pooled resource while
    /// fewer than `size` are leased, then an overflow resource while fewer
    /// than `max_overflow` overflow resources exist. Fails with
    /// [`ResilienceError::PoolTimeout`] when nothing frees up in time.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<PoolLease<T>, ResilienceError> {
        let deadline = Instant::now() + timeout;
        let config = &self.shared.config;
        let mut state = self.shared.state.lock();

        loop {
            if state.closed {
                return Err(ResilienceError::PoolClosed);
            }

            if let Some(pooled) = state.idle.pop() {
                state.leased += 1;
                drop(state);
                return self.shared.checkout_idle(pooled);
            }

            if state.leased < config.size {
                state.leased += 1;
                drop(state);
                return self.shared.checkout_new(LeaseKind::Pooled);
            }

            if state.overflow < config.max_overflow {
                state.overflow += 1;
                drop(state);
                return self.shared.checkout_new(LeaseKind::Overflow);
            }

            if Instant::now() >= deadline {
                warn!(
                    "Resource pool saturated ({} leased, {} overflow) for {:?}",
                    state.leased, state.overflow, timeout
                );
                return Err(ResilienceError::PoolTimeout(timeout));
            }

            self.shared.available.wait_until(&mut state, deadline);
        }
    }

    /// Return a resource to the pool
    ///
    /// Equivalent to dropping the lease.
    pub fn release(&self, lease: PoolLease<T>) {
        drop(lease);
    }

    /// Destroy every idle resource and refuse further acquisitions
    ///
    /// Leased resources stay usable; they are destroyed when released.
    /// Returns the number of idle resources destroyed.
    pub fn close_all(&self) -> usize {
        let mut state = self.shared.state.lock();
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        drop(state);

        self.shared.available.notify_all();

        let count = idle.len();
        for pooled in idle {
            self.shared.factory.close(pooled.resource);
        }
        debug!("Closed resource pool ({} idle resources destroyed)", count);
        count
    }

    /// Whether `close_all` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Zero the hit and miss counters
    pub fn reset_stats(&self) {
        self.shared.hits.store(0, Ordering::Relaxed);
        self.shared.misses.store(0, Ordering::Relaxed);
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            pool_size: self.shared.config.size,
            max_overflow: self.shared.config.max_overflow,
            idle: state.idle.len(),
            leased: state.leased,
            overflow: state.overflow,
            created: self.shared.created.load(Ordering::Relaxed),
            hits: self.shared.hits.load(Ordering::Relaxed),
            misses: self.shared.misses.load(Ordering::Relaxed),
        }
    }
}

/// Exclusive access to a pooled resource; returned to the pool on drop
pub struct PoolLease<T: Send + 'static> {
    pooled: Option<Pooled<T>>,
    kind: LeaseKind,
    shared: Arc<PoolShared<T>>,
}

impl<T: Send + 'static> PoolLease<T> {
    fn new(pooled: Pooled<T>, kind: LeaseKind, shared: Arc<PoolShared<T>>) -> Self {
        Self {
            pooled: Some(pooled),
            kind,
            shared,
        }
    }

    /// Whether this lease is a warm or an overflow resource
    pub fn kind(&self) -> LeaseKind {
        self.kind
    }

    /// True for overflow resources
    pub fn is_overflow(&self) -> bool {
        self.kind == LeaseKind::Overflow
    }

    /// Pool-unique identifier of the underlying resource
    pub fn id(&self) -> u64 {
        self.pooled.as_ref().map_or(0, |p| p.id)
    }

    /// Time since the underlying resource was created
    pub fn age(&self) -> Duration {
        self.pooled
            .as_ref()
            .map_or(Duration::ZERO, |p| p.created_at.elapsed())
    }
}

impl<T: Send + 'static> Deref for PoolLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self
            .pooled
            .as_ref()
            .expect("lease holds its resource until dropped")
            .resource
    }
}

impl<T: Send + 'static> DerefMut for PoolLease<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self
            .pooled
            .as_mut()
            .expect("lease holds its resource until dropped")
            .resource
    }
}

impl<T: Send + 'static> Drop for PoolLease<T> {
    fn drop(&mut self) {
        if let Some(pooled) = self.pooled.take() {
            self.shared.give_back(pooled, self.kind);
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured warm pool size
    pub pool_size: usize,
    /// Configured overflow allowance
    pub max_overflow: usize,
    /// Resources waiting in the idle set
    pub idle: usize,
    /// Pooled resources currently leased
    pub leased: usize,
    /// Overflow resources currently leased
    pub overflow: usize,
    /// Resources created since the pool was built
    pub created: u64,
    /// Acquisitions served by an existing resource
    pub hits: u64,
    /// Acquisitions that had to create a resource
    pub misses: u64,
}

impl PoolStats {
    /// Fraction of acquisitions served without creating a resource
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Leased resources as a percentage of total capacity
    pub fn utilization(&self) -> f64 {
        let capacity = self.pool_size + self.max_overflow;
        if capacity == 0 {
            0.0
        } else {
            ((self.leased + self.overflow) as f64 / capacity as f64) * 100.0
        }
    }
}
