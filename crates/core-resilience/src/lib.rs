//! Quill Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides the building blocks Quill uses to stay responsive
//! while depending on a slow, rate-limited external analysis service:
//!
//! - **TTL Cache**: Bounded LRU cache with per-entry time-to-live and hit/miss accounting
//! - **Resource Pool**: Bounded pool of reusable resources with overflow, recycling and validation
//! - **Retry Orchestrator**: Classified retries with class-specific backoff, size-tiered
//!   timeouts and a guaranteed fallback
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - What is being analyzed or how results are scored
//! - Which service sits behind the retried call
//! - Where results are persisted
//!
//! All primitives are synchronous and thread-safe; callers block on the
//! calling thread.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │ fingerprint
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       TTL Cache                         │  ← Skip repeated work
//! │  (LRU eviction, expiry on read)         │
//! └─────────────┬───────────────────────────┘
//!               │ miss
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retry Orchestrator                │  ← Classify, back off, fall back
//! │  (Tiered timeouts, deadline aware)      │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         External Service
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Resource Pool                     │  ← Persist results
//! │  (Bounded leases, overflow, recycling)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage Example
//!
//! ## TTL Cache
//!
//! ```
//! use quill_core_resilience::{CacheConfig, TtlCache};
//! use std::time::Duration;
//!
//! let cache = TtlCache::new(CacheConfig {
//!     max_size: 2,
//!     ttl: Duration::from_secs(60),
//!     enabled: true,
//! });
//!
//! cache.set("a", 1);
//! assert_eq!(cache.get("a"), Some(1));
//! assert_eq!(cache.stats().hits, 1);
//! ```
//!
//! ## Retry Orchestrator
//!
//! ```
//! use quill_core_resilience::{ErrorClass, RetryConfig, RetryOrchestrator};
//!
//! let orchestrator = RetryOrchestrator::new(RetryConfig::default(), |_: &String| {
//!     ErrorClass::BadRequest
//! })
//! .unwrap();
//!
//! let resolution = orchestrator.execute(
//!     "fingerprint",
//!     100,
//!     None,
//!     |_ctx| Err::<&str, _>("rejected".to_string()),
//!     |_reason| "fallback",
//! );
//! assert_eq!(resolution.value, "fallback");
//! ```

pub mod error;
pub mod resource_pool;
pub mod retry;
pub mod ttl_cache;

// Re-export main types for convenience
pub use error::ResilienceError;
pub use resource_pool::{LeaseKind, PoolConfig, PoolLease, PoolStats, ResourceFactory, ResourcePool};
pub use retry::{
    AttemptContext, AttemptRecorder, BackoffPolicy, ErrorClass, ErrorClassifier, FallbackReason,
    Resolution, RetryAttempt, RetryConfig, RetryOrchestrator, TimeoutPolicy, TimeoutTier,
};
pub use ttl_cache::{CacheConfig, CacheStats, CacheSweeper, TtlCache};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use quill_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::error::ResilienceError;
    pub use super::resource_pool::{PoolConfig, PoolLease, ResourceFactory, ResourcePool};
    pub use super::retry::{ErrorClass, ErrorClassifier, RetryConfig, RetryOrchestrator};
    pub use super::ttl_cache::{CacheConfig, TtlCache};
}
