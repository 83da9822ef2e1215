/*!
 * Quill - resilient essay analysis
 *
 * Wraps a slow, rate-limited external analyzer with:
 * - A bounded TTL/LRU result cache keyed by request fingerprint
 * - Retries with error-class-specific backoff and size-tiered timeouts
 * - Deterministic heuristic fallback results when the analyzer is unavailable
 * - Pooled persistence of every result to a JSON-lines store
 * - Coalescing of concurrent identical requests
 *
 * The cache, pool and retry primitives live in `quill-core-resilience`.
 */

pub mod analysis;
pub mod client;
pub mod config;
pub mod error;
pub mod fallback;
pub mod logging;
pub mod monitor;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use analysis::{Aggressiveness, AnalysisRequest, AnalysisResult, CoachingLevel, EssayMode};
pub use client::{AnalysisClient, ClientError, UnconfiguredClient};
pub use config::QuillConfig;
pub use error::{QuillError, Result};
pub use fallback::FallbackGenerator;
pub use monitor::{MetricsSnapshot, PerformanceMonitor};
pub use service::{AnalysisService, AnalysisServiceBuilder};
pub use store::{JsonlSink, PooledResultStore, ResultStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
