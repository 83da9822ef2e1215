/*!
 * Analysis service: the single entry point for essay analysis
 *
 * `AnalysisService::analyze` looks the request's fingerprint up in the
 * result cache, and on a miss runs the external analyzer under the retry
 * orchestrator. Whatever comes back, genuine or fallback, is cached (by the
 * orchestrator), persisted through the result store and returned. The call
 * never fails.
 *
 * Concurrent requests sharing a fingerprint are coalesced: the first caller
 * runs the analysis and the others wait for its result.
 *
 * # Example
 *
 * ```
 * use quill::{AnalysisRequest, AnalysisService, QuillConfig};
 *
 * let mut config = QuillConfig::development_preset();
 * config.pool.enabled = false;
 *
 * // No analyzer configured: every request is served by the fallback
 * let service = AnalysisService::builder(config).build().unwrap();
 * let result = service.analyze(&AnalysisRequest::new("A very short essay."));
 *
 * assert!(result.is_fallback);
 * assert_eq!(result.error_class.as_deref(), Some("permanent-auth"));
 * ```
 */

use parking_lot::{Condvar, Mutex};
use quill_core_resilience::{
    CacheStats, CacheSweeper, ErrorClass, PoolStats, Resolution, RetryOrchestrator, TtlCache,
};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::analysis::{short_fingerprint, AnalysisRequest, AnalysisResult};
use crate::client::{classify_client_error, AnalysisClient, ClientError, UnconfiguredClient};
use crate::config::QuillConfig;
use crate::error::Result;
use crate::fallback::FallbackGenerator;
use crate::monitor::{MetricsSnapshot, PerformanceMonitor};
use crate::store::{PooledResultStore, ResultStore};

/// Builder for [`AnalysisService`]
pub struct AnalysisServiceBuilder {
    config: QuillConfig,
    client: Option<Arc<dyn AnalysisClient>>,
    store: Option<Arc<dyn ResultStore>>,
    store_path: Option<PathBuf>,
}

impl AnalysisServiceBuilder {
    /// Analyzer to call; defaults to [`UnconfiguredClient`]
    pub fn client(mut self, client: Arc<dyn AnalysisClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Persist results through a custom store
    pub fn store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Persist results to a JSON-lines file through a pool sized by `config.pool`
    pub fn jsonl_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Validate the configuration and wire every component together
    pub fn build(self) -> Result<AnalysisService> {
        let config = self.config;
        config.validate()?;

        let cache = Arc::new(TtlCache::new(config.cache.to_cache_config()));
        let monitor = Arc::new(PerformanceMonitor::new());
        let orchestrator =
            RetryOrchestrator::new(config.retry.to_retry_config()?, classify_client_error)?
                .with_cache(cache.clone())
                .with_recorder(monitor.clone());

        let store = match (self.store, self.store_path) {
            (Some(store), _) => Some(store),
            (None, Some(path)) if config.pool.enabled => {
                let store = PooledResultStore::jsonl(&path, config.pool.to_pool_config())?;
                if config.pool.prewarm {
                    let warmed = store.pool().warm()?;
                    debug!("Prewarmed {} result store handles", warmed);
                }
                info!("Persisting results to {}", path.display());
                Some(Arc::new(store) as Arc<dyn ResultStore>)
            }
            (None, Some(path)) => {
                warn!(
                    "Result store {} ignored because the pool is disabled",
                    path.display()
                );
                None
            }
            (None, None) => None,
        };

        let sweeper = match config.cache.sweep_interval_secs {
            Some(secs) => Some(cache.spawn_sweeper(Duration::from_secs(secs))?),
            None => None,
        };

        let client = self
            .client
            .unwrap_or_else(|| Arc::new(UnconfiguredClient) as Arc<dyn AnalysisClient>);
        info!("Analysis service ready (analyzer: {})", client.name());

        Ok(AnalysisService {
            fallback: FallbackGenerator::new(config.analysis.fallback_enabled),
            config,
            client,
            cache,
            orchestrator,
            store,
            monitor,
            in_flight: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(sweeper),
        })
    }
}

#[derive(Debug)]
enum FlightState {
    Pending,
    Done(AnalysisResult),
    /// The leader went away without a result
    Abandoned,
}

/// An analysis in progress that other callers may wait on
struct Flight {
    state: Mutex<FlightState>,
    done: Condvar,
}

enum Wait {
    Done(AnalysisResult),
    Abandoned,
    TimedOut,
}

impl Flight {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Pending),
            done: Condvar::new(),
        }
    }

    fn complete(&self, result: AnalysisResult) {
        *self.state.lock() = FlightState::Done(result);
        self.done.notify_all();
    }

    fn wait(&self, deadline: Option<Instant>) -> Wait {
        let mut state = self.state.lock();
        loop {
            match &*state {
                FlightState::Done(result) => return Wait::Done(result.clone()),
                FlightState::Abandoned => return Wait::Abandoned,
                FlightState::Pending => {}
            }
            match deadline {
                Some(deadline) => {
                    if self.done.wait_until(&mut state, deadline).timed_out()
                        && matches!(*state, FlightState::Pending)
                    {
                        return Wait::TimedOut;
                    }
                }
                None => self.done.wait(&mut state),
            }
        }
    }
}

/// Unregisters a flight when its leader finishes, even by unwinding
struct LeaderGuard<'a> {
    in_flight: &'a Mutex<HashMap<String, Arc<Flight>>>,
    fingerprint: &'a str,
    flight: Arc<Flight>,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(self.fingerprint);
        let mut state = self.flight.state.lock();
        if matches!(*state, FlightState::Pending) {
            *state = FlightState::Abandoned;
        }
        drop(state);
        self.flight.done.notify_all();
    }
}

enum Role {
    Hit(AnalysisResult),
    Leader(Arc<Flight>),
    Follower(Arc<Flight>),
    Solo,
}

/// Cache-aside, retrying, never-failing essay analysis
pub struct AnalysisService {
    config: QuillConfig,
    client: Arc<dyn AnalysisClient>,
    cache: Arc<TtlCache<AnalysisResult>>,
    orchestrator: RetryOrchestrator<AnalysisResult, ClientError>,
    store: Option<Arc<dyn ResultStore>>,
    fallback: FallbackGenerator,
    monitor: Arc<PerformanceMonitor>,
    in_flight: Mutex<HashMap<String, Arc<Flight>>>,
    sweeper: Mutex<Option<CacheSweeper>>,
}

impl AnalysisService {
    pub fn builder(config: QuillConfig) -> AnalysisServiceBuilder {
        AnalysisServiceBuilder {
            config,
            client: None,
            store: None,
            store_path: None,
        }
    }

    pub fn config(&self) -> &QuillConfig {
        &self.config
    }

    /// Analyze `request`, bounded by `service.operation_deadline_secs` when set
    pub fn analyze(&self, request: &AnalysisRequest) -> AnalysisResult {
        let deadline = self
            .config
            .service
            .operation_deadline_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        self.run(request, deadline)
    }

    /// Analyze `request`, giving up on the analyzer once `deadline` passes
    ///
    /// Past the deadline no further attempt is made and the fallback result
    /// is returned.
    pub fn analyze_with_deadline(&self, request: &AnalysisRequest, deadline: Instant) -> AnalysisResult {
        self.run(request, Some(deadline))
    }

    fn run(&self, request: &AnalysisRequest, deadline: Option<Instant>) -> AnalysisResult {
        self.monitor.record_request();
        let fingerprint = request.fingerprint();
        let key = short_fingerprint(&fingerprint);

        let role = if self.config.service.coalesce_in_flight {
            // The cache is checked under the in-flight lock: a leader fills the
            // cache before unregistering, so a miss here means no result yet.
            let mut in_flight = self.in_flight.lock();
            if let Some(hit) = self.cache.get(&fingerprint) {
                Role::Hit(hit)
            } else if let Some(flight) = in_flight.get(&fingerprint) {
                Role::Follower(flight.clone())
            } else {
                let flight = Arc::new(Flight::new());
                in_flight.insert(fingerprint.clone(), flight.clone());
                Role::Leader(flight)
            }
        } else {
            match self.cache.get(&fingerprint) {
                Some(hit) => Role::Hit(hit),
                None => Role::Solo,
            }
        };

        match role {
            Role::Hit(result) => {
                self.monitor.record_cache_hit();
                debug!("Serving cached analysis for {}", key);
                result
            }
            Role::Solo => {
                self.monitor.record_cache_miss();
                self.compute(request, &fingerprint, deadline).value
            }
            Role::Leader(flight) => {
                self.monitor.record_cache_miss();
                let guard = LeaderGuard {
                    in_flight: &self.in_flight,
                    fingerprint: &fingerprint,
                    flight,
                };
                let resolution = self.compute(request, &fingerprint, deadline);
                // A deadline fallback reflects this caller's budget only; the
                // guard abandons the flight and followers run their own analysis.
                if resolution.fallback.map_or(true, |reason| reason.is_cacheable()) {
                    guard.flight.complete(resolution.value.clone());
                } else {
                    debug!("Not sharing deadline-limited result for {}", key);
                }
                resolution.value
            }
            Role::Follower(flight) => {
                self.monitor.record_coalesced();
                debug!("Waiting on in-flight analysis for {}", key);
                match flight.wait(deadline) {
                    Wait::Done(result) => result,
                    Wait::Abandoned => {
                        debug!("In-flight analysis for {} left no shared result; running it here", key);
                        self.monitor.record_cache_miss();
                        self.compute(request, &fingerprint, deadline).value
                    }
                    Wait::TimedOut => {
                        warn!("Deadline passed while waiting on analysis for {}", key);
                        self.monitor.record_fallback();
                        self.fallback.generate(request, ErrorClass::Timeout)
                    }
                }
            }
        }
    }

    fn compute(
        &self,
        request: &AnalysisRequest,
        fingerprint: &str,
        deadline: Option<Instant>,
    ) -> Resolution<AnalysisResult> {
        let started = Instant::now();
        let key = short_fingerprint(fingerprint);
        let max_chars = self.config.analysis.max_input_chars;

        let text = request.prepared_text(max_chars);
        if let Cow::Owned(_) = text {
            warn!(
                "Input for {} is longer than {} characters; truncating for analysis",
                key, max_chars
            );
        }
        let input_size = text.chars().count();

        let resolution = self.orchestrator.execute(
            fingerprint,
            input_size,
            deadline,
            |ctx| {
                let mut result = self.client.analyze(&text, request, ctx.timeout)?;
                result.is_fallback = false;
                result.error_class = None;
                let replaced = result.sanitize_scores();
                if replaced > 0 {
                    warn!("Replaced {} invalid scores for {}", replaced, key);
                }
                Ok(result)
            },
            |reason| self.fallback.generate(request, reason.error_class()),
        );

        let elapsed = started.elapsed();
        self.monitor.record_analysis_time(elapsed);
        if resolution.is_fallback() {
            self.monitor.record_fallback();
            warn!(
                "Served fallback analysis for {} after {} attempt(s) ({:?})",
                key, resolution.attempts, resolution.fallback
            );
        } else {
            info!(
                "Analysis for {} completed in {:?} ({} attempt(s))",
                key, elapsed, resolution.attempts
            );
        }

        self.persist(fingerprint, request, &resolution.value);
        resolution
    }

    fn persist(&self, fingerprint: &str, request: &AnalysisRequest, result: &AnalysisResult) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.persist(fingerprint, request, result) {
            self.monitor.record_persistence_failure();
            let key = short_fingerprint(fingerprint);
            if e.is_transient() {
                warn!("Failed to persist analysis for {}: {}", key, e);
            } else {
                error!("Result store rejected analysis for {}: {}", key, e);
            }
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Statistics of the result store's pool, if results are persisted
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.store.as_ref().and_then(|store| store.pool_stats())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.monitor.snapshot()
    }

    /// Drop every cached result and its counters
    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("Analysis cache cleared");
    }

    /// Zero cache, pool and request counters without touching cached results
    pub fn reset_stats(&self) {
        self.cache.reset_stats();
        if let Some(store) = &self.store {
            store.reset_stats();
        }
        self.monitor.reset();
    }

    /// Stop the cache sweeper and close the result store
    ///
    /// Analyses still work afterwards, but nothing more is persisted.
    pub fn shutdown(&self) {
        if let Some(mut sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
        if let Some(store) = &self.store {
            store.close();
        }
        info!("Analysis service shut down");
    }
}
