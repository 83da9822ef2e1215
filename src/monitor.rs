/*!
 * Request-level performance monitoring
 */

use parking_lot::Mutex;
use quill_core_resilience::{AttemptRecorder, ErrorClass, RetryAttempt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Snapshot of everything the monitor has counted
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Requests that waited on an identical in-flight request
    pub coalesced: u64,
    pub fallbacks: u64,
    pub persistence_failures: u64,
    /// External calls made, successful or not
    pub call_attempts: u64,
    /// Failed external calls per error class label
    pub failed_attempts: BTreeMap<String, u64>,
    /// Analyses that went past the cache
    pub timed_analyses: u64,
    pub total_analysis_time: Duration,
    pub fastest_analysis: Option<Duration>,
    pub slowest_analysis: Option<Duration>,
}

impl MetricsSnapshot {
    /// Fraction of requests answered from the cache
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    pub fn average_analysis_time(&self) -> Duration {
        if self.timed_analyses == 0 {
            Duration::ZERO
        } else {
            self.total_analysis_time.div_f64(self.timed_analyses as f64)
        }
    }

    pub fn failures_of(&self, class: ErrorClass) -> u64 {
        self.failed_attempts.get(class.as_str()).copied().unwrap_or(0)
    }
}

/// Thread-safe counters for the analysis service
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    state: Mutex<MetricsSnapshot>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.state.lock().total_requests += 1;
    }

    pub fn record_cache_hit(&self) {
        self.state.lock().cache_hits += 1;
    }

    pub fn record_cache_miss(&self) {
        self.state.lock().cache_misses += 1;
    }

    pub fn record_coalesced(&self) {
        self.state.lock().coalesced += 1;
    }

    pub fn record_fallback(&self) {
        self.state.lock().fallbacks += 1;
    }

    pub fn record_persistence_failure(&self) {
        self.state.lock().persistence_failures += 1;
    }

    /// Record the wall time of an analysis that was not served from cache
    pub fn record_analysis_time(&self, elapsed: Duration) {
        let mut state = self.state.lock();
        state.timed_analyses += 1;
        state.total_analysis_time += elapsed;
        state.fastest_analysis = Some(state.fastest_analysis.map_or(elapsed, |d| d.min(elapsed)));
        state.slowest_analysis = Some(state.slowest_analysis.map_or(elapsed, |d| d.max(elapsed)));
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.state.lock().clone()
    }

    /// Zero every counter
    pub fn reset(&self) {
        *self.state.lock() = MetricsSnapshot::default();
    }
}

impl AttemptRecorder for PerformanceMonitor {
    fn record_attempt(&self, attempt: &RetryAttempt) {
        let mut state = self.state.lock();
        state.call_attempts += 1;
        if let Some(class) = attempt.class {
            *state
                .failed_attempts
                .entry(class.as_str().to_string())
                .or_insert(0) += 1;
        }
    }
}
