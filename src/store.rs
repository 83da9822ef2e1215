/*!
 * Pooled persistence of analysis results
 *
 * Every completed analysis is handed to a [`ResultStore`]. The bundled
 * implementation leases an exclusive resource from a
 * [`ResourcePool`](quill_core_resilience::ResourcePool) for each write, so
 * concurrent analyses share a bounded number of open handles.
 *
 * # Example
 *
 * ```no_run
 * use quill::analysis::{AnalysisRequest, AnalysisResult};
 * use quill::store::{PooledResultStore, ResultStore};
 * use quill_core_resilience::PoolConfig;
 * use std::collections::BTreeMap;
 *
 * let store = PooledResultStore::jsonl("results.jsonl", PoolConfig::default()).unwrap();
 * let request = AnalysisRequest::new("An essay.");
 * let result = AnalysisResult::genuine(BTreeMap::new(), serde_json::Value::Null);
 * store.persist(&request.fingerprint(), &request, &result).unwrap();
 * ```
 */

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use quill_core_resilience::{PoolConfig, PoolStats, ResilienceError, ResourceFactory, ResourcePool};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::{
    short_fingerprint, Aggressiveness, AnalysisRequest, AnalysisResult, CoachingLevel, EssayMode,
};
use crate::error::{QuillError, Result};

/// One persisted analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// RFC 3339 timestamp with timezone
    pub recorded_at: String,
    pub fingerprint: String,
    pub mode: EssayMode,
    pub coaching: CoachingLevel,
    pub aggressiveness: Aggressiveness,
    pub result: AnalysisResult,
}

impl StoredRecord {
    pub fn new(fingerprint: &str, request: &AnalysisRequest, result: &AnalysisResult) -> Self {
        Self {
            recorded_at: Utc::now().to_rfc3339(),
            fingerprint: fingerprint.to_string(),
            mode: request.mode,
            coaching: request.coaching,
            aggressiveness: request.aggressiveness,
            result: result.clone(),
        }
    }
}

/// Destination for completed analyses
pub trait ResultStore: Send + Sync {
    fn persist(
        &self,
        fingerprint: &str,
        request: &AnalysisRequest,
        result: &AnalysisResult,
    ) -> Result<()>;

    /// Statistics of the backing pool, if there is one
    fn pool_stats(&self) -> Option<PoolStats> {
        None
    }

    /// Zero the backing pool's hit/miss counters
    fn reset_stats(&self) {}

    /// Release every held resource; later writes may fail
    fn close(&self) {}
}

/// Writes a record through a leased resource
pub trait ResultWriter<T>: Send + Sync {
    fn write(&self, resource: &mut T, record: &StoredRecord) -> Result<()>;
}

/// A [`ResultStore`] that leases a pooled resource for every write
pub struct PooledResultStore<T: Send + 'static> {
    pool: ResourcePool<T>,
    writer: Arc<dyn ResultWriter<T>>,
}

impl<T: Send + 'static> PooledResultStore<T> {
    pub fn new(pool: ResourcePool<T>, writer: Arc<dyn ResultWriter<T>>) -> Self {
        Self { pool, writer }
    }

    pub fn pool(&self) -> &ResourcePool<T> {
        &self.pool
    }
}

impl PooledResultStore<JsonlHandle> {
    /// JSON-lines store appending to `path`, with one open handle per pooled resource
    pub fn jsonl(path: impl Into<PathBuf>, config: PoolConfig) -> Result<Self> {
        let sink = Arc::new(JsonlSink::new(path));
        let pool = ResourcePool::new(sink.clone(), config)?;
        Ok(Self::new(pool, sink))
    }
}

impl<T: Send + 'static> ResultStore for PooledResultStore<T> {
    fn persist(
        &self,
        fingerprint: &str,
        request: &AnalysisRequest,
        result: &AnalysisResult,
    ) -> Result<()> {
        let record = StoredRecord::new(fingerprint, request, result);
        let mut lease = self.pool.acquire()?;
        debug!(
            "Persisting {} through resource {} ({:?})",
            short_fingerprint(fingerprint),
            lease.id(),
            lease.kind()
        );
        self.writer.write(&mut lease, &record)
    }

    fn pool_stats(&self) -> Option<PoolStats> {
        Some(self.pool.stats())
    }

    fn reset_stats(&self) {
        self.pool.reset_stats();
    }

    fn close(&self) {
        self.pool.close_all();
    }
}

/// An append-mode handle on a JSON-lines results file
#[derive(Debug)]
pub struct JsonlHandle {
    file: File,
    path: PathBuf,
}

impl JsonlHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Opens handles on a JSON-lines results file and writes records through them
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back, ignoring blank lines
    pub fn read_all(path: &Path) -> Result<Vec<StoredRecord>> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

impl ResourceFactory<JsonlHandle> for JsonlSink {
    fn create(&self) -> std::result::Result<JsonlHandle, ResilienceError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                ResilienceError::ResourceCreation(format!(
                    "cannot open {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
        Ok(JsonlHandle {
            file,
            path: self.path.clone(),
        })
    }

    /// A handle is stale once the file it points at was removed or shrank
    fn is_healthy(&self, handle: &mut JsonlHandle) -> bool {
        matches!(
            (handle.file.metadata(), std::fs::metadata(&handle.path)),
            (Ok(open), Ok(on_disk)) if open.len() <= on_disk.len()
        )
    }

    fn close(&self, mut handle: JsonlHandle) {
        let _ = handle.file.flush();
    }
}

impl ResultWriter<JsonlHandle> for JsonlSink {
    fn write(&self, handle: &mut JsonlHandle, record: &StoredRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        // One write per record keeps concurrent appends line-atomic
        handle
            .file
            .write_all(&line)
            .map_err(|e| QuillError::Store(format!("{}: {}", handle.path.display(), e)))
    }
}
