// SPDX-License-Identifier: Apache-2.0

//! `RawStorageProvider`: the content-addressable filesystem sink for raw
//! simulation output, plus its dead-letter counterpart.

use crate::framing::encode;
use parking_lot::Mutex;
use simtel_engine::error::Error;
use simtel_engine::message::TickRecord;
use simtel_engine::resource::{ErrorLog, MetricsSnapshot, RecordedError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;

/// Filesystem-backed raw storage for one run: context, tick batches, and
/// a dead-letter sink for batches that exhausted retries.
pub struct RawStorageProvider {
    root: PathBuf,
    run_id: AsyncMutex<Option<String>>,
    error_log: Mutex<ErrorLog>,
    writes: AtomicU64,
    dlq_writes: AtomicU64,
    failures: AtomicU64,
}

impl RawStorageProvider {
    pub(crate) fn new(root: PathBuf) -> Self {
        Self {
            root,
            run_id: AsyncMutex::new(None),
            error_log: Mutex::new(ErrorLog::new()),
            writes: AtomicU64::new(0),
            dlq_writes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join("runs").join(run_id)
    }

    /// Creates the run's `raw_data` and `raw_data_dlq` directories and
    /// binds this wrapper to `run_id`. Idempotent: re-initializing the
    /// same run is a no-op beyond confirming the directories exist.
    pub async fn initialize(&self, run_id: &str) -> Result<(), Error> {
        let run_dir = self.run_dir(run_id);
        for sub in ["raw_data", "raw_data_dlq"] {
            tokio::fs::create_dir_all(run_dir.join(sub))
                .await
                .map_err(|e| self.io_error("initialize", e))?;
        }
        *self.run_id.lock().await = Some(run_id.to_string());
        tracing::debug!(run_id, "raw storage initialized");
        Ok(())
    }

    /// Writes the run's single context record to `raw_data/context.bin`,
    /// overwriting any prior content (a run has exactly one context).
    pub async fn write_context(&self, run_id: &str, context_bytes: &[u8]) -> Result<(), Error> {
        let path = self.run_dir(run_id).join("raw_data").join("context.bin");
        self.write_framed(&path, std::iter::once(context_bytes)).await
    }

    /// Writes `batch` to `raw_data/ticks_{min:09}-{max:09}.bin`. Writing
    /// the same tick range again overwrites the file with identical
    /// content, making the operation idempotent under at-least-once
    /// redelivery.
    pub async fn write_ticks(&self, run_id: &str, batch: &[TickRecord]) -> Result<(), Error> {
        self.write_tick_batch(run_id, batch, "raw_data").await?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes `batch` to the run's dead-letter directory instead of its
    /// primary one, for batches that exhausted the retry tracker's
    /// budget.
    pub async fn write_ticks_to_dlq(&self, run_id: &str, batch: &[TickRecord]) -> Result<(), Error> {
        self.write_tick_batch(run_id, batch, "raw_data_dlq").await?;
        self.dlq_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn write_tick_batch(&self, run_id: &str, batch: &[TickRecord], subdir: &str) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        let min_tick = batch.iter().map(|r| r.tick_number).min().expect("batch is non-empty");
        let max_tick = batch.iter().map(|r| r.tick_number).max().expect("batch is non-empty");
        let file_name = format!("ticks_{min_tick:09}-{max_tick:09}.bin");
        let path = self.run_dir(run_id).join(subdir).join(file_name);
        let payloads: Vec<&[u8]> = batch.iter().map(|r| r.payload.as_slice()).collect();
        self.write_framed(&path, payloads).await
    }

    async fn write_framed<'a>(
        &self,
        path: &Path,
        records: impl IntoIterator<Item = &'a [u8]>,
    ) -> Result<(), Error> {
        let buf = encode(records);
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| self.io_error("write", e))?;
        file.write_all(&buf).await.map_err(|e| self.io_error("write", e))?;
        file.flush().await.map_err(|e| self.io_error("write", e))
    }

    /// Releases this wrapper's binding to its run. Idempotent.
    pub async fn close(&self) -> Result<(), Error> {
        *self.run_id.lock().await = None;
        Ok(())
    }

    fn io_error(&self, op: &'static str, source: std::io::Error) -> Error {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(op, error = %source, "raw storage operation failed");
        self.error_log
            .lock()
            .record("transient_io", format!("raw storage {op} failed"), source.to_string());
        Error::TransientIo {
            message: format!("raw storage {op} failed"),
            source: Some(Box::new(source)),
        }
    }

    /// This wrapper's current metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut counters = std::collections::BTreeMap::new();
        let _ = counters.insert("writes".to_string(), self.writes.load(Ordering::Relaxed));
        let _ = counters.insert("dlq_writes".to_string(), self.dlq_writes.load(Ordering::Relaxed));
        let _ = counters.insert("failures".to_string(), self.failures.load(Ordering::Relaxed));
        MetricsSnapshot {
            error_count: self.error_log.lock().len() as u64,
            connection_cached: 0,
            counters,
            latencies: std::collections::BTreeMap::new(),
        }
    }

    /// This wrapper's recorded errors, oldest first.
    #[must_use]
    pub fn errors(&self) -> Vec<RecordedError> {
        self.error_log.lock().snapshot()
    }
}
