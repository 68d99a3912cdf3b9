// SPDX-License-Identifier: Apache-2.0

//! The wrapper template every capability wrapper in this crate builds on:
//! lazy connection acquisition, schema isolation, a bounded error log, and
//! an O(1) metrics map.

use parking_lot::Mutex;
use simtel_engine::error::{Error, ErrorKind};
use simtel_engine::resource::{ErrorLog, LatencyWindow, MetricsSnapshot, RecordedError};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;

/// Samples retained per latency window; bounds wrapper metrics memory
/// regardless of call volume.
const LATENCY_WINDOW_CAPACITY: usize = 512;

fn schema_name(run_id: &str) -> String {
    let sanitized: String = run_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("run_{sanitized}")
}

/// Shared connection discipline, error log, and metrics map for one
/// capability wrapper instance. Not shared across services: each service
/// port gets its own [`WrapperBase`], built fresh by
/// `Database::get_wrapped_resource`.
pub(crate) struct WrapperBase {
    pool: PgPool,
    connection: AsyncMutex<Option<PoolConnection<Postgres>>>,
    bound_run_id: Mutex<Option<String>>,
    error_log: Mutex<ErrorLog>,
    counters: Mutex<BTreeMap<String, AtomicCounter>>,
    latencies: Mutex<BTreeMap<String, LatencyWindow>>,
}

/// A plain counter cell; kept out of the `BTreeMap` value's `Copy` bound by
/// using interior atomics so concurrent reads from the metrics snapshot
/// never race a concurrent increment.
struct AtomicCounter(AtomicU64);

impl WrapperBase {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self {
            pool,
            connection: AsyncMutex::new(None),
            bound_run_id: Mutex::new(None),
            error_log: Mutex::new(ErrorLog::new()),
            counters: Mutex::new(BTreeMap::new()),
            latencies: Mutex::new(BTreeMap::new()),
        }
    }

    /// Acquires a cached connection and binds it to `run_id`'s schema if
    /// not already bound. A no-op if both are already true.
    pub(crate) async fn ensure_connection(&self, run_id: &str) -> Result<(), Error> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            let conn = self.pool.acquire().await.map_err(|e| {
                self.record_error("transient_io", "failed to acquire a database connection");
                Error::TransientIo {
                    message: "failed to acquire a database connection".to_string(),
                    source: Some(Box::new(e)),
                }
            })?;
            *guard = Some(conn);
        }

        let already_bound = self.bound_run_id.lock().as_deref() == Some(run_id);
        if already_bound {
            return Ok(());
        }

        let schema = schema_name(run_id);
        let conn = guard.as_mut().expect("connection populated above");
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
            .execute(conn.as_mut())
            .await
            .map_err(|e| {
                self.record_error("transient_io", "failed to create run schema");
                Error::TransientIo {
                    message: format!("failed to create schema '{schema}'"),
                    source: Some(Box::new(e)),
                }
            })?;
        sqlx::query(&format!("SET search_path TO {schema}"))
            .execute(conn.as_mut())
            .await
            .map_err(|e| {
                self.record_error("transient_io", "failed to bind run schema");
                Error::TransientIo {
                    message: format!("failed to set search_path to '{schema}'"),
                    source: Some(Box::new(e)),
                }
            })?;
        *self.bound_run_id.lock() = Some(run_id.to_string());
        Ok(())
    }

    /// Drops the cached connection, returning it to the pool. Called
    /// before any bounded idle wait to keep the pool small under load.
    pub(crate) async fn release_connection(&self) {
        let mut guard = self.connection.lock().await;
        *guard = None;
    }

    /// Runs `query` with the write side of the current connection. Callers
    /// must have called [`Self::ensure_connection`] first.
    pub(crate) async fn connection(&self) -> tokio::sync::MutexGuard<'_, Option<PoolConnection<Postgres>>> {
        self.connection.lock().await
    }

    pub(crate) fn record_error(&self, code: &'static str, message: impl Into<String>) {
        self.error_log.lock().record(code, message, String::new());
    }

    pub(crate) fn record_operation(&self, name: &str) {
        self.increment(name);
    }

    pub(crate) fn record_latency(&self, name: &str, started: Instant) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.latencies
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| LatencyWindow::new(LATENCY_WINDOW_CAPACITY))
            .record(elapsed_ms);
    }

    fn increment(&self, name: &str) {
        self.counters
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| AtomicCounter(AtomicU64::new(0)))
            .0
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn run_id_in_current_schema(&self) -> Option<String> {
        self.bound_run_id.lock().clone()
    }

    pub(crate) fn errors(&self) -> Vec<RecordedError> {
        self.error_log.lock().snapshot()
    }

    pub(crate) fn clear_errors(&self) {
        self.error_log.lock().clear();
    }

    pub(crate) fn metrics(&self) -> MetricsSnapshot {
        let connection_cached = u8::from(self.connection.try_lock().map(|g| g.is_some()).unwrap_or(true));
        let counters = self
            .counters
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.0.load(Ordering::Relaxed)))
            .collect();
        let latencies = self
            .latencies
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.snapshot()))
            .collect();
        MetricsSnapshot {
            error_count: self.error_log.lock().len() as u64,
            connection_cached,
            counters,
            latencies,
        }
    }
}

pub(crate) fn not_found(run_id: &str) -> Error {
    Error::NotFound(run_id.to_string())
}

pub(crate) fn is_not_found(err: &Error) -> bool {
    err.kind() == ErrorKind::NotFound
}
