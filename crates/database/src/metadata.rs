// SPDX-License-Identifier: Apache-2.0

//! `MetadataReader` and `MetadataWriter`: the coordination record a run's
//! indexers block on before they start writing simulation output.

use crate::base::{is_not_found, not_found, WrapperBase};
use simtel_engine::error::Error;
use simtel_engine::resource::{MetricsSnapshot, RecordedError};
use sqlx::Row;
use std::time::Instant;

/// A run's coordination record. `fields` carries whatever run-level detail
/// the producing system attaches (start time, scenario name, ...) as an
/// opaque JSON document; this crate never interprets it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Metadata {
    /// The run this record coordinates.
    pub run_id: String,
    /// Opaque run-level detail.
    pub fields: serde_json::Value,
}

/// Reads the coordination record for a run. Indexers poll
/// [`Self::get_metadata`] until it succeeds or their poll budget is spent;
/// `NOT_FOUND` is the expected steady state until the writer catches up.
pub struct MetadataReader {
    base: WrapperBase,
}

impl MetadataReader {
    pub(crate) fn new(pool: sqlx::PgPool) -> Self {
        Self {
            base: WrapperBase::new(pool),
        }
    }

    /// Fetches the coordination record for `run_id`. Returns
    /// [`simtel_engine::error::Error::NotFound`] when the writer has not
    /// yet inserted it.
    pub async fn get_metadata(&self, run_id: &str) -> Result<Metadata, Error> {
        self.base.ensure_connection(run_id).await?;
        let started = Instant::now();
        self.base.record_operation("get_metadata.count");

        let mut guard = self.base.connection().await;
        let conn = guard.as_mut().expect("connection ensured above");
        let row = sqlx::query("SELECT run_id, fields FROM metadata WHERE run_id = $1")
            .bind(run_id)
            .fetch_optional(conn.as_mut())
            .await
            .map_err(|e| {
                self.base.record_operation("get_metadata.failure");
                self.base
                    .record_error("transient_io", "metadata query failed");
                Error::TransientIo {
                    message: "metadata query failed".to_string(),
                    source: Some(Box::new(e)),
                }
            })?;
        drop(guard);
        self.base.record_latency("get_metadata", started);

        match row {
            Some(row) => Ok(Metadata {
                run_id: row.try_get("run_id").unwrap_or_else(|_| run_id.to_string()),
                fields: row.try_get("fields").unwrap_or(serde_json::Value::Null),
            }),
            None => {
                self.base.record_operation("get_metadata.not_found");
                Err(not_found(run_id))
            }
        }
    }

    /// Whether a coordination record exists for `run_id`, without treating
    /// its absence as an error.
    pub async fn has_metadata(&self, run_id: &str) -> Result<bool, Error> {
        match self.get_metadata(run_id).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The run ID the wrapper's cached connection is currently bound to,
    /// if any.
    #[must_use]
    pub fn get_run_id_in_current_schema(&self) -> Option<String> {
        self.base.run_id_in_current_schema()
    }

    /// Drops the cached connection, keeping the shared pool small between
    /// poll attempts.
    pub async fn release_connection(&self) {
        self.base.release_connection().await;
    }

    /// This wrapper's current metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.base.metrics()
    }

    /// This wrapper's recorded errors, oldest first.
    #[must_use]
    pub fn errors(&self) -> Vec<RecordedError> {
        self.base.errors()
    }

    /// Clears recorded errors.
    pub fn clear_errors(&self) {
        self.base.clear_errors();
    }
}

/// Inserts the coordination record for a run. Idempotent: inserting the
/// same `run_id` twice leaves the stored record unchanged.
pub struct MetadataWriter {
    base: WrapperBase,
}

impl MetadataWriter {
    pub(crate) fn new(pool: sqlx::PgPool) -> Self {
        Self {
            base: WrapperBase::new(pool),
        }
    }

    /// Inserts `record`, doing nothing if a record for its `run_id`
    /// already exists.
    pub async fn insert_metadata(&self, record: &Metadata) -> Result<(), Error> {
        self.base.ensure_connection(&record.run_id).await?;
        let started = Instant::now();
        self.base.record_operation("insert_metadata.count");

        let mut guard = self.base.connection().await;
        let conn = guard.as_mut().expect("connection ensured above");
        sqlx::query(
            "INSERT INTO metadata (run_id, fields) VALUES ($1, $2) \
             ON CONFLICT (run_id) DO NOTHING",
        )
        .bind(&record.run_id)
        .bind(&record.fields)
        .execute(conn.as_mut())
        .await
        .map_err(|e| {
            self.base.record_operation("insert_metadata.failure");
            self.base
                .record_error("transient_io", "metadata insert failed");
            Error::TransientIo {
                message: "metadata insert failed".to_string(),
                source: Some(Box::new(e)),
            }
        })?;
        drop(guard);
        self.base.record_latency("insert_metadata", started);
        Ok(())
    }

    /// Drops the cached connection.
    pub async fn release_connection(&self) {
        self.base.release_connection().await;
    }

    /// This wrapper's current metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.base.metrics()
    }
}
