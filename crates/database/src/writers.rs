// SPDX-License-Identifier: Apache-2.0

//! `EnvironmentDataWriter` and `OrganismDataWriter`: upsert-by-identity
//! writers for simulated tick data, run by the persistence indexer.

use crate::base::WrapperBase;
use simtel_engine::error::Error;
use simtel_engine::message::TickRecord;
use simtel_engine::resource::MetricsSnapshot;
use sqlx::Connection;
use std::time::Instant;

/// Writes environment-cell batches: tick records with no `organism_id`.
/// Upserts by tick number, so redelivery from an at-least-once channel is
/// a no-op.
pub struct EnvironmentDataWriter {
    base: WrapperBase,
}

impl EnvironmentDataWriter {
    pub(crate) fn new(pool: sqlx::PgPool) -> Self {
        Self {
            base: WrapperBase::new(pool),
        }
    }

    /// Upserts every record in `batch` keyed by tick number. `env_props`
    /// carries run-level environment properties shared by the whole batch
    /// (grid dimensions, units, ...).
    pub async fn write_environment_cells(
        &self,
        run_id: &str,
        batch: &[TickRecord],
        env_props: &serde_json::Value,
    ) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        self.base.ensure_connection(run_id).await?;
        let started = Instant::now();
        self.base.record_operation("write_environment_cells.batches");

        let mut guard = self.base.connection().await;
        let conn = guard.as_mut().expect("connection ensured above");
        let mut tx = conn.begin().await.map_err(|e| {
            self.base
                .record_error("transient_io", "failed to start environment write transaction");
            Error::TransientIo {
                message: "failed to start environment write transaction".to_string(),
                source: Some(Box::new(e)),
            }
        })?;

        for record in batch {
            sqlx::query(
                "INSERT INTO environment_cells (tick_number, props, payload) VALUES ($1, $2, $3) \
                 ON CONFLICT (tick_number) DO UPDATE SET props = excluded.props, payload = excluded.payload",
            )
            .bind(record.tick_number as i64)
            .bind(env_props)
            .bind(&record.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                self.base.record_operation("write_environment_cells.failure");
                self.base
                    .record_error("transient_io", "environment cell upsert failed");
                Error::TransientIo {
                    message: format!("environment cell upsert failed for tick {}", record.tick_number),
                    source: Some(Box::new(e)),
                }
            })?;
        }

        tx.commit().await.map_err(|e| {
            self.base
                .record_error("transient_io", "environment write commit failed");
            Error::TransientIo {
                message: "environment write commit failed".to_string(),
                source: Some(Box::new(e)),
            }
        })?;
        drop(guard);
        self.base.record_latency("write_environment_cells", started);
        self.base.record_operation("write_environment_cells.rows");
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

/// Writes organism-state batches: tick records carrying an `organism_id`.
/// Upserts by `(tick_number, organism_id)`.
pub struct OrganismDataWriter {
    base: WrapperBase,
}

impl OrganismDataWriter {
    pub(crate) fn new(pool: sqlx::PgPool) -> Self {
        Self {
            base: WrapperBase::new(pool),
        }
    }

    /// Upserts every record in `batch` keyed by `(tick_number,
    /// organism_id)`. Records with no `organism_id` are rejected as a
    /// contract violation rather than silently dropped.
    pub async fn write_organism_states(&self, run_id: &str, batch: &[TickRecord]) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        self.base.ensure_connection(run_id).await?;
        let started = Instant::now();
        self.base.record_operation("write_organism_states.batches");

        let mut guard = self.base.connection().await;
        let conn = guard.as_mut().expect("connection ensured above");
        let mut tx = conn.begin().await.map_err(|e| {
            self.base
                .record_error("transient_io", "failed to start organism write transaction");
            Error::TransientIo {
                message: "failed to start organism write transaction".to_string(),
                source: Some(Box::new(e)),
            }
        })?;

        for record in batch {
            let organism_id = record.organism_id.ok_or_else(|| {
                Error::ContractViolation(
                    "organism state record is missing organism_id".to_string(),
                )
            })?;
            sqlx::query(
                "INSERT INTO organism_states (tick_number, organism_id, payload) VALUES ($1, $2, $3) \
                 ON CONFLICT (tick_number, organism_id) DO UPDATE SET payload = excluded.payload",
            )
            .bind(record.tick_number as i64)
            .bind(organism_id as i64)
            .bind(&record.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                self.base.record_operation("write_organism_states.failure");
                self.base
                    .record_error("transient_io", "organism state upsert failed");
                Error::TransientIo {
                    message: format!(
                        "organism state upsert failed for tick {} organism {}",
                        record.tick_number, organism_id
                    ),
                    source: Some(Box::new(e)),
                }
            })?;
        }

        tx.commit().await.map_err(|e| {
            self.base
                .record_error("transient_io", "organism write commit failed");
            Error::TransientIo {
                message: "organism write commit failed".to_string(),
                source: Some(Box::new(e)),
            }
        })?;
        drop(guard);
        self.base.record_latency("write_organism_states", started);
        self.base.record_operation("write_organism_states.rows");
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
