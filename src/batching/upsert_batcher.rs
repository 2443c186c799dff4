// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Throttled multi-row upserts into the target table.
//!
//! Records are split into fixed-size chunks. Each chunk becomes one
//! parameterized statement:
//!
//! ```sql
//! INSERT INTO products (unique_id, name, price)
//! VALUES ($1, $2, $3), ($4, $5, $6)
//! ON CONFLICT (unique_id) DO UPDATE SET name = EXCLUDED.name, price = EXCLUDED.price
//! ```
//!
//! Between consecutive chunks the batcher sleeps for the throttle interval.
//! This caps write throughput so foreground reads against the target are
//! not starved during large syncs. Any failed chunk aborts the call; chunks
//! after it are not attempted.
//!
//! # Example
//!
//! ```
//! use cdc_sync_engine::{Record, UpsertStatement};
//!
//! let rows = vec![
//!     Record::new().with("unique_id", "7-NULL").with("name", "Tea"),
//!     Record::new().with("unique_id", "7-3").with("name", "Tea (store 3)"),
//! ];
//! let statement = UpsertStatement::build("products", &rows).unwrap();
//!
//! assert_eq!(statement.rows, 2);
//! assert_eq!(statement.params.len(), 4);
//! assert!(statement.sql.contains("VALUES ($1, $2), ($3, $4)"));
//! assert!(statement.sql.ends_with("DO UPDATE SET name = EXCLUDED.name"));
//! ```

use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::events::EventBroadcaster;
use crate::record::{is_valid_identifier, uniform_columns, Record, SqlValue, UNIQUE_ID_COLUMN};
use crate::resilience::with_timeout;
use crate::storage::traits::{StorageError, TargetWriter};

/// PostgreSQL wire protocol limit on bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Upsert batching settings
#[derive(Debug, Clone)]
pub struct UpsertConfig {
    /// Destination table
    pub table: String,
    /// Rows per statement
    pub batch_size: usize,
    /// Pause between consecutive statements
    pub throttle: Duration,
    /// Emit a progress event every N chunks (and on the last one)
    pub progress_every: usize,
    /// Bound on a single statement (None = unbounded)
    pub statement_timeout: Option<Duration>,
}

impl Default for UpsertConfig {
    fn default() -> Self {
        Self {
            table: "products".to_string(),
            batch_size: 200,
            throttle: Duration::from_millis(200),
            progress_every: 5,
            statement_timeout: None,
        }
    }
}

/// One multi-row INSERT ... ON CONFLICT statement with its positional binds.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertStatement {
    pub sql: String,
    pub columns: Vec<String>,
    /// Row-major values: `rows * columns.len()` entries
    pub params: Vec<SqlValue>,
    pub rows: usize,
}

impl UpsertStatement {
    /// Build the statement for one chunk.
    ///
    /// Columns come from the first record; see [`uniform_columns`].
    pub fn build(table: &str, chunk: &[Record]) -> Result<Self, StorageError> {
        if !is_valid_identifier(table) {
            return Err(StorageError::InvalidIdentifier(table.to_string()));
        }
        let columns = uniform_columns(chunk)?;

        let width = columns.len();
        let param_count = width * chunk.len();
        if param_count > MAX_BIND_PARAMS {
            return Err(StorageError::InvalidBatch(format!(
                "{} rows x {} columns exceeds {} bind parameters",
                chunk.len(),
                width,
                MAX_BIND_PARAMS
            )));
        }

        let values = (0..chunk.len())
            .map(|row| {
                let placeholders: Vec<String> = (1..=width)
                    .map(|col| format!("${}", row * width + col))
                    .collect();
                format!("({})", placeholders.join(", "))
            })
            .collect::<Vec<_>>()
            .join(", ");

        let updates: Vec<String> = columns
            .iter()
            .filter(|c| c.as_str() != UNIQUE_ID_COLUMN)
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        let conflict_action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) {}",
            table,
            columns.join(", "),
            values,
            UNIQUE_ID_COLUMN,
            conflict_action
        );

        let params = chunk.iter().flat_map(|r| r.values().cloned()).collect();

        Ok(Self {
            sql,
            columns,
            params,
            rows: chunk.len(),
        })
    }

    /// Values of row `index`, in column order.
    #[must_use]
    pub fn row(&self, index: usize) -> &[SqlValue] {
        let width = self.columns.len();
        &self.params[index * width..(index + 1) * width]
    }
}

/// Outcome of one [`BatchUpserter::upsert`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Records submitted
    pub rows: usize,
    /// Statements executed
    pub statements: usize,
}

/// Chunked, throttled upsert into the target table.
#[derive(Debug, Clone)]
pub struct BatchUpserter {
    config: UpsertConfig,
    events: EventBroadcaster,
}

impl BatchUpserter {
    #[must_use]
    pub fn new(config: UpsertConfig, events: EventBroadcaster) -> Self {
        Self { config, events }
    }

    #[must_use]
    pub fn config(&self) -> &UpsertConfig {
        &self.config
    }

    /// Number of statements `rows` records will take.
    #[must_use]
    pub fn batch_count(&self, rows: usize) -> usize {
        rows.div_ceil(self.config.batch_size.max(1))
    }

    /// Upsert `records` through `writer`, one statement per chunk.
    pub async fn upsert<W>(&self, writer: &mut W, records: &[Record]) -> Result<UpsertReport, StorageError>
    where
        W: TargetWriter + ?Sized,
    {
        if records.is_empty() {
            return Ok(UpsertReport::default());
        }

        let batch_size = self.config.batch_size.max(1);
        let total_batches = self.batch_count(records.len());
        let progress_every = self.config.progress_every.max(1);
        info!(
            rows = records.len(),
            batches = total_batches,
            table = %self.config.table,
            "Preparing throttled upsert"
        );

        let mut report = UpsertReport::default();

        for (index, chunk) in records.chunks(batch_size).enumerate() {
            let batch_num = index + 1;
            let start = Instant::now();

            let statement = UpsertStatement::build(&self.config.table, chunk)?;
            let result = with_timeout(
                "target_upsert",
                self.config.statement_timeout,
                writer.execute_upsert(&statement),
            )
            .await;

            if let Err(e) = result {
                error!(batch = batch_num, total = total_batches, error = %e, "Upsert batch failed");
                crate::metrics::record_error("target", "upsert", "statement");
                return Err(e);
            }

            report.rows += chunk.len();
            report.statements += 1;
            crate::metrics::record_batch_size("target", chunk.len());
            crate::metrics::record_latency("target", "upsert", start.elapsed());
            crate::metrics::record_rows_upserted(chunk.len());
            debug!(batch = batch_num, total = total_batches, rows = chunk.len(), "Upsert batch applied");

            if batch_num % progress_every == 0 || batch_num == total_batches {
                info!("Synced batch {}/{}", batch_num, total_batches);
                self.events
                    .info(format!("Syncing: batch {} of {}", batch_num, total_batches));
            }

            if batch_num < total_batches && !self.config.throttle.is_zero() {
                tokio::time::sleep(self.config.throttle).await;
            }
        }

        Ok(report)
    }
}
