//! One-time full copy of the source table.

use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info};

use crate::events::SyncKind;
use crate::resilience::with_timeout;
use crate::storage::traits::StorageError;

use super::{CycleOutcome, EngineState, SyncEngine};

impl SyncEngine {
    /// Copy every source row into the target. Caller holds the cycle guard.
    ///
    /// Non-transactional: rows committed before a failure stay, and the
    /// rerun upserts them again.
    #[tracing::instrument(skip(self), name = "initial_sync")]
    pub(super) async fn initial_sync_cycle(&self) -> CycleOutcome {
        let kind = SyncKind::InitialFull;
        let start = Instant::now();
        self.set_state(EngineState::InitialSyncRunning);
        self.events.sync_start(kind, "Starting full sync (safe mode)...", None);

        let outcome = match self.copy_source_table().await {
            Ok(rows) => {
                self.advance_sync_state(|s| s.initial_sync_completed(Utc::now())).await;
                info!(rows, elapsed_ms = start.elapsed().as_millis() as u64, "Initial full sync complete");
                self.events.sync_success(kind, Some(json!({ "synchronized": rows })));
                crate::metrics::record_sync_cycle(kind.label(), "success");
                self.set_state(EngineState::Idle);
                CycleOutcome::InitialSync { rows }
            }
            Err(e) => {
                error!(error = %e, "Initial full sync failed; will retry on next tick");
                self.events.sync_failure(kind, &e);
                crate::metrics::record_sync_cycle(kind.label(), "error");
                self.set_state(EngineState::InitialSyncPending);
                CycleOutcome::Failed {
                    kind,
                    error: e.to_string(),
                }
            }
        };

        crate::metrics::record_sync_duration(kind.label(), start.elapsed());
        outcome
    }

    async fn copy_source_table(&self) -> Result<usize, StorageError> {
        let limit = self.config.operation_timeout();

        let rows = with_timeout("source_fetch_all", limit, self.source.fetch_all_rows()).await?;
        info!(rows = rows.len(), table = %self.config.table_name, "Fetched rows for full sync");

        let mut writer = with_timeout("target_acquire", limit, self.target.writer()).await?;
        let report = self.upserter.upsert(writer.as_mut(), &rows).await?;
        Ok(report.rows)
    }
}
