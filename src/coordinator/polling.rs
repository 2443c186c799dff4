//! Incremental cycle: consume the change log and apply it to the target.
//!
//! Per cycle:
//! 1. fetch unprocessed change-log rows and dedup them per entity key
//! 2. in one target transaction: delete removed keys, refresh and re-fetch
//!    updated keys at the source, upsert them
//! 3. commit, then flag every fetched log row processed
//! 4. stamp and persist `lastSyncTime`
//!
//! Marking happens after the commit, so a crash in between replays the
//! cycle. Replays are harmless because every write is keyed on `unique_id`.

use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use crate::cdc::{ChangeLogEntry, ChangeSet};
use crate::events::SyncKind;
use crate::resilience::with_timeout;
use crate::storage::traits::{StorageError, TargetTransaction};

use super::{CycleOutcome, EngineState, IncrementalSummary, SyncEngine};

impl SyncEngine {
    /// Run one incremental cycle. Caller holds the cycle guard.
    #[tracing::instrument(skip(self), name = "incremental_sync")]
    pub(super) async fn incremental_cycle(&self) -> CycleOutcome {
        let kind = SyncKind::Incremental;
        let start = Instant::now();
        self.set_state(EngineState::PollingRunning);

        let outcome = match self.apply_change_log().await {
            Ok(None) => CycleOutcome::NoChanges,
            Ok(Some(summary)) => {
                info!(
                    updates = summary.updates,
                    deletes = summary.deletes,
                    rows_upserted = summary.rows_upserted,
                    marked = summary.marked_processed,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Incremental sync complete"
                );
                self.events.sync_success(kind, None);
                crate::metrics::record_sync_cycle(kind.label(), "success");
                crate::metrics::record_sync_duration(kind.label(), start.elapsed());
                CycleOutcome::Incremental(summary)
            }
            Err(e) => {
                error!(error = %e, "Incremental sync failed");
                self.events.sync_failure(kind, &e);
                crate::metrics::record_sync_cycle(kind.label(), "error");
                CycleOutcome::Failed {
                    kind,
                    error: e.to_string(),
                }
            }
        };

        self.set_state(EngineState::Idle);
        outcome
    }

    async fn apply_change_log(&self) -> Result<Option<IncrementalSummary>, StorageError> {
        let limit = self.config.operation_timeout();

        let entries = with_timeout(
            "source_fetch_changes",
            limit,
            self.source.fetch_unprocessed_changes(),
        )
        .await?;
        crate::metrics::set_cdc_backlog(entries.len());
        if entries.is_empty() {
            return Ok(None);
        }

        let changes = ChangeSet::from_entries(&entries);
        if changes.is_empty() {
            return Ok(None);
        }

        info!(
            log_entries = entries.len(),
            updates = changes.updates.len(),
            deletes = changes.deletes.len(),
            "Processing change log"
        );
        self.events.sync_start(
            SyncKind::Incremental,
            "Processing changes...",
            Some(json!({ "updates": changes.updates.len(), "deletions": changes.deletes.len() })),
        );

        let mut tx = with_timeout("target_begin", limit, self.target.begin()).await?;
        let applied = self.apply_in_transaction(tx.as_mut(), &changes).await;
        let (rows_deleted, rows_upserted) = match applied {
            Ok(counts) => {
                with_timeout("target_commit", limit, tx.commit()).await?;
                counts
            }
            Err(e) => {
                if let Err(rollback_err) = with_timeout("target_rollback", limit, tx.rollback()).await {
                    warn!(error = %rollback_err, "Rollback failed; connection discarded");
                }
                return Err(e);
            }
        };

        crate::metrics::record_cdc_entries("update", changes.updates.len());
        crate::metrics::record_cdc_entries("delete", changes.deletes.len());

        let marked = self.mark_processed(&entries).await?;
        self.advance_sync_state(|s| s.synced_at(Utc::now())).await;

        Ok(Some(IncrementalSummary {
            log_entries: entries.len(),
            updates: changes.updates.len(),
            deletes: changes.deletes.len(),
            rows_upserted,
            rows_deleted,
            marked_processed: marked,
        }))
    }

    /// Deletes, refreshes and upserts on `tx`. Returns (deleted, upserted).
    async fn apply_in_transaction(
        &self,
        tx: &mut dyn TargetTransaction,
        changes: &ChangeSet,
    ) -> Result<(u64, usize), StorageError> {
        let limit = self.config.operation_timeout();

        let delete_ids = changes.delete_ids();
        let deleted = if delete_ids.is_empty() {
            0
        } else {
            let deleted = with_timeout(
                "target_delete",
                limit,
                tx.delete_unique_ids(&self.config.target_table, &delete_ids),
            )
            .await?;
            info!(requested = delete_ids.len(), deleted, "Deleted removed rows");
            deleted
        };

        if changes.updates.is_empty() {
            return Ok((deleted, 0));
        }

        for item in &changes.updates {
            with_timeout("source_refresh", limit, self.source.refresh_entity(&item.key)).await?;
        }

        let update_ids = changes.update_ids();
        let rows = with_timeout(
            "source_fetch_by_ids",
            limit,
            self.source.fetch_rows_by_unique_ids(&update_ids),
        )
        .await?;
        if rows.len() < update_ids.len() {
            warn!(
                requested = update_ids.len(),
                found = rows.len(),
                "Some refreshed keys have no source row"
            );
        }

        let report = self.upserter.upsert(tx, &rows).await?;
        Ok((deleted, report.rows))
    }

    async fn mark_processed(&self, entries: &[ChangeLogEntry]) -> Result<u64, StorageError> {
        let log_ids: Vec<i64> = entries.iter().map(|e| e.log_id).collect();
        let marked = with_timeout(
            "source_mark_processed",
            self.config.operation_timeout(),
            self.source.mark_processed(&log_ids),
        )
        .await?;
        crate::metrics::record_cdc_processed(marked);
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{harness, Harness};
    use super::*;
    use crate::cdc::{ChangeType, EntityKey};
    use crate::events::EventAction;
    use crate::record::Record;
    use crate::storage::memory::{InjectedFailure, MemorySource};

    fn product(id: &str, name: &str) -> Record {
        Record::new().with("unique_id", id).with("name", name)
    }

    fn seeded() -> Harness {
        let h = harness(MemorySource::new());
        h.target.insert_row("products", product("7-3", "old"));
        h.target.insert_row("products", product("8-NULL", "keep"));
        h
    }

    #[tokio::test]
    async fn test_no_changes_is_silent() {
        let h = seeded();
        let mut rx = h.engine.events().subscribe();

        assert_eq!(h.engine.incremental_cycle().await, CycleOutcome::NoChanges);

        assert!(rx.try_recv().is_err());
        assert_eq!(h.target.commit_count(), 0);
        assert_eq!(h.engine.sync_state().last_sync_time.timestamp(), 0);
    }

    #[tokio::test]
    async fn test_update_refreshes_and_upserts() {
        let h = seeded();
        h.source.stage_row(product("7-NULL", "Tea"));
        let log_id = h.source.log_change(7, None, ChangeType::Update);

        let outcome = h.engine.incremental_cycle().await;

        let CycleOutcome::Incremental(summary) = outcome else {
            panic!("expected incremental outcome, got {:?}", outcome);
        };
        assert_eq!(summary.updates, 1);
        assert_eq!(summary.rows_upserted, 1);
        assert_eq!(h.source.refreshed_keys(), vec![EntityKey::new(7, None)]);
        assert!(h.target.get("products", "7-NULL").is_some());
        assert_eq!(h.source.processed_log_ids(), vec![log_id]);
        assert!(h.engine.sync_state().last_sync_time.timestamp() > 0);
    }

    #[tokio::test]
    async fn test_delete_removes_row() {
        let h = seeded();
        h.source.log_change(7, Some(3), ChangeType::Delete);

        let outcome = h.engine.incremental_cycle().await;

        assert!(matches!(outcome, CycleOutcome::Incremental(IncrementalSummary { rows_deleted: 1, .. })));
        assert_eq!(h.target.unique_ids("products"), vec!["8-NULL"]);
        assert_eq!(h.source.unprocessed_count(), 0);
        assert!(h.source.refreshed_keys().is_empty());
    }

    #[tokio::test]
    async fn test_delete_wins_over_update_in_same_cycle() {
        let h = seeded();
        h.source.stage_row(product("7-3", "new"));
        let ids = [
            h.source.log_change(7, Some(3), ChangeType::Update),
            h.source.log_change(7, Some(3), ChangeType::Delete),
            h.source.log_change(7, Some(3), ChangeType::Update),
        ];

        h.engine.incremental_cycle().await;

        assert_eq!(h.target.unique_ids("products"), vec!["8-NULL"]);
        assert!(h.source.refreshed_keys().is_empty());
        assert_eq!(h.source.processed_log_ids(), ids.to_vec());
    }

    #[tokio::test]
    async fn test_refresh_failure_rolls_back_deletes() {
        let h = seeded();
        h.source.log_change(7, Some(3), ChangeType::Delete);
        h.source.log_change(9, None, ChangeType::Update);
        h.source.fail_operation("refresh", InjectedFailure::Query);
        let mut rx = h.engine.events().subscribe();

        let outcome = h.engine.incremental_cycle().await;

        assert!(outcome.is_failure());
        assert_eq!(h.target.unique_ids("products"), vec!["7-3", "8-NULL"]);
        assert_eq!(h.target.rollback_count(), 1);
        assert_eq!(h.source.unprocessed_count(), 2);
        assert_eq!(h.engine.sync_state().last_sync_time.timestamp(), 0);
        assert_eq!(h.engine.state(), EngineState::Idle);

        let start = rx.try_recv().unwrap();
        assert_eq!(start.action, EventAction::SyncStart);
        assert_eq!(start.payload["counts"]["updates"], 1);
        assert_eq!(start.payload["counts"]["deletions"], 1);
        let end = rx.try_recv().unwrap();
        assert_eq!(end.payload["status"], "error");
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_log_unprocessed() {
        let h = seeded();
        h.source.log_change(7, Some(3), ChangeType::Delete);
        h.target.fail_operation("commit", InjectedFailure::Connection);

        assert!(h.engine.incremental_cycle().await.is_failure());

        assert_eq!(h.target.unique_ids("products"), vec!["7-3", "8-NULL"]);
        assert_eq!(h.source.unprocessed_count(), 1);
        assert_eq!(h.source.calls("mark_processed"), 0);
    }

    #[tokio::test]
    async fn test_failed_cycle_is_replayed() {
        let h = seeded();
        h.source.stage_row(product("7-NULL", "Tea"));
        h.source.log_change(7, None, ChangeType::Update);
        h.target.fail_operation("upsert", InjectedFailure::Query);

        assert!(h.engine.incremental_cycle().await.is_failure());
        h.target.clear_failures();
        let outcome = h.engine.incremental_cycle().await;

        assert!(matches!(outcome, CycleOutcome::Incremental(_)));
        assert!(h.target.get("products", "7-NULL").is_some());
        assert_eq!(h.source.unprocessed_count(), 0);
    }

    #[tokio::test]
    async fn test_mark_processed_failure_after_commit() {
        let h = seeded();
        h.source.log_change(7, Some(3), ChangeType::Delete);
        h.source.fail_operation("mark_processed", InjectedFailure::Connection);

        assert!(h.engine.incremental_cycle().await.is_failure());

        // Target already committed; the entry is replayed next cycle.
        assert_eq!(h.target.unique_ids("products"), vec!["8-NULL"]);
        assert_eq!(h.source.unprocessed_count(), 1);

        h.source.clear_failures();
        assert!(matches!(h.engine.incremental_cycle().await, CycleOutcome::Incremental(_)));
        assert_eq!(h.source.unprocessed_count(), 0);
    }
}
