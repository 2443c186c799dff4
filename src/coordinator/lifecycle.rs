//! Engine lifecycle management: start, shutdown, run loop.
//!
//! This module contains the startup sequence, main run loop, and shutdown logic.

use std::time::Instant;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::traits::StorageError;

use super::{CycleOutcome, EngineState, SyncEngine};

impl SyncEngine {
    /// Start the engine.
    ///
    /// Startup flow:
    /// 1. Load persisted sync state (defaults if absent or malformed)
    /// 2. Connect to the source, retrying at a fixed delay until it answers
    /// 3. Run the initial full sync unless a previous run completed it
    ///
    /// A failed initial sync does not fail startup; the next tick retries it.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), StorageError> {
        let startup_start = Instant::now();
        info!("Starting sync engine...");

        // ========== PHASE 1: Load sync state ==========
        let loaded = self.state_store.load();
        *self.sync_state.lock() = loaded;

        // ========== PHASE 2: Connect to source ==========
        let phase_start = Instant::now();
        self.set_state(EngineState::Connecting);
        let policy = RetryConfig::source_reconnect(self.config.source_retry_delay());
        retry("source_connect", &policy, || self.source.connect()).await?;
        crate::metrics::record_startup_phase("source_connect", phase_start.elapsed());

        // ========== PHASE 3: Initial sync ==========
        self.set_state(EngineState::InitialSyncPending);
        if loaded.is_initial_sync_done {
            info!(last_sync_time = %loaded.last_sync_time, "Initial sync already done; resuming polling");
            self.set_state(EngineState::Idle);
        } else {
            let phase_start = Instant::now();
            let _guard = self.cycle_guard.lock().await;
            self.initial_sync_cycle().await;
            crate::metrics::record_startup_phase("initial_sync", phase_start.elapsed());
        }

        crate::metrics::record_startup_phase("total", startup_start.elapsed());
        info!(elapsed_ms = startup_start.elapsed().as_millis() as u64, "Sync engine started");
        Ok(())
    }

    /// Run one cycle now.
    ///
    /// Runs the initial sync if it has not completed, otherwise an
    /// incremental cycle. Returns [`CycleOutcome::Skipped`] when another
    /// cycle is in flight.
    pub async fn tick(&self) -> CycleOutcome {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            debug!("Previous cycle still running; skipping tick");
            crate::metrics::record_skipped_tick();
            return CycleOutcome::Skipped;
        };

        if self.state() == EngineState::ShuttingDown {
            return CycleOutcome::Skipped;
        }

        let initial_done = self.sync_state.lock().is_initial_sync_done;
        if initial_done {
            self.incremental_cycle().await
        } else {
            self.initial_sync_cycle().await
        }
    }

    /// Poll on `sync_interval_ms` until `cancel` fires.
    ///
    /// Cancellation is observed between ticks only; an in-flight cycle
    /// always runs to completion.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = self.config.sync_interval();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately; polling starts one period after startup.
        interval.tick().await;

        info!(interval_ms = period.as_millis() as u64, "Sync engine running");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Run loop cancelled");
                    break;
                }

                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Initiate graceful shutdown. Waits for the in-flight cycle.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let shutdown_start = Instant::now();
        info!("Initiating sync engine shutdown...");

        let _guard = self.cycle_guard.lock().await;
        self.set_state(EngineState::ShuttingDown);

        info!(
            elapsed_ms = shutdown_start.elapsed().as_millis() as u64,
            "Sync engine shutdown complete"
        );
    }
}
