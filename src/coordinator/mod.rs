// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! The [`SyncEngine`] is the orchestrator that ties together all components:
//! - the source connection (SQL Server)
//! - the target pool (PostgreSQL)
//! - the persisted sync state
//! - the change-log processor and batch upserter
//! - the event broadcaster
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected → Connecting → InitialSyncPending → InitialSyncRunning → Idle ⇄ PollingRunning
//!                                                                         ↓
//!                                                                   ShuttingDown
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cdc_sync_engine::{EngineState, EventBroadcaster, SyncEngine, SyncEngineConfig};
//! use cdc_sync_engine::storage::{MemorySource, MemoryTarget};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = SyncEngineConfig::from_file("config.json").unwrap();
//! let engine = SyncEngine::new(
//!     config,
//!     Arc::new(MemorySource::new()),
//!     Arc::new(MemoryTarget::new()),
//!     EventBroadcaster::default(),
//! );
//!
//! assert_eq!(engine.state(), EngineState::Disconnected);
//! engine.start().await.unwrap();
//! engine.run(CancellationToken::new()).await;
//! # }
//! ```

mod initial_sync;
mod lifecycle;
mod polling;
mod types;

pub use types::{CycleOutcome, EngineState, IncrementalSummary};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::error;

use crate::batching::{BatchUpserter, UpsertConfig};
use crate::config::SyncEngineConfig;
use crate::events::EventBroadcaster;
use crate::state::{StateError, SyncState, SyncStateStore};
use crate::storage::mssql::MssqlSource;
use crate::storage::postgres::{PgPoolConfig, PostgresTarget};
use crate::storage::traits::{SourceStore, StorageError, TargetStore};

/// Main sync engine coordinator.
///
/// Owns its backends, its sync state and its cycle guard; there is no
/// process-global state.
///
/// # Thread Safety
///
/// The engine is `Send + Sync`. Cycles are serialized by an async mutex,
/// so [`tick()`](Self::tick) may be called from anywhere.
pub struct SyncEngine {
    pub(super) config: SyncEngineConfig,

    /// Read side
    pub(super) source: Arc<dyn SourceStore>,

    /// Write side
    pub(super) target: Arc<dyn TargetStore>,

    /// Durable slot for `sync_state`
    pub(super) state_store: SyncStateStore,

    /// In-memory sync progress. Authoritative even when a save fails.
    pub(super) sync_state: Mutex<SyncState>,

    pub(super) events: EventBroadcaster,

    pub(super) upserter: BatchUpserter,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<EngineState>,

    /// Held for the whole of a cycle
    pub(super) cycle_guard: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    /// Create an engine over the given backends.
    ///
    /// The engine starts in `Disconnected` state. Call [`start()`](Self::start)
    /// to connect and run the initial sync.
    pub fn new(
        config: SyncEngineConfig,
        source: Arc<dyn SourceStore>,
        target: Arc<dyn TargetStore>,
        events: EventBroadcaster,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Disconnected);

        let upserter = BatchUpserter::new(
            UpsertConfig {
                table: config.target_table.clone(),
                batch_size: config.upsert_batch_size,
                throttle: config.upsert_throttle(),
                progress_every: config.progress_every_batches,
                statement_timeout: config.operation_timeout(),
            },
            events.clone(),
        );

        Self {
            state_store: SyncStateStore::new(config.state_path()),
            config,
            source,
            target,
            sync_state: Mutex::new(SyncState::default()),
            events,
            upserter,
            state: state_tx,
            state_rx,
            cycle_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Create an engine over SQL Server and PostgreSQL.
    ///
    /// The config must already be validated. No connection is opened here.
    pub fn from_config(config: SyncEngineConfig, events: EventBroadcaster) -> Result<Self, StorageError> {
        let source = MssqlSource::new(&config, events.clone());
        let target = PostgresTarget::connect_lazy(config.target_url(), &PgPoolConfig::from(&config))?;
        Ok(Self::new(config, Arc::new(source), Arc::new(target), events))
    }

    /// Get current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Snapshot of the current sync progress.
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        *self.sync_state.lock()
    }

    #[must_use]
    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    #[must_use]
    pub fn config(&self) -> &SyncEngineConfig {
        &self.config
    }

    pub(super) fn set_state(&self, state: EngineState) {
        crate::metrics::set_engine_state(&state.to_string());
        let _ = self.state.send(state);
    }

    /// Apply `advance` to the in-memory state, then persist it.
    ///
    /// A failed save is reported and otherwise ignored.
    pub(super) async fn advance_sync_state(&self, advance: impl FnOnce(SyncState) -> SyncState) {
        let next = {
            let mut state = self.sync_state.lock();
            *state = advance(*state);
            *state
        };

        // Write and rename off the runtime threads.
        let store = self.state_store.clone();
        let saved = tokio::task::spawn_blocking(move || store.save(&next))
            .await
            .unwrap_or_else(|e| Err(StateError::Task(e.to_string())));

        if let Err(e) = saved {
            error!(path = %self.state_store.path().display(), error = %e, "Failed to save sync state");
            crate::metrics::record_state_persist_failure();
            self.events.error("Failed to save sync state.", &e);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::harness;
    use super::*;
    use crate::storage::memory::MemorySource;

    #[test]
    fn test_new_engine_is_disconnected() {
        let h = harness(MemorySource::new());
        assert_eq!(h.engine.state(), EngineState::Disconnected);
        assert_eq!(h.engine.sync_state(), SyncState::default());
    }

    #[tokio::test]
    async fn test_advance_persists() {
        let h = harness(MemorySource::new());
        let now = chrono::Utc::now();

        h.engine.advance_sync_state(|s| s.initial_sync_completed(now)).await;

        let reloaded = SyncStateStore::new(h.engine.config.state_path()).load();
        assert!(reloaded.is_initial_sync_done);
        assert!(h.engine.sync_state().is_initial_sync_done);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_memory_state() {
        let h = harness(MemorySource::new());
        // Parent of the state file is a regular file.
        let blocker = h.engine.config.data_dir();
        std::fs::remove_dir_all(&blocker).ok();
        std::fs::write(&blocker, "x").unwrap();
        let mut rx = h.engine.events().subscribe();

        h.engine
            .advance_sync_state(|s| s.initial_sync_completed(chrono::Utc::now()))
            .await;

        assert!(h.engine.sync_state().is_initial_sync_done);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.message(), Some("Failed to save sync state."));
    }

    #[test]
    fn test_from_config_builds_lazily() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();

        let engine = SyncEngine::from_config(crate::config::test_config(), EventBroadcaster::default());
        assert!(engine.is_ok());
    }
}
